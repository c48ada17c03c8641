//! Crate-wide error type.
//!
//! One flat enum, `thiserror`-derived, following the convention of keeping a
//! single `Result<T>` alias for the whole crate rather than per-module error
//! types. Wire-level parse/semantic errors carry the GIST error-object
//! subcodes from spec §7 so a caller can turn them straight back into an
//! outbound Error PDU (see [`crate::wire::objects::ErrorObject`]).

use thiserror::Error;

use crate::wire::objects::ErrorClass;

/// Subcodes for [`GistError::ObjectTypeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectTypeSubcode {
    Duplicate,
    Unrecognised,
    Missing,
    Invalid,
    Untranslated,
    InvalidExtFlags,
}

/// Subcodes for [`GistError::ObjectValueError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectValueSubcode {
    IncorrectLength,
    ValueNotSupported,
    InvalidFlag,
    EmptyList,
    InvalidCookie,
    SpScpMismatch,
}

#[derive(Error, Debug)]
pub enum GistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("common header parse error at offset {offset}: {detail}")]
    CommonHeaderParseError { offset: usize, detail: String },

    #[error("GIST hop count exceeded")]
    HopLimitExceeded,

    #[error("incorrect encapsulation: {0}")]
    IncorrectEncapsulation(String),

    #[error("message incorrectly delivered: {0}")]
    IncorrectlyDeliveredMessage(String),

    #[error("no routing state for this message")]
    NoRoutingState,

    #[error("unknown NSLP-ID: {0}")]
    UnknownNslpId(u16),

    #[error("endpoint found")]
    EndpointFound,

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("object type error ({subcode:?}) at offset {offset}, type {object_type}")]
    ObjectTypeError {
        subcode: ObjectTypeSubcode,
        offset: usize,
        object_type: u16,
    },

    #[error("object value error ({subcode:?}) at offset {offset}")]
    ObjectValueError {
        subcode: ObjectValueSubcode,
        offset: usize,
    },

    #[error("invalid IP TTL")]
    InvalidIpTtl,

    #[error("MRI validation failed: {0}")]
    MriValidationFailed(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("unable to establish routing state for handle {0:?}")]
    UnableToEstablishRoutingState([u8; 16]),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GistError {
    /// Maps a wire-level parse/semantic failure to the (class, code,
    /// subcode) triple an outbound Error PDU carries (spec §7). Error
    /// codes follow the original implementation's `GIST_ERRORCODE_*`
    /// numbering (`goettingen_headers.h`) so a byte-compatible peer would
    /// recognise them. Returns `None` for errors with no wire
    /// representation — purely local or API-boundary failures that never
    /// reached the point of having an offending peer to reply to.
    pub fn as_wire_error(&self) -> Option<(ErrorClass, u8, u8)> {
        match self {
            GistError::CommonHeaderParseError { .. } => Some((ErrorClass::Permanent, 1, 0)),
            GistError::HopLimitExceeded => Some((ErrorClass::Permanent, 2, 0)),
            GistError::IncorrectEncapsulation(_) => Some((ErrorClass::Permanent, 3, 0)),
            GistError::IncorrectlyDeliveredMessage(_) => Some((ErrorClass::Permanent, 4, 0)),
            GistError::NoRoutingState => Some((ErrorClass::Permanent, 5, 0)),
            GistError::UnknownNslpId(_) => Some((ErrorClass::Permanent, 6, 0)),
            GistError::EndpointFound => Some((ErrorClass::Informational, 7, 0)),
            GistError::MessageTooLarge { .. } => Some((ErrorClass::Permanent, 8, 0)),
            GistError::ObjectTypeError { subcode, .. } => Some((ErrorClass::Permanent, 9, *subcode as u8)),
            GistError::ObjectValueError { subcode, .. } => Some((ErrorClass::Permanent, 10, *subcode as u8)),
            GistError::InvalidIpTtl => Some((ErrorClass::Permanent, 11, 0)),
            GistError::MriValidationFailed(_) => Some((ErrorClass::Permanent, 12, 0)),
            GistError::Io(_)
            | GistError::Network(_)
            | GistError::UnableToEstablishRoutingState(_)
            | GistError::Serialization(_)
            | GistError::Internal(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GistError>;
