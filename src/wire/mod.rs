//! Wire codec (component C1): bit-exact encode/decode of the GIST common
//! header and its TLV objects.
//!
//! Layout and constants are grounded on the original GIST-ka implementation
//! (`examples/original_source/nsis-ka/ntlp/include/goettingen_headers.h`),
//! resolving spec.md §9's "exact legal order of objects" open question in
//! favor of that concrete layout (see `DESIGN.md`).

pub mod header;
pub mod mri;
pub mod objects;
pub mod pdu;

pub use header::{CommonHeader, Flags, ObjectHeader};
pub use mri::{Direction, LooseEndMri, Mri, PathCoupledMri};
pub use objects::{
    ErrorObject, NatTraversal, NetworkLayerInfo, NslpData, Object, ObjectType, QueryCookie,
    ResponderCookie, StackConfigurationData, StackProposal,
};
pub use pdu::{Pdu, PduType};

/// Magic number prefixing a Q-mode encapsulated Query (spec §6).
pub const Q_MODE_MAGIC_NUMBER: u32 = 0x4e04_bda5;

/// GIST protocol version implemented here.
pub const GIST_VERSION: u8 = 1;

/// Maximum GIST message size accepted by the decoder (spec §4.1,
/// `MessageTooLarge`). 64 KiB comfortably covers any Query/Response/Confirm
/// in this implementation; larger Data payloads are chunked by the NSLP,
/// not by GIST.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// MA-protocol identifiers usable inside a StackProposal profile
/// (`GIST_STACK_PROTO_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum MaProtocol {
    Tcp = 1,
    Tls = 2,
    Sctp = 3,
}

impl MaProtocol {
    pub fn from_u8(v: u8) -> crate::Result<Self> {
        match v {
            1 => Ok(MaProtocol::Tcp),
            2 => Ok(MaProtocol::Tls),
            3 => Ok(MaProtocol::Sctp),
            _ => Err(crate::GistError::ObjectValueError {
                subcode: crate::error::ObjectValueSubcode::ValueNotSupported,
                offset: 0,
            }),
        }
    }
}
