//! GIST common header and TLV object header.
//!
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Version    |  GIST hops    |        Message length        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Signaling Application ID   |     Type      |S|R|E|Reserved |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `Message length` is in 32-bit words, counted over the whole message
//! (including this 12-byte header) — the encoder fixes it up once the
//! object sequence is known ([`crate::wire::pdu::Pdu::encode`]).

use crate::error::GistError;
use crate::wire::pdu::PduType;

/// 12-byte GIST common header (without the Q-mode magic-number preamble).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    pub version: u8,
    pub hops: u8,
    /// Message length in 32-bit words, header included.
    pub length_words: u16,
    pub nslp_id: u16,
    pub pdu_type: PduType,
    pub flags: Flags,
}

/// The three legality-constrained flag bits (spec §3 invariant 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    /// SID present in the message.
    pub s: bool,
    /// Response requested.
    pub r: bool,
    /// Explicit routing.
    pub e: bool,
}

impl Flags {
    fn encode(self) -> u8 {
        let mut b = 0u8;
        if self.s {
            b |= 1 << 7;
        }
        if self.r {
            b |= 1 << 6;
        }
        if self.e {
            b |= 1 << 5;
        }
        b
    }

    fn decode(b: u8) -> Self {
        Self {
            s: b & (1 << 7) != 0,
            r: b & (1 << 6) != 0,
            e: b & (1 << 5) != 0,
        }
    }

    /// Checks flag legality per spec §3 invariant 6.
    ///
    /// - S MUST be set on every PDU carrying a SessionID object (all PDU
    ///   types here always carry one) except MA-Hello, which carries none.
    /// - R is only meaningful on Query/Data (a response is requested);
    ///   Response/Confirm/Error MUST NOT set it.
    /// - E (explicit routing) is only legal on Query/Data.
    pub fn validate(&self, pdu_type: PduType) -> crate::Result<()> {
        use PduType::*;
        match pdu_type {
            MaHello => {
                if self.s || self.r || self.e {
                    return Err(GistError::ObjectValueError {
                        subcode: crate::error::ObjectValueSubcode::InvalidFlag,
                        offset: 0,
                    });
                }
            }
            Response | Confirm | Error => {
                if self.r {
                    return Err(GistError::ObjectValueError {
                        subcode: crate::error::ObjectValueSubcode::InvalidFlag,
                        offset: 0,
                    });
                }
            }
            Query | Data => {}
        }
        Ok(())
    }
}

impl CommonHeader {
    pub const SIZE: usize = 4;
    /// Full header size once the Signaling Application ID and flags fields
    /// are included (see [`Self::encode_full`]).
    pub const FULL_SIZE: usize = 12;

    pub fn new(pdu_type: PduType, nslp_id: u16, flags: Flags) -> Self {
        Self {
            version: crate::wire::GIST_VERSION,
            hops: 64,
            length_words: 0,
            nslp_id,
            pdu_type,
            flags,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.version;
        buf[1] = self.hops;
        buf[2..4].copy_from_slice(&self.length_words.to_be_bytes());
        buf
    }

    /// The header is logically 12 bytes; encoded in two halves because the
    /// second half (nslp_id/type/flags) needs the already-encoded PduType.
    pub fn encode_full(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[0] = self.version;
        buf[1] = self.hops;
        buf[2..4].copy_from_slice(&self.length_words.to_be_bytes());
        buf[4..6].copy_from_slice(&self.nslp_id.to_be_bytes());
        buf[6] = self.pdu_type.to_u8();
        buf[7] = self.flags.encode();
        buf
    }

    pub fn decode_full(buf: &[u8]) -> crate::Result<Self> {
        if buf.len() < 12 {
            return Err(GistError::CommonHeaderParseError {
                offset: 0,
                detail: "buffer shorter than 12-byte common header".into(),
            });
        }
        let version = buf[0];
        let hops = buf[1];
        let length_words = u16::from_be_bytes([buf[2], buf[3]]);
        let nslp_id = u16::from_be_bytes([buf[4], buf[5]]);
        let pdu_type = PduType::from_u8(buf[6]).map_err(|_| GistError::CommonHeaderParseError {
            offset: 6,
            detail: format!("unrecognised PDU type {}", buf[6]),
        })?;
        let flags = Flags::decode(buf[7]);
        flags.validate(pdu_type).map_err(|_| GistError::CommonHeaderParseError {
            offset: 7,
            detail: "illegal S/R/E flag combination for this PDU type".into(),
        })?;
        Ok(Self {
            version,
            hops,
            length_words,
            nslp_id,
            pdu_type,
            flags,
        })
    }
}

/// 4-byte TLV object header.
///
/// ```text
/// |A|B|r|r|         Type          |r|r|r|r|        Length         |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Must-understand.
    pub a: bool,
    /// Mandatory-to-forward.
    pub b: bool,
    pub object_type: u16,
    /// Length in 32-bit words, excluding this 4-byte header.
    pub length_words: u16,
}

impl ObjectHeader {
    pub const SIZE: usize = 4;

    pub fn new(object_type: u16, length_words: u16) -> Self {
        Self {
            a: true,
            b: false,
            object_type,
            length_words,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut left: u16 = self.object_type & 0x0FFF;
        if self.a {
            left |= 1 << 15;
        }
        if self.b {
            left |= 1 << 14;
        }
        let right: u16 = self.length_words & 0x0FFF;
        let mut buf = [0u8; 4];
        buf[0..2].copy_from_slice(&left.to_be_bytes());
        buf[2..4].copy_from_slice(&right.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> crate::Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(GistError::ObjectValueError {
                subcode: crate::error::ObjectValueSubcode::IncorrectLength,
                offset: 0,
            });
        }
        let left = u16::from_be_bytes([buf[0], buf[1]]);
        let right = u16::from_be_bytes([buf[2], buf[3]]);
        Ok(Self {
            a: left & (1 << 15) != 0,
            b: left & (1 << 14) != 0,
            object_type: left & 0x0FFF,
            length_words: right & 0x0FFF,
        })
    }

    pub fn value_len_bytes(&self) -> usize {
        self.length_words as usize * 4
    }
}
