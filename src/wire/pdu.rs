//! GIST PDU: common header plus an ordered object sequence (spec §4.1).

use crate::error::GistError;
use crate::wire::header::{CommonHeader, Flags};
use crate::wire::objects::Object;
use crate::wire::MAX_MESSAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PduType {
    Query = 0,
    Response = 1,
    Confirm = 2,
    Data = 3,
    Error = 4,
    MaHello = 5,
}

impl PduType {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> crate::Result<Self> {
        Ok(match v {
            0 => PduType::Query,
            1 => PduType::Response,
            2 => PduType::Confirm,
            3 => PduType::Data,
            4 => PduType::Error,
            5 => PduType::MaHello,
            other => {
                return Err(GistError::CommonHeaderParseError {
                    offset: 6,
                    detail: format!("unrecognised PDU type {other}"),
                })
            }
        })
    }
}

/// A complete GIST message: common header plus its ordered objects.
///
/// Object order on the wire is the concrete layout resolved from the
/// original implementation (see `DESIGN.md`): MRI and SessionId first when
/// present, then NLI, then the PDU-type-specific objects, Error last.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub header: CommonHeader,
    pub objects: Vec<Object>,
}

impl Pdu {
    pub fn new(pdu_type: PduType, nslp_id: u16, flags: Flags, objects: Vec<Object>) -> Self {
        Self {
            header: CommonHeader::new(pdu_type, nslp_id, flags),
            objects,
        }
    }

    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        let mut body = Vec::new();
        for object in &self.objects {
            object.encode(&mut body);
        }

        let total_len = CommonHeader::FULL_SIZE + body.len();
        if total_len > MAX_MESSAGE_SIZE {
            return Err(GistError::MessageTooLarge {
                size: total_len,
                max: MAX_MESSAGE_SIZE,
            });
        }
        if total_len % 4 != 0 {
            return Err(GistError::Internal("PDU body not word-aligned".into()));
        }

        let mut header = self.header;
        header.length_words = (total_len / 4) as u16;

        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(&header.encode_full());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decodes a full message, hop-limit and declared-length checks included
    /// (spec §4.1 edge cases: truncated header, overrunning object length,
    /// inconsistent declared length).
    pub fn decode(buf: &[u8]) -> crate::Result<Self> {
        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(GistError::MessageTooLarge {
                size: buf.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let header = CommonHeader::decode_full(buf)?;
        if header.hops == 0 {
            return Err(GistError::HopLimitExceeded);
        }

        let declared_len = header.length_words as usize * 4;
        if declared_len != buf.len() {
            return Err(GistError::CommonHeaderParseError {
                offset: 2,
                detail: format!(
                    "declared length {declared_len} does not match received {} bytes",
                    buf.len()
                ),
            });
        }

        let mut objects = Vec::new();
        let mut offset = 12;
        while offset < buf.len() {
            let (object, consumed) = Object::decode(&buf[offset..], offset)?;
            if consumed == 0 {
                return Err(GistError::Internal("zero-length object decode".into()));
            }
            if !matches!(object, Object::Ignored) {
                objects.push(object);
            }
            offset += consumed;
        }
        if offset != buf.len() {
            return Err(GistError::CommonHeaderParseError {
                offset,
                detail: "object sequence overruns declared message length".into(),
            });
        }

        Ok(Self { header, objects })
    }

    pub fn mri(&self) -> Option<&crate::wire::Mri> {
        self.objects.iter().find_map(|o| match o {
            Object::Mri(m) => Some(m),
            _ => None,
        })
    }

    pub fn session_id(&self) -> Option<&crate::common::SessionId> {
        self.objects.iter().find_map(|o| match o {
            Object::SessionId(s) => Some(s),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SessionId;
    use crate::wire::mri::{Direction, PathCoupledMri};
    use crate::wire::Mri;

    fn sample_objects() -> Vec<Object> {
        vec![
            Object::Mri(Mri::PathCoupled(PathCoupledMri {
                src_addr: "10.0.0.1".parse().unwrap(),
                dst_addr: "10.0.0.2".parse().unwrap(),
                src_prefix: 32,
                dst_prefix: 32,
                protocol: 17,
                ds_field: 0,
                flow_label: 0,
                spi: 0,
                src_port: 1,
                dst_port: 2,
                direction: Direction::Downstream,
                nat_traversed: false,
            })),
            Object::SessionId(SessionId([7u8; 16])),
        ]
    }

    #[test]
    fn query_round_trips() {
        let pdu = Pdu::new(
            PduType::Query,
            crate::common::NSLP_ID_NATFW,
            Flags { s: true, r: true, e: false },
            sample_objects(),
        );
        let encoded = pdu.encode().unwrap();
        let decoded = Pdu::decode(&encoded).unwrap();
        assert_eq!(decoded.header.pdu_type, PduType::Query);
        assert_eq!(decoded.mri(), pdu.mri());
        assert_eq!(decoded.session_id(), pdu.session_id());
    }

    #[test]
    fn hop_limit_of_zero_is_rejected() {
        let mut pdu = Pdu::new(
            PduType::Data,
            crate::common::NSLP_ID_QOS,
            Flags::default(),
            sample_objects(),
        );
        pdu.header.hops = 0;
        let mut encoded = pdu.encode().unwrap();
        encoded[1] = 0;
        assert!(matches!(Pdu::decode(&encoded), Err(GistError::HopLimitExceeded)));
    }

    #[test]
    fn truncated_message_is_rejected() {
        let pdu = Pdu::new(PduType::Data, 1, Flags::default(), sample_objects());
        let encoded = pdu.encode().unwrap();
        let truncated = &encoded[..encoded.len() - 4];
        assert!(Pdu::decode(truncated).is_err());
    }

    #[test]
    fn overrunning_object_length_is_rejected() {
        let pdu = Pdu::new(PduType::Data, 1, Flags::default(), sample_objects());
        let mut encoded = pdu.encode().unwrap();
        // claim a larger message length than actually present
        let bogus_len = (encoded.len() / 4 + 4) as u16;
        encoded[2..4].copy_from_slice(&bogus_len.to_be_bytes());
        assert!(Pdu::decode(&encoded).is_err());
    }
}
