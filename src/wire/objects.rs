//! TLV object catalogue (spec §4.1).

use crate::common::{PeerIdentity, SessionId};
use crate::error::{GistError, ObjectTypeSubcode, ObjectValueSubcode};
use crate::wire::header::ObjectHeader;
use crate::wire::mri::Mri;
use crate::wire::MaProtocol;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ObjectType {
    Mri = 0,
    SessionId = 1,
    Nli = 2,
    StackProposal = 3,
    StackConfigurationData = 4,
    QueryCookie = 5,
    ResponderCookie = 6,
    NatTraversal = 7,
    NslpData = 8,
    Error = 9,
}

impl ObjectType {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0 => ObjectType::Mri,
            1 => ObjectType::SessionId,
            2 => ObjectType::Nli,
            3 => ObjectType::StackProposal,
            4 => ObjectType::StackConfigurationData,
            5 => ObjectType::QueryCookie,
            6 => ObjectType::ResponderCookie,
            7 => ObjectType::NatTraversal,
            8 => ObjectType::NslpData,
            9 => ObjectType::Error,
            _ => return None,
        })
    }
}

/// A single decoded/to-be-encoded TLV object.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Mri(Mri),
    SessionId(SessionId),
    Nli(NetworkLayerInfo),
    StackProposal(StackProposal),
    StackConfigurationData(StackConfigurationData),
    QueryCookie(QueryCookie),
    ResponderCookie(ResponderCookie),
    NatTraversal(NatTraversal),
    NslpData(NslpData),
    Error(ErrorObject),
    /// Unrecognised object with B=1 (mandatory-to-forward), A=0: must be
    /// carried through a hop untouched (spec §4.1).
    UnknownForwarded { object_type: u16, raw: Vec<u8> },
    /// Unrecognised object with A=0, B=0: silently dropped (spec §4.1).
    Ignored,
}

fn pad_to_word(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

fn encode_tlv(object_type: u16, a: bool, b: bool, value: &[u8], out: &mut Vec<u8>) {
    let mut padded = value.to_vec();
    pad_to_word(&mut padded);
    let header = ObjectHeader {
        a,
        b,
        object_type,
        length_words: (padded.len() / 4) as u16,
    };
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&padded);
}

impl Object {
    pub fn object_type_id(&self) -> u16 {
        match self {
            Object::Mri(_) => ObjectType::Mri as u16,
            Object::SessionId(_) => ObjectType::SessionId as u16,
            Object::Nli(_) => ObjectType::Nli as u16,
            Object::StackProposal(_) => ObjectType::StackProposal as u16,
            Object::StackConfigurationData(_) => ObjectType::StackConfigurationData as u16,
            Object::QueryCookie(_) => ObjectType::QueryCookie as u16,
            Object::ResponderCookie(_) => ObjectType::ResponderCookie as u16,
            Object::NatTraversal(_) => ObjectType::NatTraversal as u16,
            Object::NslpData(_) => ObjectType::NslpData as u16,
            Object::Error(_) => ObjectType::Error as u16,
            Object::UnknownForwarded { object_type, .. } => *object_type,
            Object::Ignored => u16::MAX,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Object::Mri(m) => encode_tlv(ObjectType::Mri as u16, true, true, &m.encode(), out),
            Object::SessionId(sid) => {
                encode_tlv(ObjectType::SessionId as u16, true, true, &sid.0, out)
            }
            Object::Nli(nli) => encode_tlv(ObjectType::Nli as u16, true, true, &nli.encode(), out),
            Object::StackProposal(sp) => {
                encode_tlv(ObjectType::StackProposal as u16, true, true, &sp.encode(), out)
            }
            Object::StackConfigurationData(scd) => encode_tlv(
                ObjectType::StackConfigurationData as u16,
                true,
                true,
                &scd.encode(),
                out,
            ),
            Object::QueryCookie(c) => {
                encode_tlv(ObjectType::QueryCookie as u16, true, true, &c.0, out)
            }
            Object::ResponderCookie(c) => {
                encode_tlv(ObjectType::ResponderCookie as u16, true, true, &c.0, out)
            }
            Object::NatTraversal(nat) => {
                encode_tlv(ObjectType::NatTraversal as u16, false, true, &nat.encode(), out)
            }
            Object::NslpData(d) => {
                encode_tlv(ObjectType::NslpData as u16, true, true, &d.0, out)
            }
            Object::Error(e) => encode_tlv(ObjectType::Error as u16, true, true, &e.encode(), out),
            Object::UnknownForwarded { object_type, raw } => {
                encode_tlv(*object_type, false, true, raw, out)
            }
            Object::Ignored => {}
        }
    }

    /// Decodes one object starting at `buf[0]`. Returns the object and the
    /// number of bytes consumed (header + padded value).
    pub fn decode(buf: &[u8], offset: usize) -> crate::Result<(Self, usize)> {
        let header = ObjectHeader::decode(buf)?;
        let value_len = header.value_len_bytes();
        let total = ObjectHeader::SIZE + value_len;
        if buf.len() < total {
            return Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::IncorrectLength,
                offset,
            });
        }
        let value = &buf[ObjectHeader::SIZE..total];

        let object = match ObjectType::from_u16(header.object_type) {
            Some(ObjectType::Mri) => Object::Mri(Mri::decode(value)?),
            Some(ObjectType::SessionId) => {
                if value.len() < 16 {
                    return Err(GistError::ObjectValueError {
                        subcode: ObjectValueSubcode::IncorrectLength,
                        offset,
                    });
                }
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&value[..16]);
                Object::SessionId(SessionId(bytes))
            }
            Some(ObjectType::Nli) => Object::Nli(NetworkLayerInfo::decode(value)?),
            Some(ObjectType::StackProposal) => Object::StackProposal(StackProposal::decode(value)?),
            Some(ObjectType::StackConfigurationData) => {
                Object::StackConfigurationData(StackConfigurationData::decode(value)?)
            }
            Some(ObjectType::QueryCookie) => Object::QueryCookie(QueryCookie(value.to_vec())),
            Some(ObjectType::ResponderCookie) => {
                Object::ResponderCookie(ResponderCookie(value.to_vec()))
            }
            Some(ObjectType::NatTraversal) => Object::NatTraversal(NatTraversal::decode(value)?),
            Some(ObjectType::NslpData) => Object::NslpData(NslpData(value.to_vec())),
            Some(ObjectType::Error) => Object::Error(ErrorObject::decode(value)?),
            None => {
                if header.a {
                    return Err(GistError::ObjectTypeError {
                        subcode: ObjectTypeSubcode::Unrecognised,
                        offset,
                        object_type: header.object_type,
                    });
                } else if header.b {
                    Object::UnknownForwarded {
                        object_type: header.object_type,
                        raw: value.to_vec(),
                    }
                } else {
                    Object::Ignored
                }
            }
        };
        Ok((object, total))
    }
}

/// Network-Layer Information (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkLayerInfo {
    pub peer_identity: PeerIdentity,
    pub interface_address: IpAddr,
    pub routing_state_validity_time: Duration,
    pub ip_ttl: u8,
}

impl NetworkLayerInfo {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.peer_identity.0.len() as u8);
        buf.push(self.ip_ttl);
        let ip_version: u8 = if self.interface_address.is_ipv4() { 4 } else { 6 };
        buf.push(ip_version << 4);
        buf.push(0);
        buf.extend_from_slice(&(self.routing_state_validity_time.as_millis() as u32).to_be_bytes());
        buf.extend_from_slice(&self.peer_identity.0);
        pad_to_word(&mut buf);
        match self.interface_address {
            IpAddr::V4(v4) => buf.extend_from_slice(&v4.octets()),
            IpAddr::V6(v6) => buf.extend_from_slice(&v6.octets()),
        }
        buf
    }

    fn decode(value: &[u8]) -> crate::Result<Self> {
        if value.len() < 8 {
            return Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::IncorrectLength,
                offset: 0,
            });
        }
        let pi_len = value[0] as usize;
        let ip_ttl = value[1];
        let ip_version = value[2] >> 4;
        let routing_state_validity_time =
            Duration::from_millis(u32::from_be_bytes([value[4], value[5], value[6], value[7]]) as u64);

        let pi_start = 8;
        let pi_end = pi_start + pi_len;
        if value.len() < pi_end {
            return Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::IncorrectLength,
                offset: pi_start,
            });
        }
        let peer_identity = PeerIdentity(value[pi_start..pi_end].to_vec());

        let mut addr_start = pi_end;
        while addr_start % 4 != 0 {
            addr_start += 1;
        }
        let addr_len = if ip_version == 4 { 4 } else { 16 };
        if value.len() < addr_start + addr_len {
            return Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::IncorrectLength,
                offset: addr_start,
            });
        }
        let interface_address = if ip_version == 4 {
            let mut o = [0u8; 4];
            o.copy_from_slice(&value[addr_start..addr_start + 4]);
            IpAddr::from(o)
        } else {
            let mut o = [0u8; 16];
            o.copy_from_slice(&value[addr_start..addr_start + 16]);
            IpAddr::from(o)
        };

        Ok(Self {
            peer_identity,
            interface_address,
            routing_state_validity_time,
            ip_ttl,
        })
    }
}

/// An ordered list of MA-protocol profiles (spec §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackProposal {
    pub profiles: Vec<Vec<MaProtocol>>,
}

impl StackProposal {
    pub fn single(protocol: MaProtocol) -> Self {
        Self { profiles: vec![vec![protocol]] }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.profiles.len() as u8, 0, 0, 0];
        for profile in &self.profiles {
            let mut entry = vec![profile.len() as u8, 0, 0, 0];
            for p in profile {
                entry.push(*p as u8);
            }
            pad_to_word(&mut entry);
            buf.extend_from_slice(&entry);
        }
        buf
    }

    fn decode(value: &[u8]) -> crate::Result<Self> {
        if value.len() < 4 {
            return Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::EmptyList,
                offset: 0,
            });
        }
        let prof_count = value[0] as usize;
        let mut profiles = Vec::with_capacity(prof_count);
        let mut cursor = 4;
        for _ in 0..prof_count {
            if value.len() < cursor + 4 {
                return Err(GistError::ObjectValueError {
                    subcode: ObjectValueSubcode::IncorrectLength,
                    offset: cursor,
                });
            }
            let count = value[cursor] as usize;
            cursor += 4;
            let mut protocols = Vec::with_capacity(count);
            for i in 0..count {
                if value.len() <= cursor + i {
                    return Err(GistError::ObjectValueError {
                        subcode: ObjectValueSubcode::IncorrectLength,
                        offset: cursor + i,
                    });
                }
                protocols.push(MaProtocol::from_u8(value[cursor + i])?);
            }
            cursor += count;
            while cursor % 4 != 0 {
                cursor += 1;
            }
            profiles.push(protocols);
        }
        if profiles.is_empty() {
            return Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::EmptyList,
                offset: 0,
            });
        }
        Ok(Self { profiles })
    }
}

/// Stack Configuration Data: MA-hold-time plus the profile options
/// accompanying a Confirm that binds a messaging association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfigurationData {
    pub ma_hold_time: Duration,
    pub options: Vec<MaProtocol>,
}

impl StackConfigurationData {
    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.options.len() as u8, 0, 0, 0];
        buf.extend_from_slice(&(self.ma_hold_time.as_secs() as u32).to_be_bytes());
        for opt in &self.options {
            buf.push(*opt as u8);
        }
        pad_to_word(&mut buf);
        buf
    }

    fn decode(value: &[u8]) -> crate::Result<Self> {
        if value.len() < 8 {
            return Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::IncorrectLength,
                offset: 0,
            });
        }
        let hl_cnt = value[0] as usize;
        let ma_hold_time =
            Duration::from_secs(u32::from_be_bytes([value[4], value[5], value[6], value[7]]) as u64);
        let mut options = Vec::with_capacity(hl_cnt);
        for i in 0..hl_cnt {
            let idx = 8 + i;
            if value.len() <= idx {
                return Err(GistError::ObjectValueError {
                    subcode: ObjectValueSubcode::IncorrectLength,
                    offset: idx,
                });
            }
            options.push(MaProtocol::from_u8(value[idx])?);
        }
        Ok(Self { ma_hold_time, options })
    }
}

/// Querier-chosen nonce, echoed verbatim (spec §3 invariant 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCookie(pub Vec<u8>);

/// Stateless, self-authenticating Responder Cookie (spec §3 invariant 4,
/// §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderCookie(pub Vec<u8>);

/// NAT-Traversal object (spec §4.8).
#[derive(Debug, Clone, PartialEq)]
pub struct NatTraversal {
    pub nat_count: u8,
    pub original_mri: Mri,
}

impl NatTraversal {
    fn encode(&self) -> Vec<u8> {
        let mri_bytes = self.original_mri.encode();
        let mut buf = vec![
            (mri_bytes.len() / 4) as u8,
            0,
            self.nat_count,
            0,
        ];
        buf.extend_from_slice(&mri_bytes);
        buf
    }

    fn decode(value: &[u8]) -> crate::Result<Self> {
        if value.len() < 4 {
            return Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::IncorrectLength,
                offset: 0,
            });
        }
        let nat_count = value[2];
        let original_mri = Mri::decode(&value[4..])?;
        Ok(Self { nat_count, original_mri })
    }
}

/// Opaque NSLP payload carried by Query (piggyback), Data, and Confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NslpData(pub Vec<u8>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorClass {
    Informational = 0,
    Success = 1,
    Protocol = 2,
    Transient = 3,
    Permanent = 4,
}

impl ErrorClass {
    fn from_u8(v: u8) -> crate::Result<Self> {
        Ok(match v {
            0 => ErrorClass::Informational,
            1 => ErrorClass::Success,
            2 => ErrorClass::Protocol,
            3 => ErrorClass::Transient,
            4 => ErrorClass::Permanent,
            _ => {
                return Err(GistError::ObjectValueError {
                    subcode: ObjectValueSubcode::ValueNotSupported,
                    offset: 0,
                })
            }
        })
    }
}

/// Error PDU payload (spec §7): class, code, optional subcode, and a copy
/// of the offending common header (+ MRI when relevant).
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorObject {
    pub class: ErrorClass,
    pub code: u8,
    pub subcode: u8,
    pub offending_header: [u8; 12],
    pub offending_mri: Option<Mri>,
}

impl ErrorObject {
    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.class as u8, self.code, self.subcode, 0];
        buf.extend_from_slice(&self.offending_header);
        if let Some(mri) = &self.offending_mri {
            buf.extend_from_slice(&mri.encode());
        }
        buf
    }

    fn decode(value: &[u8]) -> crate::Result<Self> {
        if value.len() < 16 {
            return Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::IncorrectLength,
                offset: 0,
            });
        }
        let class = ErrorClass::from_u8(value[0])?;
        let code = value[1];
        let subcode = value[2];
        let mut offending_header = [0u8; 12];
        offending_header.copy_from_slice(&value[4..16]);
        let offending_mri = if value.len() > 16 {
            Some(Mri::decode(&value[16..])?)
        } else {
            None
        };
        Ok(Self {
            class,
            code,
            subcode,
            offending_header,
            offending_mri,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::mri::{Direction, PathCoupledMri};

    fn sample_mri() -> Mri {
        Mri::PathCoupled(PathCoupledMri {
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
        })
    }

    #[test]
    fn nli_round_trips_ipv4() {
        let nli = NetworkLayerInfo {
            peer_identity: PeerIdentity(vec![1, 2, 3, 4, 5]),
            interface_address: "192.0.2.1".parse().unwrap(),
            routing_state_validity_time: Duration::from_secs(90),
            ip_ttl: 64,
        };
        let mut out = Vec::new();
        Object::Nli(nli.clone()).encode(&mut out);
        let (decoded, consumed) = Object::decode(&out, 0).unwrap();
        assert_eq!(consumed, out.len());
        assert_eq!(decoded, Object::Nli(nli));
    }

    #[test]
    fn stack_proposal_round_trips() {
        let sp = StackProposal {
            profiles: vec![vec![MaProtocol::Tcp], vec![MaProtocol::Tls, MaProtocol::Sctp]],
        };
        let mut out = Vec::new();
        Object::StackProposal(sp.clone()).encode(&mut out);
        let (decoded, _) = Object::decode(&out, 0).unwrap();
        assert_eq!(decoded, Object::StackProposal(sp));
    }

    #[test]
    fn nat_traversal_round_trips() {
        let nat = NatTraversal { nat_count: 1, original_mri: sample_mri() };
        let mut out = Vec::new();
        Object::NatTraversal(nat.clone()).encode(&mut out);
        let (decoded, _) = Object::decode(&out, 0).unwrap();
        assert_eq!(decoded, Object::NatTraversal(nat));
    }

    #[test]
    fn error_object_round_trips() {
        let err = ErrorObject {
            class: ErrorClass::Protocol,
            code: 2,
            subcode: 0,
            offending_header: [0u8; 12],
            offending_mri: Some(sample_mri()),
        };
        let mut out = Vec::new();
        Object::Error(err.clone()).encode(&mut out);
        let (decoded, _) = Object::decode(&out, 0).unwrap();
        assert_eq!(decoded, Object::Error(err));
    }

    #[test]
    fn unrecognised_mandatory_object_is_rejected() {
        // A=1 (must-understand), unknown type 4000
        let header = ObjectHeader { a: true, b: false, object_type: 4000, length_words: 0 };
        let buf = header.encode().to_vec();
        assert!(Object::decode(&buf, 0).is_err());
    }

    #[test]
    fn unrecognised_forwardable_object_survives_untouched() {
        // A=0,B=1
        let header = ObjectHeader { a: false, b: true, object_type: 4000, length_words: 1 };
        let mut buf = header.encode().to_vec();
        buf.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let (decoded, consumed) = Object::decode(&buf, 0).unwrap();
        assert_eq!(consumed, buf.len());
        match decoded {
            Object::UnknownForwarded { object_type, raw } => {
                assert_eq!(object_type, 4000);
                assert_eq!(raw, vec![0xAA, 0xBB, 0xCC, 0xDD]);
            }
            _ => panic!("expected UnknownForwarded"),
        }
    }

    #[test]
    fn object_value_overrun_is_rejected() {
        let header = ObjectHeader { a: true, b: true, object_type: ObjectType::NslpData as u16, length_words: 10 };
        let buf = header.encode().to_vec(); // header claims 40 bytes of value but none follow
        assert!(Object::decode(&buf, 0).is_err());
    }
}
