//! Message Routing Information (spec §3): the routing key used by the
//! routing table (C3) and compared byte-for-byte on the wire.
//!
//! Bit layout resolved from the original GIST-ka wire diagrams
//! (`goettingen_headers.h`, `msg_routing_info_path_coupled_t` /
//! `msg_routing_info_loose_end_t`). Presence flags from the full RFC 5971
//! MRI (P/T/F/S/A/B) aren't named in spec.md's data model; we always encode
//! them as zero and ignore them on decode.

use crate::error::{GistError, ObjectValueSubcode};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    Downstream = 0,
    Upstream = 1,
}

impl Direction {
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            Direction::Upstream
        } else {
            Direction::Downstream
        }
    }

    pub fn as_bit(self) -> bool {
        matches!(self, Direction::Upstream)
    }
}

/// Routing key, tagged union over the two Message Routing Methods.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Mri {
    PathCoupled(PathCoupledMri),
    LooseEnd(LooseEndMri),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathCoupledMri {
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_prefix: u8,
    pub dst_prefix: u8,
    pub protocol: u8,
    pub ds_field: u8,
    pub flow_label: u32,
    pub spi: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub direction: Direction,
    /// Flag N: at least one NAT has already been traversed on this flow.
    pub nat_traversed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LooseEndMri {
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub direction: Direction,
    pub nat_traversed: bool,
}

const MRM_PATH_COUPLED: u8 = 0;
const MRM_LOOSE_END: u8 = 1;

fn encode_addr(addr: IpAddr, buf: &mut Vec<u8>) -> u8 {
    match addr {
        IpAddr::V4(v4) => {
            buf.extend_from_slice(&v4.octets());
            buf.extend_from_slice(&[0u8; 12]);
            4
        }
        IpAddr::V6(v6) => {
            buf.extend_from_slice(&v6.octets());
            6
        }
    }
}

fn decode_addr(ip_version: u8, buf: &[u8], offset: usize) -> crate::Result<IpAddr> {
    if buf.len() < offset + 16 {
        return Err(GistError::ObjectValueError {
            subcode: ObjectValueSubcode::IncorrectLength,
            offset,
        });
    }
    match ip_version {
        4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&buf[offset..offset + 4]);
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[offset..offset + 16]);
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        other => Err(GistError::ObjectValueError {
            subcode: ObjectValueSubcode::InvalidFlag,
            offset,
        })
        .map_err(|e| {
            tracing::debug!(ip_version = other, "invalid IP version in MRI");
            e
        }),
    }
}

impl Mri {
    pub fn direction(&self) -> Direction {
        match self {
            Mri::PathCoupled(m) => m.direction,
            Mri::LooseEnd(m) => m.direction,
        }
    }

    /// The flow's destination address, used to address a Q-mode Query
    /// when no routing state for this MRI exists yet (spec §4.2: the
    /// Query rides toward the flow's destination so Router Alert
    /// interception finds it on-path).
    pub fn dst_addr(&self) -> Option<IpAddr> {
        match self {
            Mri::PathCoupled(m) => Some(m.dst_addr),
            Mri::LooseEnd(m) => Some(m.dst_addr),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Mri::PathCoupled(m) => m.encode(),
            Mri::LooseEnd(m) => m.encode(),
        }
    }

    pub fn decode(buf: &[u8]) -> crate::Result<Self> {
        if buf.is_empty() {
            return Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::IncorrectLength,
                offset: 0,
            });
        }
        match buf[0] {
            MRM_PATH_COUPLED => Ok(Mri::PathCoupled(PathCoupledMri::decode(buf)?)),
            MRM_LOOSE_END => Ok(Mri::LooseEnd(LooseEndMri::decode(buf)?)),
            other => Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::ValueNotSupported,
                offset: 0,
            })
            .map_err(|e| {
                tracing::debug!(mrm_id = other, "unrecognised MRM-ID");
                e
            }),
        }
    }
}

impl PathCoupledMri {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(52);
        buf.push(MRM_PATH_COUPLED);
        buf.push(if self.nat_traversed { 1 << 7 } else { 0 });

        let mut addr_buf = Vec::with_capacity(32);
        let ip_version = encode_addr(self.src_addr, &mut addr_buf);
        encode_addr(self.dst_addr, &mut addr_buf);
        buf.push(ip_version << 4);
        buf.push(if self.direction.as_bit() { 1 << 4 } else { 0 });
        buf.extend_from_slice(&addr_buf);

        buf.push(self.src_prefix);
        buf.push(self.dst_prefix);
        buf.push(self.protocol);
        buf.push(self.ds_field << 2);
        buf.extend_from_slice(&self.flow_label.to_be_bytes());
        buf.extend_from_slice(&self.spi.to_be_bytes());
        buf.extend_from_slice(&self.src_port.to_be_bytes());
        buf.extend_from_slice(&self.dst_port.to_be_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> crate::Result<Self> {
        if buf.len() < 52 {
            return Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::IncorrectLength,
                offset: 0,
            });
        }
        let nat_traversed = buf[1] & (1 << 7) != 0;
        let ip_version = (buf[2] >> 4) & 0x0F;
        let direction = Direction::from_bit(buf[3] & (1 << 4) != 0);

        let src_addr = decode_addr(ip_version, buf, 4)?;
        let dst_addr = decode_addr(ip_version, buf, 20)?;

        let src_prefix = buf[36];
        let dst_prefix = buf[37];
        let protocol = buf[38];
        let ds_field = buf[39] >> 2;
        let flow_label = u32::from_be_bytes([buf[40], buf[41], buf[42], buf[43]]);
        let spi = u32::from_be_bytes([buf[44], buf[45], buf[46], buf[47]]);
        let src_port = u16::from_be_bytes([buf[48], buf[49]]);
        let dst_port = u16::from_be_bytes([buf[50], buf[51]]);

        Ok(Self {
            src_addr,
            dst_addr,
            src_prefix,
            dst_prefix,
            protocol,
            ds_field,
            flow_label,
            spi,
            src_port,
            dst_port,
            direction,
            nat_traversed,
        })
    }
}

impl LooseEndMri {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(36);
        buf.push(MRM_LOOSE_END);
        buf.push(if self.nat_traversed { 1 << 7 } else { 0 });

        let mut addr_buf = Vec::with_capacity(32);
        let ip_version = encode_addr(self.src_addr, &mut addr_buf);
        encode_addr(self.dst_addr, &mut addr_buf);
        buf.push((ip_version << 4) | if self.direction.as_bit() { 1 << 3 } else { 0 });
        buf.push(0);
        buf.extend_from_slice(&addr_buf);
        buf
    }

    fn decode(buf: &[u8]) -> crate::Result<Self> {
        if buf.len() < 36 {
            return Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::IncorrectLength,
                offset: 0,
            });
        }
        let nat_traversed = buf[1] & (1 << 7) != 0;
        let ip_version = (buf[2] >> 4) & 0x0F;
        let direction = Direction::from_bit(buf[2] & (1 << 3) != 0);
        let src_addr = decode_addr(ip_version, buf, 4)?;
        let dst_addr = decode_addr(ip_version, buf, 20)?;
        Ok(Self {
            src_addr,
            dst_addr,
            direction,
            nat_traversed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pc(direction: Direction) -> Mri {
        Mri::PathCoupled(PathCoupledMri {
            src_addr: "10.0.0.1".parse().unwrap(),
            dst_addr: "10.0.0.2".parse().unwrap(),
            src_prefix: 32,
            dst_prefix: 32,
            protocol: 17,
            ds_field: 0,
            flow_label: 0,
            spi: 0,
            src_port: 5000,
            dst_port: 6000,
            direction,
            nat_traversed: false,
        })
    }

    #[test]
    fn path_coupled_round_trips() {
        let mri = sample_pc(Direction::Downstream);
        let encoded = mri.encode();
        assert_eq!(encoded.len() % 4, 0);
        let decoded = Mri::decode(&encoded).unwrap();
        assert_eq!(decoded, mri);
    }

    #[test]
    fn loose_end_round_trips() {
        let mri = Mri::LooseEnd(LooseEndMri {
            src_addr: "2001:db8::1".parse().unwrap(),
            dst_addr: "2001:db8::2".parse().unwrap(),
            direction: Direction::Upstream,
            nat_traversed: true,
        });
        let encoded = mri.encode();
        let decoded = Mri::decode(&encoded).unwrap();
        assert_eq!(decoded, mri);
    }

    #[test]
    fn equality_is_the_routing_key_equality() {
        let a = sample_pc(Direction::Downstream);
        let b = sample_pc(Direction::Downstream);
        let c = sample_pc(Direction::Upstream);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn ipv4_padding_is_ignored_on_decode() {
        let mri = sample_pc(Direction::Downstream);
        let mut encoded = mri.encode();
        // corrupt the reserved padding bytes after the v4 src address
        encoded[8] = 0xFF;
        encoded[9] = 0xFF;
        let decoded = Mri::decode(&encoded).unwrap();
        assert_eq!(decoded, mri);
    }
}
