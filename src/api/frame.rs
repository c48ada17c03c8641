//! UDS API frame encoding (spec §6 supplement).
//!
//! Field layout resolved from the original GIST-ka API structs
//! (`api_send_msg`, `api_recv_msg`, `api_msg_status`, `api_nw_notification`,
//! `api_state_lifetime`, `api_routing_state`). Hand-rolled fixed-field
//! binary, matched one-to-one the way the wire codec (C1) is, since this
//! crosses a C-ABI-shaped boundary; internal task-to-task messages use
//! `bincode` instead (see `concurrency`).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::common::{NslpId, SessionId};
use crate::error::GistError;
use crate::wire::{Direction, Mri};

fn put_bool(buf: &mut Vec<u8>, v: bool) {
    buf.push(v as u8);
}

fn get_bool(buf: &[u8], offset: &mut usize) -> crate::Result<bool> {
    let b = *buf.get(*offset).ok_or_else(too_short)?;
    *offset += 1;
    Ok(b != 0)
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn get_bytes(buf: &[u8], offset: &mut usize) -> crate::Result<Vec<u8>> {
    let len = get_u32(buf, offset)? as usize;
    let end = *offset + len;
    let slice = buf.get(*offset..end).ok_or_else(too_short)?.to_vec();
    *offset = end;
    Ok(slice)
}

fn get_u8(buf: &[u8], offset: &mut usize) -> crate::Result<u8> {
    let v = *buf.get(*offset).ok_or_else(too_short)?;
    *offset += 1;
    Ok(v)
}

fn get_u16(buf: &[u8], offset: &mut usize) -> crate::Result<u16> {
    let end = *offset + 2;
    let slice = buf.get(*offset..end).ok_or_else(too_short)?;
    let v = u16::from_be_bytes([slice[0], slice[1]]);
    *offset = end;
    Ok(v)
}

fn get_u32(buf: &[u8], offset: &mut usize) -> crate::Result<u32> {
    let end = *offset + 4;
    let slice = buf.get(*offset..end).ok_or_else(too_short)?;
    let v = u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]);
    *offset = end;
    Ok(v)
}

fn get_array16(buf: &[u8], offset: &mut usize) -> crate::Result<[u8; 16]> {
    let end = *offset + 16;
    let slice = buf.get(*offset..end).ok_or_else(too_short)?;
    let mut out = [0u8; 16];
    out.copy_from_slice(slice);
    *offset = end;
    Ok(out)
}

fn put_ip(buf: &mut Vec<u8>, addr: IpAddr) {
    match addr {
        IpAddr::V4(v4) => {
            buf.push(4);
            buf.extend_from_slice(&v4.octets());
            buf.extend_from_slice(&[0u8; 12]);
        }
        IpAddr::V6(v6) => {
            buf.push(6);
            buf.extend_from_slice(&v6.octets());
        }
    }
}

fn get_ip(buf: &[u8], offset: &mut usize) -> crate::Result<IpAddr> {
    let version = get_u8(buf, offset)?;
    let octets = get_array16(buf, offset)?;
    Ok(match version {
        4 => {
            let mut v4 = [0u8; 4];
            v4.copy_from_slice(&octets[..4]);
            IpAddr::V4(Ipv4Addr::from(v4))
        }
        _ => IpAddr::V6(Ipv6Addr::from(octets)),
    })
}

fn too_short() -> GistError {
    GistError::Serialization("UDS API frame truncated".into())
}

fn put_direction(buf: &mut Vec<u8>, d: Direction) {
    buf.push(d.as_bit() as u8);
}

fn get_direction(buf: &[u8], offset: &mut usize) -> crate::Result<Direction> {
    let bit = get_u8(buf, offset)? != 0;
    Ok(Direction::from_bit(bit))
}

fn put_mri(buf: &mut Vec<u8>, mri: &Mri) {
    put_bytes(buf, &mri.encode());
}

fn get_mri(buf: &[u8], offset: &mut usize) -> crate::Result<Mri> {
    let bytes = get_bytes(buf, offset)?;
    Mri::decode(&bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkNotificationType {
    LastNode = 0,
    RoutingStateChange = 1,
}

impl NetworkNotificationType {
    fn from_u8(v: u8) -> crate::Result<Self> {
        Ok(match v {
            0 => Self::LastNode,
            1 => Self::RoutingStateChange,
            other => return Err(GistError::Serialization(format!("unknown notification kind {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendMessageFrame {
    pub nslp_id: NslpId,
    pub sid: SessionId,
    pub reliability: bool,
    pub security: bool,
    pub local_processing: bool,
    pub install_routing_state: bool,
    pub timeout: u32,
    pub ip_ttl: u8,
    pub gist_hop_count: u8,
    pub nslp_message_handle: [u8; 16],
    pub sii_handle: IpAddr,
    pub nslp_data: Vec<u8>,
    pub mri: Mri,
}

impl SendMessageFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.nslp_id.to_be_bytes());
        buf.extend_from_slice(&self.sid.0);
        put_bool(&mut buf, self.reliability);
        put_bool(&mut buf, self.security);
        put_bool(&mut buf, self.local_processing);
        put_bool(&mut buf, self.install_routing_state);
        buf.extend_from_slice(&self.timeout.to_be_bytes());
        buf.push(self.ip_ttl);
        buf.push(self.gist_hop_count);
        buf.extend_from_slice(&self.nslp_message_handle);
        put_ip(&mut buf, self.sii_handle);
        put_bytes(&mut buf, &self.nslp_data);
        put_mri(&mut buf, &self.mri);
        buf
    }

    pub fn decode(buf: &[u8]) -> crate::Result<Self> {
        let mut offset = 0;
        let nslp_id = get_u16(buf, &mut offset)?;
        let sid = SessionId(get_array16(buf, &mut offset)?);
        let reliability = get_bool(buf, &mut offset)?;
        let security = get_bool(buf, &mut offset)?;
        let local_processing = get_bool(buf, &mut offset)?;
        let install_routing_state = get_bool(buf, &mut offset)?;
        let timeout = get_u32(buf, &mut offset)?;
        let ip_ttl = get_u8(buf, &mut offset)?;
        let gist_hop_count = get_u8(buf, &mut offset)?;
        let nslp_message_handle = get_array16(buf, &mut offset)?;
        let sii_handle = get_ip(buf, &mut offset)?;
        let nslp_data = get_bytes(buf, &mut offset)?;
        let mri = get_mri(buf, &mut offset)?;
        Ok(Self {
            nslp_id,
            sid,
            reliability,
            security,
            local_processing,
            install_routing_state,
            timeout,
            ip_ttl,
            gist_hop_count,
            nslp_message_handle,
            sii_handle,
            nslp_data,
            mri,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecvMessageFrame {
    pub nslp_id: NslpId,
    pub sid: SessionId,
    pub reliability: bool,
    pub security: bool,
    pub explicitly_routed: bool,
    pub no_gist_state: bool,
    pub ip_distance: u32,
    pub ip_ttl: u8,
    pub gist_hop_count: u8,
    pub nslp_message_handle: [u8; 16],
    pub sii_handle: IpAddr,
    pub nslp_data: Vec<u8>,
    pub mri: Mri,
}

impl RecvMessageFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.nslp_id.to_be_bytes());
        buf.extend_from_slice(&self.sid.0);
        put_bool(&mut buf, self.reliability);
        put_bool(&mut buf, self.security);
        put_bool(&mut buf, self.explicitly_routed);
        put_bool(&mut buf, self.no_gist_state);
        buf.extend_from_slice(&self.ip_distance.to_be_bytes());
        buf.push(self.ip_ttl);
        buf.push(self.gist_hop_count);
        buf.extend_from_slice(&self.nslp_message_handle);
        put_ip(&mut buf, self.sii_handle);
        put_bytes(&mut buf, &self.nslp_data);
        put_mri(&mut buf, &self.mri);
        buf
    }

    pub fn decode(buf: &[u8]) -> crate::Result<Self> {
        let mut offset = 0;
        let nslp_id = get_u16(buf, &mut offset)?;
        let sid = SessionId(get_array16(buf, &mut offset)?);
        let reliability = get_bool(buf, &mut offset)?;
        let security = get_bool(buf, &mut offset)?;
        let explicitly_routed = get_bool(buf, &mut offset)?;
        let no_gist_state = get_bool(buf, &mut offset)?;
        let ip_distance = get_u32(buf, &mut offset)?;
        let ip_ttl = get_u8(buf, &mut offset)?;
        let gist_hop_count = get_u8(buf, &mut offset)?;
        let nslp_message_handle = get_array16(buf, &mut offset)?;
        let sii_handle = get_ip(buf, &mut offset)?;
        let nslp_data = get_bytes(buf, &mut offset)?;
        let mri = get_mri(buf, &mut offset)?;
        Ok(Self {
            nslp_id,
            sid,
            reliability,
            security,
            explicitly_routed,
            no_gist_state,
            ip_distance,
            ip_ttl,
            gist_hop_count,
            nslp_message_handle,
            sii_handle,
            nslp_data,
            mri,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageStatusFrame {
    pub reliability: bool,
    pub security: bool,
    pub error_type: u8,
    pub nslp_message_handle: [u8; 16],
}

impl MessageStatusFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bool(&mut buf, self.reliability);
        put_bool(&mut buf, self.security);
        buf.push(self.error_type);
        buf.extend_from_slice(&self.nslp_message_handle);
        buf
    }

    pub fn decode(buf: &[u8]) -> crate::Result<Self> {
        let mut offset = 0;
        let reliability = get_bool(buf, &mut offset)?;
        let security = get_bool(buf, &mut offset)?;
        let error_type = get_u8(buf, &mut offset)?;
        let nslp_message_handle = get_array16(buf, &mut offset)?;
        Ok(Self { reliability, security, error_type, nslp_message_handle })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkNotificationFrame {
    pub sid: SessionId,
    pub kind: NetworkNotificationType,
}

impl NetworkNotificationFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.sid.0);
        buf.push(self.kind as u8);
        buf
    }

    pub fn decode(buf: &[u8]) -> crate::Result<Self> {
        let mut offset = 0;
        let sid = SessionId(get_array16(buf, &mut offset)?);
        let kind = NetworkNotificationType::from_u8(get_u8(buf, &mut offset)?)?;
        Ok(Self { sid, kind })
    }
}

/// Sets (`Some`) or queries (`None`) a routing entry's desired soft-state
/// lifetime (original `api_state_lifetime`, not named in spec.md's prose —
/// added as ambient control-plane plumbing, see `DESIGN.md`).
#[derive(Debug, Clone, PartialEq)]
pub struct StateLifetimeFrame {
    pub mri: Mri,
    pub nslp_id: NslpId,
    pub direction: Direction,
    pub requested_lifetime_ms: Option<u32>,
}

impl StateLifetimeFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.nslp_id.to_be_bytes());
        put_direction(&mut buf, self.direction);
        match self.requested_lifetime_ms {
            Some(ms) => {
                put_bool(&mut buf, true);
                buf.extend_from_slice(&ms.to_be_bytes());
            }
            None => put_bool(&mut buf, false),
        }
        put_mri(&mut buf, &self.mri);
        buf
    }

    pub fn decode(buf: &[u8]) -> crate::Result<Self> {
        let mut offset = 0;
        let nslp_id = get_u16(buf, &mut offset)?;
        let direction = get_direction(buf, &mut offset)?;
        let has_value = get_bool(buf, &mut offset)?;
        let requested_lifetime_ms = if has_value { Some(get_u32(buf, &mut offset)?) } else { None };
        let mri = get_mri(buf, &mut offset)?;
        Ok(Self { mri, nslp_id, direction, requested_lifetime_ms })
    }
}

/// Requests an urgency-flagged refresh of routing state for a given
/// (MRI, NSLP-ID, direction) (original `api_routing_state`).
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingStateFrame {
    pub mri: Mri,
    pub nslp_id: NslpId,
    pub direction: Direction,
    pub urgent: bool,
}

impl RoutingStateFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.nslp_id.to_be_bytes());
        put_direction(&mut buf, self.direction);
        put_bool(&mut buf, self.urgent);
        put_mri(&mut buf, &self.mri);
        buf
    }

    pub fn decode(buf: &[u8]) -> crate::Result<Self> {
        let mut offset = 0;
        let nslp_id = get_u16(buf, &mut offset)?;
        let direction = get_direction(buf, &mut offset)?;
        let urgent = get_bool(buf, &mut offset)?;
        let mri = get_mri(buf, &mut offset)?;
        Ok(Self { mri, nslp_id, direction, urgent })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    SendMessage = 0,
    RecvMessage = 1,
    MessageStatus = 2,
    NetworkNotification = 3,
    StateLifetime = 4,
    RoutingState = 5,
}

impl FrameKind {
    fn from_u8(v: u8) -> crate::Result<Self> {
        Ok(match v {
            0 => Self::SendMessage,
            1 => Self::RecvMessage,
            2 => Self::MessageStatus,
            3 => Self::NetworkNotification,
            4 => Self::StateLifetime,
            5 => Self::RoutingState,
            other => return Err(GistError::Serialization(format!("unknown UDS frame kind {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiFrame {
    SendMessage(SendMessageFrame),
    RecvMessage(RecvMessageFrame),
    MessageStatus(MessageStatusFrame),
    NetworkNotification(NetworkNotificationFrame),
    StateLifetime(StateLifetimeFrame),
    RoutingState(RoutingStateFrame),
}

impl ApiFrame {
    /// Wraps the frame with a `crc32fast` integrity check — the one place
    /// this crate uses CRC32, since the UDS API boundary is the teacher's
    /// stand-in for "the outer surface that still gets ambient integrity
    /// checking even though the GIST wire format itself has none" (§6).
    pub fn encode(&self) -> Vec<u8> {
        let (kind, payload) = match self {
            ApiFrame::SendMessage(f) => (FrameKind::SendMessage, f.encode()),
            ApiFrame::RecvMessage(f) => (FrameKind::RecvMessage, f.encode()),
            ApiFrame::MessageStatus(f) => (FrameKind::MessageStatus, f.encode()),
            ApiFrame::NetworkNotification(f) => (FrameKind::NetworkNotification, f.encode()),
            ApiFrame::StateLifetime(f) => (FrameKind::StateLifetime, f.encode()),
            ApiFrame::RoutingState(f) => (FrameKind::RoutingState, f.encode()),
        };
        let mut body = Vec::with_capacity(1 + payload.len());
        body.push(kind as u8);
        body.extend_from_slice(&payload);

        let checksum = crc32fast::hash(&body);
        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&checksum.to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    pub fn decode(buf: &[u8]) -> crate::Result<Self> {
        if buf.len() < 9 {
            return Err(too_short());
        }
        let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let checksum = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let body = buf.get(8..8 + body_len).ok_or_else(too_short)?;
        if crc32fast::hash(body) != checksum {
            return Err(GistError::Serialization("UDS API frame checksum mismatch".into()));
        }
        let kind = FrameKind::from_u8(body[0])?;
        let payload = &body[1..];
        Ok(match kind {
            FrameKind::SendMessage => ApiFrame::SendMessage(SendMessageFrame::decode(payload)?),
            FrameKind::RecvMessage => ApiFrame::RecvMessage(RecvMessageFrame::decode(payload)?),
            FrameKind::MessageStatus => ApiFrame::MessageStatus(MessageStatusFrame::decode(payload)?),
            FrameKind::NetworkNotification => {
                ApiFrame::NetworkNotification(NetworkNotificationFrame::decode(payload)?)
            }
            FrameKind::StateLifetime => ApiFrame::StateLifetime(StateLifetimeFrame::decode(payload)?),
            FrameKind::RoutingState => ApiFrame::RoutingState(RoutingStateFrame::decode(payload)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::mri::PathCoupledMri;

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
    fn send_message_frame_round_trips() {
        let frame = ApiFrame::SendMessage(SendMessageFrame {
            nslp_id: 32,
            sid: SessionId::random(),
            reliability: true,
            security: false,
            local_processing: false,
            install_routing_state: true,
            timeout: 5000,
            ip_ttl: 64,
            gist_hop_count: 10,
            nslp_message_handle: [9u8; 16],
            sii_handle: "192.0.2.1".parse().unwrap(),
            nslp_data: vec![1, 2, 3, 4],
            mri: sample_mri(),
        });
        let encoded = frame.encode();
        let decoded = ApiFrame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn network_notification_round_trips() {
        let frame = ApiFrame::NetworkNotification(NetworkNotificationFrame {
            sid: SessionId::random(),
            kind: NetworkNotificationType::RoutingStateChange,
        });
        let encoded = frame.encode();
        assert_eq!(ApiFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn corrupted_frame_fails_checksum() {
        let frame = ApiFrame::MessageStatus(MessageStatusFrame {
            reliability: true,
            security: true,
            error_type: 2,
            nslp_message_handle: [1u8; 16],
        });
        let mut encoded = frame.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(ApiFrame::decode(&encoded).is_err());
    }
}
