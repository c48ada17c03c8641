use std::net::SocketAddr;
use std::time::Instant;

use crate::common::{NslpId, PeerIdentity, SessionId};
use crate::wire::{Direction, Mri};

/// Opaque identifier for a messaging association, assigned by the
/// transport module when a C-mode connection is established (spec §4.5).
/// Entries reference MAs by this integer rather than holding a socket
/// directly, so the routing table stays plain data (spec §9 redesign:
/// arena/integer-id instead of the original's raw `ntlp_mux` pointers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaId(pub u64);

/// Primary key of a routing-table entry (spec §3 invariant 2: MRI +
/// NSLP-ID + direction together identify one piece of routing state).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    pub mri: Mri,
    pub nslp_id: NslpId,
    pub direction: Direction,
}

/// One piece of GIST routing state: where to send the next Data/Query for
/// this flow, and until when that answer is considered fresh.
#[derive(Debug, Clone)]
pub struct RoutingEntry {
    pub key: RoutingKey,
    pub session_id: SessionId,
    pub peer_identity: PeerIdentity,
    pub peer_address: SocketAddr,
    pub ma_id: Option<MaId>,
    pub established_at: Instant,
    pub expires_at: Instant,
}

impl RoutingEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}
