//! Shared types and lifecycle traits used across all modules.
//!
//! Mirrors the teacher crate's `common` module: a small `Component`
//! lifecycle trait plus the handful of identifier newtypes every other
//! module builds on.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;

/// Lifecycle trait implemented by every long-lived module (Timer,
/// Signaling, StateMachine, API — see spec §5).
pub trait Component: Send + Sync {
    fn initialize(&mut self) -> Result<()>;
    fn shutdown(&mut self) -> Result<()>;
    fn health_check(&self) -> HealthStatus;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// 128-bit opaque Session Identifier (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub [u8; 16]);

impl SessionId {
    pub fn random() -> Self {
        let mut buf = [0u8; 16];
        rand::Rng::fill(&mut rand::rng(), &mut buf);
        Self(buf)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Signaling Application (NSLP) identifier, as carried in the common
/// header's `sappid` field.
pub type NslpId = u16;

/// Well-known NSLP-IDs used illustratively in spec §8 scenario 1.
pub const NSLP_ID_NATFW: NslpId = 32;
pub const NSLP_ID_QOS: NslpId = 33;

/// Opaque Peer Identity carried inside NLI objects. Uniquely identifies a
/// GIST instance on an interface (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerIdentity(pub Vec<u8>);

impl PeerIdentity {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Opaque handle correlating SendMessage with its eventual MessageStatus.
pub type NslpMessageHandle = [u8; 16];
