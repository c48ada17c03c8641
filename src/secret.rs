//! Secret manager and stateless Responder-Cookie factory (spec §3 invariant
//! 4, §4.4).
//!
//! Grounded on the teacher's `networking/security/identity.rs` key-rotation
//! pattern: a small ring of rolling HMAC keys, each tagged with a generation
//! number, so a cookie minted under a superseded key is still verifiable
//! until it ages out.

use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand::RngCore;
use sha2::Sha256;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::{GistError, ObjectValueSubcode};
use crate::wire::objects::ResponderCookie;
use crate::wire::Mri;

type HmacSha256 = Hmac<Sha256>;

const KEY_LEN: usize = 32;
const MAC_LEN: usize = 16;

struct Secret {
    generation: u32,
    key: [u8; KEY_LEN],
    minted_at: Instant,
}

/// Rolling-key HMAC secret store backing the stateless cookie factory.
pub struct SecretManager {
    secrets: RwLock<VecDeque<Secret>>,
    rotation_interval: Duration,
    keep: usize,
}

impl SecretManager {
    pub fn new(rotation_interval: Duration, keep: usize) -> Self {
        let mgr = Self {
            secrets: RwLock::new(VecDeque::new()),
            rotation_interval,
            keep: keep.max(1),
        };
        mgr.rotate();
        mgr
    }

    /// Mints a fresh secret, retiring the oldest once `keep` is exceeded.
    /// Called by the Timer module on `rotation_interval` (spec §5).
    pub fn rotate(&self) {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        let mut secrets = self.secrets.write();
        let generation = secrets.front().map(|s| s.generation + 1).unwrap_or(0);
        secrets.push_front(Secret {
            generation,
            key,
            minted_at: Instant::now(),
        });
        while secrets.len() > self.keep {
            secrets.pop_back();
        }
        tracing::debug!(generation, "rotated responder-cookie secret");
    }

    pub fn rotation_interval(&self) -> Duration {
        self.rotation_interval
    }

    /// Mints a stateless Responder Cookie binding the Querier's address and
    /// the MRI/NSLP-ID pair it queried for, under the current secret.
    pub fn mint(&self, peer: SocketAddr, mri: &Mri, nslp_id: u16) -> ResponderCookie {
        let secrets = self.secrets.read();
        let current = secrets.front().expect("at least one secret always present");
        let mac = Self::compute_mac(&current.key, peer, mri, nslp_id);

        let mut buf = Vec::with_capacity(4 + MAC_LEN);
        buf.extend_from_slice(&current.generation.to_be_bytes());
        buf.extend_from_slice(&mac);
        ResponderCookie(buf)
    }

    /// Validates a Responder Cookie echoed back in a Confirm, recomputing
    /// the MAC under whichever still-live secret minted it. Cookies minted
    /// before a process restart necessarily fail this (spec §3 calls out
    /// that restart recovery is through timeout and re-query, not
    /// persistence).
    pub fn validate(&self, cookie: &ResponderCookie, peer: SocketAddr, mri: &Mri, nslp_id: u16) -> crate::Result<()> {
        if cookie.0.len() != 4 + MAC_LEN {
            return Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::InvalidCookie,
                offset: 0,
            });
        }
        let generation = u32::from_be_bytes([cookie.0[0], cookie.0[1], cookie.0[2], cookie.0[3]]);
        let tag = &cookie.0[4..];

        let secrets = self.secrets.read();
        let secret = secrets
            .iter()
            .find(|s| s.generation == generation)
            .ok_or(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::InvalidCookie,
                offset: 0,
            })?;

        let expected = Self::compute_mac(&secret.key, peer, mri, nslp_id);
        if constant_time_eq(&expected, tag) {
            Ok(())
        } else {
            Err(GistError::ObjectValueError {
                subcode: ObjectValueSubcode::InvalidCookie,
                offset: 4,
            })
        }
    }

    fn compute_mac(key: &[u8; KEY_LEN], peer: SocketAddr, mri: &Mri, nslp_id: u16) -> [u8; MAC_LEN] {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(peer.ip().to_string().as_bytes());
        mac.update(&peer.port().to_be_bytes());
        mac.update(&mri.encode());
        mac.update(&nslp_id.to_be_bytes());
        let full = mac.finalize().into_bytes();
        let mut out = [0u8; MAC_LEN];
        out.copy_from_slice(&full[..MAC_LEN]);
        out
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// The Querier's own nonce, echoed by the Responder and checked on receipt
/// of the Response (spec §3 invariant 5). Unlike the Responder Cookie this
/// carries no authentication; it is only a liveness/correlation check.
pub fn generate_query_cookie() -> Vec<u8> {
    let mut buf = [0u8; 8];
    rand::rng().fill_bytes(&mut buf);
    buf.to_vec()
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
    fn cookie_minted_and_validated_under_same_secret() {
        let mgr = SecretManager::new(Duration::from_secs(60), 2);
        let peer: SocketAddr = "198.51.100.1:5000".parse().unwrap();
        let cookie = mgr.mint(peer, &sample_mri(), 32);
        assert!(mgr.validate(&cookie, peer, &sample_mri(), 32).is_ok());
    }

    #[test]
    fn cookie_rejected_for_different_peer() {
        let mgr = SecretManager::new(Duration::from_secs(60), 2);
        let peer: SocketAddr = "198.51.100.1:5000".parse().unwrap();
        let other: SocketAddr = "198.51.100.2:5000".parse().unwrap();
        let cookie = mgr.mint(peer, &sample_mri(), 32);
        assert!(mgr.validate(&cookie, other, &sample_mri(), 32).is_err());
    }

    #[test]
    fn cookie_survives_one_rotation_but_not_two() {
        let mgr = SecretManager::new(Duration::from_secs(60), 2);
        let peer: SocketAddr = "198.51.100.1:5000".parse().unwrap();
        let cookie = mgr.mint(peer, &sample_mri(), 32);
        mgr.rotate();
        assert!(mgr.validate(&cookie, peer, &sample_mri(), 32).is_ok());
        mgr.rotate();
        assert!(mgr.validate(&cookie, peer, &sample_mri(), 32).is_err());
    }

    #[test]
    fn stateless_across_manager_restart_fails_closed() {
        // A fresh manager has no memory of a previous process's secrets:
        // this is the documented trade-off behind "stateless" (spec §3).
        let peer: SocketAddr = "198.51.100.1:5000".parse().unwrap();
        let mgr1 = SecretManager::new(Duration::from_secs(60), 2);
        let cookie = mgr1.mint(peer, &sample_mri(), 32);
        let mgr2 = SecretManager::new(Duration::from_secs(60), 2);
        assert!(mgr2.validate(&cookie, peer, &sample_mri(), 32).is_err());
    }
}
