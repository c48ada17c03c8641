use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::common::{NslpId, PeerIdentity, SessionId};
use crate::error::GistError;
use crate::routing::entry::{MaId, RoutingEntry, RoutingKey};
use crate::wire::{Direction, Mri};
use std::net::SocketAddr;

/// Soft-state routing table. Reads are lock-free per shard (`dashmap`);
/// the secondary indices are kept eventually-consistent with the primary
/// map under the same per-key critical section.
pub struct RoutingTable {
    entries: DashMap<RoutingKey, RoutingEntry>,
    by_peer: DashMap<PeerIdentity, HashSet<RoutingKey>>,
    by_ma: DashMap<MaId, HashSet<RoutingKey>>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            by_peer: DashMap::new(),
            by_ma: DashMap::new(),
        }
    }

    /// Installs or refreshes routing state (spec §4.3: a Response/Confirm
    /// exchange (re)establishes this entry and pushes `expires_at` out by
    /// `rs_validity`).
    pub fn install(
        &self,
        mri: Mri,
        nslp_id: NslpId,
        direction: Direction,
        session_id: SessionId,
        peer_identity: PeerIdentity,
        peer_address: SocketAddr,
        ma_id: Option<MaId>,
        rs_validity: Duration,
        now: Instant,
    ) -> RoutingKey {
        let key = RoutingKey { mri, nslp_id, direction };
        let entry = RoutingEntry {
            key: key.clone(),
            session_id,
            peer_identity: peer_identity.clone(),
            peer_address,
            ma_id,
            established_at: now,
            expires_at: now + rs_validity,
        };

        self.by_peer.entry(peer_identity).or_default().insert(key.clone());
        if let Some(id) = ma_id {
            self.by_ma.entry(id).or_default().insert(key.clone());
        }
        self.entries.insert(key.clone(), entry);
        key
    }

    pub fn lookup(&self, key: &RoutingKey) -> Option<RoutingEntry> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// Refreshes an existing entry's expiry without changing its peer
    /// binding (spec §4.6 soft-state refresh).
    pub fn refresh(&self, key: &RoutingKey, rs_validity: Duration, now: Instant) -> crate::Result<()> {
        let mut entry = self.entries.get_mut(key).ok_or(GistError::NoRoutingState)?;
        entry.expires_at = now + rs_validity;
        Ok(())
    }

    pub fn remove(&self, key: &RoutingKey) -> Option<RoutingEntry> {
        let (_, entry) = self.entries.remove(key)?;
        if let Some(mut peers) = self.by_peer.get_mut(&entry.peer_identity) {
            peers.remove(key);
        }
        if let Some(id) = entry.ma_id {
            if let Some(mut keys) = self.by_ma.get_mut(&id) {
                keys.remove(key);
            }
        }
        Some(entry)
    }

    /// Sweeps and removes every entry whose `rs_validity` lapsed before
    /// `now` (spec §4.6: unrefreshed routing state is torn down, not kept
    /// around as an error condition).
    pub fn expire(&self, now: Instant) -> Vec<RoutingKey> {
        let stale: Vec<RoutingKey> = self
            .entries
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();
        for key in &stale {
            self.remove(key);
        }
        stale
    }

    /// Entries anchored on a messaging association, torn down when that
    /// MA goes down (spec §4.5).
    pub fn entries_for_ma(&self, ma_id: MaId) -> Vec<RoutingEntry> {
        self.by_ma
            .get(&ma_id)
            .map(|keys| keys.iter().filter_map(|k| self.lookup(k)).collect())
            .unwrap_or_default()
    }

    /// All currently installed keys, used by the Timer module's refresh
    /// scan (spec §4.6 Refresh). Routing tables in this crate's target
    /// deployments are small enough that a full scan per `refresh_interval`
    /// tick is cheap; see `concurrency::TimerModule`.
    pub fn all_keys(&self) -> Vec<RoutingKey> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
