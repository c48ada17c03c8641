//! Messaging-association manager (spec §3 invariant 3, §4.5): binds the
//! C-mode listener, hands out [`MaId`]s for accepted and outbound
//! connections, and tears an association down once nothing references it
//! for `ma_hold_time` (spec §8's MA lifecycle).
//!
//! Grounded on the teacher's `networking::manager::NetworkManager` registry
//! shape (one `DashMap` keyed by connection id, refcounted entries) applied
//! to `transport::cmode`'s own bind/accept/connect primitives, which until
//! now had no caller tracking association lifetime end-to-end.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::routing::{MaId, RoutingTable};
use crate::transport::cmode::{CModeConfig, CModeConnection, CModeTransport};
use crate::wire::MaProtocol;

struct MaEntry {
    connection: Arc<CModeConnection>,
    protocol: MaProtocol,
    refcount: AtomicU32,
}

/// Registry of live messaging associations. A routing entry's `ma_id`,
/// when set, is expected to name an entry here with `refcount >= 1`
/// (spec §3 invariant 3); entries that drop to zero references are torn
/// down after `hold_time` rather than immediately, so a Confirm that
/// arrives moments after a Response doesn't reopen a connection it just
/// closed.
pub struct MaManager {
    cmode: CModeTransport,
    associations: DashMap<MaId, MaEntry>,
    routing: Arc<RoutingTable>,
    next_id: AtomicU64,
    hold_time: Duration,
}

impl MaManager {
    pub fn new(config: CModeConfig, routing: Arc<RoutingTable>, hold_time: Duration) -> Self {
        Self {
            cmode: CModeTransport::new(config),
            associations: DashMap::new(),
            routing,
            next_id: AtomicU64::new(1),
            hold_time,
        }
    }

    pub async fn bind(&mut self) -> crate::Result<()> {
        self.cmode.bind().await
    }

    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        self.cmode.local_addr()
    }

    /// Accepts inbound C-mode connections forever, registering each as a
    /// new MA with refcount zero (spec §4.5: an accepted MA sits idle
    /// until a Confirm references it, then tears itself down on the usual
    /// hold-time schedule if nothing ever does).
    pub async fn accept_loop(self: Arc<Self>) {
        loop {
            match self.cmode.accept().await {
                Ok(conn) => {
                    let id = self.register(conn, MaProtocol::Tcp);
                    tracing::info!(ma_id = id.0, "accepted inbound messaging association");
                    let manager = self.clone();
                    tokio::spawn(async move { manager.idle_watch(id).await });
                }
                Err(err) => {
                    tracing::error!(%err, "C-mode listener failed, MA manager accept loop exiting");
                    return;
                }
            }
        }
    }

    /// Finds an already-accepted MA from `addr` for `protocol` and bumps
    /// its refcount, without dialing a new connection (used on the
    /// Responder side of a Confirm: the Querier is expected to have
    /// already dialed in).
    pub fn acquire_existing(&self, addr: SocketAddr, protocol: MaProtocol) -> Option<MaId> {
        let id = self.find_by_peer(addr, protocol)?;
        self.acquire(id);
        Some(id)
    }

    /// Establishes (or reuses) an outbound MA to `addr` for `protocol`
    /// and bumps its refcount (spec §4.5: a selected Response binds the
    /// MA the Querier will use for this flow).
    pub async fn acquire_outbound(self: &Arc<Self>, addr: SocketAddr, protocol: MaProtocol) -> crate::Result<MaId> {
        if let Some(existing) = self.find_by_peer(addr, protocol) {
            self.acquire(existing);
            return Ok(existing);
        }
        let conn = self.cmode.connect(addr).await?;
        let id = self.register(conn, protocol);
        self.acquire(id);
        let manager = self.clone();
        tokio::spawn(async move { manager.idle_watch(id).await });
        Ok(id)
    }

    fn find_by_peer(&self, addr: SocketAddr, protocol: MaProtocol) -> Option<MaId> {
        self.associations
            .iter()
            .find(|e| e.value().connection.peer_addr().ip() == addr.ip() && e.value().protocol == protocol)
            .map(|e| *e.key())
    }

    fn register(&self, conn: CModeConnection, protocol: MaProtocol) -> MaId {
        let id = MaId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.associations
            .insert(id, MaEntry { connection: Arc::new(conn), protocol, refcount: AtomicU32::new(0) });
        id
    }

    pub fn acquire(&self, id: MaId) {
        if let Some(entry) = self.associations.get(&id) {
            entry.refcount.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Drops one reference. The MA itself isn't torn down here — the
    /// idle-hold-time watcher spawned at registration does that once the
    /// refcount has sat at zero for `hold_time`.
    pub fn release(&self, id: MaId) {
        if let Some(entry) = self.associations.get(&id) {
            entry.refcount.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn connection(&self, id: MaId) -> Option<Arc<CModeConnection>> {
        self.associations.get(&id).map(|e| e.connection.clone())
    }

    async fn idle_watch(self: Arc<Self>, id: MaId) {
        loop {
            tokio::time::sleep(self.hold_time).await;
            let Some(entry) = self.associations.get(&id) else {
                return;
            };
            if entry.refcount.load(Ordering::SeqCst) == 0 {
                drop(entry);
                self.teardown(id);
                return;
            }
        }
    }

    /// Removes the MA and every routing entry anchored on it (spec §4.5:
    /// a torn-down MA takes its bound soft state with it).
    fn teardown(&self, id: MaId) {
        for entry in self.routing.entries_for_ma(id) {
            self.routing.remove(&entry.key);
        }
        self.associations.remove(&id);
        tracing::debug!(ma_id = id.0, "torn down idle messaging association");
    }
}
