//! Concurrency & resource model (spec §5): Timer, Signaling, StateMachine
//! and API each run as an independently scheduled `tokio` task,
//! communicating through typed channels — generalizing the teacher's
//! `networking::manager::NetworkManager` internal `event_tx`/`event_rx`
//! hub from one channel to a [`PriorityChannel`] pair so expedited
//! messages (timer fires, connection-down) are always drained ahead of
//! normal traffic on the same sender/receiver pair, per spec §5's FIFO +
//! expedited-priority guarantee. This two-channel split has no direct
//! counterpart in the teacher (documented in `DESIGN.md`).

mod api_loop;
mod ma_manager;
mod priority;
mod signaling;
mod timer;

pub use api_loop::ApiModule;
pub use ma_manager::MaManager;
pub use priority::{PriorityChannel, PriorityReceiver, PrioritySender};
pub use signaling::SignalingModule;
pub use timer::{TimerEvent, TimerModule};

use std::sync::Arc;

use crate::api::ApiDispatcher;
use crate::capability::LocalCapabilities;
use crate::config::GistConfig;
use crate::routing::RoutingTable;
use crate::secret::SecretManager;

/// Shared handles every module needs; cheap to clone (everything inside
/// is already `Arc`-wrapped), matching the teacher's pattern of passing a
/// small shared-state bundle into each spawned loop rather than threading
/// a dozen individual `Arc`s through.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<GistConfig>,
    pub routing: Arc<RoutingTable>,
    pub secrets: Arc<SecretManager>,
    pub capabilities: Arc<LocalCapabilities>,
    pub api: Arc<ApiDispatcher>,
}

impl SharedState {
    pub fn new(config: GistConfig) -> Self {
        let secrets = Arc::new(SecretManager::new(config.secret_rotation_interval, config.secret_count));
        Self {
            routing: Arc::new(RoutingTable::new()),
            secrets,
            capabilities: Arc::new(LocalCapabilities::default()),
            api: Arc::new(ApiDispatcher::new(256)),
            config: Arc::new(config),
        }
    }
}
