//! Routing table (component C3): soft-state entries keyed by (MRI,
//! NSLP-ID, direction), with secondary indices by peer and messaging
//! association (spec §3, §4.3).
//!
//! Structure mirrors the teacher's `networking::routing::table` module
//! (an `Arc<RwLock<Inner>>` guarding a primary map plus secondary index
//! maps, `version` bumped on every mutation) but the primary map itself
//! uses `dashmap` for lock-free reads under concurrent lookup from both
//! the signaling loop and the state machine loop (spec §5).

mod entry;
mod table;

pub use entry::{MaId, RoutingEntry, RoutingKey};
pub use table::RoutingTable;
