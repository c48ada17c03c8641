//! Transport multiplex (component C2, spec §4.2, §4.5, §6): Q-mode
//! datagram encapsulation, C-mode messaging associations, and the UDS API
//! boundary.
//!
//! Layout follows the teacher's `networking::transport` module (one file
//! per concrete transport, a shared connection abstraction) generalized
//! from a single TCP P2P transport into GIST's two wire transports plus
//! the local API transport.

pub mod cmode;
pub mod qmode;
pub mod uds;

pub use cmode::{CModeConfig, CModeConnection, CModeTransport};
pub use qmode::QModeTransport;
pub use uds::UdsTransport;
