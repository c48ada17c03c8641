//! Configuration knobs (spec §6).
//!
//! Plain struct with a `Default` impl, the way the teacher's `Config` /
//! `NetworkConfig` structs work — no external config-file crate, since the
//! distillation's Non-goals put CLI/daemon bootstrap (and therefore config
//! file parsing) out of scope; only the in-memory knobs survive here.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GistConfig {
    /// Soft-state refresh interval (default 30s).
    pub refresh_interval: Duration,
    /// Routing-state validity multiplier over `refresh_interval` (default 3x).
    pub rs_validity_multiplier: u32,
    /// Initial no-response retransmission timeout (default 3s).
    pub t_no_response_initial: Duration,
    /// Retransmission backoff ceiling (default 30s).
    pub t_no_response_ceiling: Duration,
    /// Maximum retransmission attempts (default 5).
    pub t_no_response_max_attempts: u32,
    /// Messaging-association idle hold time (default 30s).
    pub ma_hold_time: Duration,
    /// Q-mode UDP destination port (default 270).
    pub udp_port: u16,
    /// C-mode messaging-association TCP listen port (default 4116).
    pub cmode_port: u16,
    /// Restrict to IPv4 only (default false).
    pub ipv4_only: bool,
    /// Secret rotation interval (default 2x ma_hold_time).
    pub secret_rotation_interval: Duration,
    /// Number of rolling secrets to keep (default 2).
    pub secret_count: usize,
}

impl GistConfig {
    pub fn rs_validity(&self) -> Duration {
        self.refresh_interval * self.rs_validity_multiplier
    }
}

impl Default for GistConfig {
    fn default() -> Self {
        let ma_hold_time = Duration::from_secs(30);
        Self {
            refresh_interval: Duration::from_secs(30),
            rs_validity_multiplier: 3,
            t_no_response_initial: Duration::from_secs(3),
            t_no_response_ceiling: Duration::from_secs(30),
            t_no_response_max_attempts: 5,
            ma_hold_time,
            udp_port: 270,
            cmode_port: 4116,
            ipv4_only: false,
            secret_rotation_interval: ma_hold_time * 2,
            secret_count: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rs_validity_is_three_times_refresh_by_default() {
        let cfg = GistConfig::default();
        assert_eq!(cfg.rs_validity(), cfg.refresh_interval * 3);
        assert!(cfg.refresh_interval < cfg.rs_validity());
    }
}
