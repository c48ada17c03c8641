//! Timer module (spec §5): secret rotation, routing-state expiry sweep,
//! and refresh scheduling, all driven off one ticking loop — the
//! teacher's components don't have a direct timer-module analogue, so
//! this is modeled on the generic periodic-task shape used throughout the
//! teacher's `health`/`heartbeat` modules (a `tokio::time::interval` loop
//! that reports through `Component::health_check`).

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;

use crate::common::{Component, HealthStatus};
use crate::concurrency::PrioritySender;
use crate::routing::{RoutingKey, RoutingTable};
use crate::secret::SecretManager;

#[derive(Debug, Clone)]
pub enum TimerEvent {
    /// A routing entry's refresh timer fired; the state machine should
    /// re-send a Query over its existing binding (spec §4.6 Refresh).
    RefreshDue(RoutingKey),
    /// Routing-state validity lapsed and the entry was torn down (spec
    /// §4.6: not an error, soft-state just expires).
    EntryExpired(RoutingKey),
}

pub struct TimerModule {
    routing: Arc<RoutingTable>,
    secrets: Arc<SecretManager>,
    refresh_interval: Duration,
    tick: Duration,
    healthy: std::sync::atomic::AtomicBool,
}

impl TimerModule {
    pub fn new(routing: Arc<RoutingTable>, secrets: Arc<SecretManager>, refresh_interval: Duration) -> Self {
        Self::with_tick(routing, secrets, refresh_interval, Duration::from_secs(1))
    }

    pub fn with_tick(
        routing: Arc<RoutingTable>,
        secrets: Arc<SecretManager>,
        refresh_interval: Duration,
        tick: Duration,
    ) -> Self {
        Self {
            routing,
            secrets,
            refresh_interval,
            tick,
            healthy: std::sync::atomic::AtomicBool::new(true),
        }
    }

    /// Runs until the process shuts down. Emits [`TimerEvent`]s on the
    /// expedited channel, matching spec §5's ordering guarantee that
    /// timer-elapsed notifications jump the queue.
    pub async fn run(self, events: PrioritySender<TimerEvent>) {
        let mut ticker = interval(self.tick);
        let mut since_rotation = Duration::ZERO;
        let mut since_refresh = Duration::ZERO;

        loop {
            ticker.tick().await;
            since_rotation += self.tick;
            since_refresh += self.tick;

            let now = Instant::now();
            for key in self.routing.expire(now) {
                if events.send_expedited(TimerEvent::EntryExpired(key)).await.is_err() {
                    self.healthy.store(false, std::sync::atomic::Ordering::Relaxed);
                    return;
                }
            }

            if since_refresh >= self.refresh_interval {
                since_refresh = Duration::ZERO;
                // A full scan every refresh_interval: simple and correct
                // for the entry counts this crate targets; a production
                // deployment with very large routing tables would want a
                // timer wheel keyed by per-entry deadlines instead.
                for key in self.due_for_refresh() {
                    if events.send_expedited(TimerEvent::RefreshDue(key)).await.is_err() {
                        self.healthy.store(false, std::sync::atomic::Ordering::Relaxed);
                        return;
                    }
                }
            }

            if since_rotation >= self.secrets.rotation_interval() {
                since_rotation = Duration::ZERO;
                self.secrets.rotate();
            }
        }
    }

    fn due_for_refresh(&self) -> Vec<RoutingKey> {
        // Every currently installed entry is, by construction, either
        // Established (Q-role) or freshly refreshed by the Responder's
        // Confirm handling; a full scan each `refresh_interval` tick is
        // cheap at the entry counts this crate targets.
        self.routing.all_keys()
    }
}

impl Component for TimerModule {
    fn initialize(&mut self) -> crate::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> crate::Result<()> {
        Ok(())
    }

    fn health_check(&self) -> HealthStatus {
        if self.healthy.load(std::sync::atomic::Ordering::Relaxed) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}
