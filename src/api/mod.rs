//! API / NSLP dispatch (component C7, spec §4.7).
//!
//! `ApiDispatcher` is the in-process hub between the UDS transport (one
//! connection per registered NSLP) and the rest of GIST: it fans outbound
//! `SendMessage`/`StateLifetime`/`RoutingState` calls into the concurrency
//! layer's channels, and fans inbound `RecvMessage`/`MessageStatus`/
//! `NetworkNotification` deliveries back out to whichever NSLP registered
//! for that NSLP-ID. Mirrors the teacher's `NetworkManager` hub-and-event-
//! bus shape (`networking::manager::NetworkManager`), scoped down to the
//! API boundary.

pub mod frame;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::common::NslpId;
use crate::error::GistError;
use frame::{MessageStatusFrame, NetworkNotificationFrame, RecvMessageFrame, SendMessageFrame};

/// Delivered to a registered NSLP.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    RecvMessage(RecvMessageFrame),
    MessageStatus(MessageStatusFrame),
    NetworkNotification(NetworkNotificationFrame),
}

/// Requested by a registered NSLP, consumed by the state machine /
/// signaling loop.
#[derive(Debug, Clone)]
pub enum OutboundRequest {
    SendMessage(SendMessageFrame),
    StateLifetime(frame::StateLifetimeFrame),
    RoutingState(frame::RoutingStateFrame),
}

struct Registration {
    inbound_tx: mpsc::Sender<InboundEvent>,
}

/// Registry of NSLPs sharing this GIST instance, keyed by NSLP-ID (spec
/// §4.7 supplement: `register_nslp`, needed once more than one NSLP can
/// attach).
pub struct ApiDispatcher {
    registrations: DashMap<NslpId, Registration>,
    outbound_tx: mpsc::Sender<(NslpId, OutboundRequest)>,
    outbound_rx: parking_lot::Mutex<Option<mpsc::Receiver<(NslpId, OutboundRequest)>>>,
}

impl ApiDispatcher {
    pub fn new(outbound_capacity: usize) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity);
        Self {
            registrations: DashMap::new(),
            outbound_tx,
            outbound_rx: parking_lot::Mutex::new(Some(outbound_rx)),
        }
    }

    /// Registers an NSLP, returning the channel its inbound events arrive
    /// on. Re-registering the same NSLP-ID replaces the previous
    /// registration (a reconnecting NSLP client).
    pub fn register_nslp(&self, nslp_id: NslpId, inbound_capacity: usize) -> mpsc::Receiver<InboundEvent> {
        let (tx, rx) = mpsc::channel(inbound_capacity);
        self.registrations.insert(nslp_id, Registration { inbound_tx: tx });
        tracing::info!(nslp_id, "registered NSLP");
        rx
    }

    pub fn deregister_nslp(&self, nslp_id: NslpId) {
        self.registrations.remove(&nslp_id);
    }

    /// Queues an outbound request originated by a registered NSLP for the
    /// signaling/state-machine loop to pick up.
    pub async fn submit(&self, nslp_id: NslpId, request: OutboundRequest) -> crate::Result<()> {
        if !self.registrations.contains_key(&nslp_id) {
            return Err(GistError::UnknownNslpId(nslp_id));
        }
        self.outbound_tx
            .send((nslp_id, request))
            .await
            .map_err(|_| GistError::Internal("API dispatcher outbound channel closed".into()))
    }

    /// Taken once by the signaling loop at startup to drain outbound
    /// requests; returns `None` on a second call.
    pub fn take_outbound_receiver(&self) -> Option<mpsc::Receiver<(NslpId, OutboundRequest)>> {
        self.outbound_rx.lock().take()
    }

    /// Delivers an inbound event to whichever NSLP registered for
    /// `nslp_id`. Silently drops the event if nothing is registered
    /// (spec §4.7 edge case: an NSLP that deregistered mid-flight).
    pub async fn deliver(&self, nslp_id: NslpId, event: InboundEvent) -> crate::Result<()> {
        let registration = self
            .registrations
            .get(&nslp_id)
            .ok_or(GistError::UnknownNslpId(nslp_id))?;
        registration
            .inbound_tx
            .send(event)
            .await
            .map_err(|_| GistError::Internal("NSLP inbound channel closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SessionId;
    use crate::wire::mri::{Direction, PathCoupledMri};
    use crate::wire::Mri;

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

    #[tokio::test]
    async fn submit_requires_registration() {
        let dispatcher = ApiDispatcher::new(16);
        let request = OutboundRequest::SendMessage(SendMessageFrame {
            nslp_id: 32,
            sid: SessionId::random(),
            reliability: true,
            security: false,
            local_processing: false,
            install_routing_state: true,
            timeout: 1000,
            ip_ttl: 64,
            gist_hop_count: 10,
            nslp_message_handle: [0u8; 16],
            sii_handle: "192.0.2.1".parse().unwrap(),
            nslp_data: vec![],
            mri: sample_mri(),
        });
        assert!(dispatcher.submit(32, request).await.is_err());
    }

    #[tokio::test]
    async fn registered_nslp_receives_delivered_events() {
        let dispatcher = ApiDispatcher::new(16);
        let mut rx = dispatcher.register_nslp(32, 8);
        dispatcher
            .deliver(
                32,
                InboundEvent::MessageStatus(MessageStatusFrame {
                    reliability: true,
                    security: false,
                    error_type: 0,
                    nslp_message_handle: [1u8; 16],
                }),
            )
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, InboundEvent::MessageStatus(_)));
    }

    #[tokio::test]
    async fn deregistered_nslp_delivery_errors() {
        let dispatcher = ApiDispatcher::new(16);
        dispatcher.register_nslp(32, 8);
        dispatcher.deregister_nslp(32);
        let result = dispatcher
            .deliver(
                32,
                InboundEvent::NetworkNotification(NetworkNotificationFrame {
                    sid: SessionId::random(),
                    kind: frame::NetworkNotificationType::LastNode,
                }),
            )
            .await;
        assert!(result.is_err());
    }
}
