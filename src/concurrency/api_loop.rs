//! API module (spec §5, component C7 boundary): accepts one UDS
//! connection per NSLP, registers it with the [`ApiDispatcher`], and
//! shuttles [`ApiFrame`]s in both directions until the connection drops.
//! Modeled on the teacher's per-connection task-per-client accept loop.

use std::sync::Arc;

use crate::api::frame::ApiFrame;
use crate::api::{ApiDispatcher, InboundEvent, OutboundRequest};
use crate::common::NslpId;
use crate::transport::uds::{UdsConnection, UdsTransport};

/// Registration handshake: the first frame an NSLP client sends over its
/// UDS connection is a `SendMessage`-shaped probe carrying its `nslp_id`
/// in the `nslp_id` field, or (more commonly) the connection is opened
/// already bound to a well-known per-NSLP socket path — this crate uses
/// the latter, so the NSLP-ID is supplied by the caller that accepted the
/// connection rather than sniffed from the stream.
pub struct ApiModule {
    transport: UdsTransport,
    dispatcher: Arc<ApiDispatcher>,
}

impl ApiModule {
    pub fn new(transport: UdsTransport, dispatcher: Arc<ApiDispatcher>) -> Self {
        Self { transport, dispatcher }
    }

    /// Accepts connections forever, spawning one handler task per NSLP
    /// client. `nslp_id` is fixed per bound socket path in this crate's
    /// deployment model (one UDS path per NSLP), matching spec §4.7's
    /// "an NSLP registers once for the lifetime of its connection".
    pub async fn run(self: Arc<Self>, nslp_id: NslpId) {
        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(handle_connection(conn, dispatcher, nslp_id));
                }
                Err(err) => {
                    tracing::error!(%err, "UDS API transport failed, API loop exiting");
                    return;
                }
            }
        }
    }
}

async fn handle_connection(mut conn: UdsConnection, dispatcher: Arc<ApiDispatcher>, nslp_id: NslpId) {
    let mut inbound = dispatcher.register_nslp(nslp_id, 64);

    loop {
        tokio::select! {
            frame = conn.recv_frame() => {
                match frame {
                    Ok(Some(bytes)) => {
                        if let Err(err) = handle_outbound_frame(&dispatcher, nslp_id, &bytes).await {
                            tracing::debug!(%err, nslp_id, "rejecting malformed API frame");
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(%err, nslp_id, "UDS connection read failed");
                        break;
                    }
                }
            }
            event = inbound.recv() => {
                match event {
                    Some(event) => {
                        let frame = match event {
                            InboundEvent::RecvMessage(f) => ApiFrame::RecvMessage(f),
                            InboundEvent::MessageStatus(f) => ApiFrame::MessageStatus(f),
                            InboundEvent::NetworkNotification(f) => ApiFrame::NetworkNotification(f),
                        };
                        if conn.send_frame(&frame.encode()).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    dispatcher.deregister_nslp(nslp_id);
}

async fn handle_outbound_frame(dispatcher: &ApiDispatcher, nslp_id: NslpId, bytes: &[u8]) -> crate::Result<()> {
    let frame = ApiFrame::decode(bytes)?;
    let request = match frame {
        ApiFrame::SendMessage(f) => OutboundRequest::SendMessage(f),
        ApiFrame::StateLifetime(f) => OutboundRequest::StateLifetime(f),
        ApiFrame::RoutingState(f) => OutboundRequest::RoutingState(f),
        ApiFrame::RecvMessage(_) | ApiFrame::MessageStatus(_) | ApiFrame::NetworkNotification(_) => {
            return Err(crate::error::GistError::Serialization(
                "NSLP sent an inbound-only frame kind".into(),
            ));
        }
    };
    dispatcher.submit(nslp_id, request).await
}
