//! Signaling module (spec §5: C2+C1 combined into one processing loop).
//!
//! Owns the Q-mode transport and the table of in-flight Querier contexts,
//! and is the only place that calls into `statemachine` for inbound
//! Query/Response/Confirm handling. Modeled on the teacher's
//! `NetworkManager` pattern of one loop owning the socket and dispatching
//! by message kind.
//!
//! Confirm is echoed back over the Q-mode datagram path to the peer that
//! sent the Response, matching spec §4.6; the negotiated protocol is used
//! separately to bind (or reuse) the C-mode messaging association via
//! [`MaManager`], whose `MaId` is what actually gets recorded on the
//! installed routing entry.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::api::frame::{MessageStatusFrame, SendMessageFrame};
use crate::api::{ApiDispatcher, InboundEvent, OutboundRequest};
use crate::capability::LocalCapabilities;
use crate::common::{NslpId, PeerIdentity};
use crate::concurrency::{MaManager, SharedState};
use crate::config::GistConfig;
use crate::routing::{RoutingKey, RoutingTable};
use crate::secret::SecretManager;
use crate::statemachine::{self, QuerierContext};
use crate::transport::qmode::QModeTransport;
use crate::wire::header::Flags;
use crate::wire::objects::{ErrorObject, NetworkLayerInfo, Object};
use crate::wire::pdu::{Pdu, PduType};
use crate::wire::Mri;

/// NSLP-facing `MessageStatusFrame::error_type` reported when retries are
/// exhausted (spec §4.7: the only named error outcome at this boundary).
const ERROR_UNABLE_TO_ESTABLISH: u8 = 1;

/// Keys a pending Querier exchange by the Query-Cookie it minted, since
/// that's the only correlator the Responder echoes back before any
/// routing state exists (spec §4.6 step 3).
struct PendingQuery {
    ctx: QuerierContext,
    nslp_id: NslpId,
    nslp_message_handle: [u8; 16],
    dest: SocketAddr,
    query: Pdu,
}

pub struct SignalingModule {
    qmode: QModeTransport,
    routing: Arc<RoutingTable>,
    secrets: Arc<SecretManager>,
    capabilities: Arc<LocalCapabilities>,
    api: Arc<ApiDispatcher>,
    config: Arc<GistConfig>,
    local_nli: NetworkLayerInfo,
    ma_manager: Arc<MaManager>,
    pending: DashMap<Vec<u8>, PendingQuery>,
}

impl SignalingModule {
    pub fn new(
        qmode: QModeTransport,
        shared: &SharedState,
        local_nli: NetworkLayerInfo,
        ma_manager: Arc<MaManager>,
    ) -> Self {
        Self {
            qmode,
            routing: shared.routing.clone(),
            secrets: shared.secrets.clone(),
            capabilities: shared.capabilities.clone(),
            api: shared.api.clone(),
            config: shared.config.clone(),
            local_nli,
            ma_manager,
            pending: DashMap::new(),
        }
    }

    /// Initiates a Query for a flow with no established routing state
    /// (spec §4.6 Q-Node outbound step 2), then schedules retransmissions
    /// with exponential backoff until a Response arrives or
    /// `t_no_response_max_attempts` is exhausted (spec §4.6 step 4, §8
    /// scenario 5).
    pub async fn start_query(
        self: Arc<Self>,
        nslp_id: NslpId,
        mri: Mri,
        sid: crate::common::SessionId,
        dest: SocketAddr,
        nslp_data: Option<Vec<u8>>,
        local_processing: bool,
        nslp_message_handle: [u8; 16],
    ) -> crate::Result<()> {
        let (query, cookie) = statemachine::build_query(
            nslp_id,
            mri,
            sid,
            &self.capabilities,
            nslp_data,
            local_processing,
        );
        self.enqueue(nslp_id, dest, query, cookie, nslp_message_handle).await
    }

    /// Re-sends a Query for an already-established entry when its refresh
    /// timer fires (spec §4.6 Refresh): same shape as the initial Query,
    /// reusing the entry's known peer address. A freshly generated handle
    /// stands in for the NSLP-message handle since no NSLP call triggered
    /// this retransmission (spec §8 scenario 4).
    pub async fn start_refresh(self: Arc<Self>, key: RoutingKey) -> crate::Result<()> {
        let Some(entry) = self.routing.lookup(&key) else {
            // Entry expired or was torn down between the timer firing and
            // this task running; nothing to refresh.
            return Ok(());
        };
        let (query, cookie) = statemachine::build_refresh_query(&entry, &self.capabilities);
        let mut handle = [0u8; 16];
        rand::Rng::fill(&mut rand::rng(), &mut handle);
        self.enqueue(entry.key.nslp_id, entry.peer_address, query, cookie, handle).await
    }

    /// Drains outbound requests a registered NSLP submitted via the API
    /// boundary (spec §4.7) and dispatches `SendMessage` into a fresh
    /// Query. Takes `ApiDispatcher`'s outbound receiver once; a second
    /// call elsewhere would find it already taken and do nothing.
    pub async fn run_outbound_dispatch(self: Arc<Self>) {
        let Some(mut outbound) = self.api.take_outbound_receiver() else {
            tracing::warn!("outbound receiver already taken; API-triggered signaling is disabled");
            return;
        };
        while let Some((nslp_id, request)) = outbound.recv().await {
            match request {
                OutboundRequest::SendMessage(frame) => {
                    let module = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = module.dispatch_send_message(nslp_id, frame).await {
                            tracing::debug!(%err, nslp_id, "failed to dispatch SendMessage");
                        }
                    });
                }
                OutboundRequest::StateLifetime(_) | OutboundRequest::RoutingState(_) => {
                    tracing::debug!(nslp_id, "StateLifetime/RoutingState queries have no reply path yet");
                }
            }
        }
    }

    async fn dispatch_send_message(self: Arc<Self>, nslp_id: NslpId, frame: SendMessageFrame) -> crate::Result<()> {
        let dest = self.resolve_destination(&frame.mri, nslp_id)?;
        let nslp_data = if frame.nslp_data.is_empty() { None } else { Some(frame.nslp_data) };
        self.start_query(nslp_id, frame.mri, frame.sid, dest, nslp_data, frame.local_processing, frame.nslp_message_handle)
            .await
    }

    /// Prefers an already-established entry's peer address; falls back to
    /// the MRI's own destination address on `config.udp_port` when no
    /// routing state exists yet (spec §4.2: a Query rides toward the
    /// flow's destination so Router Alert interception finds it on-path).
    fn resolve_destination(&self, mri: &Mri, nslp_id: NslpId) -> crate::Result<SocketAddr> {
        let key = RoutingKey { mri: mri.clone(), nslp_id, direction: mri.direction() };
        if let Some(entry) = self.routing.lookup(&key) {
            return Ok(entry.peer_address);
        }
        let ip = mri
            .dst_addr()
            .ok_or_else(|| crate::error::GistError::MriValidationFailed("MRI carries no destination address".into()))?;
        Ok(SocketAddr::new(ip, self.config.udp_port))
    }

    async fn enqueue(
        self: Arc<Self>,
        nslp_id: NslpId,
        dest: SocketAddr,
        query: Pdu,
        cookie: Vec<u8>,
        nslp_message_handle: [u8; 16],
    ) -> crate::Result<()> {
        let mut ctx = QuerierContext::new(self.config.t_no_response_initial);
        ctx.state = statemachine::QState::AwaitResponse;
        ctx.last_query_cookie = cookie.clone();

        self.pending.insert(
            cookie.clone(),
            PendingQuery { ctx, nslp_id, nslp_message_handle, dest, query: query.clone() },
        );
        self.qmode.send(&query, dest).await?;

        let module = self.clone();
        tokio::spawn(async move { module.retry_until_resolved(cookie).await });
        Ok(())
    }

    async fn retry_until_resolved(self: Arc<Self>, cookie: Vec<u8>) {
        loop {
            let Some(backoff) = self.pending.get(&cookie).map(|p| p.ctx.next_backoff) else {
                return;
            };
            tokio::time::sleep(backoff).await;

            let Some(mut entry) = self.pending.get_mut(&cookie) else {
                return;
            };
            entry.ctx.retry_count += 1;
            if entry.ctx.retry_count >= self.config.t_no_response_max_attempts {
                let nslp_id = entry.nslp_id;
                let handle = entry.nslp_message_handle;
                drop(entry);
                self.pending.remove(&cookie);
                self.report_exhausted(nslp_id, handle).await;
                return;
            }
            entry.ctx.next_backoff =
                (entry.ctx.next_backoff * 2).min(self.config.t_no_response_ceiling);
            let query = entry.query.clone();
            let dest = entry.dest;
            drop(entry);

            if self.qmode.send(&query, dest).await.is_err() {
                return;
            }
        }
    }

    async fn report_exhausted(&self, nslp_id: NslpId, handle: [u8; 16]) {
        let status = MessageStatusFrame {
            reliability: true,
            security: false,
            error_type: ERROR_UNABLE_TO_ESTABLISH,
            nslp_message_handle: handle,
        };
        if let Err(err) = self.api.deliver(nslp_id, InboundEvent::MessageStatus(status)).await {
            tracing::debug!(%err, nslp_id, "no NSLP registered to receive exhaustion status");
        }
    }

    /// Runs the receive loop until the socket errors out.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.qmode.recv().await {
                Ok(Some((pdu, from))) => {
                    if let Err(err) = self.handle_inbound(pdu, from).await {
                        tracing::debug!(%err, %from, "dropping malformed Q-mode message");
                    }
                }
                Ok(None) => continue,
                Err(err) => {
                    tracing::error!(%err, "Q-mode transport failed, signaling loop exiting");
                    return;
                }
            }
        }
    }

    async fn handle_inbound(&self, pdu: Pdu, from: SocketAddr) -> crate::Result<()> {
        match pdu.header.pdu_type {
            PduType::Query => match statemachine::handle_query(
                &pdu,
                from,
                &self.secrets,
                &self.capabilities,
                &self.local_nli,
                self.routing_state_validity(),
            ) {
                Ok(outcome) => self.qmode.send(&outcome.response, from).await,
                Err(err) => {
                    self.reply_error(from, &pdu, &err).await;
                    Err(err)
                }
            },
            PduType::Response => match self.process_response(&pdu, from).await {
                Ok(confirm) => self.qmode.send(&confirm, from).await,
                Err(err) => {
                    self.reply_error(from, &pdu, &err).await;
                    Err(err)
                }
            },
            PduType::Confirm => match self.process_confirm(&pdu, from).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    self.reply_error(from, &pdu, &err).await;
                    Err(err)
                }
            },
            PduType::Data | PduType::Error | PduType::MaHello => {
                // Data/Error/MA-Hello over Q-mode are out of this loop's
                // scope: Data normally rides an established C-mode MA,
                // and MA-Hello is a C-mode keepalive.
                Ok(())
            }
        }
    }

    async fn process_response(&self, pdu: &Pdu, from: SocketAddr) -> crate::Result<Pdu> {
        let cookie = pdu.objects.iter().find_map(|o| match o {
            Object::QueryCookie(c) => Some(c.0.clone()),
            _ => None,
        });
        let Some(cookie) = cookie else {
            return Err(crate::error::GistError::IncorrectlyDeliveredMessage(
                "Response missing Query-Cookie".into(),
            ));
        };
        let Some((_, pending)) = self.pending.remove(&cookie) else {
            return Err(crate::error::GistError::IncorrectlyDeliveredMessage(
                "Response for unknown Query".into(),
            ));
        };
        let mut ctx = pending.ctx;
        let (confirm, selected) = statemachine::handle_response(&mut ctx, pdu, &self.capabilities)?;

        let peer_identity = pdu
            .objects
            .iter()
            .find_map(|o| match o {
                Object::Nli(nli) => Some(nli.peer_identity.clone()),
                _ => None,
            })
            .unwrap_or_else(|| PeerIdentity(from.ip().to_string().into_bytes()));
        let mri = pdu
            .mri()
            .cloned()
            .ok_or_else(|| crate::error::GistError::IncorrectlyDeliveredMessage("Response missing MRI".into()))?;
        let sid = pdu
            .session_id()
            .copied()
            .ok_or_else(|| crate::error::GistError::IncorrectlyDeliveredMessage("Response missing SessionID".into()))?;

        let ma_id = match self.ma_manager.acquire_outbound(from, selected).await {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::debug!(%err, %from, "could not bind a messaging association for this entry");
                None
            }
        };

        self.routing.install(
            mri.clone(),
            pdu.header.nslp_id,
            mri.direction(),
            sid,
            peer_identity,
            from,
            ma_id,
            self.routing_state_validity(),
            std::time::Instant::now(),
        );

        Ok(confirm)
    }

    async fn process_confirm(&self, pdu: &Pdu, from: SocketAddr) -> crate::Result<()> {
        let peer_identity = pdu
            .objects
            .iter()
            .find_map(|o| match o {
                Object::Nli(nli) => Some(nli.peer_identity.clone()),
                _ => None,
            })
            .unwrap_or_else(|| PeerIdentity(from.ip().to_string().into_bytes()));
        let mri = pdu
            .mri()
            .cloned()
            .ok_or_else(|| crate::error::GistError::IncorrectlyDeliveredMessage("Confirm missing MRI".into()))?;

        let selected = pdu.objects.iter().find_map(|o| match o {
            Object::StackProposal(sp) => sp.profiles.first().and_then(|p| p.first()).copied(),
            _ => None,
        });
        let ma_id = selected.and_then(|protocol| self.ma_manager.acquire_existing(from, protocol));

        statemachine::handle_confirm(
            pdu,
            from,
            peer_identity,
            &self.secrets,
            &self.routing,
            mri.direction(),
            ma_id,
            self.routing_state_validity(),
            std::time::Instant::now(),
        )?;
        Ok(())
    }

    /// Sends an Error PDU back to `to` for a non-Informational wire-level
    /// failure (spec §7). Errors with no wire representation (`None` from
    /// [`crate::error::GistError::as_wire_error`]) are dropped silently,
    /// same as before this existed.
    async fn reply_error(&self, to: SocketAddr, pdu: &Pdu, err: &crate::error::GistError) {
        let Some((class, code, subcode)) = err.as_wire_error() else {
            return;
        };
        if matches!(class, crate::wire::objects::ErrorClass::Informational) {
            return;
        }
        let error_object = ErrorObject {
            class,
            code,
            subcode,
            offending_header: pdu.header.encode_full(),
            offending_mri: pdu.mri().cloned(),
        };
        let error_pdu = Pdu::new(PduType::Error, pdu.header.nslp_id, Flags::default(), vec![Object::Error(error_object)]);
        if let Err(send_err) = self.qmode.send(&error_pdu, to).await {
            tracing::debug!(%send_err, %to, "failed to send Error PDU");
        }
    }

    fn routing_state_validity(&self) -> std::time::Duration {
        std::time::Duration::from_secs(90)
    }
}
