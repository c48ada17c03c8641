//! State machine (component C6, spec §4.6): the Querier and Responder
//! roles bound to each routing entry, crossing-query race resolution, and
//! refresh handling.
//!
//! `QState`/`RState` follow the teacher's `networking::types::NodeState`
//! convention (a plain `#[derive(..., PartialEq, Eq)]` enum driven by an
//! explicit transition function rather than a trait-object state
//! pattern). The Querier/Responder split itself mirrors
//! `networking::manager::NetworkManager`'s internal event-driven handling
//! of one concern at a time behind a single entry point.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::capability::LocalCapabilities;
use crate::common::{NslpId, PeerIdentity, SessionId};
use crate::error::GistError;
use crate::routing::{MaId, RoutingEntry, RoutingKey, RoutingTable};
use crate::secret::SecretManager;
use crate::wire::header::Flags;
use crate::wire::objects::{NetworkLayerInfo, Object, QueryCookie, ResponderCookie, StackProposal};
use crate::wire::pdu::{Pdu, PduType};
use crate::wire::{Direction, MaProtocol, Mri};

/// Querier-side per-entry state (spec §4.6: `IDLE → AwaitResponse →
/// Established → AwaitRefreshResp → {Established|Dead}`; GIST has no
/// separate "await confirm ack" state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QState {
    Idle,
    AwaitResponse,
    Established,
    AwaitRefreshResp,
    Dead,
}

/// Responder-side per-entry state: stateless until a valid Confirm
/// arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RState {
    Stateless,
    Established,
}

/// Bookkeeping the Querier keeps across the handshake and refresh retries.
#[derive(Debug, Clone)]
pub struct QuerierContext {
    pub state: QState,
    pub last_query_cookie: Vec<u8>,
    pub retry_count: u32,
    pub next_backoff: Duration,
    pub pending_nslp_data: Option<Vec<u8>>,
}

impl QuerierContext {
    pub fn new(config_initial_backoff: Duration) -> Self {
        Self {
            state: QState::Idle,
            last_query_cookie: Vec::new(),
            retry_count: 0,
            next_backoff: config_initial_backoff,
            pending_nslp_data: None,
        }
    }
}

/// Builds the outbound Query a Q-node sends when no suitable established
/// entry exists yet (spec §4.6 step 2). NSLP data is piggybacked only when
/// `local_processing` is clear, per spec §4.7.
pub fn build_query(
    nslp_id: NslpId,
    mri: Mri,
    sid: SessionId,
    capabilities: &LocalCapabilities,
    nslp_data: Option<Vec<u8>>,
    local_processing: bool,
) -> (Pdu, Vec<u8>) {
    let cookie = crate::secret::generate_query_cookie();

    let mut objects = vec![
        Object::Mri(mri),
        Object::SessionId(sid),
        Object::StackProposal(capabilities.propose()),
        Object::QueryCookie(QueryCookie(cookie.clone())),
    ];
    if !local_processing {
        if let Some(data) = nslp_data {
            objects.push(Object::NslpData(crate::wire::objects::NslpData(data)));
        }
    }

    let pdu = Pdu::new(PduType::Query, nslp_id, Flags { s: true, r: true, e: false }, objects);
    (pdu, cookie)
}

/// Applies a Response to a pending Querier context (spec §4.6 step 3).
/// Returns the Confirm to send and the negotiated MA protocol, or an
/// error if the Response doesn't belong to this Query.
pub fn handle_response(
    ctx: &mut QuerierContext,
    response: &Pdu,
    capabilities: &LocalCapabilities,
) -> crate::Result<(Pdu, MaProtocol)> {
    if ctx.state != QState::AwaitResponse {
        return Err(GistError::IncorrectlyDeliveredMessage(
            "Response received for an entry not awaiting one".into(),
        ));
    }

    let echoed_cookie = response
        .objects
        .iter()
        .find_map(|o| match o {
            Object::QueryCookie(c) => Some(c),
            _ => None,
        })
        .ok_or_else(|| GistError::IncorrectlyDeliveredMessage("Response missing Query-Cookie".into()))?;
    if echoed_cookie.0 != ctx.last_query_cookie {
        return Err(GistError::IncorrectlyDeliveredMessage(
            "Response echoes a stale or foreign Query-Cookie".into(),
        ));
    }

    let r_cookie = response
        .objects
        .iter()
        .find_map(|o| match o {
            Object::ResponderCookie(c) => Some(c.clone()),
            _ => None,
        })
        .ok_or_else(|| GistError::IncorrectlyDeliveredMessage("Response missing Responder-Cookie".into()))?;

    let proposal = response
        .objects
        .iter()
        .find_map(|o| match o {
            Object::StackProposal(sp) => Some(sp.clone()),
            _ => None,
        })
        .unwrap_or(StackProposal { profiles: vec![] });
    let selected = capabilities.select(&proposal)?;

    let mri = response
        .mri()
        .cloned()
        .ok_or_else(|| GistError::IncorrectlyDeliveredMessage("Response missing MRI".into()))?;
    let sid = response
        .session_id()
        .copied()
        .ok_or_else(|| GistError::IncorrectlyDeliveredMessage("Response missing SessionID".into()))?;

    let confirm = Pdu::new(
        PduType::Confirm,
        response.header.nslp_id,
        Flags { s: true, r: false, e: false },
        vec![
            Object::Mri(mri),
            Object::SessionId(sid),
            Object::ResponderCookie(r_cookie),
            Object::StackProposal(StackProposal::single(selected)),
            Object::StackConfigurationData(capabilities.configuration()),
        ],
    );

    ctx.state = QState::Established;
    ctx.retry_count = 0;
    Ok((confirm, selected))
}

/// Surfaces a hard handshake failure after retries are exhausted (spec
/// §4.6 step 4).
pub fn handle_timeout_exhausted(ctx: &mut QuerierContext, handle: [u8; 16]) -> GistError {
    ctx.state = QState::Dead;
    GistError::UnableToEstablishRoutingState(handle)
}

/// Result of processing an inbound Query at the Responder (spec §4.6,
/// R-Node inbound Query).
pub struct QueryOutcome {
    pub response: Pdu,
}

/// Responder-side handling of an inbound Query. Stateless: no routing
/// entry is touched until the matching Confirm arrives.
pub fn handle_query(
    query: &Pdu,
    peer_addr: SocketAddr,
    secrets: &SecretManager,
    capabilities: &LocalCapabilities,
    local_nli: &NetworkLayerInfo,
    rs_validity: Duration,
) -> crate::Result<QueryOutcome> {
    if query.header.hops == 0 {
        return Err(GistError::HopLimitExceeded);
    }

    let mri = query
        .mri()
        .cloned()
        .ok_or_else(|| GistError::IncorrectlyDeliveredMessage("Query missing MRI".into()))?;
    let sid = query
        .session_id()
        .copied()
        .ok_or_else(|| GistError::IncorrectlyDeliveredMessage("Query missing SessionID".into()))?;

    let q_cookie = query.objects.iter().find_map(|o| match o {
        Object::QueryCookie(c) => Some(c.clone()),
        _ => None,
    });

    let proposal = query
        .objects
        .iter()
        .find_map(|o| match o {
            Object::StackProposal(sp) => Some(sp.clone()),
            _ => None,
        })
        .unwrap_or(StackProposal { profiles: vec![] });
    // The Responder advertises its own supported profiles; final selection
    // happens when the Confirm arrives (spec §4.5).
    let _ = capabilities.select(&proposal);

    let r_cookie = secrets.mint(peer_addr, &mri, query.header.nslp_id);

    let mut objects = vec![
        Object::Mri(mri),
        Object::SessionId(sid),
        Object::Nli(local_nli.clone()),
        Object::StackProposal(capabilities.propose()),
        Object::ResponderCookie(r_cookie),
    ];
    if let Some(cookie) = q_cookie {
        objects.push(Object::QueryCookie(cookie));
    }

    let response = Pdu::new(
        PduType::Response,
        query.header.nslp_id,
        Flags { s: true, r: false, e: false },
        objects,
    );

    let _ = rs_validity; // reserved for the routing entry created on Confirm
    Ok(QueryOutcome { response })
}

/// Responder-side handling of an inbound Confirm: validates the echoed
/// Responder Cookie and, if valid, installs/refreshes routing state
/// (spec §4.6 R-Node step 3).
#[allow(clippy::too_many_arguments)]
pub fn handle_confirm(
    confirm: &Pdu,
    peer_addr: SocketAddr,
    peer_identity: PeerIdentity,
    secrets: &SecretManager,
    routing: &RoutingTable,
    direction: Direction,
    ma_id: Option<MaId>,
    rs_validity: Duration,
    now: Instant,
) -> crate::Result<RoutingKey> {
    let mri = confirm
        .mri()
        .cloned()
        .ok_or_else(|| GistError::IncorrectlyDeliveredMessage("Confirm missing MRI".into()))?;
    let sid = confirm
        .session_id()
        .copied()
        .ok_or_else(|| GistError::IncorrectlyDeliveredMessage("Confirm missing SessionID".into()))?;

    let r_cookie = confirm
        .objects
        .iter()
        .find_map(|o| match o {
            Object::ResponderCookie(c) => Some(c.clone()),
            _ => None,
        })
        .ok_or_else(|| GistError::IncorrectlyDeliveredMessage("Confirm missing Responder-Cookie".into()))?;

    secrets.validate(&r_cookie, peer_addr, &mri, confirm.header.nslp_id)?;

    let key = routing.install(
        mri,
        confirm.header.nslp_id,
        direction,
        sid,
        peer_identity,
        peer_addr,
        ma_id,
        rs_validity,
        now,
    );
    Ok(key)
}

/// Picks which side keeps the Querier role when two Queries cross for the
/// same (MRI, NSLP-ID, direction) (spec §4.6 race resolution): the lower
/// Peer-Identity, compared lexicographically, wins.
pub fn resolve_crossing_query(local: &PeerIdentity, remote: &PeerIdentity) -> Role {
    if local < remote {
        Role::Querier
    } else {
        Role::Responder
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Querier,
    Responder,
}

/// Builds the refresh Query sent when an Established Q-entry's refresh
/// timer fires (spec §4.6 Refresh): same shape as the initial Query, new
/// Query-Cookie, no NSLP data.
pub fn build_refresh_query(entry: &RoutingEntry, capabilities: &LocalCapabilities) -> (Pdu, Vec<u8>) {
    build_query(
        entry.key.nslp_id,
        entry.key.mri.clone(),
        entry.session_id,
        capabilities,
        None,
        false,
    )
}
