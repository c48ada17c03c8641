//! `gistd`: a minimal GIST signaling daemon wiring the Timer, Signaling,
//! and API modules together. CLI argument parsing and config-file
//! loading are out of scope here; this is the bootstrap shape, not a
//! full daemon supervisor.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use gist_ntlp::api::ApiDispatcher;
use gist_ntlp::common::PeerIdentity;
use gist_ntlp::concurrency::{ApiModule, MaManager, SharedState, SignalingModule, TimerEvent, TimerModule};
use gist_ntlp::config::GistConfig;
use gist_ntlp::transport::cmode::CModeConfig;
use gist_ntlp::transport::qmode::{QModeTransport, Socket2RaoSource};
use gist_ntlp::transport::uds::UdsTransport;
use gist_ntlp::wire::objects::NetworkLayerInfo;

#[tokio::main]
async fn main() -> gist_ntlp::Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let config = GistConfig::default();
    let shared = SharedState::new(config.clone());

    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.udp_port);
    let rao_source = Socket2RaoSource;
    let qmode = QModeTransport::bind(bind_addr, &rao_source).await?;
    tracing::info!(%bind_addr, "Q-mode transport bound");

    let local_nli = NetworkLayerInfo {
        peer_identity: PeerIdentity(format!("gistd-{}", std::process::id()).into_bytes()),
        interface_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        routing_state_validity_time: config.rs_validity(),
        ip_ttl: 64,
    };

    let cmode_bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.cmode_port);
    let mut ma_manager = MaManager::new(
        CModeConfig { bind_addr: cmode_bind, ..Default::default() },
        shared.routing.clone(),
        config.ma_hold_time,
    );
    ma_manager.bind().await?;
    tracing::info!(%cmode_bind, "C-mode transport listening");
    let ma_manager = Arc::new(ma_manager);
    tokio::spawn(ma_manager.clone().accept_loop());

    let signaling = Arc::new(SignalingModule::new(qmode, &shared, local_nli, ma_manager));
    let timer = TimerModule::new(shared.routing.clone(), shared.secrets.clone(), config.refresh_interval);

    let (priority_tx, mut priority_rx) = gist_ntlp::concurrency::PriorityChannel::new(256);
    tokio::spawn(timer.run(priority_tx));
    tokio::spawn(signaling.clone().run());
    tokio::spawn(signaling.clone().run_outbound_dispatch());
    tokio::spawn(async move {
        while let Some(event) = priority_rx.recv().await {
            match event {
                TimerEvent::RefreshDue(key) => {
                    let signaling = signaling.clone();
                    tokio::spawn(async move {
                        if let Err(err) = signaling.start_refresh(key).await {
                            tracing::debug!(%err, "refresh query failed");
                        }
                    });
                }
                TimerEvent::EntryExpired(key) => {
                    tracing::debug!(?key, "routing entry expired");
                }
            }
        }
    });

    let uds_path = std::env::temp_dir().join("gistd.sock");
    match UdsTransport::bind(&uds_path) {
        Ok(uds) => {
            let dispatcher: Arc<ApiDispatcher> = shared.api.clone();
            let api = Arc::new(ApiModule::new(uds, dispatcher));
            tokio::spawn(api.run(gist_ntlp::common::NSLP_ID_NATFW));
        }
        Err(err) => tracing::warn!(%err, "UDS API transport unavailable"),
    }

    tracing::info!("gistd running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutting down");
    Ok(())
}
