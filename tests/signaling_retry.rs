//! Exercises `SignalingModule`'s real retransmission/exhaustion path
//! (spec.md §8 scenario 5) over loopback UDP sockets, rather than driving
//! the state machine functions directly (see `tests/scenarios.rs`).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use gist_ntlp::api::{ApiDispatcher, InboundEvent};
use gist_ntlp::common::{PeerIdentity, SessionId};
use gist_ntlp::concurrency::{MaManager, SharedState, SignalingModule};
use gist_ntlp::config::GistConfig;
use gist_ntlp::transport::cmode::CModeConfig;
use gist_ntlp::transport::qmode::{QModeTransport, Socket2RaoSource};
use gist_ntlp::wire::mri::{Direction, PathCoupledMri};
use gist_ntlp::wire::objects::NetworkLayerInfo;
use gist_ntlp::wire::Mri;

const NATFW: u16 = 32;

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

#[tokio::test]
async fn exhausted_retries_surface_an_unable_to_establish_status() {
    let config = GistConfig {
        t_no_response_initial: Duration::from_millis(5),
        t_no_response_ceiling: Duration::from_millis(20),
        t_no_response_max_attempts: 3,
        ..GistConfig::default()
    };
    let shared = SharedState::new(config);

    let qmode = QModeTransport::bind(loopback(0), &Socket2RaoSource).await.unwrap();
    let local_nli = NetworkLayerInfo {
        peer_identity: PeerIdentity(b"q-node".to_vec()),
        interface_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        routing_state_validity_time: Duration::from_secs(90),
        ip_ttl: 64,
    };
    let mut ma_manager = MaManager::new(
        CModeConfig { bind_addr: loopback(0), ..Default::default() },
        shared.routing.clone(),
        Duration::from_secs(30),
    );
    ma_manager.bind().await.unwrap();
    let ma_manager = Arc::new(ma_manager);
    tokio::spawn(ma_manager.clone().accept_loop());

    let signaling = Arc::new(SignalingModule::new(qmode, &shared, local_nli, ma_manager));

    // A socket that receives but never answers: a stand-in for a
    // black-holed Responder.
    let black_hole = tokio::net::UdpSocket::bind(loopback(0)).await.unwrap();
    let black_hole_addr = black_hole.local_addr().unwrap();

    let dispatcher: Arc<ApiDispatcher> = shared.api.clone();
    let mut inbound = dispatcher.register_nslp(NATFW, 8);

    let mri = Mri::PathCoupled(PathCoupledMri {
        src_addr: "127.0.0.1".parse().unwrap(),
        dst_addr: "127.0.0.1".parse().unwrap(),
        src_prefix: 32,
        dst_prefix: 32,
        protocol: 17,
        ds_field: 0,
        flow_label: 0,
        spi: 0,
        src_port: 5000,
        dst_port: 6000,
        direction: Direction::Downstream,
        nat_traversed: false,
    });

    signaling
        .clone()
        .start_query(NATFW, mri, SessionId::random(), black_hole_addr, None, false, [9u8; 16])
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .expect("exhaustion status should arrive within the timeout")
        .expect("dispatcher channel should not close");

    match event {
        InboundEvent::MessageStatus(status) => {
            assert_eq!(status.nslp_message_handle, [9u8; 16]);
        }
        other => panic!("expected MessageStatus, got {other:?}"),
    }

    drop(black_hole);
}
