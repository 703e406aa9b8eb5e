/// END-TO-END SCENARIO B: upgrading a session to hybrid transport
///
/// After the switch, droppable updates travel over UDP while everything else keeps to TLS,
/// in both directions.
use std::{sync::Arc, time::Duration};

use tandem_client::{ClientConfig, HybridState, Message, MessageChannel, MessageType};
use tandem_shared::{PROTOCOL_HYBRID, PROTOCOL_TCP, PROTOCOL_UDP};
use tandem_test::{connect, spawn_receiver, trusting_config, TestServer};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const WAIT: Duration = Duration::from_secs(3);

fn position(x: f64, y: f64) -> Message {
    Message::builder(MessageType::POSITION_UPDATE)
        .doubles(vec![x, y])
        .build()
}

#[test]
fn client_reaches_hybrid_active() {
    init_logger();
    let server = TestServer::start();
    let (client, session) = connect(&server, trusting_config(&server));

    assert_eq!(client.state(), HybridState::HybridActive);
    assert!(session
        .controller()
        .wait_for_state(HybridState::HybridActive, WAIT));
    assert_eq!(client.protocol_name(), PROTOCOL_HYBRID);
    assert_eq!(session.protocol_name(), PROTOCOL_HYBRID);

    // Only PROTOCOL_SWITCH went over TLS, the proof went over UDP
    let (reliable, datagram) = client.controller().sent_counts();
    assert_eq!(reliable, 1);
    assert!(datagram >= 1);

    let endpoint = server.server().datagram_endpoint().unwrap();
    assert_eq!(endpoint.bound_peers(), 1);
    assert_eq!(server.server().credentials().pending_count(), 0);
}

#[test]
fn updates_take_udp_and_the_rest_takes_tls() {
    init_logger();
    let server = TestServer::start();
    let (client, session) = connect(&server, trusting_config(&server));
    assert!(session
        .controller()
        .wait_for_state(HybridState::HybridActive, WAIT));

    let session = Arc::new(session);
    let receiving = session.clone();
    let server_rx = spawn_receiver(move || receiving.receive_delivery());

    client.send(&position(1.5, -2.0)).unwrap();
    let delivery = server_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(delivery.protocol, PROTOCOL_UDP);
    assert_eq!(delivery.message, position(1.5, -2.0));

    let chat = Message::builder(MessageType::Game(200))
        .strings(vec!["hello".to_string()])
        .build();
    client.send(&chat).unwrap();
    let delivery = server_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(delivery.protocol, PROTOCOL_TCP);
    assert_eq!(delivery.message, chat);
}

#[test]
fn server_updates_reach_the_client_over_udp() {
    init_logger();
    let server = TestServer::start();
    let (client, session) = connect(&server, trusting_config(&server));
    assert!(session
        .controller()
        .wait_for_state(HybridState::HybridActive, WAIT));

    let cursor = Message::builder(MessageType::CURSOR_UPDATE)
        .ints(vec![10, 20])
        .build();
    session.send(&cursor).unwrap();

    let delivery = client.receive_delivery().unwrap();
    assert_eq!(delivery.protocol, PROTOCOL_UDP);
    assert_eq!(delivery.message, cursor);
    assert_eq!(session.controller().sent_counts().1, 1);
}

#[test]
fn custom_routing_sends_everything_over_tls() {
    init_logger();
    let server = TestServer::start();
    let config = ClientConfig {
        routing: tandem_client::RoutingPolicy::all_critical(),
        ..trusting_config(&server)
    };
    let (client, session) = connect(&server, config);
    assert_eq!(client.state(), HybridState::HybridActive);

    client.send(&position(0.0, 0.0)).unwrap();

    let delivery = session.receive_delivery().unwrap();
    assert_eq!(delivery.protocol, PROTOCOL_TCP);
    assert_eq!(client.controller().sent_counts().0, 2);
}

#[test]
fn disabled_upgrade_stays_on_tls() {
    init_logger();
    let server = TestServer::start();
    let config = ClientConfig {
        datagram_enabled: false,
        ..trusting_config(&server)
    };
    let (client, session) = connect(&server, config);

    assert_eq!(client.state(), HybridState::TcpOnly);
    assert_eq!(client.protocol_name(), PROTOCOL_TCP);

    client.send(&position(3.0, 4.0)).unwrap();
    assert_eq!(session.receive_delivery().unwrap().protocol, PROTOCOL_TCP);
}

#[test]
fn server_without_datagrams_leaves_the_client_on_tls() {
    init_logger();
    let server = TestServer::with_config(|config| config.datagram_enabled = false);
    let (client, session) = connect(&server, trusting_config(&server));

    // Nobody answers the key exchange, so the upgrade quietly fails
    assert_eq!(client.state(), HybridState::TcpOnly);
    assert!(!client.initiator().is_disabled());

    client.send(&position(5.0, 6.0)).unwrap();
    assert_eq!(session.receive_delivery().unwrap().protocol, PROTOCOL_TCP);
}
