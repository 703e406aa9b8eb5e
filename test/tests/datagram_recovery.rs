/// Losing the datagram channel must never lose critical traffic: the session falls back to
/// TLS at once, negotiates a fresh channel in the background and gives up cleanly when the
/// server's datagram endpoint is gone for good.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tandem_client::{
    ClientConfig, HybridState, Message, MessageChannel, MessageType, RecoveryPolicy,
};
use tandem_shared::{PROTOCOL_TCP, PROTOCOL_UDP};
use tandem_test::{connect, eventually, spawn_receiver, trusting_config, TestServer};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const WAIT: Duration = Duration::from_secs(5);

fn order(index: i32) -> Message {
    Message::builder(MessageType::Game(120))
        .ints(vec![index])
        .build()
}

#[test]
fn critical_messages_survive_and_the_channel_comes_back() {
    init_logger();
    let server = TestServer::start();
    let (client, session) = connect(&server, trusting_config(&server));
    assert!(session
        .controller()
        .wait_for_state(HybridState::HybridActive, WAIT));
    let generation = client.controller().datagram_generation();

    let session = Arc::new(session);
    let receiving = session.clone();
    let server_rx = spawn_receiver(move || receiving.receive_delivery());

    client.controller().datagram().unwrap().close();
    for index in 0..50 {
        client.send(&order(index)).unwrap();
    }

    for index in 0..50 {
        let delivery = server_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(delivery.protocol, PROTOCOL_TCP);
        assert_eq!(delivery.message, order(index));
    }

    assert!(eventually(WAIT, || {
        client.controller().datagram_generation() > generation
            && client.state() == HybridState::HybridActive
    }));
    assert!(eventually(WAIT, || session.state() == HybridState::HybridActive));

    // And the new channel carries updates again
    let update = Message::builder(MessageType::POSITION_UPDATE)
        .doubles(vec![7.0, 8.0])
        .build();
    assert!(eventually(WAIT, || {
        client.send(&update).unwrap();
        matches!(
            server_rx.recv_timeout(Duration::from_millis(100)),
            Ok(delivery) if delivery.protocol == PROTOCOL_UDP
        )
    }));
}

#[test]
fn recovery_completes_while_the_server_keeps_talking() {
    init_logger();
    let server = TestServer::start();
    let (client, session) = connect(&server, trusting_config(&server));
    assert!(session
        .controller()
        .wait_for_state(HybridState::HybridActive, WAIT));
    let generation = client.controller().datagram_generation();

    let client = Arc::new(client);
    let receiving = client.clone();
    let client_rx = spawn_receiver(move || receiving.receive_delivery());

    let talking = Arc::new(AtomicBool::new(true));
    let chatter = {
        let talking = talking.clone();
        let session = Arc::new(session);
        let sending = session.clone();
        let handle = thread::spawn(move || {
            let mut index = 0;
            while talking.load(Ordering::Acquire) {
                if sending.send(&order(index)).is_err() {
                    break;
                }
                index += 1;
            }
        });
        (handle, session)
    };

    client.controller().datagram().unwrap().close();

    let recovered = eventually(WAIT, || {
        client.controller().datagram_generation() > generation
            && client.state() == HybridState::HybridActive
    });
    talking.store(false, Ordering::Release);
    let (handle, _session) = chatter;
    handle.join().unwrap();

    assert!(recovered);
    assert!(!client.initiator().is_disabled());
    assert!(client_rx.try_iter().count() > 0);
}

#[test]
fn client_falls_back_when_the_endpoint_disappears() {
    init_logger();
    let server = TestServer::start();
    let config = ClientConfig {
        recovery: RecoveryPolicy {
            attempts: 2,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(100),
        },
        ..trusting_config(&server)
    };
    let (client, session) = connect(&server, config);
    assert!(session
        .controller()
        .wait_for_state(HybridState::HybridActive, WAIT));

    server.server().datagram_endpoint().unwrap().close();
    assert_eq!(session.state(), HybridState::TcpOnly);

    assert!(client
        .controller()
        .wait_for_state(HybridState::TcpOnly, Duration::from_secs(10)));
    assert!(client.controller().datagram().is_none());
    assert!(eventually(WAIT, || !client.initiator().is_recovering()));

    // The session itself is unharmed
    let update = Message::builder(MessageType::POSITION_UPDATE)
        .doubles(vec![1.0, 1.0])
        .build();
    client.send(&update).unwrap();
    let delivery = session.receive_delivery().unwrap();
    assert_eq!(delivery.protocol, PROTOCOL_TCP);
    assert_eq!(delivery.message, update);
}

#[test]
fn server_side_loss_keeps_the_session_on_tls() {
    init_logger();
    let server = TestServer::start();
    let (client, session) = connect(&server, trusting_config(&server));
    assert!(session
        .controller()
        .wait_for_state(HybridState::HybridActive, WAIT));

    session.controller().datagram().unwrap().close();
    assert!(session
        .controller()
        .wait_for_state(HybridState::TcpOnly, WAIT));

    let cursor = Message::builder(MessageType::CURSOR_UPDATE)
        .ints(vec![3, 4])
        .build();
    session.send(&cursor).unwrap();
    let delivery = client.receive_delivery().unwrap();
    assert_eq!(delivery.protocol, PROTOCOL_TCP);
    assert_eq!(delivery.message, cursor);
}
