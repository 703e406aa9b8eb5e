/// Opening, using and closing sessions from either side
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use tandem_client::{ChannelError, ClientConfig, Message, MessageChannel, MessageType};
use tandem_server::ServerError;
use tandem_shared::PROTOCOL_TCP;
use tandem_test::{connect, eventually, spawn_receiver, trusting_config, TestServer};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tcp_only(server: &TestServer) -> ClientConfig {
    ClientConfig {
        datagram_enabled: false,
        ..trusting_config(server)
    }
}

#[test]
fn echo_round_trip() {
    init_logger();
    let server = TestServer::start();
    let (client, session) = connect(&server, tcp_only(&server));

    let greeting = Message::builder(MessageType::Game(100))
        .strings(vec!["ping".to_string()])
        .ints(vec![1, 2, 3])
        .build();
    client.send(&greeting).unwrap();

    let delivery = session.receive_delivery().unwrap();
    assert_eq!(delivery.protocol, PROTOCOL_TCP);
    session.send(&delivery.message).unwrap();

    let echoed = client.receive_delivery().unwrap();
    assert_eq!(echoed.protocol, PROTOCOL_TCP);
    assert_eq!(echoed.message, greeting);
}

#[test]
fn server_close_is_seen_by_the_client() {
    init_logger();
    let server = TestServer::start();
    let (client, session) = connect(&server, tcp_only(&server));

    session.close();

    assert!(matches!(
        client.receive(),
        Err(ChannelError::ConnectionLost { .. })
    ));
    assert!(client.controller().is_closed());
    assert!(client.send(&Message::new(MessageType::Game(100))).is_err());
}

#[test]
fn client_close_is_seen_by_the_server() {
    init_logger();
    let server = TestServer::start();
    let (client, session) = connect(&server, trusting_config(&server));

    let server_rx = spawn_receiver(move || session.receive_delivery());
    client.close();
    drop(client);

    assert!(matches!(
        server_rx.recv_timeout(Duration::from_secs(3)),
        Err(RecvTimeoutError::Disconnected)
    ));
    assert!(eventually(Duration::from_secs(3), || {
        server.server().datagram_endpoint().unwrap().bound_peers() == 0
    }));
}

#[test]
fn silent_peer_times_out() {
    init_logger();
    let server = TestServer::with_config(|config| {
        config.connection.read_timeout = Duration::from_millis(500);
        config.connection.heartbeat_interval = Duration::from_secs(60);
    });
    // Never sends a heartbeat within the server's read timeout
    let mut config = tcp_only(&server);
    config.connection.heartbeat_interval = Duration::from_secs(60);
    let (_client, session) = connect(&server, config);

    assert!(matches!(
        session.receive(),
        Err(ChannelError::ConnectionLost { .. })
    ));
}

#[test]
fn many_clients_get_distinct_sessions() {
    init_logger();
    let server = TestServer::start();

    let pairs: Vec<_> = (0..4)
        .map(|_| connect(&server, tcp_only(&server)))
        .collect();

    let mut ids: Vec<u64> = pairs.iter().map(|(_, session)| session.id()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4);

    for (index, (client, session)) in pairs.iter().enumerate() {
        let message = Message::builder(MessageType::Game(101))
            .ints(vec![index as i32])
            .build();
        client.send(&message).unwrap();
        assert_eq!(session.receive().unwrap(), message);
    }
}

#[test]
fn shutdown_stops_accepting() {
    init_logger();
    let server = TestServer::start();
    let (client, session) = connect(&server, tcp_only(&server));

    server.server().shutdown();

    assert!(matches!(server.server().accept(), Err(ServerError::Shutdown)));
    assert!(server.server().datagram_endpoint().unwrap().is_closed());

    // Sessions already handed out keep working
    client.send(&Message::new(MessageType::Game(100))).unwrap();
    assert_eq!(session.receive().unwrap().kind(), MessageType::Game(100));
}
