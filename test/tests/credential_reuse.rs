/// Switch credentials are single use: a recorded proof replayed from another datagram
/// channel must not steal or disturb the session it was issued to.
use std::{thread, time::Duration};

use tandem_client::{establish_datagram, ClientConfig, DatagramTarget, HybridState};
use tandem_server::Credential;
use tandem_shared::{DatagramChannel, Message, MessageChannel, MessageType};
use tandem_test::{connect, eventually, trusting_config, TestServer};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const WAIT: Duration = Duration::from_secs(3);

fn tcp_only(server: &TestServer) -> ClientConfig {
    ClientConfig {
        datagram_enabled: false,
        ..trusting_config(server)
    }
}

fn open_channel(server: &TestServer, config: &ClientConfig) -> DatagramChannel {
    let certificate = server.certificate();
    establish_datagram(&DatagramTarget {
        server: server.addr(),
        certificate: &certificate,
        connection: &config.connection,
        attempts: 2,
        attempt_timeout: Duration::from_millis(500),
    })
    .unwrap()
}

fn find(request_id: &str, token: &str) -> Message {
    Message::builder(MessageType::ProtocolSwitchFind)
        .strings(vec![request_id.to_string(), token.to_string()])
        .build()
}

fn prove(channel: &DatagramChannel, credential: &Credential) {
    channel
        .send(&find(&credential.request_id, &credential.token))
        .unwrap();
}

#[test]
fn replayed_credential_binds_nothing() {
    init_logger();
    let server = TestServer::start();
    let config = tcp_only(&server);
    let (_client, session) = connect(&server, config.clone());
    let endpoint = server.server().datagram_endpoint().unwrap();

    let credential = server
        .server()
        .credentials()
        .issue(session.id(), session.controller().downgrade())
        .unwrap();

    let first = open_channel(&server, &config);
    first.start().unwrap();
    prove(&first, &credential);
    assert!(session
        .controller()
        .wait_for_state(HybridState::HybridActive, WAIT));
    let generation = session.controller().datagram_generation();
    assert_eq!(endpoint.bound_peers(), 1);

    let second = open_channel(&server, &config);
    second.start().unwrap();
    prove(&second, &credential);
    thread::sleep(Duration::from_millis(300));

    assert_eq!(session.controller().datagram_generation(), generation);
    assert_eq!(session.state(), HybridState::HybridActive);
    assert_eq!(endpoint.bound_peers(), 1);
    assert_eq!(
        session.controller().datagram().unwrap().peer_addr().port(),
        first.local_addr().unwrap().port()
    );
}

#[test]
fn wrong_token_keeps_the_credential_pending() {
    init_logger();
    let server = TestServer::start();
    let config = tcp_only(&server);
    let (_client, session) = connect(&server, config.clone());

    let credential = server
        .server()
        .credentials()
        .issue(session.id(), session.controller().downgrade())
        .unwrap();

    let channel = open_channel(&server, &config);
    channel.start().unwrap();
    channel
        .send(&find(&credential.request_id, "not-the-token"))
        .unwrap();
    thread::sleep(Duration::from_millis(300));

    assert_eq!(session.state(), HybridState::TcpOnly);
    assert_eq!(server.server().credentials().pending_count(), 1);

    // The rightful owner can still prove itself
    prove(&channel, &credential);
    assert!(session
        .controller()
        .wait_for_state(HybridState::HybridActive, WAIT));
    assert_eq!(server.server().credentials().pending_count(), 0);
}

#[test]
fn proof_over_the_reliable_channel_is_ignored() {
    init_logger();
    let server = TestServer::start();
    let (client, session) = connect(&server, tcp_only(&server));

    let credential = server
        .server()
        .credentials()
        .issue(session.id(), session.controller().downgrade())
        .unwrap();

    client
        .controller()
        .send_reliable(&find(&credential.request_id, &credential.token))
        .unwrap();

    assert!(!eventually(Duration::from_millis(300), || {
        session.state() == HybridState::HybridActive
    }));
    assert_eq!(server.server().credentials().pending_count(), 1);
}

#[test]
fn closed_session_revokes_its_credential() {
    init_logger();
    let server = TestServer::start();
    let config = tcp_only(&server);
    let (_client, session) = connect(&server, config.clone());

    let credential = server
        .server()
        .credentials()
        .issue(session.id(), session.controller().downgrade())
        .unwrap();
    session.close();
    assert_eq!(server.server().credentials().pending_count(), 0);

    let channel = open_channel(&server, &config);
    prove(&channel, &credential);
    thread::sleep(Duration::from_millis(300));

    assert_eq!(server.server().datagram_endpoint().unwrap().bound_peers(), 0);
}
