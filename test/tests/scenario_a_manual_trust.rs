/// END-TO-END SCENARIO A: certificate trust negotiation
///
/// A server whose certificate no configured authority vouches for is only reachable
/// through the manual-trust fallback, and only if the consumer says yes.
use std::{thread, time::Duration};

use tandem_client::{
    Bootstrap, BootstrapState, ChannelError, Client, ClientConfig, HybridState, ManualTrust,
    TrustAnchors, TrustPath,
};
use tandem_shared::crypto::fingerprint;
use tandem_test::{trusting_config, unrelated_certificate, TestServer};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn untrusting_config(server: &TestServer, manual_trust: ManualTrust) -> ClientConfig {
    ClientConfig {
        trust_anchors: TrustAnchors::Roots(vec![unrelated_certificate()]),
        manual_trust,
        datagram_enabled: false,
        ..trusting_config(server)
    }
}

#[test]
fn consumer_accepts_unknown_certificate() {
    init_logger();
    let server = TestServer::start();
    let (seen_tx, seen_rx) = crossbeam_channel::unbounded();

    let prompt = ManualTrust::prompt(move |request| {
        seen_tx.send(request.fingerprint.clone()).unwrap();
        // Answered later, from another thread, like a dialog would
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            request.accept();
        });
    });

    let client = Client::connect(untrusting_config(&server, prompt)).unwrap();

    assert_eq!(
        client.bootstrap_transitions(),
        &[
            BootstrapState::Connecting,
            BootstrapState::TrustManual,
            BootstrapState::Connected
        ]
    );
    assert_eq!(client.trust_path(), TrustPath::Manual);
    assert_eq!(client.server_certificate(), &server.certificate());
    assert_eq!(
        seen_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        fingerprint(&server.certificate())
    );
    assert_eq!(client.state(), HybridState::TcpOnly);

    // The session behind the accepted certificate works
    let session = server.accept();
    assert_eq!(session.peer_addr(), client.controller().reliable().local_addr());
}

#[test]
fn consumer_rejects_unknown_certificate() {
    init_logger();
    let server = TestServer::start();
    let prompt = ManualTrust::prompt(|request| request.reject());

    let mut bootstrap = Bootstrap::new(untrusting_config(&server, prompt));
    let result = bootstrap.connect();

    assert!(matches!(
        result,
        Err(ChannelError::ConnectionRejected { .. })
    ));
    assert_eq!(
        bootstrap.transitions(),
        &[
            BootstrapState::Connecting,
            BootstrapState::TrustManual,
            BootstrapState::Rejected
        ]
    );
}

#[test]
fn unanswered_request_counts_as_rejection() {
    init_logger();
    let server = TestServer::start();
    let prompt = ManualTrust::prompt(drop);

    let result = Client::connect(untrusting_config(&server, prompt));

    assert!(matches!(
        result,
        Err(ChannelError::ConnectionRejected { .. })
    ));
}

#[test]
fn no_fallback_means_rejection() {
    init_logger();
    let server = TestServer::start();

    let mut bootstrap = Bootstrap::new(untrusting_config(&server, ManualTrust::Disabled));

    assert!(matches!(
        bootstrap.connect(),
        Err(ChannelError::ConnectionRejected { .. })
    ));
    assert_eq!(bootstrap.state(), Some(BootstrapState::Rejected));
}

#[test]
fn trusted_certificate_needs_no_prompt() {
    init_logger();
    let server = TestServer::start();
    let config = ClientConfig {
        manual_trust: ManualTrust::prompt(|_| panic!("must not prompt")),
        datagram_enabled: false,
        ..trusting_config(&server)
    };

    let client = Client::connect(config).unwrap();

    assert_eq!(
        client.bootstrap_transitions(),
        &[
            BootstrapState::Connecting,
            BootstrapState::TrustAutomatic,
            BootstrapState::Connected
        ]
    );
    assert_eq!(client.trust_path(), TrustPath::Automatic);
}

#[test]
fn pinned_certificate_skips_the_prompt() {
    init_logger();
    let server = TestServer::start();
    let config = ClientConfig {
        pinned_certificates: vec![server.certificate()],
        ..untrusting_config(&server, ManualTrust::prompt(|_| panic!("must not prompt")))
    };

    let client = Client::connect(config).unwrap();

    assert_eq!(client.trust_path(), TrustPath::Pinned);
    assert_eq!(
        client.bootstrap_transitions().last(),
        Some(&BootstrapState::Connected)
    );
}

#[test]
fn unconfirmed_trust_skips_validation() {
    init_logger();
    let server = TestServer::start();

    let client = Client::connect(untrusting_config(
        &server,
        ManualTrust::AcceptWithoutConfirmation,
    ))
    .unwrap();

    assert_eq!(client.trust_path(), TrustPath::Unconfirmed);
    assert_eq!(
        client.bootstrap_transitions(),
        &[
            BootstrapState::Connecting,
            BootstrapState::TrustManual,
            BootstrapState::Connected
        ]
    );
}

#[test]
fn unreachable_server_is_lost_not_rejected() {
    init_logger();
    let server = TestServer::start();
    let gone = TestServer::start();
    let config = ClientConfig {
        port: gone.port(),
        ..untrusting_config(&server, ManualTrust::Disabled)
    };
    drop(gone);
    // The acceptor thread lets go of its listener on its next poll
    thread::sleep(Duration::from_millis(300));

    assert!(matches!(
        Client::connect(config),
        Err(ChannelError::ConnectionLost { .. })
    ));
}
