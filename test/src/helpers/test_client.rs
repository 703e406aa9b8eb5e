use std::time::Duration;

use tandem_client::{Client, ClientConfig, RecoveryPolicy, TrustAnchors};
use tandem_server::Session;
use tandem_shared::rustls::pki_types::CertificateDer;

use super::{fast_connection, TestServer};

/// A client that trusts exactly the test server's certificate
pub fn trusting_config(server: &TestServer) -> ClientConfig {
    ClientConfig {
        host: "127.0.0.1".to_string(),
        port: server.port(),
        connection: fast_connection(),
        trust_anchors: TrustAnchors::Roots(vec![server.certificate()]),
        datagram_attempts: 2,
        datagram_attempt_timeout: Duration::from_millis(500),
        switch_timeout: Duration::from_secs(3),
        recovery: RecoveryPolicy {
            attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        },
        ..ClientConfig::default()
    }
}

/// Connects `config` and returns both ends of the session
pub fn connect(server: &TestServer, config: ClientConfig) -> (Client, Session) {
    let client = Client::connect(config).expect("client connects");
    let session = server.accept();
    (client, session)
}

/// A certificate that has nothing to do with any test server
pub fn unrelated_certificate() -> CertificateDer<'static> {
    rcgen::generate_simple_self_signed(vec!["elsewhere.example".to_string()])
        .expect("certificate")
        .cert
        .der()
        .clone()
}
