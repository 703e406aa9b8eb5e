use std::{
    net::SocketAddr,
    time::Duration,
};

use tandem_server::{Server, ServerConfig, ServerIdentity, Session};
use tandem_shared::{rustls::pki_types::CertificateDer, ConnectionConfig};

/// Timings short enough for tests to watch timeouts and recoveries happen
pub fn fast_connection() -> ConnectionConfig {
    ConnectionConfig {
        read_timeout: Duration::from_secs(5),
        heartbeat_interval: Duration::from_millis(200),
        datagram_inactivity_timeout: Duration::from_secs(1),
        datagram_keep_alive_interval: Duration::from_millis(200),
        handshake_timeout: Duration::from_secs(5),
    }
}

/// A server on an ephemeral loopback port with a fresh self-signed certificate
pub struct TestServer {
    server: Server,
}

impl TestServer {
    pub fn start() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let mut config = ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            connection: fast_connection(),
            credential_lifetime: Duration::from_secs(5),
            ..ServerConfig::default()
        };
        configure(&mut config);

        let identity =
            ServerIdentity::self_signed(&["localhost".to_string(), "127.0.0.1".to_string()])
                .expect("self-signed identity");
        let server = Server::bind(config, identity).expect("server binds");
        Self { server }
    }

    pub fn addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn port(&self) -> u16 {
        self.server.local_addr().port()
    }

    pub fn certificate(&self) -> CertificateDer<'static> {
        self.server.certificate().clone()
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// The next session, failing the test if none arrives in time
    pub fn accept(&self) -> Session {
        self.server
            .accept_timeout(Duration::from_secs(5))
            .expect("server is running")
            .expect("a client connected in time")
    }
}
