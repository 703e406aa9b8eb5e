//! Opens the reliable channel and settles whether the server's certificate is trusted.
//!
//! ```text
//! Connecting -> TrustAutomatic -> Connected
//!            \-> TrustManual ----> Connected | Rejected
//! ```

mod trust;
mod verifier;

pub use trust::{TrustDecision, TrustRequest, TrustResponder};

use std::{
    fmt,
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    sync::Arc,
};

use log::{debug, info, warn};
use rustls::{
    pki_types::{CertificateDer, ServerName},
    RootCertStore,
};
use rustls_platform_verifier::ConfigVerifierExt as _;
use tandem_shared::{
    complete_handshake, crypto::fingerprint, ChannelError, HandshakeError, ReliableChannel,
};

use crate::client_config::{ClientConfig, ManualTrust, TrustAnchors};
use verifier::ManualTrustVerifier;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapState {
    Connecting,
    TrustAutomatic,
    TrustManual,
    Connected,
    Rejected,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootstrapState::Connecting => "CONNECTING",
            BootstrapState::TrustAutomatic => "TRUST_AUTOMATIC",
            BootstrapState::TrustManual => "TRUST_MANUAL",
            BootstrapState::Connected => "CONNECTED",
            BootstrapState::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

/// How the server's certificate came to be trusted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustPath {
    /// Chain validation against the configured anchors succeeded
    Automatic,
    /// The certificate was already pinned by an earlier manual acceptance
    Pinned,
    /// The consumer accepted the certificate
    Manual,
    /// Accepted without asking anyone ([`ManualTrust::AcceptWithoutConfirmation`])
    Unconfirmed,
}

/// A reliable channel whose peer is trusted
pub struct Connected {
    pub channel: ReliableChannel,
    /// The server's end-entity certificate, pinned for the session
    pub certificate: CertificateDer<'static>,
    pub trust: TrustPath,
}

impl fmt::Debug for Connected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connected")
            .field("peer", &self.channel.peer_addr())
            .field("fingerprint", &fingerprint(&self.certificate))
            .field("trust", &self.trust)
            .finish()
    }
}

pub struct Bootstrap {
    config: ClientConfig,
    transitions: Vec<BootstrapState>,
}

impl Bootstrap {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> Option<BootstrapState> {
        self.transitions.last().copied()
    }

    /// Every state entered so far, in order
    pub fn transitions(&self) -> &[BootstrapState] {
        &self.transitions
    }

    pub fn connect(&mut self) -> Result<Connected, ChannelError> {
        let _ = rustls::crypto::ring::default_provider().install_default();
        self.transitions.clear();
        self.enter(BootstrapState::Connecting);

        let result = self.negotiate();
        match &result {
            Ok(_) => self.enter(BootstrapState::Connected),
            Err(_) => self.enter(BootstrapState::Rejected),
        }
        result
    }

    fn negotiate(&mut self) -> Result<Connected, ChannelError> {
        let addr = self.resolve()?;

        if let ManualTrust::AcceptWithoutConfirmation = self.config.manual_trust {
            warn!(
                "Certificate validation for {} is DISABLED; accepting whatever it presents",
                self.config.host
            );
            self.enter(BootstrapState::TrustManual);
            let (connection, stream, certificate) = self.handshake_unverified(addr)?;
            return self.finish(connection, stream, certificate, TrustPath::Unconfirmed);
        }

        let reason = match self.handshake(addr, self.automatic_config()?) {
            Ok((connection, stream, certificate)) => {
                self.enter(BootstrapState::TrustAutomatic);
                return self.finish(connection, stream, certificate, TrustPath::Automatic);
            }
            Err(Attempt::Handshake(HandshakeError::UntrustedCertificate { reason })) => reason,
            Err(Attempt::Handshake(err)) => return Err(ChannelError::rejected(err.to_string())),
            Err(Attempt::Channel(err)) => return Err(err),
        };

        info!(
            "Certificate of {} failed validation ({}), falling back to manual trust",
            self.config.host, reason
        );
        self.enter(BootstrapState::TrustManual);

        if let ManualTrust::Disabled = self.config.manual_trust {
            return Err(ChannelError::rejected(format!(
                "certificate not trusted: {}",
                reason
            )));
        }

        let (connection, stream, certificate) = self.handshake_unverified(addr)?;

        if self.config.pinned_certificates.contains(&certificate) {
            info!("Certificate of {} is pinned, accepting", self.config.host);
            return self.finish(connection, stream, certificate, TrustPath::Pinned);
        }

        match self.ask(&certificate, reason) {
            TrustDecision::Accept => {
                info!(
                    "Certificate {} accepted for {}",
                    fingerprint(&certificate),
                    self.config.host
                );
                self.finish(connection, stream, certificate, TrustPath::Manual)
            }
            TrustDecision::Reject => {
                let _ = stream.shutdown(Shutdown::Both);
                Err(ChannelError::rejected("certificate rejected by the user"))
            }
        }
    }

    fn enter(&mut self, state: BootstrapState) {
        if let Some(previous) = self.state() {
            info!("Bootstrap {}: {} -> {}", self.config.host, previous, state);
        }
        self.transitions.push(state);
    }

    fn resolve(&self) -> Result<SocketAddr, ChannelError> {
        (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|err| {
                ChannelError::lost(format!("cannot resolve {}: {}", self.config.host, err))
            })?
            .next()
            .ok_or_else(|| ChannelError::lost(format!("{} has no address", self.config.host)))
    }

    fn server_name(&self) -> Result<ServerName<'static>, ChannelError> {
        ServerName::try_from(self.config.host.clone())
            .map_err(|err| ChannelError::rejected(format!("invalid server name: {}", err)))
    }

    fn tcp_connect(&self, addr: SocketAddr) -> Result<TcpStream, ChannelError> {
        debug!("Connecting to {}", addr);
        TcpStream::connect_timeout(&addr, self.config.connection.handshake_timeout)
            .map_err(|err| ChannelError::lost(format!("cannot connect to {}: {}", addr, err)))
    }

    fn automatic_config(&self) -> Result<rustls::ClientConfig, ChannelError> {
        match &self.config.trust_anchors {
            TrustAnchors::Platform => rustls::ClientConfig::with_platform_verifier()
                .map_err(|err| ChannelError::rejected(err.to_string())),
            TrustAnchors::Roots(roots) => {
                let mut store = RootCertStore::empty();
                for root in roots {
                    store
                        .add(root.clone())
                        .map_err(|err| ChannelError::rejected(err.to_string()))?;
                }
                Ok(rustls::ClientConfig::builder()
                    .with_root_certificates(store)
                    .with_no_client_auth())
            }
        }
    }

    fn handshake_unverified(
        &self,
        addr: SocketAddr,
    ) -> Result<(rustls::Connection, TcpStream, CertificateDer<'static>), ChannelError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|err| ChannelError::rejected(err.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(ManualTrustVerifier::new(provider)))
            .with_no_client_auth();

        self.handshake(addr, config).map_err(|err| match err {
            Attempt::Channel(err) => err,
            Attempt::Handshake(err) => ChannelError::rejected(err.to_string()),
        })
    }

    fn handshake(
        &self,
        addr: SocketAddr,
        config: rustls::ClientConfig,
    ) -> Result<(rustls::Connection, TcpStream, CertificateDer<'static>), Attempt> {
        let mut stream = self.tcp_connect(addr).map_err(Attempt::Channel)?;
        let server_name = self.server_name().map_err(Attempt::Channel)?;
        let client = rustls::ClientConnection::new(Arc::new(config), server_name)
            .map_err(|err| Attempt::Channel(ChannelError::rejected(err.to_string())))?;
        let mut connection = rustls::Connection::from(client);

        complete_handshake(
            &mut connection,
            &mut stream,
            self.config.connection.handshake_timeout,
        )
        .map_err(Attempt::Handshake)?;

        let certificate = connection
            .peer_certificates()
            .and_then(|certs| certs.first())
            .cloned()
            .ok_or_else(|| {
                Attempt::Handshake(HandshakeError::Tls {
                    reason: "server presented no certificate".to_string(),
                })
            })?;

        Ok((connection, stream, certificate))
    }

    fn ask(&self, certificate: &CertificateDer<'static>, reason: String) -> TrustDecision {
        let ManualTrust::Prompt(prompt) = &self.config.manual_trust else {
            return TrustDecision::Reject;
        };

        let (responder, decision) = TrustResponder::new();
        prompt(TrustRequest {
            host: self.config.host.clone(),
            port: self.config.port,
            certificate: certificate.clone(),
            fingerprint: fingerprint(certificate),
            reason: Some(reason),
            responder,
        });

        // A dropped responder is a cancellation
        decision.recv().unwrap_or(TrustDecision::Reject)
    }

    fn finish(
        &self,
        connection: rustls::Connection,
        stream: TcpStream,
        certificate: CertificateDer<'static>,
        trust: TrustPath,
    ) -> Result<Connected, ChannelError> {
        let channel = ReliableChannel::new(connection, stream, &self.config.connection)?;
        Ok(Connected {
            channel,
            certificate,
            trust,
        })
    }
}

enum Attempt {
    Channel(ChannelError),
    Handshake(HandshakeError),
}
