use std::{net::SocketAddr, sync::Arc};

use log::{info, warn};
use rustls::pki_types::CertificateDer;
use tandem_shared::{
    ChannelError, Delivery, HybridController, HybridState, Message, MessageChannel,
};

use crate::{
    bootstrap::{Bootstrap, BootstrapState, Connected, TrustPath},
    client_config::ClientConfig,
    initiator::Initiator,
};

/// A connected game client: one session with the server behind a single [`MessageChannel`]
pub struct Client {
    controller: HybridController,
    initiator: Initiator,
    server: SocketAddr,
    certificate: CertificateDer<'static>,
    trust: TrustPath,
    transitions: Vec<BootstrapState>,
}

impl Client {
    /// Connects, settles certificate trust and, if enabled, upgrades to hybrid transport.
    ///
    /// Fails with [`ChannelError::ConnectionRejected`] when trust is declined and
    /// [`ChannelError::ConnectionLost`] when the server cannot be reached. A failed upgrade is
    /// not an error: the client then runs over the reliable channel alone.
    pub fn connect(config: ClientConfig) -> Result<Self, ChannelError> {
        let mut bootstrap = Bootstrap::new(config.clone());
        let connected = bootstrap.connect()?;
        Self::from_connected(connected, bootstrap.transitions().to_vec(), config)
    }

    /// Builds the session on top of an already bootstrapped reliable channel
    pub fn from_connected(
        connected: Connected,
        transitions: Vec<BootstrapState>,
        config: ClientConfig,
    ) -> Result<Self, ChannelError> {
        let Connected {
            channel,
            certificate,
            trust,
        } = connected;
        let server = channel.peer_addr();

        let initiator = Initiator::new(server, certificate.clone(), config.clone());
        let controller =
            HybridController::new(channel, Arc::new(initiator.clone()), config.routing.clone())?;

        let client = Self {
            controller,
            initiator,
            server,
            certificate,
            trust,
            transitions,
        };

        if config.datagram_enabled {
            match client.initiator.negotiate(&client.controller) {
                Ok(()) => info!("Session with {} is hybrid", server),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!("Staying on TCP with {}: {}", server, err),
            }
        }

        Ok(client)
    }

    pub fn state(&self) -> HybridState {
        self.controller.state()
    }

    pub fn trust_path(&self) -> TrustPath {
        self.trust
    }

    /// Bootstrap states passed through while connecting
    pub fn bootstrap_transitions(&self) -> &[BootstrapState] {
        &self.transitions
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    /// The server certificate pinned for this session
    pub fn server_certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    pub fn controller(&self) -> &HybridController {
        &self.controller
    }

    pub fn initiator(&self) -> &Initiator {
        &self.initiator
    }

    /// Like `receive()`, also naming the channel the message arrived on
    pub fn receive_delivery(&self) -> Result<Delivery, ChannelError> {
        self.controller.receive_delivery()
    }
}

impl MessageChannel for Client {
    fn send(&self, message: &Message) -> Result<(), ChannelError> {
        self.controller.send(message)
    }

    fn receive(&self) -> Result<Message, ChannelError> {
        self.controller.receive()
    }

    fn close(&self) {
        self.controller.close();
    }

    fn protocol_name(&self) -> &'static str {
        self.controller.protocol_name()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.controller.close();
    }
}
