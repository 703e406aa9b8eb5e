use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{select, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rustls::pki_types::CertificateDer;
use tandem_shared::{complete_handshake, HybridController, MessageChannel, ReliableChannel};

use super::ServerConfig;
use crate::{
    credentials::{CredentialRegistry, SessionId},
    endpoint::DatagramEndpoint,
    error::ServerError,
    identity::ServerIdentity,
    responder::Responder,
    session::Session,
};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Listens for clients over TLS and, on the same port number, for their datagram channels.
///
/// Handshakes run on their own threads; finished sessions queue up for
/// [`accept`](Self::accept). A client that fails its handshake is logged and forgotten.
pub struct Server {
    local_addr: SocketAddr,
    identity: Arc<ServerIdentity>,
    credentials: Arc<CredentialRegistry>,
    endpoint: Option<DatagramEndpoint>,
    incoming: Receiver<Session>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    closed: Arc<AtomicBool>,
}

struct Acceptor {
    listener: TcpListener,
    tls: Arc<rustls::ServerConfig>,
    config: ServerConfig,
    credentials: Option<Arc<CredentialRegistry>>,
    incoming: Sender<Session>,
    next_session: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl Server {
    pub fn bind(config: ServerConfig, identity: ServerIdentity) -> Result<Self, ServerError> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let bind_error = |addr: SocketAddr| {
            move |source: io::Error| ServerError::Bind {
                protocol: "tcp",
                addr,
                source,
            }
        };
        let listener = TcpListener::bind(config.bind_addr).map_err(bind_error(config.bind_addr))?;
        let local_addr = listener
            .local_addr()
            .map_err(bind_error(config.bind_addr))?;
        listener
            .set_nonblocking(true)
            .map_err(bind_error(local_addr))?;

        let tls = identity.tls_config()?;
        let credentials = Arc::new(CredentialRegistry::new(
            config.credential_lifetime,
            config.consumed_credential_memory,
        ));

        let endpoint = if config.datagram_enabled {
            Some(DatagramEndpoint::bind(
                local_addr,
                identity.signer()?,
                credentials.clone(),
                &config,
            )?)
        } else {
            None
        };

        let (incoming_tx, incoming_rx) = crossbeam_channel::unbounded();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        let closed = Arc::new(AtomicBool::new(false));

        let acceptor = Acceptor {
            listener,
            tls,
            credentials: endpoint.as_ref().map(|_| credentials.clone()),
            config,
            incoming: incoming_tx,
            next_session: AtomicU64::new(1),
            closed: closed.clone(),
        };
        let name = format!("tls-accept-{}", local_addr);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || acceptor.run())
            .map_err(|source| ServerError::Thread { name, source })?;

        info!(
            "Server listening on {} with certificate {}",
            local_addr,
            identity.fingerprint()
        );

        Ok(Self {
            local_addr,
            identity: Arc::new(identity),
            credentials,
            endpoint,
            incoming: incoming_rx,
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            closed,
        })
    }

    /// Blocks until the next client finished its handshake
    pub fn accept(&self) -> Result<Session, ServerError> {
        if self.is_shut_down() {
            return Err(ServerError::Shutdown);
        }
        select! {
            recv(self.incoming) -> session => session.map_err(|_| ServerError::Shutdown),
            recv(self.stop_rx) -> _ => Err(ServerError::Shutdown),
        }
    }

    /// Like [`accept`](Self::accept), but gives up after `timeout` with `Ok(None)`
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<Session>, ServerError> {
        if self.is_shut_down() {
            return Err(ServerError::Shutdown);
        }
        select! {
            recv(self.incoming) -> session => session.map(Some).map_err(|_| ServerError::Shutdown),
            recv(self.stop_rx) -> _ => Err(ServerError::Shutdown),
            default(timeout) => Ok(None),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn certificate(&self) -> &CertificateDer<'static> {
        self.identity.certificate()
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn credentials(&self) -> &CredentialRegistry {
        &self.credentials
    }

    pub fn datagram_endpoint(&self) -> Option<&DatagramEndpoint> {
        self.endpoint.as_ref()
    }

    /// Stops accepting clients and closes the datagram endpoint. Sessions already handed
    /// out keep their reliable channel until they are closed.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down server on {}", self.local_addr);
        self.stop_tx.lock().take();
        if let Some(endpoint) = &self.endpoint {
            endpoint.close();
        }
        // Sessions whose handshake finished but were never accepted
        while let Ok(session) = self.incoming.try_recv() {
            session.close();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Acceptor {
    fn run(self) {
        let acceptor = Arc::new(self);

        while !acceptor.closed.load(Ordering::Acquire) {
            match acceptor.listener.accept() {
                Ok((stream, peer)) => {
                    let session = acceptor.next_session.fetch_add(1, Ordering::Relaxed);
                    let handshaking = acceptor.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("tls-handshake-{}", peer))
                        .spawn(move || handshaking.establish(stream, peer, session));
                    if let Err(err) = spawned {
                        warn!("Could not start handshake thread for {}: {}", peer, err);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!("Accepting a connection failed: {}", err);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        debug!("TLS acceptor stopped");
    }

    fn establish(&self, stream: TcpStream, peer: SocketAddr, id: SessionId) {
        match self.handshake(stream, id) {
            Ok(session) => {
                if self.closed.load(Ordering::Acquire) || self.incoming.send(session).is_err() {
                    debug!("Server shut down during handshake with {}", peer);
                }
            }
            Err(err) => info!("Handshake with {} failed: {}", peer, err),
        }
    }

    fn handshake(&self, mut stream: TcpStream, id: SessionId) -> Result<Session, ServerError> {
        stream
            .set_nonblocking(false)
            .map_err(|err| tandem_shared::ChannelError::transport(err.to_string()))?;

        let mut connection = rustls::Connection::from(rustls::ServerConnection::new(
            self.tls.clone(),
        )?);
        complete_handshake(
            &mut connection,
            &mut stream,
            self.config.connection.handshake_timeout,
        )
        .map_err(tandem_shared::ChannelError::from)?;

        let reliable = ReliableChannel::new(connection, stream, &self.config.connection)?;
        let responder =
            Responder::new(id, self.credentials.clone()).with_throttle(self.config.throttle);
        let counters = responder.counters();
        let controller =
            HybridController::new(reliable, Arc::new(responder), self.config.routing.clone())?;

        Ok(Session::new(id, controller, counters))
    }
}
