use std::{
    collections::HashMap,
    io,
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use ring::rand::SystemRandom;
use tandem_shared::{
    crypto::{EphemeralKeyPair, IdentitySigner, SessionKey, PUBLIC_KEY_BYTES},
    datagram::handshake::{offer_transcript, wrap_label, HandshakePacket, Nonce},
    ChannelError, ConnectionConfig, DatagramChannel, DatagramSocket, HybridController, HybridState,
    Message, MessageType, WeakHybridController, MAX_DATAGRAM_BYTES,
};
use zeroize::Zeroizing;

use crate::{
    credentials::{CredentialRegistry, Redeemed, SessionId},
    error::ServerError,
    server::ServerConfig,
};

const READ_POLL: Duration = Duration::from_millis(200);
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// The server's single UDP socket.
///
/// Answers datagram key exchanges and demultiplexes every other datagram by sender address.
/// A peer moves through three stages:
///
/// 1. exchange: a `KeyRequest` was answered with a signed `KeyOffer`
/// 2. unbound: the `KeyExchange` delivered a session key; the channel only listens for the
///    `PROTOCOL_SWITCH_FIND` proof
/// 3. bound: the proof redeemed a credential and the channel now belongs to that session's
///    [`HybridController`]
///
/// Exchanges expire after `key_exchange_timeout` and unbound channels after the datagram
/// inactivity timeout.
pub struct DatagramEndpoint {
    inner: Arc<Inner>,
}

struct Exchange {
    nonce: Nonce,
    ephemeral: EphemeralKeyPair,
    started: Instant,
}

struct Unbound {
    channel: DatagramChannel,
    created: Instant,
}

struct Bound {
    session: SessionId,
    controller: WeakHybridController,
}

#[derive(Default)]
struct Peers {
    exchanges: HashMap<SocketAddr, Exchange>,
    unbound: HashMap<SocketAddr, Unbound>,
    bound: HashMap<SocketAddr, Bound>,
}

enum Route {
    Bound(HybridController),
    Unbound,
    Unknown,
}

struct Inner {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    signer: IdentitySigner,
    rng: SystemRandom,
    credentials: Arc<CredentialRegistry>,
    connection: ConnectionConfig,
    max_pending_exchanges: usize,
    key_exchange_timeout: Duration,
    peers: Mutex<Peers>,
    closed: AtomicBool,
}

impl DatagramEndpoint {
    pub fn bind(
        addr: SocketAddr,
        signer: IdentitySigner,
        credentials: Arc<CredentialRegistry>,
        config: &ServerConfig,
    ) -> Result<Self, ServerError> {
        let bind_error = |source| ServerError::Bind {
            protocol: "udp",
            addr,
            source,
        };
        let socket = UdpSocket::bind(addr).map_err(bind_error)?;
        socket.set_read_timeout(Some(READ_POLL)).map_err(bind_error)?;
        let local_addr = socket.local_addr().map_err(bind_error)?;

        let inner = Arc::new(Inner {
            socket: Arc::new(socket),
            local_addr,
            signer,
            rng: SystemRandom::new(),
            credentials,
            connection: config.connection.clone(),
            max_pending_exchanges: config.max_pending_exchanges,
            key_exchange_timeout: config.key_exchange_timeout,
            peers: Mutex::new(Peers::default()),
            closed: AtomicBool::new(false),
        });

        let name = format!("udp-endpoint-{}", local_addr);
        let running = inner.clone();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || running.run())
            .map_err(|source| ServerError::Thread { name, source })?;

        info!("Datagram endpoint listening on {}", local_addr);
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Key exchanges waiting for the client's `KeyExchange`
    pub fn pending_exchanges(&self) -> usize {
        self.inner.peers.lock().exchanges.len()
    }

    /// Keyed channels waiting for their switch proof
    pub fn unbound_peers(&self) -> usize {
        self.inner.peers.lock().unbound.len()
    }

    pub fn bound_peers(&self) -> usize {
        self.inner.peers.lock().bound.len()
    }

    /// Stops the endpoint. Channels already bound to sessions stop receiving and fail over
    /// to the reliable channel.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Drop for DatagramEndpoint {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl Inner {
    fn run(&self) {
        let mut buffer = vec![0u8; MAX_DATAGRAM_BYTES + 1];
        let mut last_sweep = Instant::now();

        while !self.closed.load(Ordering::Acquire) {
            match self.socket.recv_from(&mut buffer) {
                Ok((len, from)) => self.handle(from, &buffer[..len]),
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut
                        || err.kind() == io::ErrorKind::Interrupted => {}
                // ICMP errors surface here on some platforms; the socket stays usable
                Err(err) => {
                    debug!("Datagram endpoint receive failed: {}", err);
                    thread::sleep(Duration::from_millis(10));
                }
            }

            if last_sweep.elapsed() >= SWEEP_INTERVAL {
                self.sweep(Instant::now());
                last_sweep = Instant::now();
            }
        }
        trace!("Datagram endpoint on {} stopped", self.local_addr);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Closing datagram endpoint on {}", self.local_addr);

        let mut peers = self.peers.lock();
        peers.exchanges.clear();
        peers.unbound.clear();
        for (_, bound) in peers.bound.drain() {
            if let Some(controller) = bound.controller.upgrade() {
                controller.drop_datagram();
                controller.set_state(HybridState::TcpOnly);
            }
        }
    }

    fn handle(&self, from: SocketAddr, datagram: &[u8]) {
        match self.route(from) {
            Route::Bound(controller) => match controller.datagram() {
                Some(channel) if channel.peer_addr() == from => {
                    if let Some(envelope) = channel.accept_datagram(datagram) {
                        channel.deliver(envelope);
                        return;
                    }
                }
                // The session moved to another address or lost its channel
                _ => {
                    self.peers.lock().bound.remove(&from);
                }
            },
            Route::Unbound => {
                if self.handle_unbound(from, datagram) {
                    return;
                }
            }
            Route::Unknown => {}
        }

        if let Err(err) = self.handle_handshake(from, datagram) {
            debug!("Key exchange with {} failed: {}", from, err);
        }
    }

    fn route(&self, from: SocketAddr) -> Route {
        let mut peers = self.peers.lock();
        if let Some(bound) = peers.bound.get(&from) {
            match bound.controller.upgrade() {
                Some(controller) if !controller.is_closed() => return Route::Bound(controller),
                _ => {
                    peers.bound.remove(&from);
                }
            }
        }
        if peers.unbound.contains_key(&from) {
            Route::Unbound
        } else {
            Route::Unknown
        }
    }

    /// Returns whether the datagram was authentic for the peer's unbound channel
    fn handle_unbound(&self, from: SocketAddr, datagram: &[u8]) -> bool {
        let mut peers = self.peers.lock();
        let Some(unbound) = peers.unbound.get(&from) else {
            return false;
        };
        let Some(envelope) = unbound.channel.accept_datagram(datagram) else {
            return false;
        };

        let message = envelope.message;
        if message.kind() != MessageType::ProtocolSwitchFind {
            trace!("Dropping {:?} from unbound peer {}", message.kind(), from);
            return true;
        }
        let Some([request_id, token]) = message.strings() else {
            debug!("Switch proof from {} carries no credential", from);
            return true;
        };

        match self.credentials.redeem(request_id, token) {
            Ok(redeemed) => {
                if let Some(unbound) = peers.unbound.remove(&from) {
                    peers.bound.retain(|_, bound| bound.session != redeemed.session);
                    peers.bound.insert(
                        from,
                        Bound {
                            session: redeemed.session,
                            controller: redeemed.controller.clone(),
                        },
                    );
                    drop(peers);
                    self.bind_session(from, unbound.channel, redeemed);
                }
            }
            Err(rejection) => debug!(
                "Rejected switch proof {} from {}: {:?}",
                request_id, from, rejection
            ),
        }
        true
    }

    fn bind_session(&self, from: SocketAddr, channel: DatagramChannel, redeemed: Redeemed) {
        let Some(controller) = redeemed.controller.upgrade() else {
            debug!("Session {} ended before its datagram channel was bound", redeemed.session);
            self.peers.lock().bound.remove(&from);
            return;
        };

        let generation = controller.install_datagram(channel);
        if let Err(err) = controller.activate_datagram(generation) {
            warn!(
                "[{}] Could not activate datagram channel from {}: {}",
                controller.label(),
                from,
                err
            );
            controller.drop_datagram();
            self.peers.lock().bound.remove(&from);
            return;
        }

        info!(
            "[{}] Datagram channel from {} bound to session {}",
            controller.label(),
            from,
            redeemed.session
        );
        if let Err(err) = controller.send_reliable(&Message::new(MessageType::ProtocolSwitchDone)) {
            debug!("[{}] Could not confirm protocol switch: {}", controller.label(), err);
        }
    }

    fn handle_handshake(&self, from: SocketAddr, datagram: &[u8]) -> Result<(), ChannelError> {
        let packet = match HandshakePacket::decode(datagram) {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                trace!("Dropping unrecognised datagram from {}", from);
                return Ok(());
            }
            Err(err) => {
                trace!("Dropping malformed handshake from {}: {}", from, err);
                return Ok(());
            }
        };

        match packet {
            HandshakePacket::KeyRequest { nonce } => self.offer(from, nonce),
            HandshakePacket::KeyExchange {
                nonce,
                client_public,
                wrapped_key,
            } => self.accept_exchange(from, nonce, &client_public, &wrapped_key),
            HandshakePacket::KeyOffer { .. } => {
                trace!("Dropping key offer sent to the server by {}", from);
                Ok(())
            }
        }
    }

    fn offer(&self, from: SocketAddr, nonce: Nonce) -> Result<(), ChannelError> {
        let now = Instant::now();
        {
            let mut peers = self.peers.lock();
            if !peers.exchanges.contains_key(&from)
                && peers.exchanges.len() >= self.max_pending_exchanges
            {
                peers.expire_exchanges(now, self.key_exchange_timeout);
                if peers.exchanges.len() >= self.max_pending_exchanges {
                    debug!("Too many pending key exchanges, ignoring {}", from);
                    return Ok(());
                }
            }
        }

        let ephemeral = EphemeralKeyPair::generate(&self.rng)?;
        let server_public = *ephemeral.public_key();
        let signature = self.signer.sign(&offer_transcript(&nonce, &server_public))?;

        self.peers.lock().exchanges.insert(
            from,
            Exchange {
                nonce,
                ephemeral,
                started: now,
            },
        );
        self.send_packet(
            from,
            &HandshakePacket::KeyOffer {
                nonce,
                server_public,
                signature,
            },
        )?;
        trace!("Sent key offer to {}", from);
        Ok(())
    }

    fn accept_exchange(
        &self,
        from: SocketAddr,
        nonce: Nonce,
        client_public: &[u8; PUBLIC_KEY_BYTES],
        wrapped_key: &[u8],
    ) -> Result<(), ChannelError> {
        let exchange = {
            let mut peers = self.peers.lock();
            match peers.exchanges.get(&from) {
                Some(exchange) if exchange.nonce == nonce => peers.exchanges.remove(&from),
                _ => None,
            }
        };
        let Some(exchange) = exchange else {
            trace!("Dropping key exchange from {} without a matching offer", from);
            return Ok(());
        };
        if exchange.started.elapsed() > self.key_exchange_timeout {
            debug!("Key exchange from {} arrived after the offer expired", from);
            return Ok(());
        }

        let wrapping = exchange.ephemeral.agree(client_public, &wrap_label(&nonce))?;
        let key = Zeroizing::new(wrapping.open(wrapped_key)?);
        let session_key = SessionKey::from_slice(&key)?;

        let channel = DatagramChannel::new(
            DatagramSocket::Shared {
                socket: self.socket.clone(),
                peer: from,
            },
            session_key,
            &self.connection,
        )?;
        channel.send_ack()?;

        self.peers.lock().unbound.insert(
            from,
            Unbound {
                channel,
                created: Instant::now(),
            },
        );
        debug!("Datagram key established with {}, awaiting switch proof", from);
        Ok(())
    }

    fn send_packet(&self, to: SocketAddr, packet: &HandshakePacket) -> Result<(), ChannelError> {
        let bytes = packet.encode()?;
        self.socket
            .send_to(&bytes, to)
            .map_err(|err| ChannelError::datagram_unavailable(err.to_string()))?;
        Ok(())
    }

    fn sweep(&self, now: Instant) {
        let mut peers = self.peers.lock();
        peers.expire_exchanges(now, self.key_exchange_timeout);

        let unbound_lifetime = self.connection.datagram_inactivity_timeout;
        peers.unbound.retain(|addr, unbound| {
            let alive = now.saturating_duration_since(unbound.created) <= unbound_lifetime;
            if !alive {
                debug!("Datagram channel from {} was never bound, dropping it", addr);
            }
            alive
        });

        peers.bound.retain(|addr, bound| {
            bound
                .controller
                .upgrade()
                .and_then(|controller| controller.datagram())
                .map_or(false, |channel| channel.peer_addr() == *addr && !channel.is_closed())
        });
    }
}

impl Peers {
    fn expire_exchanges(&mut self, now: Instant, timeout: Duration) {
        self.exchanges
            .retain(|_, exchange| now.saturating_duration_since(exchange.started) <= timeout);
    }
}
