use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, trace};
use parking_lot::Mutex;

use super::{
    replay::ReplayWindow,
    socket::DatagramSocket,
    stats::{Counters, DatagramStats},
};
use crate::{
    channel::{MessageChannel, PROTOCOL_UDP},
    config::ConnectionConfig,
    crypto::{PacketCipher, SessionKey},
    error::ChannelError,
    message::{Envelope, Message},
    timestamp::Timestamp,
};

/// Largest sealed datagram the channel will put on the wire
pub const MAX_DATAGRAM_BYTES: usize = 1200;

const READ_POLL: Duration = Duration::from_millis(200);

enum Inbound {
    Message(Message),
    /// Something authentic arrived; restarts the inactivity window
    Activity,
}

struct SendState {
    last_sequence: u64,
    last_sent: Instant,
}

struct Inner {
    socket: DatagramSocket,
    peer: SocketAddr,
    cipher: PacketCipher,
    send_state: Mutex<SendState>,
    replay: Mutex<ReplayWindow>,
    counters: Counters,
    inbound_tx: Sender<Inbound>,
    inbound_rx: Receiver<Inbound>,
    receive_lock: Mutex<()>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    closed: AtomicBool,
    started: AtomicBool,
    inactivity_timeout: Duration,
    keep_alive_interval: Duration,
}

/// Encrypted, unordered, lossy message transport bound to one session key.
///
/// Each message travels in a sequence-numbered [`Envelope`], sealed with the session key.
/// Forged, corrupted and replayed datagrams are dropped silently and only show up in
/// [`DatagramStats`]. The channel closes itself when nothing authentic arrives for
/// `datagram_inactivity_timeout`.
pub struct DatagramChannel {
    inner: Arc<Inner>,
}

impl DatagramChannel {
    pub fn new(
        socket: DatagramSocket,
        key: SessionKey,
        config: &ConnectionConfig,
    ) -> Result<Self, ChannelError> {
        let peer = socket
            .peer_addr()
            .map_err(|err| ChannelError::datagram_unavailable(err.to_string()))?;
        let cipher = PacketCipher::for_session(&key)?;
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);

        Ok(Self {
            inner: Arc::new(Inner {
                socket,
                peer,
                cipher,
                send_state: Mutex::new(SendState {
                    last_sequence: 0,
                    last_sent: Instant::now(),
                }),
                replay: Mutex::new(ReplayWindow::new()),
                counters: Counters::default(),
                inbound_tx,
                inbound_rx,
                receive_lock: Mutex::new(()),
                stop_tx: Mutex::new(Some(stop_tx)),
                stop_rx,
                closed: AtomicBool::new(false),
                started: AtomicBool::new(false),
                inactivity_timeout: config.datagram_inactivity_timeout,
                keep_alive_interval: config.datagram_keep_alive_interval,
            }),
        })
    }

    /// Starts the background threads: the keep-alive sender and, for a connected socket, the
    /// reader. Until then inbound datagrams are only processed through
    /// [`accept_datagram`](Self::accept_datagram). Calling it twice is a no-op.
    pub fn start(&self) -> Result<(), ChannelError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let io_error = |err: io::Error| ChannelError::datagram_unavailable(err.to_string());

        if let DatagramSocket::Connected(socket) = &self.inner.socket {
            let reader = socket.try_clone().map_err(io_error)?;
            reader.set_read_timeout(Some(READ_POLL)).map_err(io_error)?;
            let inner = self.inner.clone();
            thread::Builder::new()
                .name(format!("udp-reader-{}", self.inner.peer))
                .spawn(move || read_loop(inner, reader))
                .map_err(io_error)?;
        }

        let inner = self.inner.clone();
        thread::Builder::new()
            .name(format!("udp-keep-alive-{}", self.inner.peer))
            .spawn(move || keep_alive_loop(inner))
            .map_err(io_error)?;

        debug!("Datagram channel to {} started", self.inner.peer);
        Ok(())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.socket.local_addr()
    }

    /// Opens, authenticates and replay-checks one datagram. `None` means it was dropped.
    pub fn accept_datagram(&self, datagram: &[u8]) -> Option<Envelope> {
        self.inner.accept_datagram(datagram)
    }

    /// Hands an accepted envelope to `receive()`
    pub fn deliver(&self, envelope: Envelope) {
        self.inner.deliver(envelope);
    }

    /// [`accept_datagram`](Self::accept_datagram) followed by [`deliver`](Self::deliver)
    pub fn handle_datagram(&self, datagram: &[u8]) {
        if let Some(envelope) = self.inner.accept_datagram(datagram) {
            self.inner.deliver(envelope);
        }
    }

    /// Sends a keep-alive that reports our replay high-water mark to the peer
    pub fn send_ack(&self) -> Result<(), ChannelError> {
        self.inner.send_keep_alive()
    }

    pub fn stats(&self) -> DatagramStats {
        self.inner.counters.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl MessageChannel for DatagramChannel {
    fn send(&self, message: &Message) -> Result<(), ChannelError> {
        self.inner.send(false, message.clone())
    }

    fn receive(&self) -> Result<Message, ChannelError> {
        let inner = &self.inner;
        let _receiving = inner.receive_lock.lock();

        loop {
            if inner.closed.load(Ordering::Acquire) {
                return Err(ChannelError::lost("datagram channel closed"));
            }

            select! {
                recv(inner.inbound_rx) -> inbound => match inbound {
                    Ok(Inbound::Message(message)) => return Ok(message),
                    Ok(Inbound::Activity) => continue,
                    Err(_) => return Err(ChannelError::lost("datagram channel closed")),
                },
                recv(inner.stop_rx) -> _ => {
                    return Err(ChannelError::lost("datagram channel closed"));
                },
                default(inner.inactivity_timeout) => {
                    info!(
                        "No datagram from {} for {:?}, closing",
                        inner.peer, inner.inactivity_timeout
                    );
                    inner.close();
                    return Err(ChannelError::lost("datagram inactivity timeout"));
                },
            }
        }
    }

    fn close(&self) {
        self.inner.close();
    }

    fn protocol_name(&self) -> &'static str {
        PROTOCOL_UDP
    }
}

impl Drop for DatagramChannel {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl Inner {
    fn send(&self, is_keep_alive: bool, message: Message) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::datagram_unavailable("datagram channel closed"));
        }

        let mut state = self.send_state.lock();
        let sequence = state.last_sequence + 1;
        let envelope = if is_keep_alive {
            let high_water = self.replay.lock().high_water();
            Envelope::ack(sequence, Timestamp::envelope_stamp(), high_water, message)
        } else {
            Envelope::new(sequence, Timestamp::envelope_stamp(), message)
        };

        let sealed = self.cipher.seal(&envelope.encode()?)?;
        if sealed.len() > MAX_DATAGRAM_BYTES {
            return Err(ChannelError::datagram_unavailable(format!(
                "message seals to {} bytes, limit is {}",
                sealed.len(),
                MAX_DATAGRAM_BYTES
            )));
        }

        self.socket
            .send(&sealed)
            .map_err(|err| ChannelError::datagram_unavailable(err.to_string()))?;

        state.last_sequence = sequence;
        state.last_sent = Instant::now();
        Counters::bump(&self.counters.sent);
        Ok(())
    }

    fn send_keep_alive(&self) -> Result<(), ChannelError> {
        self.send(true, Message::keep_alive())
    }

    fn accept_datagram(&self, datagram: &[u8]) -> Option<Envelope> {
        let plaintext = match self.cipher.open(datagram) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                trace!("Dropping datagram from {}: {}", self.peer, err);
                Counters::bump(&self.counters.dropped_auth);
                return None;
            }
        };

        let envelope = match Envelope::decode(&plaintext) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!("Dropping undecodable datagram from {}: {}", self.peer, err);
                Counters::bump(&self.counters.dropped_malformed);
                return None;
            }
        };

        if !self.replay.lock().accept(envelope.sequence) {
            trace!(
                "Dropping replayed datagram #{} from {}",
                envelope.sequence,
                self.peer
            );
            Counters::bump(&self.counters.dropped_replay);
            return None;
        }

        Counters::bump(&self.counters.accepted);
        Some(envelope)
    }

    fn deliver(&self, envelope: Envelope) {
        if envelope.is_ack {
            self.counters
                .peer_acknowledged
                .fetch_max(envelope.ack_sequence, Ordering::Relaxed);
        }

        let inbound = if envelope.message.is_keep_alive() {
            Inbound::Activity
        } else {
            Inbound::Message(envelope.message)
        };
        let _ = self.inbound_tx.send(inbound);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing datagram channel to {}", self.peer);
        self.stop_tx.lock().take();
    }
}

fn read_loop(inner: Arc<Inner>, socket: UdpSocket) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_BYTES + 1];

    while !inner.closed.load(Ordering::Acquire) {
        match socket.recv(&mut buffer) {
            Ok(len) => {
                if let Some(envelope) = inner.accept_datagram(&buffer[..len]) {
                    inner.deliver(envelope);
                }
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut
                    || err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                info!("Datagram socket to {} failed: {}", inner.peer, err);
                inner.close();
            }
        }
    }
    trace!("Datagram reader for {} stopped", inner.peer);
}

fn keep_alive_loop(inner: Arc<Inner>) {
    let tick = inner.keep_alive_interval / 2;

    loop {
        match inner.stop_rx.recv_timeout(tick) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }

        let idle = inner.send_state.lock().last_sent.elapsed();
        if idle >= inner.keep_alive_interval {
            if let Err(err) = inner.send_keep_alive() {
                debug!("Datagram keep-alive to {} failed: {}", inner.peer, err);
                inner.close();
                break;
            }
        }
    }
    trace!("Datagram keep-alive for {} stopped", inner.peer);
}
