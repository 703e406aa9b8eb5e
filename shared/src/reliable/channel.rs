use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use rustls::pki_types::CertificateDer;

use crate::{
    channel::{MessageChannel, PROTOCOL_TCP},
    config::ConnectionConfig,
    error::ChannelError,
    message::{
        codec::{self, FrameBuffer},
        Message,
    },
};

const READ_CHUNK_BYTES: usize = 16 * 1024;

enum Inbound {
    Message(Message),
    Lost(String),
}

struct TlsState {
    connection: rustls::Connection,
    writer: TcpStream,
}

struct Inner {
    tls: Mutex<TlsState>,
    closed: AtomicBool,
    lost: Mutex<Option<String>>,
    receive_lock: Mutex<()>,
    inbound: Receiver<Inbound>,
    heartbeat_stop: Mutex<Option<Sender<()>>>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    peer_certificates: Vec<CertificateDer<'static>>,
}

/// Ordered, authenticated message stream over one TLS connection.
///
/// A reader thread owns the socket's read half and decodes frames into an internal queue; a
/// heartbeat thread emits a keep-alive every `heartbeat_interval`. Sends write straight through
/// the TLS session under a short lock.
pub struct ReliableChannel {
    inner: Arc<Inner>,
}

impl ReliableChannel {
    /// Wraps a connection whose handshake has already completed
    /// (see [`complete_handshake`](super::complete_handshake)).
    pub fn new(
        connection: impl Into<rustls::Connection>,
        stream: TcpStream,
        config: &ConnectionConfig,
    ) -> Result<Self, ChannelError> {
        let mut connection = connection.into();
        connection.set_buffer_limit(None);

        let io_error = |err: io::Error| ChannelError::transport(err.to_string());
        let peer_addr = stream.peer_addr().map_err(io_error)?;
        let local_addr = stream.local_addr().map_err(io_error)?;
        stream
            .set_read_timeout(Some(config.read_timeout))
            .map_err(io_error)?;
        stream
            .set_write_timeout(Some(config.read_timeout))
            .map_err(io_error)?;
        stream.set_nodelay(true).map_err(io_error)?;
        let reader = stream.try_clone().map_err(io_error)?;

        let peer_certificates = connection
            .peer_certificates()
            .map(|certs| certs.to_vec())
            .unwrap_or_default();

        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        let (heartbeat_tx, heartbeat_rx) = crossbeam_channel::bounded::<()>(0);

        let inner = Arc::new(Inner {
            tls: Mutex::new(TlsState {
                connection,
                writer: stream,
            }),
            closed: AtomicBool::new(false),
            lost: Mutex::new(None),
            receive_lock: Mutex::new(()),
            inbound: inbound_rx,
            heartbeat_stop: Mutex::new(Some(heartbeat_tx)),
            peer_addr,
            local_addr,
            peer_certificates,
        });

        // Flush anything the handshake left behind (e.g. the client's Finished)
        inner.flush().map_err(io_error)?;

        {
            let inner = inner.clone();
            thread::Builder::new()
                .name(format!("tcp-reader-{}", peer_addr))
                .spawn(move || read_loop(inner, reader, inbound_tx))
                .map_err(io_error)?;
        }
        {
            let inner = inner.clone();
            let interval = config.heartbeat_interval;
            thread::Builder::new()
                .name(format!("tcp-heartbeat-{}", peer_addr))
                .spawn(move || heartbeat_loop(inner, heartbeat_rx, interval))
                .map_err(io_error)?;
        }

        info!("Reliable channel established with {}", peer_addr);
        Ok(Self { inner })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Certificate chain presented by the peer during the handshake, end-entity first.
    /// Empty on the server side (clients are not authenticated by certificate).
    pub fn peer_certificates(&self) -> &[CertificateDer<'static>] {
        &self.inner.peer_certificates
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.lost.lock().is_some()
    }
}

impl MessageChannel for ReliableChannel {
    fn send(&self, message: &Message) -> Result<(), ChannelError> {
        self.inner.send(message)
    }

    fn receive(&self) -> Result<Message, ChannelError> {
        let _receiving = self.inner.receive_lock.lock();

        loop {
            if let Some(reason) = self.inner.lost.lock().clone() {
                return Err(ChannelError::lost(reason));
            }

            match self.inner.inbound.recv() {
                Ok(Inbound::Message(message)) if message.is_keep_alive() => {
                    trace!("Keep-alive from {}", self.inner.peer_addr);
                }
                Ok(Inbound::Message(message)) => return Ok(message),
                Ok(Inbound::Lost(reason)) => {
                    *self.inner.lost.lock() = Some(reason.clone());
                    return Err(ChannelError::lost(reason));
                }
                Err(_) => {
                    let reason = "reader stopped".to_string();
                    *self.inner.lost.lock() = Some(reason.clone());
                    return Err(ChannelError::lost(reason));
                }
            }
        }
    }

    fn close(&self) {
        self.inner.close();
    }

    fn protocol_name(&self) -> &'static str {
        PROTOCOL_TCP
    }
}

impl Drop for ReliableChannel {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl Inner {
    fn send(&self, message: &Message) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::transport("channel is closed"));
        }

        let frame = codec::write_frame(&codec::encode_message(message)?)?;

        let mut tls = self.tls.lock();
        let written = tls.connection.writer().write_all(&frame);
        let result = written.and_then(|_| tls.flush());
        drop(tls);

        result.map_err(|err| {
            warn!("Write to {} failed: {}", self.peer_addr, err);
            // Unblocks the reader, which reports the loss to `receive()`
            self.shutdown_socket();
            ChannelError::transport(err.to_string())
        })
    }

    fn flush(&self) -> io::Result<()> {
        self.tls.lock().flush()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing reliable channel to {}", self.peer_addr);

        self.heartbeat_stop.lock().take();
        {
            let mut tls = self.tls.lock();
            tls.connection.send_close_notify();
            let _ = tls.flush();
        }
        self.shutdown_socket();
    }

    fn shutdown_socket(&self) {
        let _ = self.tls.lock().writer.shutdown(Shutdown::Both);
    }
}

impl TlsState {
    fn flush(&mut self) -> io::Result<()> {
        while self.connection.wants_write() {
            self.connection.write_tls(&mut self.writer)?;
        }
        self.writer.flush()
    }
}

fn read_loop(inner: Arc<Inner>, mut reader: TcpStream, inbound: Sender<Inbound>) {
    let mut frames = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut plaintext = vec![0u8; READ_CHUNK_BYTES];

    let reason = loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break "peer closed the connection".to_string(),
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                break "read timed out".to_string()
            }
            Err(err) => break err.to_string(),
        };

        match decrypt(&inner, &chunk[..read], &mut plaintext, &mut frames) {
            Ok(Decrypted::Open) => {}
            Ok(Decrypted::PeerClosed) => {
                // Deliver whatever arrived before close_notify
                if let Err(reason) = drain_frames(&mut frames, &inbound) {
                    break reason;
                }
                break "peer closed the connection".to_string();
            }
            Err(reason) => break reason,
        }

        if let Err(reason) = drain_frames(&mut frames, &inbound) {
            break reason;
        }
    };

    if inner.closed.load(Ordering::Acquire) {
        debug!("Reader for {} stopped: channel closed locally", inner.peer_addr);
        let _ = inbound.send(Inbound::Lost("channel closed".to_string()));
    } else {
        info!("Connection to {} lost: {}", inner.peer_addr, reason);
        inner.closed.store(true, Ordering::Release);
        inner.heartbeat_stop.lock().take();
        inner.shutdown_socket();
        let _ = inbound.send(Inbound::Lost(reason));
    }
}

enum Decrypted {
    Open,
    PeerClosed,
}

fn decrypt(
    inner: &Inner,
    mut ciphertext: &[u8],
    plaintext: &mut [u8],
    frames: &mut FrameBuffer,
) -> Result<Decrypted, String> {
    let mut tls = inner.tls.lock();
    let mut peer_closed = false;

    while !ciphertext.is_empty() {
        tls.connection
            .read_tls(&mut ciphertext)
            .map_err(|err| err.to_string())?;

        let state = match tls.connection.process_new_packets() {
            Ok(state) => state,
            Err(err) => {
                // Best effort: tell the peer why before hanging up
                let _ = tls.flush();
                return Err(format!("TLS error: {}", err));
            }
        };

        loop {
            match tls.connection.reader().read(plaintext) {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(read) => frames.push(&plaintext[..read]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.to_string()),
            }
        }

        if state.peer_has_closed() {
            peer_closed = true;
        }
    }

    tls.flush().map_err(|err| err.to_string())?;

    Ok(if peer_closed {
        Decrypted::PeerClosed
    } else {
        Decrypted::Open
    })
}

/// Moves complete frames into the inbound queue. Undecodable records are skipped; an oversized
/// frame header means the stream is desynchronised and ends the connection.
fn drain_frames(frames: &mut FrameBuffer, inbound: &Sender<Inbound>) -> Result<(), String> {
    loop {
        let record = match frames.next_frame() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(()),
            Err(err) => return Err(format!("protocol violation: {}", err)),
        };

        match codec::decode_message(&record) {
            Ok(message) => {
                if inbound.send(Inbound::Message(message)).is_err() {
                    return Err("channel dropped".to_string());
                }
            }
            Err(err) => debug!("Skipping malformed frame: {}", err),
        }
    }
}

fn heartbeat_loop(inner: Arc<Inner>, stop: Receiver<()>, interval: Duration) {
    let keep_alive = Message::keep_alive();
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                if inner.send(&keep_alive).is_err() {
                    break;
                }
            }
            _ => break,
        }
    }
    trace!("Heartbeat for {} stopped", inner.peer_addr);
}
