use std::{
    io,
    net::{SocketAddr, UdpSocket},
    time::{Duration, Instant},
};

use log::{debug, info, trace};
use ring::rand::{SecureRandom, SystemRandom};
use rustls::pki_types::CertificateDer;
use tandem_shared::{
    crypto::{verify_with_certificate, EphemeralKeyPair, PacketCipher, SessionKey},
    datagram::handshake::{offer_transcript, wrap_label, HandshakePacket, Nonce, NONCE_BYTES},
    ChannelError, ConnectionConfig, DatagramChannel, DatagramSocket, HandshakeError,
    MAX_DATAGRAM_BYTES,
};

/// Where and how to establish a datagram channel
pub struct DatagramTarget<'a> {
    pub server: SocketAddr,
    /// The certificate pinned on the reliable channel; the server's key offer must be signed
    /// by its key
    pub certificate: &'a CertificateDer<'static>,
    pub connection: &'a ConnectionConfig,
    pub attempts: u32,
    pub attempt_timeout: Duration,
}

/// Runs the key establishment with the server's datagram endpoint and returns an unstarted
/// channel bound to the fresh session key.
///
/// A key offer that is not signed by the pinned certificate aborts immediately with
/// [`HandshakeError::KeySubstitution`]; silence is retried up to `attempts` times.
pub fn establish_datagram(target: &DatagramTarget<'_>) -> Result<DatagramChannel, ChannelError> {
    let rng = SystemRandom::new();

    for attempt in 1..=target.attempts.max(1) {
        match establish_once(target, &rng) {
            Ok(channel) => {
                info!("Datagram channel to {} established", target.server);
                return Ok(channel);
            }
            Err(err @ ChannelError::HandshakeProtocol(_)) => return Err(err),
            Err(err) => debug!(
                "Datagram establishment attempt {}/{} with {} failed: {}",
                attempt, target.attempts, target.server, err
            ),
        }
    }

    Err(ChannelError::datagram_unavailable(format!(
        "no key exchange with {} after {} attempts",
        target.server, target.attempts
    )))
}

fn establish_once(
    target: &DatagramTarget<'_>,
    rng: &SystemRandom,
) -> Result<DatagramChannel, ChannelError> {
    let io_error = |err: io::Error| ChannelError::datagram_unavailable(err.to_string());

    let local: SocketAddr = if target.server.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(local).map_err(io_error)?;
    socket.connect(target.server).map_err(io_error)?;
    socket
        .set_read_timeout(Some(target.attempt_timeout))
        .map_err(io_error)?;

    let mut nonce: Nonce = [0u8; NONCE_BYTES];
    rng.fill(&mut nonce)
        .map_err(|_| ChannelError::datagram_unavailable("random generator failed"))?;

    send_packet(&socket, &HandshakePacket::KeyRequest { nonce })?;

    let deadline = Instant::now() + target.attempt_timeout;
    let (server_public, signature) = loop {
        let datagram = recv_until(&socket, deadline)?;
        match HandshakePacket::decode(&datagram) {
            Ok(Some(HandshakePacket::KeyOffer {
                nonce: offered,
                server_public,
                signature,
            })) if offered == nonce => break (server_public, signature),
            _ => trace!("Ignoring unexpected datagram while awaiting key offer"),
        }
    };

    verify_with_certificate(
        target.certificate,
        &offer_transcript(&nonce, &server_public),
        &signature,
    )
    .map_err(|_| HandshakeError::KeySubstitution)?;

    let ephemeral = EphemeralKeyPair::generate(rng)?;
    let client_public = *ephemeral.public_key();
    let wrapping: PacketCipher = ephemeral.agree(&server_public, &wrap_label(&nonce))?;
    let session_key = SessionKey::generate(rng)?;
    let wrapped_key = wrapping.seal(session_key.as_bytes())?;

    send_packet(
        &socket,
        &HandshakePacket::KeyExchange {
            nonce,
            client_public,
            wrapped_key,
        },
    )?;

    let reader = socket.try_clone().map_err(io_error)?;
    let channel = DatagramChannel::new(
        DatagramSocket::Connected(socket),
        session_key,
        target.connection,
    )?;

    // The server acknowledges with its first sealed envelope
    loop {
        let datagram = recv_until(&reader, deadline)?;
        match channel.accept_datagram(&datagram) {
            Some(envelope) if envelope.is_ack => {
                channel.deliver(envelope);
                return Ok(channel);
            }
            _ => trace!("Ignoring datagram while awaiting key acknowledgement"),
        }
    }
}

fn send_packet(socket: &UdpSocket, packet: &HandshakePacket) -> Result<(), ChannelError> {
    let bytes = packet.encode()?;
    socket
        .send(&bytes)
        .map_err(|err| ChannelError::datagram_unavailable(err.to_string()))?;
    Ok(())
}

fn recv_until(socket: &UdpSocket, deadline: Instant) -> Result<Vec<u8>, ChannelError> {
    let mut buffer = vec![0u8; MAX_DATAGRAM_BYTES + 1];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ChannelError::datagram_unavailable("key exchange timed out"));
        }
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|err| ChannelError::datagram_unavailable(err.to_string()))?;

        match socket.recv(&mut buffer) {
            Ok(len) => return Ok(buffer[..len].to_vec()),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut
                    || err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(ChannelError::datagram_unavailable(err.to_string())),
        }
    }
}
