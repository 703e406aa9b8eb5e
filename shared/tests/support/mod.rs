#![allow(dead_code)]

use std::{
    net::{TcpListener, TcpStream, UdpSocket},
    sync::Arc,
    thread,
    time::Duration,
};

use tandem_shared::{
    complete_handshake,
    crypto::SessionKey,
    rustls::{
        self,
        pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName},
    },
    ConnectionConfig, DatagramChannel, DatagramSocket, ReliableChannel,
};

pub const SESSION_KEY: [u8; 32] = [0x5a; 32];

pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        read_timeout: Duration::from_secs(5),
        heartbeat_interval: Duration::from_millis(100),
        datagram_inactivity_timeout: Duration::from_millis(600),
        datagram_keep_alive_interval: Duration::from_millis(100),
        handshake_timeout: Duration::from_secs(5),
    }
}

pub struct Identity {
    pub cert: CertificateDer<'static>,
    pub key: Vec<u8>,
}

pub fn identity() -> Identity {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    Identity {
        cert: certified.cert.der().clone(),
        key: certified.key_pair.serialize_der(),
    }
}

/// A connected (client, server) pair of reliable channels over loopback
pub fn reliable_pair(config: &ConnectionConfig) -> (ReliableChannel, ReliableChannel) {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let identity = identity();

    let server_config = Arc::new(
        rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(
                vec![identity.cert.clone()],
                PrivatePkcs8KeyDer::from(identity.key.clone()).into(),
            )
            .unwrap(),
    );
    let mut roots = rustls::RootCertStore::empty();
    roots.add(identity.cert.clone()).unwrap();
    let client_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server_side = {
        let config = config.clone();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut connection =
                rustls::Connection::from(rustls::ServerConnection::new(server_config).unwrap());
            complete_handshake(&mut connection, &mut stream, config.handshake_timeout).unwrap();
            ReliableChannel::new(connection, stream, &config).unwrap()
        })
    };

    let mut stream = TcpStream::connect(addr).unwrap();
    let mut connection = rustls::Connection::from(
        rustls::ClientConnection::new(client_config, ServerName::try_from("localhost").unwrap())
            .unwrap(),
    );
    complete_handshake(&mut connection, &mut stream, config.handshake_timeout).unwrap();
    let client = ReliableChannel::new(connection, stream, config).unwrap();

    (client, server_side.join().unwrap())
}

/// Two loopback UDP sockets connected to each other
pub fn socket_pair() -> (UdpSocket, UdpSocket) {
    let a = UdpSocket::bind("127.0.0.1:0").unwrap();
    let b = UdpSocket::bind("127.0.0.1:0").unwrap();
    a.connect(b.local_addr().unwrap()).unwrap();
    b.connect(a.local_addr().unwrap()).unwrap();
    (a, b)
}

/// Two datagram channels sharing a session key, neither started
pub fn datagram_pair(config: &ConnectionConfig) -> (DatagramChannel, DatagramChannel) {
    let (a, b) = socket_pair();
    (
        DatagramChannel::new(
            DatagramSocket::Connected(a),
            SessionKey::from_slice(&SESSION_KEY).unwrap(),
            config,
        )
        .unwrap(),
        DatagramChannel::new(
            DatagramSocket::Connected(b),
            SessionKey::from_slice(&SESSION_KEY).unwrap(),
            config,
        )
        .unwrap(),
    )
}
