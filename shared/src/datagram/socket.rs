use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::Arc,
};

/// The socket a [`DatagramChannel`](super::DatagramChannel) transmits on
pub enum DatagramSocket {
    /// A socket connected to a single peer. The channel spawns its own reader for it.
    Connected(UdpSocket),
    /// A socket shared by many peers. Whoever owns it reads and hands datagrams to
    /// [`DatagramChannel::deliver`](super::DatagramChannel::deliver).
    Shared {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
    },
}

impl DatagramSocket {
    pub fn send(&self, bytes: &[u8]) -> io::Result<usize> {
        match self {
            DatagramSocket::Connected(socket) => socket.send(bytes),
            DatagramSocket::Shared { socket, peer } => socket.send_to(bytes, peer),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            DatagramSocket::Connected(socket) => socket.peer_addr(),
            DatagramSocket::Shared { peer, .. } => Ok(*peer),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            DatagramSocket::Connected(socket) => socket.local_addr(),
            DatagramSocket::Shared { socket, .. } => socket.local_addr(),
        }
    }
}
