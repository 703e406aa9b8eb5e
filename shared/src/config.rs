use std::time::Duration;

/// Port the server listens on (TCP and UDP) unless configured otherwise
pub const DEFAULT_PORT: u16 = 14191;

/// Timing shared by both ends of a connection
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Silence on the reliable channel longer than this closes the session.
    /// Must comfortably exceed `heartbeat_interval`.
    pub read_timeout: Duration,
    /// Interval at which the reliable channel emits a keep-alive
    pub heartbeat_interval: Duration,
    /// Silence on the datagram channel longer than this closes the datagram channel
    pub datagram_inactivity_timeout: Duration,
    /// Idle interval after which the datagram channel emits its own keep-alive
    pub datagram_keep_alive_interval: Duration,
    /// Upper bound for completing a TLS handshake
    pub handshake_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(3),
            datagram_inactivity_timeout: Duration::from_secs(5),
            datagram_keep_alive_interval: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}
