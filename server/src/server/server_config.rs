use std::{default::Default, net::SocketAddr, time::Duration};

use tandem_shared::{ConnectionConfig, RoutingPolicy, ThrottleConfig, DEFAULT_PORT};

/// Contains Config properties which will be used by the Server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address of the TLS listener. The datagram endpoint binds the same IP and port number
    /// over UDP.
    pub bind_addr: SocketAddr,
    /// Used to configure the connections with Clients
    pub connection: ConnectionConfig,
    /// Whether to answer datagram key exchanges and protocol-switch requests at all
    pub datagram_enabled: bool,
    /// How long a protocol-switch credential stays redeemable after it is issued
    pub credential_lifetime: Duration,
    /// How many consumed credentials are remembered to tell replays apart in the logs
    pub consumed_credential_memory: usize,
    /// Per-session, per-message-type limit on inbound game traffic. `None` disables it.
    pub throttle: Option<ThrottleConfig>,
    /// Key exchanges started but not finished, across all peers
    pub max_pending_exchanges: usize,
    /// How long a started key exchange may wait for the client's half
    pub key_exchange_timeout: Duration,
    /// Which message types the sessions may send over the datagram channel
    pub routing: RoutingPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            connection: ConnectionConfig::default(),
            datagram_enabled: true,
            credential_lifetime: Duration::from_secs(10),
            consumed_credential_memory: 1024,
            throttle: None,
            max_pending_exchanges: 256,
            key_exchange_timeout: Duration::from_secs(5),
            routing: RoutingPolicy::default(),
        }
    }
}
