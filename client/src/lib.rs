//! # Tandem Client
//! Connects to a tandem-server over TLS, settles certificate trust (automatically or with the
//! user's help) and upgrades the session to a hybrid TLS + encrypted UDP transport.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod bootstrap;
mod client;
mod client_config;
mod datagram;
mod initiator;

pub use bootstrap::{
    Bootstrap, BootstrapState, Connected, TrustDecision, TrustPath, TrustRequest, TrustResponder,
};
pub use client::Client;
pub use client_config::{ClientConfig, ManualTrust, RecoveryPolicy, TrustAnchors, TrustPrompt};
pub use datagram::{establish_datagram, DatagramTarget};
pub use initiator::Initiator;

pub use tandem_shared::{
    ChannelError, Delivery, HybridState, Message, MessageChannel, MessageType, RoutingPolicy,
    DEFAULT_PORT,
};
