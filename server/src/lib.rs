//! # Tandem Server
//! Accepts tandem clients over TLS, answers their datagram key exchange on the same port
//! number and binds each encrypted UDP channel to the session that proves control of it.

#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

mod credentials;
mod endpoint;
mod error;
mod identity;
mod responder;
mod server;
mod session;

pub use credentials::{Credential, CredentialRegistry, Redeemed, Rejection, SessionId};
pub use endpoint::DatagramEndpoint;
pub use error::ServerError;
pub use identity::ServerIdentity;
pub use responder::Responder;
pub use server::{Server, ServerConfig};
pub use session::{Session, SessionStats};

pub use tandem_shared::{
    ChannelError, ConnectionConfig, Delivery, HybridState, Message, MessageChannel, MessageType,
    RoutingPolicy, ThrottleConfig, DEFAULT_PORT,
};
