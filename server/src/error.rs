use std::{io, net::SocketAddr, path::PathBuf};

use tandem_shared::{ChannelError, CryptoError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// A listening socket could not be opened
    #[error("Could not bind {protocol} on {addr}: {source}")]
    Bind {
        protocol: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The keystore could not be read, written or decrypted
    #[error("Keystore {path}: {reason}")]
    Keystore { path: PathBuf, reason: String },

    /// A self-signed certificate could not be generated
    #[error("Failed to generate certificate: {reason}")]
    Certificate { reason: String },

    #[error("Invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Could not start the {name} thread: {source}")]
    Thread {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The server was shut down
    #[error("Server is shut down")]
    Shutdown,
}

impl ServerError {
    pub(crate) fn keystore(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ServerError::Keystore {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
