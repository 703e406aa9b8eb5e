use std::{io, net::TcpStream, time::Duration};

use log::debug;

use crate::error::HandshakeError;

/// Drives the TLS handshake on a blocking stream until it completes or fails.
///
/// Certificate validation failures are reported as
/// [`HandshakeError::UntrustedCertificate`] so callers can fall back to manual trust.
pub fn complete_handshake(
    connection: &mut rustls::Connection,
    stream: &mut TcpStream,
    timeout: Duration,
) -> Result<(), HandshakeError> {
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .map_err(|err| HandshakeError::Tls {
            reason: err.to_string(),
        })?;

    while connection.is_handshaking() {
        connection
            .complete_io(stream)
            .map_err(classify_handshake_error)?;
    }
    while connection.wants_write() {
        connection
            .write_tls(stream)
            .map_err(classify_handshake_error)?;
    }

    debug!(
        "TLS handshake complete with {:?} ({:?})",
        stream.peer_addr().ok(),
        connection.protocol_version()
    );
    Ok(())
}

fn classify_handshake_error(err: io::Error) -> HandshakeError {
    if let Some(tls_error) = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        return match tls_error {
            rustls::Error::InvalidCertificate(reason) => HandshakeError::UntrustedCertificate {
                reason: format!("{:?}", reason),
            },
            other => HandshakeError::Tls {
                reason: other.to_string(),
            },
        };
    }

    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            HandshakeError::Timeout { stage: "tls" }
        }
        _ => HandshakeError::Tls {
            reason: err.to_string(),
        },
    }
}
