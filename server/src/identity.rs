use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{info, warn};
use ring::rand::{SecureRandom, SystemRandom};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tandem_shared::crypto::{fingerprint, IdentitySigner, PacketCipher};
use zeroize::Zeroizing;

use crate::error::ServerError;

/// Prefix of a private key file sealed with a password
const SEALED_KEY_MAGIC: &[u8; 4] = b"TDKS";
const SALT_BYTES: usize = 16;

/// The server's certificate and the private key behind it.
///
/// The key signs both the TLS handshake and the datagram key offers, so a client can check
/// that the datagram endpoint belongs to the server it trusted on the reliable channel.
pub struct ServerIdentity {
    certificate: CertificateDer<'static>,
    private_key: Zeroizing<Vec<u8>>,
}

impl ServerIdentity {
    /// A fresh, in-memory key pair with a self-signed certificate for `hostnames`
    pub fn self_signed(hostnames: &[String]) -> Result<Self, ServerError> {
        let certified = rcgen::generate_simple_self_signed(hostnames.to_vec()).map_err(|err| {
            ServerError::Certificate {
                reason: err.to_string(),
            }
        })?;

        Self::from_der(
            certified.cert.der().to_vec(),
            certified.key_pair.serialize_der(),
        )
    }

    /// A DER certificate and its PKCS#8 ECDSA P-256 private key
    pub fn from_der(certificate: Vec<u8>, private_key: Vec<u8>) -> Result<Self, ServerError> {
        let private_key = Zeroizing::new(private_key);
        // Rejects keys the datagram endpoint could not sign with
        IdentitySigner::from_pkcs8(&private_key)?;

        Ok(Self {
            certificate: CertificateDer::from(certificate),
            private_key,
        })
    }

    /// Loads `<alias>.cert.der` and `<alias>.key.der` from `directory`, generating and storing a
    /// self-signed pair for `hostnames` when neither file exists yet.
    ///
    /// With a `password`, the private key is stored sealed under a key derived from it.
    pub fn from_keystore(
        directory: &Path,
        alias: &str,
        password: Option<&str>,
        hostnames: &[String],
    ) -> Result<Self, ServerError> {
        let cert_path = directory.join(format!("{}.cert.der", alias));
        let key_path = directory.join(format!("{}.key.der", alias));

        match (cert_path.exists(), key_path.exists()) {
            (true, true) => {
                let certificate = fs::read(&cert_path)
                    .map_err(|err| ServerError::keystore(&cert_path, err))?;
                let stored = Zeroizing::new(
                    fs::read(&key_path).map_err(|err| ServerError::keystore(&key_path, err))?,
                );
                let private_key = unseal_key(&key_path, &stored, password)?;
                let identity = Self::from_der(certificate, private_key.to_vec())?;
                info!(
                    "Loaded identity '{}' ({}) from {}",
                    alias,
                    identity.fingerprint(),
                    directory.display()
                );
                Ok(identity)
            }
            (false, false) => {
                let identity = Self::self_signed(hostnames)?;
                fs::create_dir_all(directory)
                    .map_err(|err| ServerError::keystore(directory, err))?;
                write_file(&cert_path, &identity.certificate)?;
                write_file(
                    &key_path,
                    &seal_key(&identity.private_key, password)?,
                )?;
                info!(
                    "Generated identity '{}' ({}) in {}",
                    alias,
                    identity.fingerprint(),
                    directory.display()
                );
                Ok(identity)
            }
            (true, false) => Err(ServerError::keystore(key_path, "private key is missing")),
            (false, true) => Err(ServerError::keystore(cert_path, "certificate is missing")),
        }
    }

    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.certificate)
    }

    pub fn signer(&self) -> Result<IdentitySigner, ServerError> {
        Ok(IdentitySigner::from_pkcs8(&self.private_key)?)
    }

    pub fn tls_config(&self) -> Result<Arc<rustls::ServerConfig>, ServerError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(self.private_key.to_vec()));

        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(vec![self.certificate.clone()], key)?;

        Ok(Arc::new(config))
    }
}

fn seal_key(private_key: &[u8], password: Option<&str>) -> Result<Vec<u8>, ServerError> {
    let Some(password) = password else {
        return Ok(private_key.to_vec());
    };

    let mut salt = [0u8; SALT_BYTES];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| tandem_shared::CryptoError::RandomFailed)?;
    let sealed = PacketCipher::from_password(password, &salt)?.seal(private_key)?;

    let mut stored = Vec::with_capacity(SEALED_KEY_MAGIC.len() + SALT_BYTES + sealed.len());
    stored.extend_from_slice(SEALED_KEY_MAGIC);
    stored.extend_from_slice(&salt);
    stored.extend_from_slice(&sealed);
    Ok(stored)
}

fn unseal_key(
    path: &Path,
    stored: &[u8],
    password: Option<&str>,
) -> Result<Zeroizing<Vec<u8>>, ServerError> {
    let Some(sealed) = stored.strip_prefix(&SEALED_KEY_MAGIC[..]) else {
        if password.is_some() {
            warn!(
                "{} is not password protected; ignoring the password",
                path.display()
            );
        }
        return Ok(Zeroizing::new(stored.to_vec()));
    };

    let Some(password) = password else {
        return Err(ServerError::keystore(path, "private key is password protected"));
    };
    if sealed.len() < SALT_BYTES {
        return Err(ServerError::keystore(path, "sealed private key is truncated"));
    }

    let (salt, sealed) = sealed.split_at(SALT_BYTES);
    PacketCipher::from_password(password, salt)?
        .open(sealed)
        .map(Zeroizing::new)
        .map_err(|_| ServerError::keystore(path, "wrong password or corrupted private key"))
}

fn write_file(path: &PathBuf, bytes: &[u8]) -> Result<(), ServerError> {
    let write = || -> io::Result<()> {
        let mut file = fs::File::create(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(bytes)?;
        file.sync_all()
    };
    write().map_err(|err| ServerError::keystore(path, err))
}
