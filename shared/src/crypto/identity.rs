use ring::{
    digest,
    rand::SystemRandom,
    signature::{EcdsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING},
};
use rustls::pki_types::{CertificateDer, SignatureVerificationAlgorithm};

use crate::error::CryptoError;

static SUPPORTED_ALGORITHMS: &[&dyn SignatureVerificationAlgorithm] = &[
    webpki::ring::ECDSA_P256_SHA256,
    webpki::ring::ECDSA_P384_SHA384,
    webpki::ring::ED25519,
];

/// Signs with the private key behind the server's TLS certificate
pub struct IdentitySigner {
    key_pair: EcdsaKeyPair,
    rng: SystemRandom,
}

impl IdentitySigner {
    /// Accepts a PKCS#8 encoded ECDSA P-256 key, the kind `rcgen` generates by default
    pub fn from_pkcs8(der: &[u8]) -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, der, &rng)
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { key_pair, rng })
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.key_pair
            .sign(&self.rng, message)
            .map(|signature| signature.as_ref().to_vec())
            .map_err(|_| CryptoError::SigningFailed)
    }
}

/// Checks that `signature` over `message` was made by the key certified in `certificate`
pub fn verify_with_certificate(
    certificate: &CertificateDer<'_>,
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let cert =
        webpki::EndEntityCert::try_from(certificate).map_err(|_| CryptoError::InvalidCertificate)?;

    if SUPPORTED_ALGORITHMS
        .iter()
        .any(|algorithm| cert.verify_signature(*algorithm, message, signature).is_ok())
    {
        Ok(())
    } else {
        Err(CryptoError::SignatureMismatch)
    }
}

/// SHA-256 of the DER certificate, as colon separated upper-case hex
pub fn fingerprint(certificate: &[u8]) -> String {
    digest::digest(&digest::SHA256, certificate)
        .as_ref()
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(":")
}
