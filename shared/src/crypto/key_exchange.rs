use ring::{
    agreement::{self, EphemeralPrivateKey, UnparsedPublicKey, X25519},
    rand::SecureRandom,
};

use super::cipher::PacketCipher;
use crate::error::CryptoError;

pub const PUBLIC_KEY_BYTES: usize = 32;

const WRAP_SALT: &[u8] = b"tandem/datagram/key-wrap/v1";

/// One-shot X25519 key pair used to transport a datagram session key
pub struct EphemeralKeyPair {
    private: EphemeralPrivateKey,
    public: [u8; PUBLIC_KEY_BYTES],
}

impl EphemeralKeyPair {
    pub fn generate(rng: &dyn SecureRandom) -> Result<Self, CryptoError> {
        let private =
            EphemeralPrivateKey::generate(&X25519, rng).map_err(|_| CryptoError::RandomFailed)?;
        let public_key = private
            .compute_public_key()
            .map_err(|_| CryptoError::KeyAgreementFailed)?;

        let mut public = [0u8; PUBLIC_KEY_BYTES];
        public.copy_from_slice(public_key.as_ref());
        Ok(Self { private, public })
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_BYTES] {
        &self.public
    }

    /// Consumes the private key and derives the cipher that wraps the session key.
    /// `label` binds the derived key to one exchange (both peers must pass the same bytes).
    pub fn agree(
        self,
        peer_public: &[u8; PUBLIC_KEY_BYTES],
        label: &[u8],
    ) -> Result<PacketCipher, CryptoError> {
        let peer = UnparsedPublicKey::new(&X25519, peer_public);
        agreement::agree_ephemeral(self.private, &peer, |shared| {
            PacketCipher::derive(shared, WRAP_SALT, label)
        })
        .map_err(|_| CryptoError::KeyAgreementFailed)?
    }
}
