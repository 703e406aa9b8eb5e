//! Packet sealing for the datagram channel.
//!
//! A sealed packet is `[iv: 16][tag: 16][AES-256-CBC/PKCS7 ciphertext]`, where the tag is
//! HMAC-SHA256 over `iv ‖ plaintext` truncated to 16 bytes. Encryption and MAC keys are expanded
//! from a single 32-byte secret with HKDF-SHA256.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use std::num::NonZeroU32;

use ring::{
    hkdf, hmac, pbkdf2,
    rand::{SecureRandom, SystemRandom},
};
use zeroize::Zeroize;

use crate::error::CryptoError;

pub const IV_BYTES: usize = 16;
pub const TAG_BYTES: usize = 16;
pub const SESSION_KEY_BYTES: usize = 32;
const BLOCK_BYTES: usize = 16;

/// Smallest well-formed sealed packet: iv, tag and one cipher block
pub const MIN_SEALED_BYTES: usize = IV_BYTES + TAG_BYTES + BLOCK_BYTES;

const SESSION_SALT: &[u8] = b"tandem/datagram/session/v1";
const PASSWORD_ROUNDS: u32 = 100_000;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Symmetric key shared by both ends of one datagram channel lifetime
pub struct SessionKey {
    bytes: [u8; SESSION_KEY_BYTES],
}

impl SessionKey {
    pub fn generate(rng: &dyn SecureRandom) -> Result<Self, CryptoError> {
        let mut bytes = [0u8; SESSION_KEY_BYTES];
        rng.fill(&mut bytes).map_err(|_| CryptoError::RandomFailed)?;
        Ok(Self { bytes })
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SESSION_KEY_BYTES] = bytes
            .try_into()
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_BYTES] {
        &self.bytes
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

struct OkmLen(usize);

impl hkdf::KeyType for OkmLen {
    fn len(&self) -> usize {
        self.0
    }
}

pub struct PacketCipher {
    encryption_key: [u8; 32],
    mac_key: hmac::Key,
    rng: SystemRandom,
}

impl PacketCipher {
    /// Cipher for the datagram channel of one session key
    pub fn for_session(key: &SessionKey) -> Result<Self, CryptoError> {
        Self::derive(key.as_bytes(), SESSION_SALT, b"packet")
    }

    /// Cipher for data at rest, keyed by a password stretched with PBKDF2-HMAC-SHA256
    pub fn from_password(password: &str, salt: &[u8]) -> Result<Self, CryptoError> {
        let rounds = NonZeroU32::new(PASSWORD_ROUNDS).ok_or(CryptoError::KeyDerivationFailed)?;
        let mut stretched = [0u8; 32];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            rounds,
            salt,
            password.as_bytes(),
            &mut stretched,
        );
        let cipher = Self::derive(&stretched, salt, b"at-rest");
        stretched.zeroize();
        cipher
    }

    /// Expands `secret` into independent encryption and MAC keys
    pub(crate) fn derive(secret: &[u8], salt: &[u8], label: &[u8]) -> Result<Self, CryptoError> {
        let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, salt).extract(secret);
        let info = [label];
        let okm = prk
            .expand(&info, OkmLen(64))
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        let mut material = [0u8; 64];
        okm.fill(&mut material)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;

        let mut encryption_key = [0u8; 32];
        encryption_key.copy_from_slice(&material[..32]);
        let mac_key = hmac::Key::new(hmac::HMAC_SHA256, &material[32..]);
        material.zeroize();

        Ok(Self {
            encryption_key,
            mac_key,
            rng: SystemRandom::new(),
        })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut iv = [0u8; IV_BYTES];
        self.rng
            .fill(&mut iv)
            .map_err(|_| CryptoError::RandomFailed)?;

        let tag = self.tag(&iv, plaintext);
        let ciphertext = Aes256CbcEnc::new((&self.encryption_key).into(), (&iv).into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut packet = Vec::with_capacity(IV_BYTES + TAG_BYTES + ciphertext.len());
        packet.extend_from_slice(&iv);
        packet.extend_from_slice(&tag);
        packet.extend_from_slice(&ciphertext);
        Ok(packet)
    }

    pub fn open(&self, packet: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if packet.len() < MIN_SEALED_BYTES {
            return Err(CryptoError::PacketTooShort {
                len: packet.len(),
                min: MIN_SEALED_BYTES,
            });
        }

        let (iv, rest) = packet.split_at(IV_BYTES);
        let (tag, ciphertext) = rest.split_at(TAG_BYTES);
        if ciphertext.len() % BLOCK_BYTES != 0 {
            return Err(CryptoError::AuthenticationFailed);
        }

        let mut iv_block = [0u8; IV_BYTES];
        iv_block.copy_from_slice(iv);
        let plaintext = Aes256CbcDec::new((&self.encryption_key).into(), (&iv_block).into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        let expected = self.tag(&iv_block, &plaintext);
        if !constant_time_eq(&expected, tag) {
            return Err(CryptoError::AuthenticationFailed);
        }

        Ok(plaintext)
    }

    fn tag(&self, iv: &[u8; IV_BYTES], plaintext: &[u8]) -> [u8; TAG_BYTES] {
        let mut context = hmac::Context::with_key(&self.mac_key);
        context.update(iv);
        context.update(plaintext);
        let full = context.sign();

        let mut tag = [0u8; TAG_BYTES];
        tag.copy_from_slice(&full.as_ref()[..TAG_BYTES]);
        tag
    }
}

impl Drop for PacketCipher {
    fn drop(&mut self) {
        self.encryption_key.zeroize();
    }
}

/// Compares two byte strings without short-circuiting on the first difference
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
