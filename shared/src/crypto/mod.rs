mod cipher;
mod identity;
mod key_exchange;

pub use cipher::{
    constant_time_eq, PacketCipher, SessionKey, IV_BYTES, MIN_SEALED_BYTES, SESSION_KEY_BYTES,
    TAG_BYTES,
};
pub use identity::{fingerprint, verify_with_certificate, IdentitySigner};
pub use key_exchange::{EphemeralKeyPair, PUBLIC_KEY_BYTES};
