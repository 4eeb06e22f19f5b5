//! Access-token encryption at rest.
//!
//! AES-256-GCM with a fresh 96-bit nonce per call. The envelope is
//! `base64(nonce || ciphertext || tag)`; the empty string stands for
//! "no token configured" and never touches the cipher.
//!
//! There is no rotation API here. Rotating a key means decrypting with the old
//! encryptor and encrypting with the new one, see
//! [`StoredRepository::reencrypt`](crate::repository::StoredRepository::reencrypt).

use std::fmt;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// Smallest decodable envelope: nonce plus tag around an empty ciphertext.
pub const MIN_ENVELOPE_LEN: usize = NONCE_LEN + TAG_LEN;

pub struct TokenEncryptor {
    cipher: Aes256Gcm,
}

impl fmt::Debug for TokenEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenEncryptor")
            .field("cipher", &"AES-256-GCM")
            .finish_non_exhaustive()
    }
}

impl TokenEncryptor {
    /// Build an encryptor from raw key bytes. Anything other than 32 bytes is refused.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// Build an encryptor from a base64-encoded key, as supplied through the environment.
    pub fn from_base64_key(encoded: &str) -> Result<Self, CryptoError> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidKeyEncoding)?;
        Self::new(&key)
    }

    /// Generate a random 256-bit key, base64 encoded.
    pub fn generate_key() -> String {
        let key = Aes256Gcm::generate_key(OsRng);
        STANDARD.encode(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + sealed.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&sealed);
        Ok(STANDARD.encode(envelope))
    }

    pub fn decrypt(&self, envelope: &str) -> Result<String, CryptoError> {
        if envelope.is_empty() {
            return Ok(String::new());
        }

        let raw = STANDARD
            .decode(envelope)
            .map_err(|_| CryptoError::MalformedEnvelope)?;
        if raw.len() < MIN_ENVELOPE_LEN {
            return Err(CryptoError::EnvelopeTooShort(raw.len()));
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encryptor() -> TokenEncryptor {
        TokenEncryptor::new(&[7u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn envelope_carries_nonce_and_tag() {
        let envelope = encryptor().encrypt("ghp_abc").unwrap();
        let raw = STANDARD.decode(envelope).unwrap();
        assert_eq!(raw.len(), NONCE_LEN + "ghp_abc".len() + TAG_LEN);
    }

    #[test]
    fn generated_keys_are_usable() {
        let key = TokenEncryptor::generate_key();
        let enc = TokenEncryptor::from_base64_key(&key).unwrap();
        assert_eq!(enc.decrypt(&enc.encrypt("x").unwrap()).unwrap(), "x");
    }

    #[test]
    fn debug_does_not_print_key() {
        let rendered = format!("{:?}", encryptor());
        assert!(!rendered.contains('7'));
    }
}
