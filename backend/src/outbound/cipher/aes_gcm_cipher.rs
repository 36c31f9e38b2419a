//! AES-256-GCM credential cipher.
//!
//! Ciphertext is `base64(nonce || sealed)` with a fresh 12-byte nonce per
//! call, so encrypting the same token twice yields different strings.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::domain::ports::{CredentialCipher, CredentialCipherError};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Errors raised while building a cipher from configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherKeyError {
    #[error("cipher key is not valid base64: {0}")]
    Encoding(String),
    #[error("cipher key must be {KEY_LEN} bytes, got {0}")]
    Length(usize),
}

/// Cipher holding one 256-bit key.
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Build a cipher from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`CipherKeyError`] when the key does not decode to 32 bytes.
    pub fn from_base64_key(encoded: &str) -> Result<Self, CipherKeyError> {
        let key = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|err| CipherKeyError::Encoding(err.to_string()))?,
        );
        Self::from_key_bytes(&key)
    }

    /// Build a cipher from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CipherKeyError::Length`] unless `key` is 32 bytes.
    pub fn from_key_bytes(key: &[u8]) -> Result<Self, CipherKeyError> {
        if key.len() != KEY_LEN {
            return Err(CipherKeyError::Length(key.len()));
        }
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| CipherKeyError::Length(key.len()))?;
        Ok(Self { cipher })
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CredentialCipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|err| CredentialCipherError::encrypt(err.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CredentialCipherError> {
        let data = STANDARD
            .decode(ciphertext)
            .map_err(|err| CredentialCipherError::decrypt(format!("base64: {err}")))?;
        if data.len() <= NONCE_LEN {
            return Err(CredentialCipherError::decrypt("ciphertext too short"));
        }
        let (nonce_bytes, sealed) = data.split_at(NONCE_LEN);
        let plain = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(nonce_bytes), sealed)
                .map_err(|_| CredentialCipherError::decrypt("authentication failed"))?,
        );
        String::from_utf8(plain.to_vec())
            .map_err(|err| CredentialCipherError::decrypt(format!("utf-8: {err}")))
    }
}
