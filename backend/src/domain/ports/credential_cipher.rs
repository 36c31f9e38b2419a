//! Driven port for reversible token encryption.
//!
//! Two instances exist at runtime: one protecting tokens at rest and one
//! protecting tokens published to pollers.

use super::define_port_error;

define_port_error! {
    /// Errors raised by a cipher.
    pub enum CredentialCipherError {
        /// Encryption failed.
        Encrypt { message: String } => "credential encryption failed: {message}",
        /// Ciphertext was malformed or failed authentication.
        Decrypt { message: String } => "credential decryption failed: {message}",
    }
}

/// Port for encrypting and decrypting credential strings.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialCipher: Send + Sync {
    /// Encrypt `plaintext`, returning printable ciphertext.
    fn encrypt(&self, plaintext: &str) -> Result<String, CredentialCipherError>;

    /// Reverse [`CredentialCipher::encrypt`].
    fn decrypt(&self, ciphertext: &str) -> Result<String, CredentialCipherError>;
}

/// Fixture cipher that passes text through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureCredentialCipher;

impl CredentialCipher for FixtureCredentialCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CredentialCipherError> {
        Ok(plaintext.to_owned())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CredentialCipherError> {
        Ok(ciphertext.to_owned())
    }
}
