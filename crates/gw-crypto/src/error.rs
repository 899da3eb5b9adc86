//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AES-CBC encryption failed (should only happen on misaligned input)
    #[error("encryption failed")]
    EncryptionFailed,

    /// AES-CBC decryption failed (bad padding or corrupt ciphertext)
    #[error("decryption failed")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Diffie-Hellman public value was out of range (not reduced mod p)
    #[error("invalid Diffie-Hellman public value")]
    InvalidPublicValue,
}
