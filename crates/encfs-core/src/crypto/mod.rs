//! Cryptographic primitives for EncFS volumes

pub mod cipher;
pub mod key_wrap;
pub mod keys;

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
///
/// # Security Classification
///
/// Errors marked `[INTEGRITY VIOLATION]` mean that stored data failed a
/// checksum and may have been tampered with. Errors marked `[USER ERROR]`
/// usually mean a wrong password. `[PROGRAMMING ERROR]` variants indicate
/// invalid parameters passed by the caller.
#[derive(Error, Debug)]
pub enum CryptoError {
    // =========================================================================
    // USER ERRORS - Typically wrong password or corrupted input
    // =========================================================================
    /// The checksum embedded in the wrapped volume key did not match.
    ///
    /// This is the conventional EncFS signal for a **wrong password**: the
    /// derived key-encryption key decrypts the blob to garbage whose MAC does
    /// not match the stored checksum. Tampering with the blob is
    /// indistinguishable from a wrong password.
    #[error("Key unwrap failed - incorrect password or corrupted volume key")]
    KeyUnwrapIntegrityFailed,

    /// PBKDF2 could not run with the stored parameters.
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // =========================================================================
    // INTEGRITY VIOLATIONS - Potential adversarial tampering
    // =========================================================================
    /// The wrapped key blob has the wrong size for the configured key length.
    ///
    /// **[INTEGRITY VIOLATION]** The config record is structurally corrupt.
    #[error("[INTEGRITY VIOLATION] Wrapped key has invalid length: expected {expected}, got {actual}")]
    InvalidWrappedKeyLength { expected: usize, actual: usize },

    // =========================================================================
    // PROGRAMMING ERRORS - Invalid parameters or implementation bugs
    // =========================================================================
    /// Key or IV material has an unsupported length.
    ///
    /// **[PROGRAMMING ERROR]** AES keys must be 16, 24 or 32 bytes and IV
    /// seeds 16 bytes.
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Block-mode input was not a whole number of cipher blocks.
    ///
    /// **[PROGRAMMING ERROR]** Only full content blocks and padded names are
    /// passed to the block transform.
    #[error("Block transform requires a multiple of {block} bytes, got {actual}")]
    UnalignedBlock { block: usize, actual: usize },
}

impl From<key_wrap::UnwrapError> for CryptoError {
    fn from(err: key_wrap::UnwrapError) -> Self {
        match err {
            key_wrap::UnwrapError::InvalidLength { expected, actual } => {
                CryptoError::InvalidWrappedKeyLength { expected, actual }
            }
            key_wrap::UnwrapError::InvalidIntegrityCheck => CryptoError::KeyUnwrapIntegrityFailed,
        }
    }
}

pub use keys::VolumeKey;
