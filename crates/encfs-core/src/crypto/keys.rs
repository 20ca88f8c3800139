#![forbid(unsafe_code)]

use std::fmt;

use aes::cipher::KeyInit;
use aes::{Aes128, Aes192, Aes256};
use rand::RngCore;
use ring::hmac;
use secrecy::{ExposeSecret, SecretSlice};
use zeroize::Zeroizing;

use super::CryptoError;

/// Length of the IV seed that accompanies every AES key, in bytes.
pub const IV_LEN: usize = 16;

/// AES key sizes accepted by the `ssl/aes` cipher, in bytes.
pub const SUPPORTED_KEY_LENGTHS: [usize; 3] = [16, 24, 32];

/// Expanded AES key schedule, one variant per supported key size.
#[derive(Clone)]
pub(crate) enum AesKey {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesKey {
    fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let invalid = |_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: key.len(),
        };
        match key.len() {
            16 => Aes128::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            24 => Aes192::new_from_slice(key).map(Self::Aes192).map_err(invalid),
            32 => Aes256::new_from_slice(key).map(Self::Aes256).map_err(invalid),
            actual => Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual,
            }),
        }
    }
}

/// An AES key together with its IV seed.
///
/// This is the unit of key material in an EncFS volume. The volume key that
/// encrypts names and content is one, and so is the key-encryption key derived
/// from the user's password. Both halves are wrapped in [`SecretSlice`] and
/// zeroized on drop; the derived HMAC key and AES schedule live only as long as
/// the `VolumeKey` itself.
///
/// # Thread Safety
///
/// `VolumeKey` is immutable after construction and therefore `Send + Sync`.
/// Share it across threads with `Arc<VolumeKey>`.
pub struct VolumeKey {
    key: SecretSlice<u8>,
    iv: SecretSlice<u8>,
    mac_key: hmac::Key,
    aes: AesKey,
}

impl VolumeKey {
    /// Build a key from raw key bytes and a 16-byte IV seed.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        if iv.len() != IV_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: IV_LEN,
                actual: iv.len(),
            });
        }
        let aes = AesKey::new(key)?;
        Ok(Self {
            key: SecretSlice::from(key.to_vec()),
            iv: SecretSlice::from(iv.to_vec()),
            mac_key: hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key),
            aes,
        })
    }

    /// Generate a fresh random key of `key_len` bytes plus a random IV seed.
    pub fn random(key_len: usize) -> Result<Self, CryptoError> {
        if !SUPPORTED_KEY_LENGTHS.contains(&key_len) {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: key_len,
            });
        }
        let mut material = Zeroizing::new(vec![0u8; key_len + IV_LEN]);
        rand::rng().fill_bytes(&mut material);
        Self::from_material(&material, key_len)
    }

    /// Split `key || iv` material into a key.
    pub fn from_material(material: &[u8], key_len: usize) -> Result<Self, CryptoError> {
        if material.len() != key_len + IV_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: key_len + IV_LEN,
                actual: material.len(),
            });
        }
        let (key, iv) = material.split_at(key_len);
        Self::new(key, iv)
    }

    /// Concatenated `key || iv` bytes, as stored (wrapped) in the volume config.
    pub fn material(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(self.key_len() + IV_LEN));
        out.extend_from_slice(self.key.expose_secret());
        out.extend_from_slice(self.iv.expose_secret());
        out
    }

    /// Key length in bytes (16, 24 or 32).
    pub fn key_len(&self) -> usize {
        self.key.expose_secret().len()
    }

    /// Key length in bits, as recorded in the config's `keySize` field.
    pub fn key_size_bits(&self) -> u32 {
        u32::try_from(self.key_len() * 8).unwrap_or(u32::MAX)
    }

    pub(crate) fn iv_seed(&self) -> &[u8] {
        self.iv.expose_secret()
    }

    pub(crate) fn mac_key(&self) -> &hmac::Key {
        &self.mac_key
    }

    pub(crate) fn aes(&self) -> &AesKey {
        &self.aes
    }
}

impl Clone for VolumeKey {
    fn clone(&self) -> Self {
        Self {
            key: SecretSlice::from(self.key.expose_secret().to_vec()),
            iv: SecretSlice::from(self.iv.expose_secret().to_vec()),
            mac_key: self.mac_key.clone(),
            aes: self.aes.clone(),
        }
    }
}

impl fmt::Debug for VolumeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeKey")
            .field("key_bits", &self.key_size_bits())
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}
