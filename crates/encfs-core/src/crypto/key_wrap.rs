//! Password-based wrapping of the volume key.
//!
//! The wrapped form stored in the config is `checksum (4 bytes, big-endian) ||
//! stream_encode(key || iv)`, where the checksum is the 32-bit MAC of the
//! plaintext key material under the key-encryption key and doubles as the
//! stream seed. Unwrapping with the wrong key-encryption key yields material
//! whose MAC does not match, which is how a wrong password is detected.

use std::num::NonZeroU32;

use ring::pbkdf2;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

use super::CryptoError;
use super::keys::{IV_LEN, VolumeKey};

/// Size of the checksum that prefixes a wrapped key.
pub const KEY_CHECKSUM_BYTES: usize = 4;

/// Errors from [`unwrap_key`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwrapError {
    #[error("Wrapped key has invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Wrapped key checksum mismatch")]
    InvalidIntegrityCheck,
}

/// Total size of a wrapped key of `key_len` bytes.
pub const fn wrapped_key_len(key_len: usize) -> usize {
    key_len + IV_LEN + KEY_CHECKSUM_BYTES
}

/// Derive the key-encryption key from a password with PBKDF2-HMAC-SHA1.
///
/// Produces `key_len + 16` bytes: the AES key followed by its IV seed.
pub fn derive_kek(
    password: &str,
    salt: &[u8],
    iterations: u32,
    key_len: usize,
) -> Result<VolumeKey, CryptoError> {
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| CryptoError::KeyDerivationFailed("iteration count is zero".into()))?;
    let mut material = Zeroizing::new(vec![0u8; key_len + IV_LEN]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA1,
        iterations,
        salt,
        password.as_bytes(),
        &mut material,
    );
    VolumeKey::from_material(&material, key_len)
}

/// Wrap `key` under `kek`.
pub fn wrap_key(kek: &VolumeKey, key: &VolumeKey) -> Vec<u8> {
    let material = key.material();
    let checksum = kek.mac_32(&material, None);

    let mut out = Vec::with_capacity(KEY_CHECKSUM_BYTES + material.len());
    out.extend_from_slice(&checksum.to_be_bytes());
    out.extend_from_slice(&material);
    kek.stream_encode(&mut out[KEY_CHECKSUM_BYTES..], u64::from(checksum));
    out
}

/// Unwrap a key of `key_len` bytes, verifying its checksum.
pub fn unwrap_key(kek: &VolumeKey, wrapped: &[u8], key_len: usize) -> Result<VolumeKey, UnwrapError> {
    let expected = wrapped_key_len(key_len);
    if wrapped.len() != expected {
        return Err(UnwrapError::InvalidLength {
            expected,
            actual: wrapped.len(),
        });
    }

    let (checksum_bytes, encrypted) = wrapped.split_at(KEY_CHECKSUM_BYTES);
    let mut stored = [0u8; KEY_CHECKSUM_BYTES];
    stored.copy_from_slice(checksum_bytes);
    let checksum = u32::from_be_bytes(stored);

    let mut material = Zeroizing::new(encrypted.to_vec());
    kek.stream_decode(&mut material, u64::from(checksum));

    let computed = kek.mac_32(&material, None).to_be_bytes();
    if !bool::from(computed.ct_eq(&stored)) {
        return Err(UnwrapError::InvalidIntegrityCheck);
    }

    VolumeKey::from_material(&material, key_len).map_err(|_| UnwrapError::InvalidLength {
        expected,
        actual: wrapped.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn fixed_kek() -> VolumeKey {
        let key: Vec<u8> = (1..25).collect();
        let iv: Vec<u8> = (50..66).collect();
        VolumeKey::new(&key, &iv).unwrap()
    }

    fn fixed_volume_key() -> VolumeKey {
        let key: Vec<u8> = (0..24).collect();
        let iv: Vec<u8> = (100..116).collect();
        VolumeKey::new(&key, &iv).unwrap()
    }

    #[test]
    fn test_wrap_known_answer() {
        let wrapped = wrap_key(&fixed_kek(), &fixed_volume_key());
        assert_eq!(
            wrapped,
            hex!(
                "ff83f1432758c9ced507c11c61660d9d65f63e6f43bea6d548c7d6261d0a1f98"
                "bfcff3e35f2d8da38cbd9fb0"
            )
        );
    }

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let kek = VolumeKey::random(32).unwrap();
        let key = VolumeKey::random(32).unwrap();
        let wrapped = wrap_key(&kek, &key);
        assert_eq!(wrapped.len(), wrapped_key_len(32));

        let unwrapped = unwrap_key(&kek, &wrapped, 32).unwrap();
        assert_eq!(&unwrapped.material()[..], &key.material()[..]);
    }

    #[test]
    fn test_unwrap_with_wrong_kek_fails_integrity() {
        let key = fixed_volume_key();
        let wrapped = wrap_key(&fixed_kek(), &key);
        let other = VolumeKey::random(24).unwrap();
        assert_eq!(
            unwrap_key(&other, &wrapped, 24).unwrap_err(),
            UnwrapError::InvalidIntegrityCheck
        );
    }

    #[test]
    fn test_unwrap_rejects_wrong_length() {
        let wrapped = wrap_key(&fixed_kek(), &fixed_volume_key());
        assert!(matches!(
            unwrap_key(&fixed_kek(), &wrapped[..wrapped.len() - 1], 24),
            Err(UnwrapError::InvalidLength { expected: 44, actual: 43 })
        ));
    }

    #[test]
    fn test_tampered_blob_fails_integrity() {
        let mut wrapped = wrap_key(&fixed_kek(), &fixed_volume_key());
        wrapped[10] ^= 0x01;
        assert_eq!(
            unwrap_key(&fixed_kek(), &wrapped, 24).unwrap_err(),
            UnwrapError::InvalidIntegrityCheck
        );
    }

    #[test]
    fn test_derive_kek_is_deterministic() {
        let a = derive_kek("test", b"salt", 10, 24).unwrap();
        let b = derive_kek("test", b"salt", 10, 24).unwrap();
        let c = derive_kek("test2", b"salt", 10, 24).unwrap();
        assert_eq!(&a.material()[..], &b.material()[..]);
        assert_ne!(&a.material()[..], &c.material()[..]);
        assert!(derive_kek("test", b"salt", 0, 24).is_err());
    }
}
