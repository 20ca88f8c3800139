//! AES transforms, keyed checksums and IV derivation.
//!
//! Everything on disk is produced by two transforms keyed by a [`VolumeKey`]
//! and a 64-bit seed:
//!
//! - the **block** transform, plain AES-CBC over whole 16-byte blocks, used for
//!   full content blocks and block-algorithm file names;
//! - the **stream** transform, used for everything of arbitrary length (partial
//!   content blocks, stream-algorithm names, file headers, the wrapped key).
//!   It runs AES-CFB twice with byte shuffling and 64-byte reversal in between
//!   so that every output byte depends on every input byte.
//!
//! The per-operation IV is derived from the key's IV seed and the 64-bit seed
//! through HMAC-SHA1, and the same HMAC key provides the folded 64/32/16-bit
//! checksums used for name IVs, the key checksum and block MACs.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{AsyncStreamCipher, BlockDecryptMut, BlockEncryptMut, InnerIvInit};
use ring::hmac;

use super::CryptoError;
use super::keys::{AesKey, VolumeKey};

/// AES block size in bytes.
pub const CIPHER_BLOCK_SIZE: usize = 16;

/// Chunk length used when reversing bytes inside the stream transform.
const FLIP_CHUNK: usize = 64;

macro_rules! with_aes {
    ($aes:expr, |$cipher:ident: $ty:ident| $body:expr) => {
        match $aes {
            AesKey::Aes128($cipher) => {
                type $ty = aes::Aes128;
                $body
            }
            AesKey::Aes192($cipher) => {
                type $ty = aes::Aes192;
                $body
            }
            AesKey::Aes256($cipher) => {
                type $ty = aes::Aes256;
                $body
            }
        }
    };
}

/// Fold a 64-bit checksum down to 32 bits.
#[allow(clippy::cast_possible_truncation)]
pub fn fold_to_32(mac: u64) -> u32 {
    ((mac >> 32) ^ mac) as u32
}

/// Fold a 32-bit checksum down to 16 bits.
#[allow(clippy::cast_possible_truncation)]
pub fn fold_to_16(mac: u32) -> u16 {
    ((mac >> 16) ^ mac) as u16
}

impl VolumeKey {
    /// Keyed 64-bit checksum of `data`.
    ///
    /// When `chained_iv` is given its little-endian bytes are appended to the
    /// HMAC input. Callers that chain names feed the returned value back in as
    /// the next `chained_iv`.
    pub fn mac_64(&self, data: &[u8], chained_iv: Option<u64>) -> u64 {
        let mut ctx = hmac::Context::with_key(self.mac_key());
        ctx.update(data);
        if let Some(iv) = chained_iv {
            ctx.update(&iv.to_le_bytes());
        }
        let tag = ctx.sign();
        let digest = tag.as_ref();

        // The final digest byte is not folded in.
        let mut folded = [0u8; 8];
        for (i, byte) in digest[..digest.len() - 1].iter().enumerate() {
            folded[i % 8] ^= byte;
        }
        u64::from_be_bytes(folded)
    }

    pub fn mac_32(&self, data: &[u8], chained_iv: Option<u64>) -> u32 {
        fold_to_32(self.mac_64(data, chained_iv))
    }

    pub fn mac_16(&self, data: &[u8], chained_iv: Option<u64>) -> u16 {
        fold_to_16(self.mac_32(data, chained_iv))
    }

    /// Derive the AES IV for `seed`.
    pub(crate) fn derive_iv(&self, seed: u64) -> [u8; CIPHER_BLOCK_SIZE] {
        let mut ctx = hmac::Context::with_key(self.mac_key());
        ctx.update(self.iv_seed());
        ctx.update(&seed.to_le_bytes());
        let tag = ctx.sign();
        let mut iv = [0u8; CIPHER_BLOCK_SIZE];
        iv.copy_from_slice(&tag.as_ref()[..CIPHER_BLOCK_SIZE]);
        iv
    }

    /// Encrypt `buf` in place with the stream transform. Any length is accepted.
    pub fn stream_encode(&self, buf: &mut [u8], seed: u64) {
        if buf.is_empty() {
            return;
        }
        shuffle_bytes(buf);
        self.cfb_encrypt(buf, seed);
        flip_bytes(buf);
        shuffle_bytes(buf);
        self.cfb_encrypt(buf, seed.wrapping_add(1));
    }

    /// Inverse of [`stream_encode`](Self::stream_encode).
    pub fn stream_decode(&self, buf: &mut [u8], seed: u64) {
        if buf.is_empty() {
            return;
        }
        self.cfb_decrypt(buf, seed.wrapping_add(1));
        unshuffle_bytes(buf);
        flip_bytes(buf);
        self.cfb_decrypt(buf, seed);
        unshuffle_bytes(buf);
    }

    /// Encrypt whole AES blocks in place with CBC, no padding.
    pub fn block_encode(&self, buf: &mut [u8], seed: u64) -> Result<(), CryptoError> {
        check_aligned(buf)?;
        let iv = self.derive_iv(seed);
        let iv = GenericArray::from_slice(&iv);
        with_aes!(self.aes(), |cipher: C| {
            let mut enc = cbc::Encryptor::<C>::inner_iv_init(cipher.clone(), iv);
            for block in buf.chunks_exact_mut(CIPHER_BLOCK_SIZE) {
                enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
        });
        Ok(())
    }

    /// Inverse of [`block_encode`](Self::block_encode).
    pub fn block_decode(&self, buf: &mut [u8], seed: u64) -> Result<(), CryptoError> {
        check_aligned(buf)?;
        let iv = self.derive_iv(seed);
        let iv = GenericArray::from_slice(&iv);
        with_aes!(self.aes(), |cipher: C| {
            let mut dec = cbc::Decryptor::<C>::inner_iv_init(cipher.clone(), iv);
            for block in buf.chunks_exact_mut(CIPHER_BLOCK_SIZE) {
                dec.decrypt_block_mut(GenericArray::from_mut_slice(block));
            }
        });
        Ok(())
    }

    fn cfb_encrypt(&self, buf: &mut [u8], seed: u64) {
        let iv = self.derive_iv(seed);
        let iv = GenericArray::from_slice(&iv);
        with_aes!(self.aes(), |cipher: C| {
            cfb_mode::Encryptor::<C>::inner_iv_init(cipher.clone(), iv).encrypt(buf);
        });
    }

    fn cfb_decrypt(&self, buf: &mut [u8], seed: u64) {
        let iv = self.derive_iv(seed);
        let iv = GenericArray::from_slice(&iv);
        with_aes!(self.aes(), |cipher: C| {
            cfb_mode::Decryptor::<C>::inner_iv_init(cipher.clone(), iv).decrypt(buf);
        });
    }
}

fn check_aligned(buf: &[u8]) -> Result<(), CryptoError> {
    if buf.len() % CIPHER_BLOCK_SIZE == 0 {
        Ok(())
    } else {
        Err(CryptoError::UnalignedBlock {
            block: CIPHER_BLOCK_SIZE,
            actual: buf.len(),
        })
    }
}

fn shuffle_bytes(buf: &mut [u8]) {
    for i in 1..buf.len() {
        buf[i] ^= buf[i - 1];
    }
}

fn unshuffle_bytes(buf: &mut [u8]) {
    for i in (1..buf.len()).rev() {
        buf[i] ^= buf[i - 1];
    }
}

fn flip_bytes(buf: &mut [u8]) {
    for chunk in buf.chunks_mut(FLIP_CHUNK) {
        chunk.reverse();
    }
}
