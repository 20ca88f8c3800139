//! File name encryption.
//!
//! Each plaintext path segment is encrypted on its own, using the volume key
//! and a [`DirectoryIv`] describing where in the tree the segment lives. The
//! ciphertext is prefixed with a 16-bit keyed checksum of the plaintext and
//! rendered in a 64-character alphabet that is safe on every filesystem.
//!
//! With chained name IVs the checksum of every ancestor segment is folded into
//! the IV, so the same plaintext name encodes differently in different
//! directories.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::crypto::VolumeKey;
use crate::crypto::cipher::{CIPHER_BLOCK_SIZE, fold_to_16, fold_to_32};

/// Longest encoded segment the codec will produce.
pub const MAX_ENCODED_NAME_LEN: usize = 255;

/// Length of the checksum prefix on every encoded name.
const NAME_CHECKSUM_BYTES: usize = 2;

/// Filesystem-safe alphabet, indexed by 6-bit value.
const NAME_ALPHABET: &[u8; 64] =
    b",-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Name encryption algorithm of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NameAlgorithm {
    /// `nameio/block`: names padded to the AES block size and CBC-encrypted.
    /// Hides name lengths to within 16 bytes.
    Block,
    /// `nameio/stream`: names stream-encrypted without padding.
    Stream,
    /// `nameio/null`: names stored in plaintext.
    Null,
}

impl NameAlgorithm {
    pub const fn id(self) -> &'static str {
        match self {
            NameAlgorithm::Block => "nameio/block",
            NameAlgorithm::Stream => "nameio/stream",
            NameAlgorithm::Null => "nameio/null",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "nameio/block" => Some(NameAlgorithm::Block),
            "nameio/stream" => Some(NameAlgorithm::Stream),
            "nameio/null" => Some(NameAlgorithm::Null),
            _ => None,
        }
    }

    /// Interface version `(major, minor)` written to new volumes.
    pub const fn current_interface(self) -> (u32, u32) {
        match self {
            NameAlgorithm::Block => (3, 0),
            NameAlgorithm::Stream => (2, 1),
            NameAlgorithm::Null => (1, 0),
        }
    }

    /// Range of interface majors this implementation can read.
    pub const fn supports_interface(self, major: u32) -> bool {
        match self {
            NameAlgorithm::Block => major >= 1 && major <= 4,
            NameAlgorithm::Stream => major >= 1 && major <= 2,
            NameAlgorithm::Null => major == 1,
        }
    }
}

impl fmt::Display for NameAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Running name IV for one directory.
///
/// Obtain the root value from [`NameCodec::root_iv`]; every successful
/// [`NameCodec::encode`] or [`NameCodec::decode`] returns the value for the
/// directory (or file) it names. Values are plain data and can be passed to
/// independent traversals freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryIv {
    /// Names do not depend on their location.
    Unchained,
    /// Accumulated checksum of the path from the volume root.
    Chained(u64),
}

impl DirectoryIv {
    pub const fn root(chained: bool) -> Self {
        if chained {
            DirectoryIv::Chained(0)
        } else {
            DirectoryIv::Unchained
        }
    }

    /// Seed for a file's header under external IV chaining.
    pub const fn external_iv(self) -> u64 {
        match self {
            DirectoryIv::Chained(iv) => iv,
            DirectoryIv::Unchained => 0,
        }
    }

    const fn chain(self) -> Option<u64> {
        match self {
            DirectoryIv::Chained(iv) => Some(iv),
            DirectoryIv::Unchained => None,
        }
    }

    const fn advance(self, mac: u64) -> Self {
        match self {
            DirectoryIv::Chained(_) => DirectoryIv::Chained(mac),
            DirectoryIv::Unchained => DirectoryIv::Unchained,
        }
    }
}

/// Context for name operations, providing debugging information.
#[derive(Debug, Clone, Default)]
pub struct NameContext {
    /// The encoded name (if available)
    pub encoded_name: Option<String>,
    /// The plaintext name (if available, e.g. during encoding)
    pub plain_name: Option<String>,
    /// Plaintext path of the parent directory
    pub parent: Option<String>,
}

impl NameContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoded_name(mut self, name: impl Into<String>) -> Self {
        self.encoded_name = Some(name.into());
        self
    }

    pub fn with_plain_name(mut self, name: impl Into<String>) -> Self {
        self.plain_name = Some(name.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

impl fmt::Display for NameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(ref name) = self.plain_name {
            parts.push(format!("name '{name}'"));
        } else if let Some(ref enc) = self.encoded_name {
            let display = if enc.chars().count() > 40 {
                format!("{}...", enc.chars().take(37).collect::<String>())
            } else {
                enc.clone()
            };
            parts.push(format!("encoded name '{display}'"));
        }

        if let Some(ref parent) = self.parent {
            parts.push(format!("in directory {parent}"));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// Errors that can occur during name encoding/decoding.
///
/// `NameError` is `Clone` so that a directory listing can keep the outcome of
/// each lazily decoded entry.
#[derive(Error, Debug, Clone)]
pub enum NameError {
    // =========================================================================
    // INTEGRITY VIOLATIONS - Potential adversarial tampering
    // =========================================================================
    /// The checksum prefix does not match the decrypted name.
    ///
    /// **[INTEGRITY VIOLATION]** The encoded name was modified, belongs to a
    /// different directory (chained mode) or was produced with another key.
    #[error("[INTEGRITY VIOLATION] Checksum mismatch for {context}: expected {expected:#06x}, computed {computed:#06x}")]
    ChecksumMismatch {
        expected: u16,
        computed: u16,
        context: NameContext,
    },

    /// The trailing padding bytes of a block-encoded name are invalid.
    ///
    /// **[INTEGRITY VIOLATION]**
    #[error("[INTEGRITY VIOLATION] Invalid padding ({padding}) for {context}")]
    InvalidPadding { padding: u8, context: NameContext },

    // =========================================================================
    // INPUT ERRORS - Malformed or corrupted encoded names
    // =========================================================================
    /// A character outside the name alphabet.
    #[error("Invalid character {ch:?} in {context}")]
    InvalidEncoding { ch: char, context: NameContext },

    /// Too few bytes to hold a checksum and ciphertext.
    #[error("Encoded name too short ({len} bytes) for {context}")]
    TooShort { len: usize, context: NameContext },

    /// The decrypted bytes are not valid UTF-8.
    #[error("Invalid UTF-8 after decryption for {context}: {reason}")]
    Utf8Decode { reason: String, context: NameContext },

    // =========================================================================
    // INVALID ARGUMENTS - Rejected plaintext names
    // =========================================================================
    /// Empty path segment.
    #[error("Empty name is not allowed")]
    Empty,

    /// `.`, `..`, or a segment containing `/` or NUL.
    #[error("Invalid name {name:?}")]
    InvalidName { name: String },

    /// The encoded form would exceed [`MAX_ENCODED_NAME_LEN`].
    #[error("Encoded name for {context} is {len} bytes, limit is 255")]
    NameTooLong { len: usize, context: NameContext },

    // =========================================================================
    // PROGRAMMING ERRORS
    // =========================================================================
    /// The block cipher rejected the padded name.
    #[error("Cipher failed for {context}: {reason}")]
    Cipher { reason: String, context: NameContext },
}

impl NameError {
    /// Whether this error means stored data is corrupt or tampered, as opposed
    /// to the caller passing an unusable plaintext name.
    pub fn is_corruption(&self) -> bool {
        !matches!(
            self,
            NameError::Empty
                | NameError::InvalidName { .. }
                | NameError::NameTooLong { .. }
                | NameError::Cipher { .. }
        )
    }
}

/// Encodes and decodes path segments for one volume.
#[derive(Debug, Clone)]
pub struct NameCodec {
    key: Arc<VolumeKey>,
    algorithm: NameAlgorithm,
    interface: u32,
    chained: bool,
}

impl NameCodec {
    /// `interface` is the major interface version from the volume config.
    pub fn new(key: Arc<VolumeKey>, algorithm: NameAlgorithm, interface: u32, chained: bool) -> Self {
        Self {
            key,
            algorithm,
            interface,
            chained,
        }
    }

    pub fn algorithm(&self) -> NameAlgorithm {
        self.algorithm
    }

    pub fn is_chained(&self) -> bool {
        self.chained
    }

    /// IV context for entries directly under the volume root.
    pub fn root_iv(&self) -> DirectoryIv {
        DirectoryIv::root(self.chained)
    }

    /// Encode one plaintext segment located in the directory described by
    /// `dir_iv`. Returns the encoded segment and the IV context of the named
    /// entry.
    pub fn encode(&self, plain: &str, dir_iv: DirectoryIv) -> Result<(String, DirectoryIv), NameError> {
        validate_plain_name(plain)?;

        let (encoded, child) = match self.algorithm {
            NameAlgorithm::Null => (plain.to_owned(), dir_iv),
            NameAlgorithm::Block => self.encode_block(plain, dir_iv)?,
            NameAlgorithm::Stream => self.encode_stream(plain.as_bytes(), dir_iv),
        };

        if encoded.len() > MAX_ENCODED_NAME_LEN {
            return Err(NameError::NameTooLong {
                len: encoded.len(),
                context: NameContext::new().with_plain_name(plain),
            });
        }
        trace!(len = encoded.len(), "Encoded name");
        Ok((encoded, child))
    }

    /// Decode one encoded segment located in the directory described by
    /// `dir_iv`, verifying its checksum.
    pub fn decode(&self, encoded: &str, dir_iv: DirectoryIv) -> Result<(String, DirectoryIv), NameError> {
        let context = || NameContext::new().with_encoded_name(encoded);
        if encoded.is_empty() {
            return Err(NameError::TooShort {
                len: 0,
                context: context(),
            });
        }

        let (plain, child) = match self.algorithm {
            NameAlgorithm::Null => (encoded.as_bytes().to_vec(), dir_iv),
            NameAlgorithm::Block => self.decode_block(encoded, dir_iv)?,
            NameAlgorithm::Stream => self.decode_stream(encoded, dir_iv)?,
        };

        let plain = String::from_utf8(plain).map_err(|e| NameError::Utf8Decode {
            reason: e.to_string(),
            context: context(),
        })?;
        Ok((plain, child))
    }

    /// Encode a sequence of segments starting at the root. Returns the encoded
    /// segments and the IV context of the final entry.
    pub fn encode_segments<'a, I>(&self, segments: I) -> Result<(Vec<String>, DirectoryIv), NameError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut iv = self.root_iv();
        let mut encoded = Vec::new();
        for segment in segments {
            let (name, child) = self.encode(segment, iv)?;
            encoded.push(name);
            iv = child;
        }
        Ok((encoded, iv))
    }

    /// IV seed mixed into the cipher IV. Interfaces before chaining existed
    /// ignore the chain even when it is tracked.
    fn tweak(&self, dir_iv: DirectoryIv) -> u64 {
        let chaining_interface = match self.algorithm {
            NameAlgorithm::Block => 3,
            NameAlgorithm::Stream => 2,
            NameAlgorithm::Null => u32::MAX,
        };
        if self.interface >= chaining_interface {
            dir_iv.external_iv()
        } else {
            0
        }
    }

    fn checksum(&self, data: &[u8], dir_iv: DirectoryIv) -> (u16, DirectoryIv) {
        let mac = self.key.mac_64(data, dir_iv.chain());
        (fold_to_16(fold_to_32(mac)), dir_iv.advance(mac))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_block(&self, name: &str, dir_iv: DirectoryIv) -> Result<(String, DirectoryIv), NameError> {
        let plain = name.as_bytes();
        let padding = CIPHER_BLOCK_SIZE - plain.len() % CIPHER_BLOCK_SIZE;
        let mut buf = Vec::with_capacity(NAME_CHECKSUM_BYTES + plain.len() + padding);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(plain);
        // padding is 1..=16
        buf.resize(buf.len() + padding, padding as u8);

        let tweak = self.tweak(dir_iv);
        let (mac, child) = self.checksum(&buf[NAME_CHECKSUM_BYTES..], dir_iv);
        buf[..NAME_CHECKSUM_BYTES].copy_from_slice(&mac.to_be_bytes());

        self.key
            .block_encode(&mut buf[NAME_CHECKSUM_BYTES..], u64::from(mac) ^ tweak)
            .map_err(|e| NameError::Cipher {
                reason: e.to_string(),
                context: NameContext::new().with_plain_name(name),
            })?;
        Ok((bytes_to_name(&buf), child))
    }

    fn decode_block(&self, encoded: &str, dir_iv: DirectoryIv) -> Result<(Vec<u8>, DirectoryIv), NameError> {
        let context = || NameContext::new().with_encoded_name(encoded);
        let mut buf = name_to_bytes(encoded)?;
        if buf.len() < NAME_CHECKSUM_BYTES + CIPHER_BLOCK_SIZE
            || (buf.len() - NAME_CHECKSUM_BYTES) % CIPHER_BLOCK_SIZE != 0
        {
            return Err(NameError::TooShort {
                len: buf.len(),
                context: context(),
            });
        }

        let expected = u16::from_be_bytes([buf[0], buf[1]]);
        let tweak = self.tweak(dir_iv);
        let body = &mut buf[NAME_CHECKSUM_BYTES..];
        self.key
            .block_decode(body, u64::from(expected) ^ tweak)
            .map_err(|_| NameError::TooShort {
                len: body.len(),
                context: context(),
            })?;

        let padding = body[body.len() - 1];
        if padding == 0 || usize::from(padding) > CIPHER_BLOCK_SIZE {
            return Err(NameError::InvalidPadding {
                padding,
                context: context(),
            });
        }

        let (computed, child) = self.checksum(body, dir_iv);
        if computed != expected {
            return Err(NameError::ChecksumMismatch {
                expected,
                computed,
                context: context(),
            });
        }

        let plain_len = body.len() - usize::from(padding);
        Ok((body[..plain_len].to_vec(), child))
    }

    fn encode_stream(&self, plain: &[u8], dir_iv: DirectoryIv) -> (String, DirectoryIv) {
        let tweak = self.tweak(dir_iv);
        let (mac, child) = self.checksum(plain, dir_iv);

        let mut buf = Vec::with_capacity(NAME_CHECKSUM_BYTES + plain.len());
        buf.extend_from_slice(&mac.to_be_bytes());
        buf.extend_from_slice(plain);
        self.key
            .stream_encode(&mut buf[NAME_CHECKSUM_BYTES..], u64::from(mac) ^ tweak);
        (bytes_to_name(&buf), child)
    }

    fn decode_stream(&self, encoded: &str, dir_iv: DirectoryIv) -> Result<(Vec<u8>, DirectoryIv), NameError> {
        let context = || NameContext::new().with_encoded_name(encoded);
        let mut buf = name_to_bytes(encoded)?;
        if buf.len() <= NAME_CHECKSUM_BYTES {
            return Err(NameError::TooShort {
                len: buf.len(),
                context: context(),
            });
        }

        let expected = u16::from_be_bytes([buf[0], buf[1]]);
        let tweak = self.tweak(dir_iv);
        let body = &mut buf[NAME_CHECKSUM_BYTES..];
        self.key.stream_decode(body, u64::from(expected) ^ tweak);

        let (computed, child) = self.checksum(body, dir_iv);
        if computed != expected {
            return Err(NameError::ChecksumMismatch {
                expected,
                computed,
                context: context(),
            });
        }
        Ok((body.to_vec(), child))
    }
}

fn validate_plain_name(plain: &str) -> Result<(), NameError> {
    if plain.is_empty() {
        return Err(NameError::Empty);
    }
    if plain == "." || plain == ".." || plain.contains(['/', '\0']) {
        return Err(NameError::InvalidName {
            name: plain.to_owned(),
        });
    }
    Ok(())
}

/// Repack `src` from `src_bits`-wide digits into `dst_bits`-wide digits,
/// least significant bits first. A trailing partial digit is kept only when
/// `emit_partial` is set.
#[allow(clippy::cast_possible_truncation)]
fn change_base(src: &[u8], src_bits: u32, dst_bits: u32, emit_partial: bool) -> Vec<u8> {
    let mask = (1u32 << dst_bits) - 1;
    let mut out = Vec::with_capacity((src.len() * src_bits as usize).div_ceil(dst_bits as usize));
    let mut work = 0u32;
    let mut bits = 0u32;
    for &digit in src {
        work |= u32::from(digit) << bits;
        bits += src_bits;
        while bits >= dst_bits {
            out.push((work & mask) as u8);
            work >>= dst_bits;
            bits -= dst_bits;
        }
    }
    if emit_partial && bits > 0 {
        out.push((work & mask) as u8);
    }
    out
}

/// Render raw bytes as an encoded name.
fn bytes_to_name(bytes: &[u8]) -> String {
    change_base(bytes, 8, 6, true)
        .into_iter()
        .map(|digit| char::from(NAME_ALPHABET[usize::from(digit)]))
        .collect()
}

/// Parse an encoded name back into raw bytes.
fn name_to_bytes(name: &str) -> Result<Vec<u8>, NameError> {
    let digits = name
        .chars()
        .map(|ch| {
            alphabet_index(ch).ok_or_else(|| NameError::InvalidEncoding {
                ch,
                context: NameContext::new().with_encoded_name(name),
            })
        })
        .collect::<Result<Vec<u8>, _>>()?;
    Ok(change_base(&digits, 6, 8, false))
}

fn alphabet_index(ch: char) -> Option<u8> {
    let value = match ch {
        ',' => 0,
        '-' => 1,
        '0'..='9' => ch as u32 - '0' as u32 + 2,
        'A'..='Z' => ch as u32 - 'A' as u32 + 12,
        'a'..='z' => ch as u32 - 'a' as u32 + 38,
        _ => return None,
    };
    u8::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_key() -> Arc<VolumeKey> {
        let key: Vec<u8> = (0..24).collect();
        let iv: Vec<u8> = (100..116).collect();
        Arc::new(VolumeKey::new(&key, &iv).unwrap())
    }

    fn block_codec(chained: bool) -> NameCodec {
        NameCodec::new(fixed_key(), NameAlgorithm::Block, 3, chained)
    }

    #[test]
    fn test_alphabet_matches_index() {
        for (i, &ch) in NAME_ALPHABET.iter().enumerate() {
            assert_eq!(alphabet_index(char::from(ch)), Some(i as u8));
        }
        assert_eq!(alphabet_index('/'), None);
        assert_eq!(alphabet_index('+'), None);
    }

    #[test]
    fn test_change_base_single_byte() {
        assert_eq!(bytes_to_name(&[0xFF]), "z1");
        assert_eq!(name_to_bytes("z1").unwrap(), vec![0xFF]);
    }

    #[test]
    fn test_change_base_lengths() {
        for n in 0..40usize {
            let bytes: Vec<u8> = (0..n).map(|i| (i * 37 + 11) as u8).collect();
            let name = bytes_to_name(&bytes);
            assert_eq!(name.len(), (n * 8 + 5) / 6);
            assert_eq!(name_to_bytes(&name).unwrap(), bytes);
        }
    }

    #[test]
    fn test_block_known_answers() {
        let codec = block_codec(true);
        let (name, iv) = codec.encode("test.txt", codec.root_iv()).unwrap();
        assert_eq!(name, "YqJNftroX3icLdR6yQEp5IU1");
        assert_eq!(iv, DirectoryIv::Chained(0xb5519fcec3c74d05));

        let unchained = block_codec(false);
        let (name, iv) = unchained.encode("test.txt", unchained.root_iv()).unwrap();
        assert_eq!(name, "iffBSHTf3oRFb-P,DRydy0NW");
        assert_eq!(iv, DirectoryIv::Unchained);
    }

    #[test]
    fn test_stream_known_answer() {
        let codec = NameCodec::new(fixed_key(), NameAlgorithm::Stream, 2, true);
        let (name, iv) = codec.encode("test.txt", codec.root_iv()).unwrap();
        assert_eq!(name, "Q7Bdd8Ss9bOS21");
        assert_eq!(iv, DirectoryIv::Chained(0x3517cf3ff9dd5f27));
        assert_eq!(codec.decode(&name, codec.root_iv()).unwrap().0, "test.txt");
    }

    #[test]
    fn test_chained_path_known_answer() {
        let codec = block_codec(true);
        let (encoded, _) = codec.encode_segments(["Dir1", "file.txt"]).unwrap();
        assert_eq!(encoded, vec!["HkgTbsEeGlzpLQXlKLaFxlr6", "0ZSYO4xzpfMICU9ur47tz21X"]);
    }

    #[test]
    fn test_decode_returns_same_child_iv_as_encode() {
        let codec = block_codec(true);
        let parent = DirectoryIv::Chained(99);
        let (name, enc_iv) = codec.encode("docs", parent).unwrap();
        let (plain, dec_iv) = codec.decode(&name, parent).unwrap();
        assert_eq!(plain, "docs");
        assert_eq!(enc_iv, dec_iv);
    }

    #[test]
    fn test_block_padding_boundaries() {
        let codec = block_codec(true);
        for len in [1usize, 15, 16, 17, 31, 32] {
            let plain = "n".repeat(len);
            let (name, _) = codec.encode(&plain, codec.root_iv()).unwrap();
            let body = len + (16 - len % 16);
            assert_eq!(name.len(), ((body + 2) * 8 + 5) / 6, "length {len}");
            assert_eq!(codec.decode(&name, codec.root_iv()).unwrap().0, plain);
        }
    }

    #[test]
    fn test_block_names_are_encrypted() {
        let codec = block_codec(true);
        let plain = "sixteen-bytes-ok";
        let (name, _) = codec.encode(plain, codec.root_iv()).unwrap();
        let raw = name_to_bytes(&name).unwrap();
        assert_eq!(raw.len(), NAME_CHECKSUM_BYTES + 32);
        assert_ne!(&raw[NAME_CHECKSUM_BYTES..NAME_CHECKSUM_BYTES + 16], plain.as_bytes());

        let err = NameError::Cipher {
            reason: "bad length".into(),
            context: NameContext::new().with_plain_name(plain),
        };
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_wrong_directory_fails_checksum() {
        let codec = block_codec(true);
        let (name, _) = codec.encode("a.txt", DirectoryIv::Chained(1)).unwrap();
        let err = codec.decode(&name, DirectoryIv::Chained(2)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_invalid_plain_names() {
        let codec = block_codec(false);
        let root = codec.root_iv();
        assert!(matches!(codec.encode("", root), Err(NameError::Empty)));
        assert!(matches!(codec.encode(".", root), Err(NameError::InvalidName { .. })));
        assert!(matches!(codec.encode("..", root), Err(NameError::InvalidName { .. })));
        assert!(matches!(codec.encode("a/b", root), Err(NameError::InvalidName { .. })));
        assert!(!NameError::Empty.is_corruption());
    }

    #[test]
    fn test_name_too_long_is_rejected_before_use() {
        let codec = block_codec(false);
        // 176 plaintext bytes pad to 192, giving 194 raw bytes and 259 characters.
        let err = codec.encode(&"x".repeat(176), codec.root_iv()).unwrap_err();
        assert!(matches!(err, NameError::NameTooLong { len: 259, .. }));
        assert!(codec.encode(&"x".repeat(175), codec.root_iv()).is_ok());
    }

    #[test]
    fn test_invalid_characters_rejected() {
        let codec = block_codec(false);
        let err = codec.decode("abc+def", codec.root_iv()).unwrap_err();
        assert!(matches!(err, NameError::InvalidEncoding { ch: '+', .. }));
    }

    #[test]
    fn test_short_names_rejected() {
        let codec = block_codec(false);
        assert!(matches!(
            codec.decode("abcd", codec.root_iv()),
            Err(NameError::TooShort { .. })
        ));
        assert!(matches!(codec.decode("", codec.root_iv()), Err(NameError::TooShort { .. })));
    }

    #[test]
    fn test_null_algorithm_passes_names_through() {
        let codec = NameCodec::new(fixed_key(), NameAlgorithm::Null, 1, false);
        let (name, _) = codec.encode("plain.txt", codec.root_iv()).unwrap();
        assert_eq!(name, "plain.txt");
        assert_eq!(codec.decode("plain.txt", codec.root_iv()).unwrap().0, "plain.txt");
    }

    #[test]
    fn test_algorithm_ids_round_trip() {
        for alg in [NameAlgorithm::Block, NameAlgorithm::Stream, NameAlgorithm::Null] {
            assert_eq!(NameAlgorithm::from_id(alg.id()), Some(alg));
        }
        assert_eq!(NameAlgorithm::from_id("nameio/block32"), None);
    }

    #[test]
    fn test_context_display() {
        let ctx = NameContext::new()
            .with_encoded_name("x".repeat(50))
            .with_parent("/docs");
        let shown = ctx.to_string();
        assert!(shown.contains("..."));
        assert!(shown.contains("in directory /docs"));
        assert_eq!(NameContext::new().to_string(), "(no context)");
    }
}
