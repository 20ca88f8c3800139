//! File content encryption: headers, block layout and per-block transforms.
//!
//! An encrypted file is an optional 8-byte header followed by raw blocks of
//! `block_size` bytes, the last of which may be shorter. Block `n` is
//! encrypted with seed `n ^ file_iv`; full blocks use the block transform and
//! a short final block uses the stream transform. When block MACs are enabled
//! every block starts with a MAC and optional random bytes, leaving
//! [`ContentLayout::data_block_size`] bytes of file data per block.

use std::fmt;
use std::io;
use std::sync::Arc;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{trace, warn};

use crate::crypto::{CryptoError, VolumeKey};

/// Size of the per-file IV header, in bytes.
pub const HEADER_SIZE: usize = 8;

/// Maximum number of MAC bytes per block.
pub const MAX_BLOCK_MAC_BYTES: usize = 8;

// ============================================================================
// Layout math
// ============================================================================

/// Volume-wide content layout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLayout {
    /// Raw (encrypted) block size in bytes.
    pub block_size: usize,
    /// MAC bytes at the start of every block (0 disables block MACs).
    pub mac_bytes: usize,
    /// Random bytes following the MAC in every block.
    pub rand_bytes: usize,
    /// Whether files carry a random per-file IV header.
    pub unique_iv: bool,
    /// Whether all-zero raw blocks read back as zeros.
    pub allow_holes: bool,
}

impl ContentLayout {
    /// Header bytes at the start of a non-empty file.
    pub fn header_size(&self) -> usize {
        if self.unique_iv { HEADER_SIZE } else { 0 }
    }

    /// Per-block bytes used by the MAC and random prefix.
    pub fn block_overhead(&self) -> usize {
        self.mac_bytes + self.rand_bytes
    }

    /// Plaintext bytes carried by one full block.
    pub fn data_block_size(&self) -> usize {
        self.block_size - self.block_overhead()
    }

    /// Index of the block holding plaintext offset `offset`.
    pub fn block_index(&self, offset: u64) -> u64 {
        offset / self.data_block_size() as u64
    }

    /// Raw file offset of block `index`.
    pub fn raw_block_offset(&self, index: u64) -> u64 {
        self.header_size() as u64 + index * self.block_size as u64
    }

    /// Plaintext size of a file whose raw size is `raw_size`.
    pub fn plaintext_size(&self, raw_size: u64) -> u64 {
        let body = raw_size.saturating_sub(self.header_size() as u64);
        let overhead = self.block_overhead() as u64;
        if overhead == 0 {
            return body;
        }
        let blocks = body.div_ceil(self.block_size as u64);
        body.saturating_sub(blocks * overhead)
    }

    /// Raw size of a file holding `plaintext_size` bytes.
    pub fn raw_size(&self, plaintext_size: u64) -> u64 {
        if plaintext_size == 0 {
            return 0;
        }
        let data_block = self.data_block_size() as u64;
        let full_blocks = plaintext_size / data_block;
        let remainder = plaintext_size % data_block;
        let tail = if remainder > 0 {
            remainder + self.block_overhead() as u64
        } else {
            0
        };
        self.header_size() as u64 + full_blocks * self.block_size as u64 + tail
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Context for content operations, providing debugging information.
#[derive(Debug, Clone, Default)]
pub struct ContentContext {
    /// Plaintext path of the file
    pub path: Option<String>,
    /// Block being processed
    pub block: Option<u64>,
    /// Operation being performed
    pub operation: Option<&'static str>,
}

impl ContentContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_block(mut self, block: u64) -> Self {
        self.block = Some(block);
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }
}

impl fmt::Display for ContentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(op) = self.operation {
            parts.push(op.to_string());
        }
        if let Some(ref path) = self.path {
            parts.push(format!("file '{path}'"));
        }
        if let Some(block) = self.block {
            parts.push(format!("block {block}"));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Errors that can occur while encrypting or decrypting file content.
#[derive(Error, Debug)]
pub enum ContentError {
    // =========================================================================
    // INTEGRITY VIOLATIONS - Potential adversarial tampering
    // =========================================================================
    /// A block's MAC did not match its contents.
    ///
    /// **[INTEGRITY VIOLATION]** The block was modified or belongs to another
    /// file or position.
    #[error("[INTEGRITY VIOLATION] Block MAC mismatch for {context}")]
    MacMismatch { context: ContentContext },

    /// The file header is truncated or decodes to an impossible IV.
    #[error("[INTEGRITY VIOLATION] Invalid file header for {context}: {reason}")]
    InvalidHeader {
        reason: String,
        context: ContentContext,
    },

    /// A raw block has an impossible size.
    #[error("Invalid block for {context}: {reason}")]
    InvalidBlock {
        reason: String,
        context: ContentContext,
    },

    // =========================================================================
    // CALLER ERRORS
    // =========================================================================
    /// Random access to an offset that is not on a block boundary.
    #[error("Seek to {offset} for {context} is not aligned to the {block_size}-byte block size")]
    UnalignedSeek {
        offset: u64,
        block_size: usize,
        context: ContentContext,
    },

    /// The writer was already finished, or an earlier backend write failed.
    #[error("Stream already closed for {context}")]
    Closed { context: ContentContext },

    // =========================================================================
    // BACKEND / PROGRAMMING ERRORS
    // =========================================================================
    /// IO error from the storage backend
    #[error("IO error during {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: ContentContext,
    },

    #[error("Cipher error for {context}: {source}")]
    Crypto {
        #[source]
        source: CryptoError,
        context: ContentContext,
    },
}

impl ContentError {
    /// Create an IO error with context
    pub fn io_with_context(source: io::Error, context: ContentContext) -> Self {
        ContentError::Io { source, context }
    }

    /// Whether stored data failed a structural or integrity check.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ContentError::MacMismatch { .. }
                | ContentError::InvalidHeader { .. }
                | ContentError::InvalidBlock { .. }
        )
    }
}

impl From<ContentError> for io::Error {
    fn from(err: ContentError) -> Self {
        let kind = match &err {
            ContentError::Io { source, .. } => source.kind(),
            ContentError::MacMismatch { .. }
            | ContentError::InvalidHeader { .. }
            | ContentError::InvalidBlock { .. } => io::ErrorKind::InvalidData,
            ContentError::UnalignedSeek { .. } => io::ErrorKind::InvalidInput,
            ContentError::Closed { .. } | ContentError::Crypto { .. } => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

// ============================================================================
// Content cipher
// ============================================================================

/// Encrypts and decrypts headers and blocks for one volume.
#[derive(Debug, Clone)]
pub struct ContentCipher {
    key: Arc<VolumeKey>,
    layout: ContentLayout,
}

impl ContentCipher {
    pub fn new(key: Arc<VolumeKey>, layout: ContentLayout) -> Self {
        Self { key, layout }
    }

    pub fn layout(&self) -> &ContentLayout {
        &self.layout
    }

    /// Generate a random non-zero per-file IV.
    pub fn random_file_iv() -> u64 {
        let mut rng = rand::rng();
        loop {
            let iv = rng.next_u64();
            if iv != 0 {
                return iv;
            }
        }
    }

    /// Encrypt a file IV into its on-disk header.
    pub fn encrypt_header(&self, file_iv: u64, external_iv: u64) -> [u8; HEADER_SIZE] {
        let mut header = file_iv.to_be_bytes();
        self.key.stream_encode(&mut header, external_iv);
        header
    }

    /// Recover the file IV from an on-disk header.
    pub fn decrypt_header(&self, raw: &[u8], external_iv: u64) -> Result<u64, ContentError> {
        if raw.len() != HEADER_SIZE {
            return Err(ContentError::InvalidHeader {
                reason: format!("expected {HEADER_SIZE} bytes, got {}", raw.len()),
                context: ContentContext::new(),
            });
        }
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(raw);
        self.key.stream_decode(&mut header, external_iv);
        let file_iv = u64::from_be_bytes(header);
        if file_iv == 0 {
            warn!("File header decoded to a zero IV");
            return Err(ContentError::InvalidHeader {
                reason: "file IV is zero".into(),
                context: ContentContext::new(),
            });
        }
        Ok(file_iv)
    }

    /// Encrypt one block of plaintext `data` at block `index`.
    ///
    /// `data` must be non-empty and at most one data block long.
    pub fn encrypt_block(&self, index: u64, file_iv: u64, data: &[u8]) -> Result<Vec<u8>, ContentError> {
        let context = || ContentContext::new().with_block(index).with_operation("encrypt_block");
        if data.is_empty() || data.len() > self.layout.data_block_size() {
            return Err(ContentError::InvalidBlock {
                reason: format!(
                    "data length {} outside 1..={}",
                    data.len(),
                    self.layout.data_block_size()
                ),
                context: context(),
            });
        }

        let overhead = self.layout.block_overhead();
        let mut block = vec![0u8; overhead + data.len()];
        block[overhead..].copy_from_slice(data);
        let mac_bytes = self.layout.mac_bytes;
        if self.layout.rand_bytes > 0 {
            rand::rng().fill_bytes(&mut block[mac_bytes..overhead]);
        }
        if mac_bytes > 0 {
            let mac = self.key.mac_64(&block[mac_bytes..], None);
            block[..mac_bytes].copy_from_slice(&mac.to_le_bytes()[..mac_bytes]);
        }

        let seed = index ^ file_iv;
        if block.len() == self.layout.block_size {
            self.key
                .block_encode(&mut block, seed)
                .map_err(|source| ContentError::Crypto {
                    source,
                    context: context(),
                })?;
        } else {
            self.key.stream_encode(&mut block, seed);
        }
        trace!(block = index, len = block.len(), "Encrypted block");
        Ok(block)
    }

    /// Decrypt the raw block at `index`, verifying its MAC when enabled.
    pub fn decrypt_block(&self, index: u64, file_iv: u64, raw: &[u8]) -> Result<Vec<u8>, ContentError> {
        let context = || ContentContext::new().with_block(index).with_operation("decrypt_block");
        if raw.len() > self.layout.block_size {
            return Err(ContentError::InvalidBlock {
                reason: format!(
                    "raw length {} exceeds block size {}",
                    raw.len(),
                    self.layout.block_size
                ),
                context: context(),
            });
        }
        if raw.is_empty() {
            return Ok(Vec::new());
        }

        let mut block = raw.to_vec();
        let seed = index ^ file_iv;
        if block.len() == self.layout.block_size {
            if self.layout.allow_holes && is_all_zero(&block) {
                trace!(block = index, "Hole block");
            } else {
                self.key
                    .block_decode(&mut block, seed)
                    .map_err(|source| ContentError::Crypto {
                        source,
                        context: context(),
                    })?;
            }
        } else {
            self.key.stream_decode(&mut block, seed);
        }

        let overhead = self.layout.block_overhead();
        if overhead == 0 {
            return Ok(block);
        }
        if block.len() <= overhead {
            return Ok(Vec::new());
        }

        let mac_bytes = self.layout.mac_bytes;
        if mac_bytes > 0 && !(self.layout.allow_holes && is_all_zero(&block)) {
            let mac = self.key.mac_64(&block[mac_bytes..], None).to_le_bytes();
            if !bool::from(mac[..mac_bytes].ct_eq(&block[..mac_bytes])) {
                warn!(block = index, "Block MAC verification failed");
                return Err(ContentError::MacMismatch { context: context() });
            }
        }
        Ok(block.split_off(overhead))
    }
}

fn is_all_zero(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}
