//! Directory entries with lazily decoded names.
//!
//! Listing a directory never decodes names up front. Each [`FileEntry`]
//! decodes its own name the first time it is asked and keeps the outcome, so a
//! single corrupt entry surfaces as an error on that entry only.

use std::fmt;
use std::sync::OnceLock;
use std::time::SystemTime;

use tracing::warn;

use super::file::ContentLayout;
use super::name::{DirectoryIv, NameCodec, NameContext, NameError};
use crate::provider::{FileInfo, join_path};

/// One entry of a plaintext directory listing.
#[derive(Clone)]
pub struct FileEntry {
    codec: NameCodec,
    info: FileInfo,
    plain_parent: String,
    parent_iv: DirectoryIv,
    plaintext_size: u64,
    decoded: OnceLock<Result<(String, DirectoryIv), NameError>>,
}

impl FileEntry {
    pub(crate) fn new(
        codec: NameCodec,
        info: FileInfo,
        plain_parent: impl Into<String>,
        parent_iv: DirectoryIv,
        layout: &ContentLayout,
    ) -> Self {
        let plaintext_size = if info.is_directory {
            0
        } else {
            layout.plaintext_size(info.size)
        };
        Self {
            codec,
            info,
            plain_parent: plain_parent.into(),
            parent_iv,
            plaintext_size,
            decoded: OnceLock::new(),
        }
    }

    fn decoded(&self) -> &Result<(String, DirectoryIv), NameError> {
        self.decoded.get_or_init(|| {
            self.codec
                .decode(&self.info.name, self.parent_iv)
                .map_err(|e| {
                    warn!(encoded = %self.info.name, parent = %self.plain_parent, error = %e, "Undecodable entry");
                    attach_parent(e, &self.plain_parent)
                })
        })
    }

    /// Plaintext name, decoded on first access.
    pub fn name(&self) -> Result<&str, NameError> {
        match self.decoded() {
            Ok((name, _)) => Ok(name),
            Err(e) => Err(e.clone()),
        }
    }

    /// Full plaintext path of the entry.
    pub fn path(&self) -> Result<String, NameError> {
        Ok(join_path(&self.plain_parent, self.name()?))
    }

    /// Name IV context of this entry, used for its children.
    pub fn iv(&self) -> Result<DirectoryIv, NameError> {
        match self.decoded() {
            Ok((_, iv)) => Ok(*iv),
            Err(e) => Err(e.clone()),
        }
    }

    #[inline]
    pub fn encoded_name(&self) -> &str {
        &self.info.name
    }

    /// Backend path of the containing directory.
    #[inline]
    pub fn encoded_parent_path(&self) -> &str {
        &self.info.parent_path
    }

    /// Backend path of the entry.
    pub fn encoded_path(&self) -> String {
        self.info.path()
    }

    /// Plaintext path of the containing directory.
    #[inline]
    pub fn parent_path(&self) -> &str {
        &self.plain_parent
    }

    #[inline]
    pub fn is_directory(&self) -> bool {
        self.info.is_directory
    }

    /// Plaintext content size; 0 for directories.
    #[inline]
    pub fn size(&self) -> u64 {
        self.plaintext_size
    }

    /// Size of the encrypted backend file.
    #[inline]
    pub fn raw_size(&self) -> u64 {
        self.info.size
    }

    #[inline]
    pub fn modified(&self) -> SystemTime {
        self.info.modified
    }

    #[inline]
    pub fn can_read(&self) -> bool {
        self.info.can_read
    }

    #[inline]
    pub fn can_write(&self) -> bool {
        self.info.can_write
    }

    #[inline]
    pub fn can_execute(&self) -> bool {
        self.info.can_execute
    }

    /// Backend metadata, unmodified.
    pub fn backend_info(&self) -> &FileInfo {
        &self.info
    }
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("encoded_path", &self.encoded_path())
            .field("parent_path", &self.plain_parent)
            .field("is_directory", &self.info.is_directory)
            .field("size", &self.plaintext_size)
            .field("decoded", &self.decoded.get().map(Result::is_ok))
            .finish_non_exhaustive()
    }
}

fn attach_parent(err: NameError, parent: &str) -> NameError {
    let with = |context: NameContext| context.with_parent(parent);
    match err {
        NameError::ChecksumMismatch {
            expected,
            computed,
            context,
        } => NameError::ChecksumMismatch {
            expected,
            computed,
            context: with(context),
        },
        NameError::InvalidPadding { padding, context } => NameError::InvalidPadding {
            padding,
            context: with(context),
        },
        NameError::InvalidEncoding { ch, context } => NameError::InvalidEncoding {
            ch,
            context: with(context),
        },
        NameError::TooShort { len, context } => NameError::TooShort {
            len,
            context: with(context),
        },
        NameError::Utf8Decode { reason, context } => NameError::Utf8Decode {
            reason,
            context: with(context),
        },
        other => other,
    }
}
