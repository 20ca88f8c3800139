//! High-level volume operations on plaintext paths.
//!
//! [`Volume`] composes the config, the name codec and the content cipher over
//! a [`FileProvider`]. Every operation takes a plaintext path, encodes it
//! segment by segment from the root (threading the [`DirectoryIv`] down the
//! path) and delegates to the provider with the encoded path.
//!
//! # Key Methods
//!
//! - **Listing**: [`list_children`](Volume::list_children), [`walk`](Volume::walk)
//! - **Lookup**: [`file_info`](Volume::file_info), [`exists`](Volume::exists)
//! - **Content**: [`open_read`](Volume::open_read), [`open_write`](Volume::open_write),
//!   [`read_file`](Volume::read_file), [`write_file`](Volume::write_file)
//! - **Tree changes**: [`mkdir`](Volume::mkdir), [`delete`](Volume::delete),
//!   [`move_entry`](Volume::move_entry), [`copy`](Volume::copy)
//!
//! # Observability
//!
//! Operations are instrumented with `tracing` spans at `debug` level. Keys and
//! file contents are never recorded.

use std::error::Error as StdError;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

use super::config::{CONFIG_FILE_NAME, ConfigError, VolumeConfig, VolumeOptions};
use super::creator::{VolumeCreationError, VolumeCreator};
use super::password::{PasswordValidationError, ValidatedPassword, read_config, unlock_timed};
use super::path::VolumePath;
use crate::crypto::VolumeKey;
use crate::fs::directory::FileEntry;
use crate::fs::file::{ContentCipher, ContentContext, ContentError, HEADER_SIZE};
use crate::fs::name::{DirectoryIv, NameCodec, NameError};
use crate::fs::streaming::{ContentReader, ContentWriter};
use crate::provider::{FileProvider, ROOT_PATH, join_path};

// ============================================================================
// Errors
// ============================================================================

/// Context for volume operations, providing debugging information.
#[derive(Debug, Clone, Default)]
pub struct VolumeOpContext {
    /// Plaintext path being operated on
    pub path: Option<String>,
    /// Encoded backend path
    pub encoded_path: Option<String>,
    /// Operation being performed
    pub operation: Option<&'static str>,
}

impl VolumeOpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_encoded_path(mut self, path: impl Into<String>) -> Self {
        self.encoded_path = Some(path.into());
        self
    }

    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }
}

impl fmt::Display for VolumeOpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(op) = self.operation {
            parts.push(op.to_string());
        }
        if let Some(ref path) = self.path {
            parts.push(format!("path '{path}'"));
        }
        if let Some(ref enc) = self.encoded_path {
            let display = if enc.chars().count() > 48 {
                format!("{}...", enc.chars().take(45).collect::<String>())
            } else {
                enc.clone()
            };
            parts.push(format!("at {display}"));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Errors returned by [`Volume`] operations.
///
/// # Taxonomy
///
/// - `InvalidPassword`: the key checksum failed at unlock
/// - `InvalidConfig` / `UnsupportedFeature`: the config record is unusable
/// - `CorruptData`: a name, header, block or key failed an integrity or
///   structural check; never downgraded to an empty result
/// - `Backend`: an error from the [`FileProvider`], propagated verbatim
/// - `InvalidArgument`, `NotFound`, `AlreadyExists`, `NotADirectory`,
///   `NotAFile`: the caller asked for something impossible
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("Incorrect password")]
    InvalidPassword,

    #[error("Invalid volume config: {reason}")]
    InvalidConfig { reason: String },

    #[error("Unsupported volume feature: {feature}")]
    UnsupportedFeature { feature: String },

    /// **[INTEGRITY VIOLATION]** Stored data failed verification.
    #[error("[INTEGRITY VIOLATION] Corrupt data for {context}: {source}")]
    CorruptData {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
        context: VolumeOpContext,
    },

    #[error("Backend error for {context}: {source}")]
    Backend {
        #[source]
        source: io::Error,
        context: VolumeOpContext,
    },

    #[error("Invalid argument for {context}: {reason}")]
    InvalidArgument {
        reason: String,
        context: VolumeOpContext,
    },

    #[error("Path not found: '{path}'")]
    NotFound { path: String },

    #[error("Path already exists: '{path}'")]
    AlreadyExists { path: String },

    #[error("Expected directory but found file: '{path}'")]
    NotADirectory { path: String },

    #[error("Expected file but found directory: '{path}'")]
    NotAFile { path: String },
}

impl VolumeError {
    /// Whether stored data failed an integrity or structural check.
    pub fn is_corruption(&self) -> bool {
        matches!(self, VolumeError::CorruptData { .. })
    }

    /// Whether the caller passed an unusable argument.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            VolumeError::InvalidArgument { .. }
                | VolumeError::NotFound { .. }
                | VolumeError::AlreadyExists { .. }
                | VolumeError::NotADirectory { .. }
                | VolumeError::NotAFile { .. }
        )
    }

    fn backend(source: io::Error, context: VolumeOpContext) -> Self {
        VolumeError::Backend { source, context }
    }

    fn corrupt(source: impl StdError + Send + Sync + 'static, context: VolumeOpContext) -> Self {
        VolumeError::CorruptData {
            source: Box::new(source),
            context,
        }
    }

    fn invalid(reason: impl Into<String>, context: VolumeOpContext) -> Self {
        VolumeError::InvalidArgument {
            reason: reason.into(),
            context,
        }
    }

    fn from_name(err: NameError, context: VolumeOpContext) -> Self {
        if err.is_corruption() {
            VolumeError::corrupt(err, context)
        } else {
            VolumeError::invalid(err.to_string(), context)
        }
    }

    fn from_content(err: ContentError, context: VolumeOpContext) -> Self {
        match err {
            ContentError::Io { source, .. } => VolumeError::backend(source, context),
            ContentError::UnalignedSeek { .. } | ContentError::Closed { .. } => {
                VolumeError::invalid(err.to_string(), context)
            }
            other => VolumeError::corrupt(other, context),
        }
    }
}

impl From<io::Error> for VolumeError {
    fn from(source: io::Error) -> Self {
        VolumeError::backend(source, VolumeOpContext::new())
    }
}

impl From<ConfigError> for VolumeError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::InvalidPassword => VolumeError::InvalidPassword,
            ConfigError::InvalidConfig { reason } => VolumeError::InvalidConfig { reason },
            ConfigError::UnsupportedFeature { feature } => VolumeError::UnsupportedFeature { feature },
            ConfigError::Xml(e) => VolumeError::InvalidConfig {
                reason: e.to_string(),
            },
            corrupt @ ConfigError::CorruptKey { .. } => {
                VolumeError::corrupt(corrupt, VolumeOpContext::new().with_path(CONFIG_FILE_NAME))
            }
            ConfigError::Crypto(e) => VolumeError::InvalidConfig {
                reason: e.to_string(),
            },
        }
    }
}

impl From<PasswordValidationError> for VolumeError {
    fn from(err: PasswordValidationError) -> Self {
        match err {
            PasswordValidationError::IncorrectPassword => VolumeError::InvalidPassword,
            PasswordValidationError::ConfigNotFound => VolumeError::InvalidConfig {
                reason: format!("{CONFIG_FILE_NAME} not found"),
            },
            PasswordValidationError::Timeout => VolumeError::backend(
                io::Error::new(io::ErrorKind::TimedOut, "config read timed out"),
                VolumeOpContext::new().with_path(CONFIG_FILE_NAME),
            ),
            PasswordValidationError::Config(e) => e.into(),
            PasswordValidationError::Io(e) => e.into(),
        }
    }
}

impl From<VolumeCreationError> for VolumeError {
    fn from(err: VolumeCreationError) -> Self {
        match err {
            VolumeCreationError::AlreadyExists => VolumeError::AlreadyExists {
                path: join_path(ROOT_PATH, CONFIG_FILE_NAME),
            },
            VolumeCreationError::Config(e) => e.into(),
            VolumeCreationError::Io(e) => e.into(),
        }
    }
}

// ============================================================================
// Volume
// ============================================================================

/// A plaintext path resolved to its backend location.
#[derive(Debug, Clone)]
struct Resolved {
    plain: String,
    encoded: String,
    /// Name IV of the entry itself
    iv: DirectoryIv,
    encoded_parent: String,
}

impl Resolved {
    fn context(&self) -> VolumeOpContext {
        VolumeOpContext::new()
            .with_path(self.plain.clone())
            .with_encoded_path(self.encoded.clone())
    }
}

/// One entry of a move or copy, planned before anything is changed.
#[derive(Debug)]
struct TransferStep {
    src: String,
    dst: String,
    is_directory: bool,
    src_iv: DirectoryIv,
    dst_iv: DirectoryIv,
}

struct VolumeCore {
    provider: Arc<dyn FileProvider>,
    config: RwLock<VolumeConfig>,
    key: Arc<VolumeKey>,
    codec: NameCodec,
    cipher: ContentCipher,
    external_iv_chaining: bool,
}

/// An unlocked EncFS volume.
///
/// Cloning is cheap and shares the same key, config and provider. A `Volume`
/// is `Send + Sync`; streams opened from it are independent and may be used
/// from different threads.
///
/// # Example
///
/// ```no_run
/// use encfs_core::provider::LocalFileProvider;
/// use encfs_core::vault::Volume;
/// use std::sync::Arc;
///
/// let volume = Volume::open(Arc::new(LocalFileProvider::new("/path/to/volume")), "password")?;
/// for entry in volume.list_children("/")? {
///     println!("{}", entry.name()?);
/// }
/// let text = volume.read_file("/notes.txt")?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct Volume {
    core: Arc<VolumeCore>,
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("provider", &self.core.provider)
            .field("name_algorithm", &self.core.codec.algorithm())
            .field("chained_name_iv", &self.core.codec.is_chained())
            .field("layout", self.core.cipher.layout())
            .finish_non_exhaustive()
    }
}

impl Volume {
    /// Open an existing volume with the given password.
    ///
    /// # Errors
    ///
    /// - `InvalidPassword` if the password does not unwrap the volume key
    /// - `InvalidConfig` if `.encfs6.xml` is missing or malformed
    /// - `UnsupportedFeature` for ciphers and modes this crate does not implement
    #[instrument(level = "info", skip(provider, password))]
    pub fn open(provider: Arc<dyn FileProvider>, password: &str) -> Result<Self, VolumeError> {
        let bytes = read_config(provider.as_ref()).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => VolumeError::InvalidConfig {
                reason: format!("{CONFIG_FILE_NAME} not found"),
            },
            _ => VolumeError::backend(e, VolumeOpContext::new().with_path(CONFIG_FILE_NAME)),
        })?;
        let config = VolumeConfig::load(&bytes)?;
        let key = unlock_timed(&config, password)?;
        Ok(Self::from_parts(provider, config, Arc::new(key)))
    }

    /// Create a new volume on an empty backend and return it unlocked.
    ///
    /// See [`VolumeCreator`] for finer control.
    pub fn create(
        provider: Arc<dyn FileProvider>,
        options: VolumeOptions,
        password: &str,
    ) -> Result<Self, VolumeError> {
        Ok(VolumeCreator::new(provider, password).with_options(options).create()?)
    }

    /// Build a volume from a password already checked by
    /// [`PasswordValidator`](super::PasswordValidator).
    pub fn from_validated(validated: ValidatedPassword) -> Self {
        Self::from_parts(validated.provider, validated.config, validated.key)
    }

    pub(crate) fn from_parts(provider: Arc<dyn FileProvider>, config: VolumeConfig, key: Arc<VolumeKey>) -> Self {
        let codec = NameCodec::new(
            Arc::clone(&key),
            config.name_algorithm,
            config.name_interface.0,
            config.chained_name_iv,
        );
        let cipher = ContentCipher::new(Arc::clone(&key), config.content_layout());
        info!(
            name_algorithm = %config.name_algorithm,
            key_size = config.key_size_bits,
            block_size = config.block_size,
            chained_name_iv = config.chained_name_iv,
            external_iv_chaining = config.external_iv_chaining,
            "Volume opened"
        );
        Self {
            core: Arc::new(VolumeCore {
                provider,
                external_iv_chaining: config.external_iv_chaining,
                config: RwLock::new(config),
                key,
                codec,
                cipher,
            }),
        }
    }

    /// Current configuration record.
    pub fn config(&self) -> VolumeConfig {
        self.core
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn provider(&self) -> &Arc<dyn FileProvider> {
        &self.core.provider
    }

    pub fn name_codec(&self) -> &NameCodec {
        &self.core.codec
    }

    pub fn content_cipher(&self) -> &ContentCipher {
        &self.core.cipher
    }

    pub fn key(&self) -> &VolumeKey {
        &self.core.key
    }

    // ==================== Path resolution ====================

    /// Encode a plaintext path. Returns the backend path and the name IV of
    /// the final entry.
    #[instrument(level = "trace", skip(self), fields(path = %path.as_ref()))]
    pub fn encode_path(&self, path: impl AsRef<str>) -> Result<(String, DirectoryIv), VolumeError> {
        let resolved = self.resolve(&VolumePath::new(path))?;
        Ok((resolved.encoded, resolved.iv))
    }

    /// Decode a backend path into its plaintext path, verifying each segment.
    #[instrument(level = "trace", skip(self), fields(encoded_path = %encoded_path.as_ref()))]
    pub fn decode_path(&self, encoded_path: impl AsRef<str>) -> Result<String, VolumeError> {
        let encoded_path = encoded_path.as_ref();
        let mut iv = self.core.codec.root_iv();
        let mut plain = VolumePath::root();
        for segment in encoded_path.split('/').filter(|s| !s.is_empty()) {
            let (name, child) = self.core.codec.decode(segment, iv).map_err(|e| {
                VolumeError::from_name(e, VolumeOpContext::new().with_encoded_path(encoded_path))
            })?;
            plain = plain.join(name);
            iv = child;
        }
        Ok(plain.to_string())
    }

    fn resolve(&self, path: &VolumePath) -> Result<Resolved, VolumeError> {
        let plain = path.to_string();
        let (segments, iv) = self
            .core
            .codec
            .encode_segments(path.components())
            .map_err(|e| VolumeError::from_name(e, VolumeOpContext::new().with_path(plain.clone())))?;

        let encoded_parent = match segments.split_last() {
            Some((_, parents)) => absolute(parents),
            None => ROOT_PATH.to_owned(),
        };
        Ok(Resolved {
            plain,
            encoded: absolute(&segments),
            iv,
            encoded_parent,
        })
    }

    fn resolve_entry(&self, path: &VolumePath, operation: &'static str) -> Result<Resolved, VolumeError> {
        if path.is_root() {
            return Err(VolumeError::invalid(
                "the volume root cannot be used here",
                VolumeOpContext::new().with_path("/").with_operation(operation),
            ));
        }
        self.resolve(path)
    }

    fn external_iv(&self, iv: DirectoryIv) -> u64 {
        if self.core.external_iv_chaining {
            iv.external_iv()
        } else {
            0
        }
    }

    fn backend_err<'a>(resolved: &'a Resolved, operation: &'static str) -> impl FnOnce(io::Error) -> VolumeError + 'a {
        move |e| VolumeError::backend(e, resolved.context().with_operation(operation))
    }

    // ==================== Listing ====================

    /// Entries of the directory at `dir`.
    ///
    /// Names are decoded lazily; a corrupt entry only fails when its name is
    /// inspected. The config record at the root is not listed.
    #[instrument(level = "debug", skip(self), fields(dir = %dir.as_ref()))]
    pub fn list_children(&self, dir: impl AsRef<str>) -> Result<Vec<FileEntry>, VolumeError> {
        let resolved = self.resolve(&VolumePath::new(dir))?;
        self.require_directory(&resolved)?;
        self.list_resolved(&resolved.encoded, &resolved.plain, resolved.iv)
    }

    fn list_resolved(&self, encoded: &str, plain: &str, iv: DirectoryIv) -> Result<Vec<FileEntry>, VolumeError> {
        let infos = self.core.provider.list(encoded).map_err(|e| {
            VolumeError::backend(
                e,
                VolumeOpContext::new()
                    .with_path(plain)
                    .with_encoded_path(encoded)
                    .with_operation("list"),
            )
        })?;
        let at_root = encoded == ROOT_PATH;
        let layout = self.core.cipher.layout();
        let entries: Vec<FileEntry> = infos
            .into_iter()
            .filter(|info| !(at_root && info.name == CONFIG_FILE_NAME))
            .map(|info| FileEntry::new(self.core.codec.clone(), info, plain, iv, layout))
            .collect();
        debug!(count = entries.len(), "Listed directory");
        Ok(entries)
    }

    /// Every entry below `dir` in pre-order: each directory is followed by its
    /// whole subtree before its next sibling. Siblings are ordered by
    /// plaintext name.
    ///
    /// Directories whose names cannot be decoded are returned (after their
    /// decodable siblings) but not descended into.
    #[instrument(level = "debug", skip(self), fields(dir = %dir.as_ref()))]
    pub fn walk(&self, dir: impl AsRef<str>) -> Result<Vec<FileEntry>, VolumeError> {
        let resolved = self.resolve(&VolumePath::new(dir))?;
        self.require_directory(&resolved)?;

        let mut out = Vec::new();
        let root = self.list_resolved(&resolved.encoded, &resolved.plain, resolved.iv)?;
        let mut stack = vec![sorted_by_name(root).into_iter()];
        while let Some(siblings) = stack.last_mut() {
            let Some(entry) = siblings.next() else {
                stack.pop();
                continue;
            };
            if entry.is_directory() {
                match (entry.path(), entry.iv()) {
                    (Ok(child_plain), Ok(child_iv)) => {
                        let children = self.list_resolved(&entry.encoded_path(), &child_plain, child_iv)?;
                        out.push(entry);
                        stack.push(sorted_by_name(children).into_iter());
                        continue;
                    }
                    _ => warn!(encoded = %entry.encoded_path(), "Not descending into undecodable directory"),
                }
            }
            out.push(entry);
        }
        Ok(out)
    }

    // ==================== Lookup ====================

    /// Entry for the file or directory at `path`.
    #[instrument(level = "debug", skip(self), fields(path = %path.as_ref()))]
    pub fn file_info(&self, path: impl AsRef<str>) -> Result<FileEntry, VolumeError> {
        let path = VolumePath::new(path);
        let resolved = self.resolve_entry(&path, "file_info")?;
        let parent = path.parent().unwrap_or_else(VolumePath::root);
        let parent_iv = self.resolve(&parent)?.iv;

        let info = self.core.provider.file_info(&resolved.encoded).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => VolumeError::NotFound {
                path: resolved.plain.clone(),
            },
            _ => Self::backend_err(&resolved, "file_info")(e),
        })?;
        Ok(FileEntry::new(
            self.core.codec.clone(),
            info,
            parent.to_string(),
            parent_iv,
            self.core.cipher.layout(),
        ))
    }

    pub fn exists(&self, path: impl AsRef<str>) -> Result<bool, VolumeError> {
        let resolved = self.resolve(&VolumePath::new(path))?;
        self.core
            .provider
            .exists(&resolved.encoded)
            .map_err(Self::backend_err(&resolved, "exists"))
    }

    pub fn is_directory(&self, path: impl AsRef<str>) -> Result<bool, VolumeError> {
        let resolved = self.resolve(&VolumePath::new(path))?;
        self.core
            .provider
            .is_directory(&resolved.encoded)
            .map_err(Self::backend_err(&resolved, "is_directory"))
    }

    fn require_directory(&self, resolved: &Resolved) -> Result<(), VolumeError> {
        let provider = &self.core.provider;
        if provider
            .is_directory(&resolved.encoded)
            .map_err(Self::backend_err(resolved, "is_directory"))?
        {
            return Ok(());
        }
        if provider
            .exists(&resolved.encoded)
            .map_err(Self::backend_err(resolved, "exists"))?
        {
            Err(VolumeError::NotADirectory {
                path: resolved.plain.clone(),
            })
        } else {
            Err(VolumeError::NotFound {
                path: resolved.plain.clone(),
            })
        }
    }

    // ==================== Content ====================

    /// Open the file at `path` for reading.
    #[instrument(level = "debug", skip(self), fields(path = %path.as_ref()))]
    pub fn open_read(&self, path: impl AsRef<str>) -> Result<ContentReader, VolumeError> {
        let resolved = self.resolve_entry(&VolumePath::new(path), "open_read")?;
        if self.is_directory_at(&resolved)? {
            return Err(VolumeError::NotAFile { path: resolved.plain });
        }
        let input = self.core.provider.open_input(&resolved.encoded).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => VolumeError::NotFound {
                path: resolved.plain.clone(),
            },
            _ => Self::backend_err(&resolved, "open_read")(e),
        })?;
        ContentReader::open(
            input,
            self.core.cipher.clone(),
            self.external_iv(resolved.iv),
            &resolved.plain,
        )
        .map_err(|e| VolumeError::from_content(e, resolved.context().with_operation("open_read")))
    }

    /// Open the file at `path` for writing, creating or truncating it. The
    /// parent directory must exist.
    #[instrument(level = "debug", skip(self), fields(path = %path.as_ref()))]
    pub fn open_write(&self, path: impl AsRef<str>) -> Result<ContentWriter, VolumeError> {
        let resolved = self.resolve_entry(&VolumePath::new(path), "open_write")?;
        self.open_write_resolved(&resolved)
    }

    fn open_write_resolved(&self, resolved: &Resolved) -> Result<ContentWriter, VolumeError> {
        let provider = &self.core.provider;
        if !provider
            .is_directory(&resolved.encoded_parent)
            .map_err(Self::backend_err(resolved, "open_write"))?
        {
            let parent = VolumePath::new(&resolved.plain)
                .parent()
                .unwrap_or_else(VolumePath::root);
            return Err(VolumeError::NotFound {
                path: parent.to_string(),
            });
        }
        if self.is_directory_at(resolved)? {
            return Err(VolumeError::NotAFile {
                path: resolved.plain.clone(),
            });
        }
        let output = provider
            .open_output(&resolved.encoded)
            .map_err(Self::backend_err(resolved, "open_write"))?;
        Ok(ContentWriter::create(
            output,
            self.core.cipher.clone(),
            self.external_iv(resolved.iv),
            &resolved.plain,
        ))
    }

    fn is_directory_at(&self, resolved: &Resolved) -> Result<bool, VolumeError> {
        self.core
            .provider
            .is_directory(&resolved.encoded)
            .map_err(Self::backend_err(resolved, "is_directory"))
    }

    /// Read and decrypt a whole file.
    #[instrument(level = "debug", skip(self), fields(path = %path.as_ref()))]
    pub fn read_file(&self, path: impl AsRef<str>) -> Result<Vec<u8>, VolumeError> {
        let path = VolumePath::new(path);
        let mut reader = self.open_read(path.as_str())?;
        reader.read_to_end_plain().map_err(|e| {
            VolumeError::from_content(
                e,
                VolumeOpContext::new().with_path(path.to_string()).with_operation("read_file"),
            )
        })
    }

    /// Encrypt and write a whole file, replacing any existing content.
    ///
    /// On failure the partially written file is removed.
    #[instrument(level = "debug", skip(self, data), fields(path = %path.as_ref(), len = data.len()))]
    pub fn write_file(&self, path: impl AsRef<str>, data: &[u8]) -> Result<u64, VolumeError> {
        let resolved = self.resolve_entry(&VolumePath::new(path), "write_file")?;
        let mut writer = self.open_write_resolved(&resolved)?;
        let result = writer.write_plain(data).and_then(|()| writer.finish());
        match result {
            Ok(written) => Ok(written),
            Err(e) => {
                warn!(error = %e, "Write failed, removing partial file");
                if let Err(cleanup) = self.core.provider.delete(&resolved.encoded) {
                    warn!(error = %cleanup, "Failed to remove partial file");
                }
                Err(VolumeError::from_content(
                    e,
                    resolved.context().with_operation("write_file"),
                ))
            }
        }
    }

    // ==================== Tree changes ====================

    /// Create one directory. Returns `false` if it already exists.
    ///
    /// # Errors
    ///
    /// `NotFound` if the parent directory does not exist.
    #[instrument(level = "debug", skip(self), fields(path = %path.as_ref()))]
    pub fn mkdir(&self, path: impl AsRef<str>) -> Result<bool, VolumeError> {
        let path = VolumePath::new(path);
        if path.is_root() {
            return Ok(false);
        }
        let resolved = self.resolve(&path)?;
        let provider = &self.core.provider;
        if !provider
            .is_directory(&resolved.encoded_parent)
            .map_err(Self::backend_err(&resolved, "mkdir"))?
        {
            return Err(VolumeError::NotFound {
                path: path.parent().unwrap_or_else(VolumePath::root).to_string(),
            });
        }
        provider
            .mkdir(&resolved.encoded)
            .map_err(Self::backend_err(&resolved, "mkdir"))
    }

    /// Create a directory and any missing ancestors. Returns `false` if the
    /// directory already exists or an ancestor is a file.
    #[instrument(level = "debug", skip(self), fields(path = %path.as_ref()))]
    pub fn mkdirs(&self, path: impl AsRef<str>) -> Result<bool, VolumeError> {
        let path = VolumePath::new(path);
        if path.is_root() {
            return Ok(false);
        }
        let resolved = self.resolve(&path)?;
        self.core
            .provider
            .mkdirs(&resolved.encoded)
            .map_err(Self::backend_err(&resolved, "mkdirs"))
    }

    /// Delete a file or an empty directory. Returns `false` if nothing was
    /// deleted (missing entry or non-empty directory).
    #[instrument(level = "debug", skip(self), fields(path = %path.as_ref()))]
    pub fn delete(&self, path: impl AsRef<str>) -> Result<bool, VolumeError> {
        let resolved = self.resolve_entry(&VolumePath::new(path), "delete")?;
        self.core
            .provider
            .delete(&resolved.encoded)
            .map_err(Self::backend_err(&resolved, "delete"))
    }

    /// Delete an entry and everything below it.
    ///
    /// Works on encoded names only, so corrupt entries are removed too.
    #[instrument(level = "debug", skip(self), fields(path = %path.as_ref()))]
    pub fn delete_all(&self, path: impl AsRef<str>) -> Result<bool, VolumeError> {
        let resolved = self.resolve_entry(&VolumePath::new(path), "delete_all")?;
        let provider = &self.core.provider;
        if !provider
            .exists(&resolved.encoded)
            .map_err(Self::backend_err(&resolved, "delete_all"))?
        {
            return Ok(false);
        }
        self.delete_tree(&resolved.encoded)
            .map_err(Self::backend_err(&resolved, "delete_all"))?;
        Ok(true)
    }

    fn delete_tree(&self, encoded: &str) -> io::Result<()> {
        let provider = &self.core.provider;
        if provider.is_directory(encoded)? {
            for child in provider.list(encoded)? {
                self.delete_tree(&child.path())?;
            }
        }
        if !provider.delete(encoded)? {
            return Err(io::Error::other(format!("backend refused to delete {encoded}")));
        }
        trace!(encoded, "Deleted");
        Ok(())
    }

    /// Move a file or directory. Returns `false` if the source is missing,
    /// the destination exists, or the destination's parent is missing.
    ///
    /// With chained name IVs every name below a moved directory is
    /// re-encoded for its new location. With external IV chaining each moved
    /// file's header is re-encrypted for its new path.
    #[instrument(level = "debug", skip(self), fields(src = %src.as_ref(), dst = %dst.as_ref()))]
    pub fn move_entry(&self, src: impl AsRef<str>, dst: impl AsRef<str>) -> Result<bool, VolumeError> {
        self.transfer(&VolumePath::new(src), &VolumePath::new(dst), true)
    }

    /// Copy a file or directory (recursively). Same preconditions as
    /// [`move_entry`](Self::move_entry).
    #[instrument(level = "debug", skip(self), fields(src = %src.as_ref(), dst = %dst.as_ref()))]
    pub fn copy(&self, src: impl AsRef<str>, dst: impl AsRef<str>) -> Result<bool, VolumeError> {
        self.transfer(&VolumePath::new(src), &VolumePath::new(dst), false)
    }

    fn transfer(&self, src: &VolumePath, dst: &VolumePath, remove_source: bool) -> Result<bool, VolumeError> {
        let operation = if remove_source { "move" } else { "copy" };
        let from = self.resolve_entry(src, operation)?;
        let to = self.resolve_entry(dst, operation)?;
        if dst.starts_with(src) {
            return Err(VolumeError::invalid(
                format!("cannot {operation} {src} into itself"),
                from.context().with_operation(operation),
            ));
        }

        let provider = &self.core.provider;
        let backend = |e| VolumeError::backend(e, from.context().with_operation(operation));
        if !provider.exists(&from.encoded).map_err(backend)?
            || provider.exists(&to.encoded).map_err(backend)?
            || !provider.is_directory(&to.encoded_parent).map_err(backend)?
        {
            debug!("Transfer preconditions not met");
            return Ok(false);
        }

        let is_directory = provider.is_directory(&from.encoded).map_err(backend)?;
        let chained = self.core.codec.is_chained();

        // Plain backend moves are enough when no encoded byte depends on the
        // entry's location.
        if (is_directory && !chained) || (!is_directory && !self.core.external_iv_chaining) {
            let done = if remove_source {
                provider.move_entry(&from.encoded, &to.encoded)
            } else {
                provider.copy(&from.encoded, &to.encoded)
            }
            .map_err(backend)?;
            return Ok(done);
        }

        let plan = self.plan_transfer(&from, &to, is_directory)?;
        debug!(steps = plan.len(), "Re-encoding transfer");
        for step in &plan {
            let context = || {
                VolumeOpContext::new()
                    .with_encoded_path(step.src.clone())
                    .with_operation(operation)
            };
            if step.is_directory {
                let created = provider.mkdir(&step.dst).map_err(|e| VolumeError::backend(e, context()))?;
                if !created {
                    return Err(VolumeError::backend(
                        io::Error::other(format!("could not create {}", step.dst)),
                        context(),
                    ));
                }
            } else {
                self.transfer_file(step, remove_source, context())?;
            }
        }

        if remove_source {
            for step in plan.iter().rev().filter(|s| s.is_directory) {
                if !provider.delete(&step.src).map_err(backend)? {
                    warn!(encoded = %step.src, "Source directory not removed after move");
                }
            }
        }
        Ok(true)
    }

    /// Decode the whole source subtree and encode its destination names
    /// before touching the backend, so corrupt or over-long names abort the
    /// transfer up front.
    fn plan_transfer(&self, from: &Resolved, to: &Resolved, is_directory: bool) -> Result<Vec<TransferStep>, VolumeError> {
        let mut plan = vec![TransferStep {
            src: from.encoded.clone(),
            dst: to.encoded.clone(),
            is_directory,
            src_iv: from.iv,
            dst_iv: to.iv,
        }];
        let mut index = 0;
        while index < plan.len() {
            if plan[index].is_directory {
                let (src, dst, src_iv, dst_iv) = {
                    let step = &plan[index];
                    (step.src.clone(), step.dst.clone(), step.src_iv, step.dst_iv)
                };
                let children = self.core.provider.list(&src).map_err(|e| {
                    VolumeError::backend(e, VolumeOpContext::new().with_encoded_path(src.clone()))
                })?;
                for child in children {
                    let context = || VolumeOpContext::new().with_encoded_path(child.path());
                    let (name, child_src_iv) = self
                        .core
                        .codec
                        .decode(&child.name, src_iv)
                        .map_err(|e| VolumeError::from_name(e, context()))?;
                    let (encoded, child_dst_iv) = self
                        .core
                        .codec
                        .encode(&name, dst_iv)
                        .map_err(|e| VolumeError::from_name(e, context()))?;
                    plan.push(TransferStep {
                        src: child.path(),
                        dst: join_path(&dst, &encoded),
                        is_directory: child.is_directory,
                        src_iv: child_src_iv,
                        dst_iv: child_dst_iv,
                    });
                }
            }
            index += 1;
        }
        Ok(plan)
    }

    /// Move or copy one file, re-encrypting its header when the header is
    /// bound to the file's path.
    fn transfer_file(&self, step: &TransferStep, remove_source: bool, context: VolumeOpContext) -> Result<(), VolumeError> {
        let provider = &self.core.provider;
        if !self.core.external_iv_chaining {
            let done = if remove_source {
                provider.move_entry(&step.src, &step.dst)
            } else {
                provider.copy(&step.src, &step.dst)
            }
            .map_err(|e| VolumeError::backend(e, context.clone()))?;
            return if done {
                Ok(())
            } else {
                Err(VolumeError::backend(
                    io::Error::other(format!("backend refused transfer of {}", step.src)),
                    context,
                ))
            };
        }

        if let Err(e) = self.rewrite_header_copy(step, &context) {
            let _ = provider.delete(&step.dst);
            return Err(e);
        }
        if remove_source {
            let removed = provider
                .delete(&step.src)
                .map_err(|e| VolumeError::backend(e, context.clone()))?;
            if !removed {
                return Err(VolumeError::backend(
                    io::Error::other(format!("could not remove {}", step.src)),
                    context,
                ));
            }
        }
        Ok(())
    }

    /// Copy one file while re-keying its header to the destination path.
    ///
    /// A short or undecryptable source header is reported as corruption.
    fn rewrite_header_copy(&self, step: &TransferStep, context: &VolumeOpContext) -> Result<(), VolumeError> {
        let provider = &self.core.provider;
        let backend = |e| VolumeError::backend(e, context.clone());
        let mut input = provider.open_input(&step.src).map_err(backend)?;
        let mut output = provider.open_output(&step.dst).map_err(backend)?;

        let mut header = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            match input.read(&mut header[filled..]).map_err(backend)? {
                0 => break,
                n => filled += n,
            }
        }
        match filled {
            0 => {}
            HEADER_SIZE => {
                let cipher = &self.core.cipher;
                let file_iv = cipher
                    .decrypt_header(&header, step.src_iv.external_iv())
                    .map_err(|e| VolumeError::from_content(e, context.clone()))?;
                output
                    .write_all(&cipher.encrypt_header(file_iv, step.dst_iv.external_iv()))
                    .map_err(backend)?;
                io::copy(&mut input, &mut output).map_err(backend)?;
                trace!(src = %step.src, dst = %step.dst, "Re-encrypted file header");
            }
            short => {
                return Err(VolumeError::corrupt(
                    ContentError::InvalidHeader {
                        reason: format!("file header is {short} bytes"),
                        context: ContentContext::new().with_operation("rewrite_header"),
                    },
                    context.clone(),
                ));
            }
        }
        output.flush().map_err(backend)
    }

    /// Re-wrap the volume key under a new password and persist the config.
    #[instrument(level = "info", skip(self, old_password, new_password))]
    pub fn change_password(&self, old_password: &str, new_password: &str) -> Result<(), VolumeError> {
        let mut guard = self.core.config.write().unwrap_or_else(PoisonError::into_inner);
        let updated = guard.change_password(old_password, new_password)?;

        let path = join_path(ROOT_PATH, CONFIG_FILE_NAME);
        let context = || {
            VolumeOpContext::new()
                .with_encoded_path(path.clone())
                .with_operation("change_password")
        };
        let mut output = self
            .core
            .provider
            .open_output(&path)
            .map_err(|e| VolumeError::backend(e, context()))?;
        output
            .write_all(updated.to_xml().as_bytes())
            .and_then(|()| output.flush())
            .map_err(|e| VolumeError::backend(e, context()))?;

        *guard = updated;
        info!("Volume password changed");
        Ok(())
    }
}

/// Join encoded segments into an absolute backend path.
fn absolute(segments: &[String]) -> String {
    if segments.is_empty() {
        ROOT_PATH.to_owned()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Order entries by decoded name; undecodable names sort last.
fn sorted_by_name(entries: Vec<FileEntry>) -> Vec<FileEntry> {
    let mut keyed: Vec<(Option<String>, FileEntry)> =
        entries.into_iter().map(|e| (e.name().ok().map(str::to_owned), e)).collect();
    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    keyed.into_iter().map(|(_, e)| e).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryFileProvider;

    fn options() -> VolumeOptions {
        VolumeOptions {
            kdf_iterations: 1000,
            ..VolumeOptions::standard()
        }
    }

    fn volume_with(options: VolumeOptions) -> (MemoryFileProvider, Volume) {
        let provider = MemoryFileProvider::new();
        let volume = Volume::create(Arc::new(provider.clone()), options, "pw").unwrap();
        (provider, volume)
    }

    #[test]
    fn test_root_resolves_to_backend_root() {
        let (_, volume) = volume_with(options());
        let (encoded, iv) = volume.encode_path("/").unwrap();
        assert_eq!(encoded, "/");
        assert_eq!(iv, DirectoryIv::Chained(0));
        assert_eq!(volume.decode_path("/").unwrap(), "/");
    }

    #[test]
    fn test_encode_decode_path() {
        let (_, volume) = volume_with(options());
        let (encoded, _) = volume.encode_path("/a/b/c.txt").unwrap();
        assert_eq!(encoded.matches('/').count(), 3);
        assert_eq!(volume.decode_path(&encoded).unwrap(), "/a/b/c.txt");
    }

    #[test]
    fn test_config_file_is_hidden() {
        let (provider, volume) = volume_with(options());
        assert!(provider.exists("/.encfs6.xml").unwrap());
        assert!(volume.list_children("/").unwrap().is_empty());
    }

    #[test]
    fn test_write_read_and_list() {
        let (_, volume) = volume_with(options());
        assert!(volume.mkdir("/docs").unwrap());
        assert_eq!(volume.write_file("/docs/a.txt", b"alpha").unwrap(), 5);

        let entries = volume.list_children("/docs").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name().unwrap(), "a.txt");
        assert_eq!(entries[0].size(), 5);
        assert_eq!(volume.read_file("/docs/a.txt").unwrap(), b"alpha");
    }

    #[test]
    fn test_dot_segments_rejected() {
        let (_, volume) = volume_with(options());
        let err = volume.read_file("/a/../b").unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_missing_and_wrong_kind() {
        let (_, volume) = volume_with(options());
        volume.write_file("/f", b"x").unwrap();
        volume.mkdir("/d").unwrap();

        assert!(matches!(volume.read_file("/nope"), Err(VolumeError::NotFound { .. })));
        assert!(matches!(volume.list_children("/f"), Err(VolumeError::NotADirectory { .. })));
        assert!(matches!(volume.open_read("/d"), Err(VolumeError::NotAFile { .. })));
        assert!(matches!(volume.write_file("/nodir/f", b"x"), Err(VolumeError::NotFound { .. })));
        assert!(matches!(volume.mkdir("/nodir/sub"), Err(VolumeError::NotFound { .. })));
    }

    #[test]
    fn test_move_into_itself_rejected() {
        let (_, volume) = volume_with(options());
        volume.mkdirs("/a/b").unwrap();
        let err = volume.move_entry("/a", "/a/b/c").unwrap_err();
        assert!(matches!(err, VolumeError::InvalidArgument { .. }));
    }

    #[test]
    fn test_transfer_preconditions() {
        let (_, volume) = volume_with(options());
        volume.write_file("/f", b"x").unwrap();
        volume.write_file("/g", b"y").unwrap();
        assert!(!volume.move_entry("/missing", "/h").unwrap());
        assert!(!volume.move_entry("/f", "/g").unwrap());
        assert!(!volume.copy("/f", "/nodir/f").unwrap());
    }

    #[test]
    fn test_delete_all() {
        let (_, volume) = volume_with(options());
        volume.mkdirs("/a/b").unwrap();
        volume.write_file("/a/b/f", b"1").unwrap();
        assert!(!volume.delete("/a").unwrap());
        assert!(volume.delete_all("/a").unwrap());
        assert!(!volume.exists("/a").unwrap());
        assert!(!volume.delete_all("/a").unwrap());
    }

    #[test]
    fn test_volume_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Volume>();
    }

    #[test]
    fn test_error_mapping() {
        let err: VolumeError = ConfigError::InvalidPassword.into();
        assert!(matches!(err, VolumeError::InvalidPassword));

        let err = VolumeError::from_name(NameError::Empty, VolumeOpContext::new());
        assert!(err.is_invalid_argument());

        let err = VolumeError::from_content(
            ContentError::MacMismatch {
                context: crate::fs::file::ContentContext::new(),
            },
            VolumeOpContext::new().with_path("/x"),
        );
        assert!(err.is_corruption());
        assert!(err.to_string().contains("/x"));
    }
}
