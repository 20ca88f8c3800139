//! Password validation for volume unlocking.
//!
//! Unlocking is split in two phases:
//! 1. Validate the password: read the config (with an I/O timeout) and run
//!    the deliberately slow PBKDF2 derivation to unwrap the volume key.
//! 2. Build a [`Volume`](super::Volume) from the validated result without
//!    deriving again.
//!
//! The timeout only guards the config read, which can hang on a stale network
//! backend. Key derivation is CPU-bound and always runs to completion.
//!
//! # Example
//!
//! ```no_run
//! use encfs_core::provider::LocalFileProvider;
//! use encfs_core::vault::{PasswordValidator, Volume};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let provider = Arc::new(LocalFileProvider::new("/path/to/volume"));
//! let validated = PasswordValidator::new(provider).validate("password", Duration::from_secs(5))?;
//! let volume = Volume::from_validated(validated);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::info;

use super::config::{CONFIG_FILE_NAME, ConfigError, VolumeConfig};
use crate::crypto::VolumeKey;
use crate::provider::{FileProvider, ROOT_PATH, join_path};

/// Default timeout for backend reads during password validation.
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during password validation.
#[derive(Error, Debug)]
pub enum PasswordValidationError {
    /// The password was incorrect.
    #[error("Incorrect password")]
    IncorrectPassword,

    /// Backend read timed out (the backend may be a stale mount).
    #[error("Backend operation timed out")]
    Timeout,

    /// No config record at the volume root.
    #[error("Volume config {CONFIG_FILE_NAME} not found")]
    ConfigNotFound,

    /// The config record could not be loaded or unlocked.
    #[error("Volume config error: {0}")]
    Config(ConfigError),

    #[error("Backend error: {0}")]
    Io(#[from] io::Error),
}

impl From<ConfigError> for PasswordValidationError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::InvalidPassword => PasswordValidationError::IncorrectPassword,
            other => PasswordValidationError::Config(other),
        }
    }
}

/// Proof that a password unlocked a volume.
///
/// Holds the unlocked key and parsed config, ready for
/// [`Volume::from_validated`](super::Volume::from_validated). Not `Clone`, so
/// the key is handed over exactly once.
#[derive(Debug)]
pub struct ValidatedPassword {
    pub(crate) provider: Arc<dyn FileProvider>,
    pub(crate) config: VolumeConfig,
    pub(crate) key: Arc<VolumeKey>,
}

impl ValidatedPassword {
    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn FileProvider> {
        &self.provider
    }
}

/// Validates passwords for volume unlocking.
#[derive(Debug, Clone)]
pub struct PasswordValidator {
    provider: Arc<dyn FileProvider>,
}

impl PasswordValidator {
    pub fn new(provider: Arc<dyn FileProvider>) -> Self {
        Self { provider }
    }

    /// Validate a password with [`DEFAULT_VALIDATION_TIMEOUT`].
    pub fn validate_default(&self, password: &str) -> Result<ValidatedPassword, PasswordValidationError> {
        self.validate(password, DEFAULT_VALIDATION_TIMEOUT)
    }

    /// Read the config within `timeout`, then unwrap the volume key.
    ///
    /// # Errors
    ///
    /// * `IncorrectPassword` - the key checksum did not match
    /// * `Timeout` - the config read took longer than `timeout`
    /// * `ConfigNotFound` - no `.encfs6.xml` at the backend root
    /// * `Config` - the config is malformed or unsupported
    pub fn validate(&self, password: &str, timeout: Duration) -> Result<ValidatedPassword, PasswordValidationError> {
        info!("Reading volume config");
        let bytes = read_with_timeout(Arc::clone(&self.provider), timeout).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => PasswordValidationError::ConfigNotFound,
            io::ErrorKind::TimedOut => PasswordValidationError::Timeout,
            _ => PasswordValidationError::Io(e),
        })?;

        let config = VolumeConfig::load(&bytes)?;
        let key = unlock_timed(&config, password)?;

        Ok(ValidatedPassword {
            provider: Arc::clone(&self.provider),
            config,
            key: Arc::new(key),
        })
    }
}

/// Read the raw config record from the backend root.
pub(crate) fn read_config(provider: &dyn FileProvider) -> io::Result<Vec<u8>> {
    let mut input = provider.open_input(&join_path(ROOT_PATH, CONFIG_FILE_NAME))?;
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Unlock `config`, logging how long key derivation took.
pub(crate) fn unlock_timed(config: &VolumeConfig, password: &str) -> Result<VolumeKey, ConfigError> {
    info!(iterations = config.kdf_iterations, "Starting PBKDF2 key derivation");
    let start = Instant::now();
    match config.unlock(password) {
        Ok(key) => {
            info!(elapsed = ?start.elapsed(), "Volume key unlocked");
            Ok(key)
        }
        Err(e) => {
            info!(elapsed = ?start.elapsed(), error = %e, "Volume key unlock failed");
            Err(e)
        }
    }
}

/// Read the config on a helper thread, giving up after `timeout`.
fn read_with_timeout(provider: Arc<dyn FileProvider>, timeout: Duration) -> io::Result<Vec<u8>> {
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let _ = tx.send(read_config(provider.as_ref()));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "backend read timed out - the backend may be a stale mount",
        )),
        Err(RecvTimeoutError::Disconnected) => Err(io::Error::other("backend read thread terminated unexpectedly")),
    }
}
