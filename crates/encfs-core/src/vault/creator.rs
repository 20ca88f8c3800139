//! Creation of new volumes.

use std::io::{self, Write};
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{info, instrument};

use super::config::{CONFIG_FILE_NAME, ConfigError, VolumeConfig, VolumeOptions};
use super::operations::Volume;
use crate::fs::name::NameAlgorithm;
use crate::provider::{FileProvider, ROOT_PATH, join_path};

/// Errors that can occur while creating a volume.
#[derive(Error, Debug)]
pub enum VolumeCreationError {
    /// The backend root already holds a volume config.
    #[error("A volume already exists at this location")]
    AlreadyExists,

    #[error("Invalid volume options: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Io(#[from] io::Error),
}

/// Builder for new volumes.
///
/// Starts from [`VolumeOptions::standard`]; each `with_*` call overrides one
/// setting. Options are validated in [`create`](Self::create).
///
/// # Example
///
/// ```no_run
/// use encfs_core::provider::LocalFileProvider;
/// use encfs_core::vault::VolumeCreator;
/// use std::sync::Arc;
///
/// let volume = VolumeCreator::new(Arc::new(LocalFileProvider::new("/path/to/empty")), "password")
///     .with_key_size(256)
///     .with_block_mac(8, 0)
///     .create()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct VolumeCreator {
    provider: Arc<dyn FileProvider>,
    password: SecretString,
    options: VolumeOptions,
}

impl VolumeCreator {
    pub fn new(provider: Arc<dyn FileProvider>, password: impl Into<String>) -> Self {
        Self {
            provider,
            password: SecretString::from(password.into()),
            options: VolumeOptions::standard(),
        }
    }

    /// Replace every option at once.
    pub fn with_options(mut self, options: VolumeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_key_size(mut self, bits: u32) -> Self {
        self.options.key_size_bits = bits;
        self
    }

    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.options.block_size = bytes;
        self
    }

    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.options.kdf_iterations = iterations;
        self
    }

    pub fn with_name_algorithm(mut self, algorithm: NameAlgorithm) -> Self {
        self.options.name_algorithm = algorithm;
        self
    }

    pub fn with_unique_iv(mut self, enabled: bool) -> Self {
        self.options.unique_iv = enabled;
        self
    }

    pub fn with_chained_name_iv(mut self, enabled: bool) -> Self {
        self.options.chained_name_iv = enabled;
        self
    }

    /// Bind each file header to its path. Requires chained name IVs and
    /// unique file IVs.
    pub fn with_external_iv_chaining(mut self, enabled: bool) -> Self {
        self.options.external_iv_chaining = enabled;
        self
    }

    /// Per-block MAC bytes (0 disables) and random bytes mixed into each block.
    pub fn with_block_mac(mut self, mac_bytes: usize, rand_bytes: usize) -> Self {
        self.options.block_mac_bytes = mac_bytes;
        self.options.block_mac_rand_bytes = rand_bytes;
        self
    }

    pub fn with_allow_holes(mut self, enabled: bool) -> Self {
        self.options.allow_holes = enabled;
        self
    }

    /// Write a fresh config with a random volume key and return the unlocked
    /// volume.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if `.encfs6.xml` is already present
    /// - `Config` if the options are invalid
    /// - `Io` if the config could not be written
    #[instrument(level = "info", skip(self), fields(provider = ?self.provider))]
    pub fn create(self) -> Result<Volume, VolumeCreationError> {
        let config_path = join_path(ROOT_PATH, CONFIG_FILE_NAME);
        if self.provider.exists(&config_path)? {
            return Err(VolumeCreationError::AlreadyExists);
        }

        let (config, key) = VolumeConfig::create_new(&self.options, self.password.expose_secret())?;

        let mut output = self.provider.open_output(&config_path)?;
        output.write_all(config.to_xml().as_bytes())?;
        output.flush()?;
        drop(output);

        info!(
            key_size = config.key_size_bits,
            block_size = config.block_size,
            name_algorithm = %config.name_algorithm,
            "Volume created"
        );
        Ok(Volume::from_parts(self.provider, config, Arc::new(key)))
    }
}
