//! Read and write EncFS-compatible encrypted volumes.
//!
//! An EncFS volume is an ordinary directory tree whose file names and file
//! contents are encrypted under a random volume key. The key is wrapped with a
//! password-derived key and stored, together with the volume's cipher
//! parameters, in `.encfs6.xml` at the volume root.
//!
//! # Layers
//!
//! - [`crypto`]: the volume key, AES stream and block transforms, MACs and key wrapping
//! - [`fs`]: file name codec and the block-structured content format
//! - [`provider`]: the storage backend seam ([`FileProvider`](provider::FileProvider))
//! - [`vault`]: config parsing, unlocking, creation and the [`Volume`] facade
//!
//! # Example
//!
//! ```no_run
//! use encfs_core::provider::LocalFileProvider;
//! use encfs_core::Volume;
//! use std::sync::Arc;
//!
//! let volume = Volume::open(Arc::new(LocalFileProvider::new("/path/to/volume")), "password")?;
//! volume.mkdir("/reports")?;
//! volume.write_file("/reports/q3.txt", b"numbers")?;
//! assert_eq!(volume.read_file("/reports/q3.txt")?, b"numbers");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod crypto;
pub mod error;
pub mod fs;
pub mod provider;
pub mod vault;

pub use provider::{FileInfo, FileProvider};
pub use vault::{Volume, VolumeConfig, VolumeCreator, VolumeError, VolumeOptions, VolumePath};
