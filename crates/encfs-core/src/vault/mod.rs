//! Volume-level abstractions and operations

pub mod config;
pub mod creator;
pub mod operations;
pub mod password;
pub mod path;

// Re-export commonly used types
pub use config::{
    CONFIG_FILE_NAME, CipherAlgorithm, ConfigError, DEFAULT_KDF_ITERATIONS, VolumeConfig, VolumeOptions,
};
pub use creator::{VolumeCreationError, VolumeCreator};
pub use operations::{Volume, VolumeError, VolumeOpContext};
pub use password::{DEFAULT_VALIDATION_TIMEOUT, PasswordValidationError, PasswordValidator, ValidatedPassword};
pub use path::VolumePath;
