//! Error types for the crate
//!
//! This module re-exports every error type and its context structure so
//! callers can match on failures without reaching into submodules.

pub use crate::crypto::CryptoError;
pub use crate::crypto::key_wrap::UnwrapError;
pub use crate::fs::file::{ContentContext, ContentError};
pub use crate::fs::name::{NameContext, NameError};
pub use crate::vault::config::ConfigError;
pub use crate::vault::creator::VolumeCreationError;
pub use crate::vault::operations::{VolumeError, VolumeOpContext};
pub use crate::vault::password::PasswordValidationError;
