//! Name and content encryption for EncFS volumes

pub mod directory;
pub mod file;
pub mod name;
pub mod streaming;

// Re-export commonly used types
pub use directory::FileEntry;
pub use file::{ContentCipher, ContentContext, ContentError, ContentLayout, HEADER_SIZE, MAX_BLOCK_MAC_BYTES};
pub use name::{DirectoryIv, MAX_ENCODED_NAME_LEN, NameAlgorithm, NameCodec, NameContext, NameError};
pub use streaming::{ContentReader, ContentWriter};
