//! Storage backends.
//!
//! A volume never touches storage directly. Every read, write and directory
//! operation on the encrypted tree goes through a [`FileProvider`], addressed
//! by `/`-rooted paths of *encoded* names. The crate ships two providers:
//!
//! - [`LocalFileProvider`] stores the encrypted tree in a local directory.
//! - [`MemoryFileProvider`] keeps it in memory, for tests and ephemeral use.
//!
//! Archive or remote backends implement the same trait outside this crate.

mod local;
mod memory;

use std::fmt;
use std::io::{self, Read, Seek, Write};
use std::time::SystemTime;

pub use local::LocalFileProvider;
pub use memory::MemoryFileProvider;

/// Path of the backend root.
pub const ROOT_PATH: &str = "/";

/// Path separator used by providers.
pub const SEPARATOR: char = '/';

/// A readable, seekable raw byte stream from a provider.
pub trait RawInput: Read + Seek + Send {}

impl<T: Read + Seek + Send> RawInput for T {}

/// Metadata for one backend entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Entry name (last path component).
    pub name: String,
    /// `/`-rooted path of the containing directory.
    pub parent_path: String,
    pub is_directory: bool,
    pub modified: SystemTime,
    /// Size in bytes; 0 for directories.
    pub size: u64,
    pub can_read: bool,
    pub can_write: bool,
    pub can_execute: bool,
}

impl FileInfo {
    /// Full `/`-rooted path of the entry.
    pub fn path(&self) -> String {
        join_path(&self.parent_path, &self.name)
    }
}

/// Storage backend capability consumed by a volume.
///
/// Boolean results report whether the operation took effect: `false` means a
/// precondition did not hold (the source is missing, the destination exists,
/// the destination's parent is missing). `Err` is reserved for backend
/// failures, which the volume propagates without reinterpretation.
///
/// # Thread Safety
///
/// Providers are shared by every stream opened on a volume and must be
/// `Send + Sync`. Retry policy for transient failures belongs here, not in
/// the volume.
pub trait FileProvider: Send + Sync + fmt::Debug {
    /// Entries of the directory at `path`, in a stable order.
    fn list(&self, path: &str) -> io::Result<Vec<FileInfo>>;

    /// Metadata of the entry at `path`; `NotFound` if it does not exist.
    fn file_info(&self, path: &str) -> io::Result<FileInfo>;

    fn exists(&self, path: &str) -> io::Result<bool>;

    fn is_directory(&self, path: &str) -> io::Result<bool>;

    /// Create one directory. Returns `false` if `path` already exists; fails
    /// if its parent does not.
    fn mkdir(&self, path: &str) -> io::Result<bool>;

    /// Create a directory and any missing ancestors. Fails if an existing
    /// component is a plain file.
    fn mkdirs(&self, path: &str) -> io::Result<bool>;

    /// Delete a file or an empty directory.
    fn delete(&self, path: &str) -> io::Result<bool>;

    /// Move an entry. Fails if the destination exists or its parent does not.
    fn move_entry(&self, src: &str, dst: &str) -> io::Result<bool>;

    /// Copy an entry (recursively for directories). Same preconditions as
    /// [`move_entry`](Self::move_entry).
    fn copy(&self, src: &str, dst: &str) -> io::Result<bool>;

    /// Open an existing file for reading.
    fn open_input(&self, path: &str) -> io::Result<Box<dyn RawInput>>;

    /// Open a file for writing, creating or truncating it.
    fn open_output(&self, path: &str) -> io::Result<Box<dyn Write + Send>>;

    /// Create an empty file. Fails with `AlreadyExists` if `path` exists.
    fn create_file(&self, path: &str) -> io::Result<FileInfo>;
}

/// Join a `/`-rooted directory path and a name.
pub fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches(SEPARATOR);
    format!("{parent}{SEPARATOR}{name}")
}

/// Split a `/`-rooted path into parent path and final name.
///
/// The root splits into `("/", "")`.
pub fn split_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(0) => (ROOT_PATH, &trimmed[1..]),
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None if trimmed.is_empty() => (ROOT_PATH, ""),
        None => (ROOT_PATH, trimmed),
    }
}

/// Non-empty components of a provider path.
pub(crate) fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|c| !c.is_empty())
}

/// Reject `.` and `..` components so backends never escape their root.
pub(crate) fn check_components(path: &str) -> io::Result<()> {
    if components(path).any(|c| c == "." || c == "..") {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("relative components are not allowed in {path:?}"),
        ));
    }
    Ok(())
}
