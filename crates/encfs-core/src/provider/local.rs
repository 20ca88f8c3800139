use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, trace};
use walkdir::WalkDir;

use super::{FileInfo, FileProvider, RawInput, check_components, components, join_path, split_path};

/// Provider backed by a directory on the local filesystem.
///
/// Provider paths are resolved relative to `root`; `..` components are
/// rejected. Listings are sorted by name so traversal order is stable across
/// platforms.
#[derive(Debug, Clone)]
pub struct LocalFileProvider {
    root: PathBuf,
}

impl LocalFileProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        check_components(path)?;
        let mut resolved = self.root.clone();
        resolved.extend(components(path));
        Ok(resolved)
    }

    fn info_for(path: &str, metadata: &fs::Metadata) -> FileInfo {
        let (parent, name) = split_path(path);
        let is_directory = metadata.is_dir();
        FileInfo {
            name: name.to_owned(),
            parent_path: parent.to_owned(),
            is_directory,
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size: if is_directory { 0 } else { metadata.len() },
            can_read: true,
            can_write: !metadata.permissions().readonly(),
            can_execute: is_executable(metadata),
        }
    }

    /// Shared preconditions of move and copy.
    fn check_transfer(src: &Path, dst: &Path) -> bool {
        if !src.exists() || dst.exists() {
            return false;
        }
        dst.parent().is_some_and(Path::is_dir)
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(metadata: &fs::Metadata) -> bool {
    metadata.is_dir()
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

impl FileProvider for LocalFileProvider {
    fn list(&self, path: &str) -> io::Result<Vec<FileInfo>> {
        let dir = self.resolve(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                trace!(path = ?entry.path(), "Skipping non-UTF-8 entry");
                continue;
            };
            let metadata = entry.metadata()?;
            entries.push(Self::info_for(&join_path(path, &name), &metadata));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn file_info(&self, path: &str) -> io::Result<FileInfo> {
        let metadata = fs::metadata(self.resolve(path)?)?;
        Ok(Self::info_for(path, &metadata))
    }

    fn exists(&self, path: &str) -> io::Result<bool> {
        Ok(self.resolve(path)?.exists())
    }

    fn is_directory(&self, path: &str) -> io::Result<bool> {
        Ok(self.resolve(path)?.is_dir())
    }

    fn mkdir(&self, path: &str) -> io::Result<bool> {
        let dir = self.resolve(path)?;
        if dir.exists() || !dir.parent().is_some_and(Path::is_dir) {
            return Ok(false);
        }
        fs::create_dir(&dir)?;
        debug!(path, "Created directory");
        Ok(true)
    }

    fn mkdirs(&self, path: &str) -> io::Result<bool> {
        let dir = self.resolve(path)?;
        if dir.is_dir() {
            return Ok(false);
        }
        let mut current = self.root.clone();
        for component in components(path) {
            current.push(component);
            if current.exists() && !current.is_dir() {
                return Ok(false);
            }
        }
        fs::create_dir_all(&dir)?;
        debug!(path, "Created directories");
        Ok(true)
    }

    fn delete(&self, path: &str) -> io::Result<bool> {
        let target = self.resolve(path)?;
        let Ok(metadata) = fs::symlink_metadata(&target) else {
            return Ok(false);
        };
        let result = if metadata.is_dir() {
            fs::remove_dir(&target)
        } else {
            fs::remove_file(&target)
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn move_entry(&self, src: &str, dst: &str) -> io::Result<bool> {
        let (from, to) = (self.resolve(src)?, self.resolve(dst)?);
        if !Self::check_transfer(&from, &to) {
            return Ok(false);
        }
        fs::rename(&from, &to)?;
        Ok(true)
    }

    fn copy(&self, src: &str, dst: &str) -> io::Result<bool> {
        let (from, to) = (self.resolve(src)?, self.resolve(dst)?);
        if !Self::check_transfer(&from, &to) {
            return Ok(false);
        }
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
        Ok(true)
    }

    fn open_input(&self, path: &str) -> io::Result<Box<dyn RawInput>> {
        Ok(Box::new(File::open(self.resolve(path)?)?))
    }

    fn open_output(&self, path: &str) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(BufWriter::new(File::create(self.resolve(path)?)?)))
    }

    fn create_file(&self, path: &str) -> io::Result<FileInfo> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.resolve(path)?)?;
        let metadata = file.metadata()?;
        Ok(Self::info_for(path, &metadata))
    }
}
