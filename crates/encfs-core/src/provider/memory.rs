use std::collections::BTreeMap;
use std::io::{self, Cursor, Write};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use super::{
    FileInfo, FileProvider, ROOT_PATH, RawInput, check_components, components,
    split_path,
};

type FileData = Arc<Mutex<Vec<u8>>>;

#[derive(Debug, Clone)]
enum Node {
    Directory { modified: SystemTime },
    File { data: FileData, modified: SystemTime },
}

/// Provider that keeps the whole tree in memory.
///
/// Entries are keyed by normalized path in a `BTreeMap`, so listings come back
/// sorted by name. Cloning the provider shares the same tree.
#[derive(Debug, Clone)]
pub struct MemoryFileProvider {
    nodes: Arc<RwLock<BTreeMap<String, Node>>>,
}

impl Default for MemoryFileProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> io::Error {
    io::Error::other("memory provider lock poisoned")
}

fn normalize(path: &str) -> io::Result<String> {
    check_components(path)?;
    let mut normalized = String::new();
    for component in components(path) {
        normalized.push('/');
        normalized.push_str(component);
    }
    if normalized.is_empty() {
        normalized.push_str(ROOT_PATH);
    }
    Ok(normalized)
}

fn parent_of(path: &str) -> &str {
    split_path(path).0
}

fn lock_data(data: &FileData) -> io::Result<std::sync::MutexGuard<'_, Vec<u8>>> {
    data.lock().map_err(|_| poisoned())
}

impl MemoryFileProvider {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            ROOT_PATH.to_owned(),
            Node::Directory {
                modified: SystemTime::now(),
            },
        );
        Self {
            nodes: Arc::new(RwLock::new(nodes)),
        }
    }

    fn read(&self) -> io::Result<RwLockReadGuard<'_, BTreeMap<String, Node>>> {
        self.nodes.read().map_err(|_| poisoned())
    }

    fn write(&self) -> io::Result<RwLockWriteGuard<'_, BTreeMap<String, Node>>> {
        self.nodes.write().map_err(|_| poisoned())
    }

    fn info(path: &str, node: &Node) -> io::Result<FileInfo> {
        let (parent, name) = split_path(path);
        let (is_directory, size, modified) = match node {
            Node::Directory { modified } => (true, 0, *modified),
            Node::File { data, modified } => (false, lock_data(data)?.len() as u64, *modified),
        };
        Ok(FileInfo {
            name: name.to_owned(),
            parent_path: parent.to_owned(),
            is_directory,
            modified,
            size,
            can_read: true,
            can_write: true,
            can_execute: is_directory,
        })
    }

    fn is_dir_in(nodes: &BTreeMap<String, Node>, path: &str) -> bool {
        matches!(nodes.get(path), Some(Node::Directory { .. }))
    }

    /// Paths of `path` and everything below it.
    fn subtree(nodes: &BTreeMap<String, Node>, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        nodes
            .keys()
            .filter(|key| key.as_str() == path || key.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn can_transfer(nodes: &BTreeMap<String, Node>, src: &str, dst: &str) -> bool {
        src != ROOT_PATH
            && nodes.contains_key(src)
            && !nodes.contains_key(dst)
            && Self::is_dir_in(nodes, parent_of(dst))
            && !dst.starts_with(&format!("{src}/"))
    }

    fn new_file(nodes: &mut BTreeMap<String, Node>, path: String) -> FileData {
        let data = FileData::default();
        nodes.insert(
            path,
            Node::File {
                data: Arc::clone(&data),
                modified: SystemTime::now(),
            },
        );
        data
    }
}

/// Writer that appends to a shared in-memory file.
struct MemoryWriter {
    data: FileData,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock_data(&self.data)?.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FileProvider for MemoryFileProvider {
    fn list(&self, path: &str) -> io::Result<Vec<FileInfo>> {
        let path = normalize(path)?;
        let nodes = self.read()?;
        if !Self::is_dir_in(&nodes, &path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no directory at {path}"),
            ));
        }
        nodes
            .iter()
            .filter(|(key, _)| key.as_str() != ROOT_PATH && parent_of(key) == path)
            .map(|(key, node)| Self::info(key, node))
            .collect()
    }

    fn file_info(&self, path: &str) -> io::Result<FileInfo> {
        let path = normalize(path)?;
        let nodes = self.read()?;
        let node = nodes
            .get(&path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no entry at {path}")))?;
        Self::info(&path, node)
    }

    fn exists(&self, path: &str) -> io::Result<bool> {
        let path = normalize(path)?;
        Ok(self.read()?.contains_key(&path))
    }

    fn is_directory(&self, path: &str) -> io::Result<bool> {
        let path = normalize(path)?;
        Ok(Self::is_dir_in(&*self.read()?, &path))
    }

    fn mkdir(&self, path: &str) -> io::Result<bool> {
        let path = normalize(path)?;
        let mut nodes = self.write()?;
        if nodes.contains_key(&path) || !Self::is_dir_in(&nodes, parent_of(&path)) {
            return Ok(false);
        }
        nodes.insert(
            path,
            Node::Directory {
                modified: SystemTime::now(),
            },
        );
        Ok(true)
    }

    fn mkdirs(&self, path: &str) -> io::Result<bool> {
        let path = normalize(path)?;
        let mut nodes = self.write()?;
        if Self::is_dir_in(&nodes, &path) {
            return Ok(false);
        }
        let mut missing = Vec::new();
        let mut current = String::new();
        for component in components(&path) {
            current.push('/');
            current.push_str(component);
            match nodes.get(&current) {
                Some(Node::File { .. }) => return Ok(false),
                Some(Node::Directory { .. }) => {}
                None => missing.push(current.clone()),
            }
        }
        let modified = SystemTime::now();
        for dir in missing {
            nodes.insert(dir, Node::Directory { modified });
        }
        Ok(true)
    }

    fn delete(&self, path: &str) -> io::Result<bool> {
        let path = normalize(path)?;
        let mut nodes = self.write()?;
        if path == ROOT_PATH || !nodes.contains_key(&path) {
            return Ok(false);
        }
        if Self::subtree(&nodes, &path).len() > 1 {
            return Ok(false);
        }
        nodes.remove(&path);
        Ok(true)
    }

    fn move_entry(&self, src: &str, dst: &str) -> io::Result<bool> {
        let (src, dst) = (normalize(src)?, normalize(dst)?);
        let mut nodes = self.write()?;
        if !Self::can_transfer(&nodes, &src, &dst) {
            return Ok(false);
        }
        for old in Self::subtree(&nodes, &src) {
            if let Some(node) = nodes.remove(&old) {
                let new = format!("{dst}{}", &old[src.len()..]);
                nodes.insert(new, node);
            }
        }
        Ok(true)
    }

    fn copy(&self, src: &str, dst: &str) -> io::Result<bool> {
        let (src, dst) = (normalize(src)?, normalize(dst)?);
        let mut nodes = self.write()?;
        if !Self::can_transfer(&nodes, &src, &dst) {
            return Ok(false);
        }
        let modified = SystemTime::now();
        for old in Self::subtree(&nodes, &src) {
            let copied = match nodes.get(&old) {
                Some(Node::Directory { .. }) => Node::Directory { modified },
                Some(Node::File { data, .. }) => Node::File {
                    data: Arc::new(Mutex::new(lock_data(data)?.clone())),
                    modified,
                },
                None => continue,
            };
            nodes.insert(format!("{dst}{}", &old[src.len()..]), copied);
        }
        Ok(true)
    }

    fn open_input(&self, path: &str) -> io::Result<Box<dyn RawInput>> {
        let path = normalize(path)?;
        let nodes = self.read()?;
        match nodes.get(&path) {
            Some(Node::File { data, .. }) => Ok(Box::new(Cursor::new(lock_data(data)?.clone()))),
            Some(Node::Directory { .. }) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{path} is a directory"),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no file at {path}"),
            )),
        }
    }

    fn open_output(&self, path: &str) -> io::Result<Box<dyn Write + Send>> {
        let path = normalize(path)?;
        let mut nodes = self.write()?;
        if !Self::is_dir_in(&nodes, parent_of(&path)) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("parent of {path} does not exist"),
            ));
        }
        let data = match nodes.get_mut(&path) {
            Some(Node::File { data, modified }) => {
                lock_data(data)?.clear();
                *modified = SystemTime::now();
                Arc::clone(data)
            }
            Some(Node::Directory { .. }) => {
                return Err(io::Error::new(
                    io::ErrorKind::IsADirectory,
                    format!("{path} is a directory"),
                ));
            }
            None => Self::new_file(&mut nodes, path),
        };
        Ok(Box::new(MemoryWriter { data }))
    }

    fn create_file(&self, path: &str) -> io::Result<FileInfo> {
        let path = normalize(path)?;
        let mut nodes = self.write()?;
        if nodes.contains_key(&path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{path} already exists"),
            ));
        }
        if !Self::is_dir_in(&nodes, parent_of(&path)) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("parent of {path} does not exist"),
            ));
        }
        Self::new_file(&mut nodes, path.clone());
        let node = nodes
            .get(&path)
            .ok_or_else(|| io::Error::other("file vanished after creation"))?;
        Self::info(&path, node)
    }
}
