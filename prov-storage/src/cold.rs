//! Append-only cold storage addressed by path strings.

use prov_core::{ArchivalError, BackendError, ProvResult};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Filesystem used to keep archived operations.
///
/// A single writer per archive file is assumed.
pub trait ColdStore: Send + Sync {
    fn exists(&self, path: &str) -> ProvResult<bool>;

    fn is_dir(&self, path: &str) -> ProvResult<bool>;

    /// Create a directory and all missing parents.
    fn mkdirs(&self, path: &str) -> ProvResult<()>;

    /// Create an empty file unless one exists. Returns whether it was created.
    fn create_if_absent(&self, path: &str) -> ProvResult<bool>;

    /// Append to an existing file.
    fn append(&self, path: &str, content: &str) -> ProvResult<()>;

    /// Replace the content of a file, creating it if needed.
    fn write(&self, path: &str, content: &str) -> ProvResult<()>;

    fn read_to_string(&self, path: &str) -> ProvResult<String>;
}

fn io_error(path: &str, reason: impl ToString) -> ArchivalError {
    ArchivalError::Io {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// LOCAL FILESYSTEM
// ============================================================================

/// Cold store on the local filesystem. Store paths are resolved under `root`.
#[derive(Debug, Clone)]
pub struct LocalColdStore {
    root: PathBuf,
}

impl LocalColdStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl ColdStore for LocalColdStore {
    fn exists(&self, path: &str) -> ProvResult<bool> {
        Ok(self.resolve(path).exists())
    }

    fn is_dir(&self, path: &str) -> ProvResult<bool> {
        Ok(self.resolve(path).is_dir())
    }

    fn mkdirs(&self, path: &str) -> ProvResult<()> {
        std::fs::create_dir_all(self.resolve(path)).map_err(|e| io_error(path, e))?;
        Ok(())
    }

    fn create_if_absent(&self, path: &str) -> ProvResult<bool> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.resolve(path))
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(io_error(path, e).into()),
        }
    }

    fn append(&self, path: &str, content: &str) -> ProvResult<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.resolve(path))
            .map_err(|e| io_error(path, e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| io_error(path, e))?;
        Ok(())
    }

    fn write(&self, path: &str, content: &str) -> ProvResult<()> {
        std::fs::write(self.resolve(path), content).map_err(|e| io_error(path, e))?;
        Ok(())
    }

    fn read_to_string(&self, path: &str) -> ProvResult<String> {
        Ok(std::fs::read_to_string(self.resolve(path)).map_err(|e| io_error(path, e))?)
    }
}

// ============================================================================
// IN MEMORY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Dir,
    File(String),
}

/// Cold store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryColdStore {
    entries: RwLock<BTreeMap<String, Entry>>,
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parent(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(i) if i > 0 => Some(&path[..i]),
        _ => None,
    }
}

impl InMemoryColdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// File content, `None` for directories and missing paths.
    pub fn file(&self, path: &str) -> ProvResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(match entries.get(&normalize(path)) {
            Some(Entry::File(content)) => Some(content.clone()),
            _ => None,
        })
    }

    /// Remove a path and everything under it.
    pub fn remove(&self, path: &str) -> ProvResult<()> {
        let path = normalize(path);
        let prefix = format!("{}/", path);
        let mut entries = self.entries.write().map_err(|_| BackendError::LockPoisoned)?;
        entries.retain(|p, _| *p != path && !p.starts_with(&prefix));
        Ok(())
    }

    fn parent_is_dir(entries: &BTreeMap<String, Entry>, path: &str) -> bool {
        match parent(path) {
            Some("/") | None => true,
            Some(p) => entries.get(p) == Some(&Entry::Dir),
        }
    }
}

impl ColdStore for InMemoryColdStore {
    fn exists(&self, path: &str) -> ProvResult<bool> {
        let entries = self.entries.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(entries.contains_key(&normalize(path)))
    }

    fn is_dir(&self, path: &str) -> ProvResult<bool> {
        let entries = self.entries.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(entries.get(&normalize(path)) == Some(&Entry::Dir))
    }

    fn mkdirs(&self, path: &str) -> ProvResult<()> {
        let path = normalize(path);
        let mut entries = self.entries.write().map_err(|_| BackendError::LockPoisoned)?;
        let mut chain = vec![path.as_str()];
        let mut current = path.as_str();
        while let Some(p) = parent(current) {
            if p == "/" {
                break;
            }
            chain.push(p);
            current = p;
        }
        for dir in chain.into_iter().rev() {
            match entries.get(dir) {
                Some(Entry::File(_)) => return Err(io_error(dir, "not a directory").into()),
                Some(Entry::Dir) => {}
                None => {
                    entries.insert(dir.to_string(), Entry::Dir);
                }
            }
        }
        Ok(())
    }

    fn create_if_absent(&self, path: &str) -> ProvResult<bool> {
        let path = normalize(path);
        let mut entries = self.entries.write().map_err(|_| BackendError::LockPoisoned)?;
        if entries.contains_key(&path) {
            return Ok(false);
        }
        if !Self::parent_is_dir(&entries, &path) {
            return Err(io_error(&path, "parent directory does not exist").into());
        }
        entries.insert(path, Entry::File(String::new()));
        Ok(true)
    }

    fn append(&self, path: &str, content: &str) -> ProvResult<()> {
        let path = normalize(path);
        let mut entries = self.entries.write().map_err(|_| BackendError::LockPoisoned)?;
        match entries.get_mut(&path) {
            Some(Entry::File(existing)) => {
                existing.push_str(content);
                Ok(())
            }
            Some(Entry::Dir) => Err(io_error(&path, "is a directory").into()),
            None => Err(io_error(&path, "no such file").into()),
        }
    }

    fn write(&self, path: &str, content: &str) -> ProvResult<()> {
        let path = normalize(path);
        let mut entries = self.entries.write().map_err(|_| BackendError::LockPoisoned)?;
        if entries.get(&path) == Some(&Entry::Dir) {
            return Err(io_error(&path, "is a directory").into());
        }
        if !Self::parent_is_dir(&entries, &path) {
            return Err(io_error(&path, "parent directory does not exist").into());
        }
        entries.insert(path, Entry::File(content.to_string()));
        Ok(())
    }

    fn read_to_string(&self, path: &str) -> ProvResult<String> {
        let path = normalize(path);
        let entries = self.entries.read().map_err(|_| BackendError::LockPoisoned)?;
        match entries.get(&path) {
            Some(Entry::File(content)) => Ok(content.clone()),
            Some(Entry::Dir) => Err(io_error(&path, "is a directory").into()),
            None => Err(io_error(&path, "no such file").into()),
        }
    }
}
