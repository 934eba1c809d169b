//! Persisted position of the cluster-wide archival sweep.

use chrono::{DateTime, Utc};
use prov_core::{ArchivalError, BackendError, ProvResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Last project index a sweep stopped at. Empty means start from the first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivalCursor {
    pub last_index_checked: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ArchivalCursor {
    pub fn new(last_index_checked: impl Into<String>) -> Self {
        Self {
            last_index_checked: last_index_checked.into(),
            updated_at: Some(Utc::now()),
        }
    }

    /// Whether the next sweep starts from the first index.
    pub fn is_start(&self) -> bool {
        self.last_index_checked.is_empty()
    }
}

/// Durable home of the [`ArchivalCursor`].
pub trait CursorStore: Send + Sync {
    /// Stored cursor, or the initial empty one.
    fn load(&self) -> ProvResult<ArchivalCursor>;

    fn save(&self, cursor: &ArchivalCursor) -> ProvResult<()>;
}

/// Cursor kept as a JSON file.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, e: impl ToString) -> ArchivalError {
        ArchivalError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self) -> ProvResult<ArchivalCursor> {
        if !self.path.exists() {
            return Ok(ArchivalCursor::default());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let cursor = serde_json::from_str::<ArchivalCursor>(&contents).map_err(|e| {
            ArchivalError::CorruptStatus {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(cursor)
    }

    fn save(&self, cursor: &ArchivalCursor) -> ProvResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let contents = serde_json::to_string_pretty(cursor).map_err(|e| {
            ArchivalError::Serialization {
                reason: e.to_string(),
            }
        })?;
        std::fs::write(&self.path, contents).map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

/// Cursor kept in memory; lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursor: RwLock<ArchivalCursor>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for InMemoryCursorStore {
    fn load(&self) -> ProvResult<ArchivalCursor> {
        let cursor = self.cursor.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(cursor.clone())
    }

    fn save(&self, cursor: &ArchivalCursor) -> ProvResult<()> {
        let mut current = self.cursor.write().map_err(|_| BackendError::LockPoisoned)?;
        *current = cursor.clone();
        Ok(())
    }
}
