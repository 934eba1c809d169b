//! Project lookup by inode.

use prov_core::{BackendError, InodeId, Project, ProvResult};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Resolves the project owning a provenance index.
pub trait ProjectResolver: Send + Sync {
    /// Project whose root directory has this inode, `None` once deleted.
    fn project_by_inode(&self, inode_id: InodeId) -> ProvResult<Option<Project>>;
}

/// Project registry held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProjects {
    projects: Arc<RwLock<BTreeMap<InodeId, Project>>>,
}

impl InMemoryProjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project: Project) -> ProvResult<()> {
        let mut projects = self.projects.write().map_err(|_| BackendError::LockPoisoned)?;
        projects.insert(project.inode_id, project);
        Ok(())
    }

    pub fn remove(&self, inode_id: InodeId) -> ProvResult<Option<Project>> {
        let mut projects = self.projects.write().map_err(|_| BackendError::LockPoisoned)?;
        Ok(projects.remove(&inode_id))
    }
}

impl ProjectResolver for InMemoryProjects {
    fn project_by_inode(&self, inode_id: InodeId) -> ProvResult<Option<Project>> {
        let projects = self.projects.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(projects.get(&inode_id).cloned())
    }
}
