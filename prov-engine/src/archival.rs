//! Archival and cleanup of operation events.
//!
//! Old operations leave the live index in per-artifact prefixes: every
//! operation of one inode up to a bound is scrolled oldest first, handed to an
//! [`ArchiveStore`] page by page and then bulk deleted. Archiving keeps the
//! pages in an append-only cold file and records where they went in the
//! artifact's archive pointer document; cleanup just drops them.
//!
//! A crash between an append and the paired delete archives that page twice
//! on the next run. Archival is at-least-once.

use crate::projects::ProjectResolver;
use prov_core::{
    columns, ArchivalError, ArchivePointer, BackendError, BoolQuery, Document, EntryType,
    FileOp, FileOperation, FileOpsParams, InodeId, Project, ProvConfig, ProvError, ProvResult,
    Query, QueryError, RangeOp, SearchRequest, SortSpec,
};
use prov_storage::{ColdStore, Scroll, SearchIndex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Directory, relative to the project root, holding the archive files.
pub const ARCHIVE_DIR: &str = "Resources/provenance";
pub const ARCHIVE_FILE: &str = "archive";
pub const STATUS_FILE: &str = "status";
/// Location reported by [`NoStore`].
pub const NO_STORE_LOCATION: &str = "no_store";

/// Id of the archive pointer document of an inode.
pub fn archive_id(inode_id: InodeId) -> String {
    format!("{}-archive", inode_id)
}

/// Work done by one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Operations moved to cold storage
    pub archived: u64,
    /// Operations or whole indices discarded
    pub cleaned: u64,
}

// ============================================================================
// ARCHIVE STORES
// ============================================================================

/// Destination of archived operations.
pub trait ArchiveStore {
    fn init(&mut self) -> ProvResult<()>;

    /// Queue one operation document of `inode_id`.
    fn add_op(&mut self, inode_id: InodeId, op: Document);

    /// Flush queued operations; returns the line the store is at.
    fn save(&mut self) -> ProvResult<u64>;

    fn location(&self) -> String;
}

/// Store that discards everything. Used for cleanup.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStore;

impl ArchiveStore for NoStore {
    fn init(&mut self) -> ProvResult<()> {
        Ok(())
    }

    fn add_op(&mut self, _inode_id: InodeId, _op: Document) {}

    fn save(&mut self) -> ProvResult<u64> {
        Ok(0)
    }

    fn location(&self) -> String {
        NO_STORE_LOCATION.to_string()
    }
}

/// Append-only archive in the project's `Resources/provenance` directory.
///
/// `archive` receives one JSON line per artifact and save; `status` holds the
/// number of lines written so far so numbering survives restarts.
pub struct ColdFileStore<C: ColdStore + ?Sized> {
    cold: Arc<C>,
    project_path: String,
    line: u64,
    pending: BTreeMap<InodeId, Vec<Document>>,
}

impl<C: ColdStore + ?Sized> ColdFileStore<C> {
    pub fn new(cold: Arc<C>, project_path: impl Into<String>) -> Self {
        Self {
            cold,
            project_path: project_path.into().trim_end_matches('/').to_string(),
            line: 0,
            pending: BTreeMap::new(),
        }
    }

    pub fn dir(&self) -> String {
        format!("{}/{}", self.project_path, ARCHIVE_DIR)
    }

    pub fn archive_path(&self) -> String {
        format!("{}/{}", self.dir(), ARCHIVE_FILE)
    }

    pub fn status_path(&self) -> String {
        format!("{}/{}", self.dir(), STATUS_FILE)
    }

    /// Lines written so far.
    pub fn line(&self) -> u64 {
        self.line
    }
}

impl<C: ColdStore + ?Sized> ArchiveStore for ColdFileStore<C> {
    fn init(&mut self) -> ProvResult<()> {
        let dir = self.dir();
        if !self.cold.exists(&dir)? {
            self.cold.mkdirs(&dir)?;
        } else if !self.cold.is_dir(&dir)? {
            return Err(ArchivalError::NotADirectory { path: dir }.into());
        }
        self.cold.create_if_absent(&self.archive_path())?;

        let status = self.status_path();
        if self.cold.create_if_absent(&status)? {
            self.cold.write(&status, "0")?;
            self.line = 0;
        } else {
            let content = self.cold.read_to_string(&status)?;
            let content = content.trim();
            self.line = if content.is_empty() {
                0
            } else {
                content.parse().map_err(|_| ArchivalError::CorruptStatus {
                    path: status.clone(),
                    reason: format!("expected a line number, found {:?}", content),
                })?
            };
        }
        Ok(())
    }

    fn add_op(&mut self, inode_id: InodeId, op: Document) {
        self.pending.entry(inode_id).or_default().push(op);
    }

    fn save(&mut self) -> ProvResult<u64> {
        if self.pending.is_empty() {
            return Ok(self.line);
        }
        if !self.cold.exists(&self.project_path)? {
            return Err(ArchivalError::MissingProject {
                path: self.project_path.clone(),
            }
            .into());
        }
        let mut content = String::new();
        let mut lines = 0;
        for (inode_id, ops) in std::mem::take(&mut self.pending) {
            let line = serde_json::to_string(&json!({ "inode_id": inode_id, "ops": ops }))
                .map_err(|e| ArchivalError::Serialization {
                    reason: e.to_string(),
                })?;
            content.push_str(&line);
            content.push('\n');
            lines += 1;
        }
        self.cold.append(&self.archive_path(), &content)?;
        self.line += lines;
        self.cold.write(&self.status_path(), &self.line.to_string())?;
        Ok(self.line)
    }

    fn location(&self) -> String {
        self.archive_path()
    }
}

// ============================================================================
// CONTROLLER
// ============================================================================

/// Archival and cleanup over every project operation index.
pub struct ArchivalController {
    index: Arc<dyn SearchIndex>,
    cold: Arc<dyn ColdStore>,
    projects: Arc<dyn ProjectResolver>,
    config: ProvConfig,
}

impl ArchivalController {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        cold: Arc<dyn ColdStore>,
        projects: Arc<dyn ProjectResolver>,
        config: ProvConfig,
    ) -> Self {
        Self {
            index,
            cold,
            projects,
            config,
        }
    }

    pub fn config(&self) -> &ProvConfig {
        &self.config
    }

    fn project_index(&self, project: &Project) -> String {
        self.config.project_index(project.inode_id)
    }

    /// Cold store for a project's archive files.
    pub fn cold_store(&self, project: &Project) -> ColdFileStore<dyn ColdStore> {
        ColdFileStore::new(self.cold.clone(), project.path.clone())
    }

    /// Stored archive pointer of an inode, empty when none was created.
    pub fn archive_pointer(&self, project: &Project, inode_id: InodeId) -> ProvResult<ArchivePointer> {
        match self
            .index
            .get_doc(&self.project_index(project), &archive_id(inode_id))?
        {
            Some(hit) => ArchivePointer::from_hit(&hit),
            None => Ok(ArchivePointer::empty(inode_id)),
        }
    }

    /// Create the archive pointer document unless it exists.
    fn ensure_archive_pointer(&self, index: &str, inode_id: InodeId) -> ProvResult<()> {
        let id = archive_id(inode_id);
        if self.index.get_doc(index, &id)?.is_none() {
            self.index.index_doc(
                index,
                Some(&id),
                ArchivePointer::empty(inode_id).to_document(),
            )?;
            tracing::debug!(index = %index, inode_id, "Created archive pointer");
        }
        Ok(())
    }

    /// Scroll the operations matched by `query` oldest first, moving each page
    /// to `store`. With `pointer` set, the artifact's archive pointer is
    /// updated after every saved page.
    fn move_prefix(
        &self,
        index: &str,
        query: Query,
        store: &mut dyn ArchiveStore,
        pointer: Option<InodeId>,
    ) -> ProvResult<u64> {
        let request = SearchRequest::new(query, self.config.archival_page_size)
            .sort_by(SortSpec::asc(columns::TIMESTAMP));
        let mut scroll = Scroll::open(self.index.as_ref(), index, &request)?;
        let mut moved = 0u64;
        while let Some(page) = scroll.next_page()? {
            let mut ids = Vec::with_capacity(page.len());
            for hit in page {
                let inode_id = hit
                    .source
                    .get(columns::INODE_ID)
                    .and_then(Value::as_i64)
                    .ok_or_else(|| ArchivalError::MissingInode {
                        doc_id: hit.id.clone(),
                    })?;
                ids.push(hit.id);
                store.add_op(inode_id, hit.source);
            }
            let line = store.save()?;
            if let Some(inode_id) = pointer {
                let mut partial = Document::new();
                partial.insert(
                    columns::ARCHIVE_LOC.to_string(),
                    json!([format!("{}:{}", store.location(), line)]),
                );
                self.index.update_doc(index, &archive_id(inode_id), partial)?;
            }
            let deleted = self.index.bulk_delete(index, &ids)?;
            moved += deleted as u64;
        }
        Ok(moved)
    }

    fn prefix_query(inode_id: InodeId, before_ts: Option<i64>, skip_doc: Option<&str>) -> Query {
        let mut query = BoolQuery::new()
            .must(Query::term(
                columns::ENTRY_TYPE,
                EntryType::Operation.column_value(),
            ))
            .must(Query::term(columns::INODE_ID, inode_id))
            .must_not(Query::ids(vec![archive_id(inode_id)]));
        if let Some(ts) = before_ts {
            query = query.must(Query::range(columns::TIMESTAMP, RangeOp::Lte, ts));
        }
        if let Some(doc_id) = skip_doc {
            query = query.must_not(Query::ids(vec![doc_id.to_string()]));
        }
        query.build()
    }

    // === Per-file prefixes ===

    /// Archive every operation of an inode, up to `before_ts` when given.
    pub fn archive_file_prefix(
        &self,
        project: &Project,
        inode_id: InodeId,
        before_ts: Option<i64>,
        store: &mut dyn ArchiveStore,
    ) -> ProvResult<u64> {
        let index = self.project_index(project);
        self.ensure_archive_pointer(&index, inode_id)?;
        let query = Self::prefix_query(inode_id, before_ts, None);
        self.move_prefix(&index, query, store, Some(inode_id))
    }

    /// Drop every operation of an inode, up to `before_ts` when given.
    pub fn cleanup_file_prefix(
        &self,
        project: &Project,
        inode_id: InodeId,
        before_ts: Option<i64>,
    ) -> ProvResult<u64> {
        let index = self.project_index(project);
        let query = Self::prefix_query(inode_id, before_ts, None);
        self.move_prefix(&index, query, &mut NoStore, None)
    }

    /// Drop the history of the inode of `doc_id` up to that document's
    /// timestamp, optionally keeping the document itself.
    pub fn cleanup_file_prefix_by_doc(
        &self,
        project: &Project,
        doc_id: &str,
        skip_doc: bool,
    ) -> ProvResult<u64> {
        let index = self.project_index(project);
        let hit = self
            .index
            .get_doc(&index, doc_id)?
            .ok_or_else(|| BackendError::DocumentNotFound {
                index: index.clone(),
                id: doc_id.to_string(),
            })?;
        let inode_id = hit
            .source
            .get(columns::INODE_ID)
            .and_then(Value::as_i64)
            .ok_or_else(|| ArchivalError::MissingInode {
                doc_id: doc_id.to_string(),
            })?;
        let before_ts = hit.source.get(columns::TIMESTAMP).and_then(Value::as_i64);
        let query = Self::prefix_query(inode_id, before_ts, skip_doc.then_some(doc_id));
        self.move_prefix(&index, query, &mut NoStore, None)
    }

    // === Rounds ===

    /// DELETE operations older than `before_ts`, oldest first.
    pub fn cleanup_files(
        &self,
        project: &Project,
        limit: usize,
        before_ts: i64,
    ) -> ProvResult<Vec<FileOp>> {
        let params = FileOpsParams::new()
            .with_project(project.inode_id)
            .filter_by_operation(FileOperation::Delete);
        let query = BoolQuery::new()
            .must(params.query())
            .must(Query::range(columns::TIMESTAMP, RangeOp::Lt, before_ts))
            .build();
        let request = SearchRequest::new(query, limit)
            .sort_by(SortSpec::asc(columns::TIMESTAMP))
            .paginate(0, limit);
        let page = self.index.search(&self.project_index(project), &request)?;
        page.hits.iter().map(FileOp::from_hit).collect()
    }

    /// Drop the full history of deleted files, without archiving it.
    pub fn cleanup_round(&self, project: &Project, limit: usize, before_ts: i64) -> ProvResult<Round> {
        let mut cleaned = 0u64;
        for op in self.cleanup_files(project, limit, before_ts)? {
            cleaned += self.cleanup_file_prefix(project, op.inode_id, None)?;
            if cleaned > limit as u64 {
                break;
            }
        }
        tracing::info!(project = %project.name, cleaned, "Cleanup round finished");
        Ok(Round {
            archived: 0,
            cleaned,
        })
    }

    /// DELETE operations currently older than the archive delay.
    pub fn cleanup_size(&self, project: &Project) -> ProvResult<u64> {
        let before_ts = prov_core::now_millis() - self.config.archive_delay.as_millis() as i64;
        let params = FileOpsParams::new()
            .with_project(project.inode_id)
            .filter_by_operation(FileOperation::Delete);
        let query = BoolQuery::new()
            .must(params.query())
            .must(Query::range(columns::TIMESTAMP, RangeOp::Lt, before_ts))
            .build();
        self.index.count(&self.project_index(project), &query)
    }

    /// Archive the histories of files deleted before `before_ts`, stopping
    /// once more than `limit` operations were archived.
    pub fn archive_ops(&self, project: &Project, limit: usize, before_ts: i64) -> ProvResult<u64> {
        self.archive_closed(project, limit, before_ts, true)
    }

    /// Archive the histories of up to `limit` files deleted before
    /// `before_ts`.
    pub fn project_archive_round(
        &self,
        project: &Project,
        limit: usize,
        before_ts: i64,
    ) -> ProvResult<Round> {
        let archived = self.archive_closed(project, limit, before_ts, false)?;
        Ok(Round {
            archived,
            cleaned: 0,
        })
    }

    fn archive_closed(
        &self,
        project: &Project,
        limit: usize,
        before_ts: i64,
        stop_at_limit: bool,
    ) -> ProvResult<u64> {
        let mut archived = 0u64;
        for op in self.cleanup_files(project, limit, before_ts)? {
            let mut store = self.cold_store(project);
            let result = store
                .init()
                .and_then(|_| self.archive_file_prefix(project, op.inode_id, None, &mut store));
            match result {
                Ok(moved) => archived += moved,
                Err(ProvError::Archival(e)) => {
                    tracing::warn!(
                        project = %project.name,
                        inode_id = op.inode_id,
                        error = %e,
                        "Skipping artifact archival"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
            if stop_at_limit && archived > limit as u64 {
                break;
            }
        }
        Ok(archived)
    }

    /// Project owning an operation index, `None` when it is gone.
    fn index_owner(&self, index: &str) -> ProvResult<Option<Project>> {
        let prefix = self.config.index_project(index).unwrap_or(index);
        let inode_id: InodeId = prefix.parse().map_err(|_| QueryError::InvalidValue {
            field: "index".to_string(),
            value: index.to_string(),
            reason: "index name does not start with a project inode".to_string(),
        })?;
        self.projects.project_by_inode(inode_id)
    }

    fn delete_index(&self, index: &str) -> ProvResult<()> {
        match self.index.delete_index(index) {
            Ok(()) => Ok(()),
            Err(ProvError::Backend(BackendError::IndexNotFound { .. })) => {
                tracing::info!(index = %index, "Orphan index already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// One resumable sweep over every project operation index.
    ///
    /// Indices are visited in name order and those sorting before `cursor`
    /// are skipped. Orphan indices are deleted while fewer than `limit_idx`
    /// were; past that they are left for a later sweep. Live projects get the
    /// rest of the `limit_ops` archive budget, and the index reached once that
    /// budget is spent is returned as the next cursor. An empty cursor means
    /// the sweep went through every index.
    pub fn archive_round(
        &self,
        cursor: &str,
        limit_idx: usize,
        limit_ops: usize,
        before_ts: i64,
    ) -> ProvResult<(Round, String)> {
        let mut indices = self.index.list_indices(&self.config.file_index_pattern())?;
        indices.sort();
        let mut round = Round::default();
        let mut next = String::new();
        for index in indices {
            if index.as_str() < cursor {
                continue;
            }
            match self.index_owner(&index)? {
                None => {
                    if round.cleaned >= limit_idx as u64 {
                        tracing::debug!(index = %index, "Orphan budget spent, keeping index");
                        continue;
                    }
                    tracing::info!(index = %index, "Deleting provenance index with no project");
                    self.delete_index(&index)?;
                    round.cleaned += 1;
                }
                Some(project) => {
                    if round.archived >= limit_ops as u64 {
                        next = index;
                        break;
                    }
                    let budget = limit_ops - round.archived as usize;
                    round.archived += self.archive_ops(&project, budget, before_ts)?;
                }
            }
        }
        tracing::info!(
            archived = round.archived,
            cleaned = round.cleaned,
            next = %next,
            "Archive round finished"
        );
        Ok((round, next))
    }
}
