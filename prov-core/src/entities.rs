//! Provenance records and their index document form.

use crate::enums::{AppState, DocSubType, EntryType, FileOperation, FootprintType, MlType};
use crate::error::{BackendError, ProvResult};
use crate::fields::columns;
use crate::query::{Document, Hit};
use crate::InodeId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// App id recorded for operations that ran outside any application.
pub const NO_APP_ID: &str = "none";

fn no_app() -> String {
    NO_APP_ID.to_string()
}

fn from_hit<T: DeserializeOwned>(hit: &Hit) -> ProvResult<T> {
    serde_json::from_value(Value::Object(hit.source.clone())).map_err(|e| {
        BackendError::MalformedDocument {
            id: hit.id.clone(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn to_document<T: Serialize>(value: &T, entry_type: EntryType) -> Document {
    let mut doc = match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Document::new(),
    };
    doc.insert(
        columns::ENTRY_TYPE.to_string(),
        Value::from(entry_type.column_value()),
    );
    doc
}

// ============================================================================
// OPERATION EVENTS
// ============================================================================

/// One immutable filesystem operation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOp {
    /// Index-assigned document id
    #[serde(skip)]
    pub id: String,
    pub inode_id: InodeId,
    #[serde(rename = "parent_i_id")]
    pub parent_inode_id: InodeId,
    #[serde(rename = "project_i_id")]
    pub project_inode_id: InodeId,
    #[serde(rename = "dataset_i_id", default)]
    pub dataset_inode_id: InodeId,
    #[serde(default)]
    pub inode_name: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub user_id: i32,
    #[serde(default = "no_app")]
    pub app_id: String,
    #[serde(rename = "inode_operation")]
    pub operation: FileOperation,
    pub timestamp: i64,
    #[serde(default)]
    pub logical_time: i32,
    #[serde(default)]
    pub partition_id: i64,
    #[serde(rename = "ml_type", default)]
    pub doc_subtype: DocSubType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ml_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xattr_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xattr_val: Option<Value>,
}

impl FileOp {
    /// Parse an operation document.
    pub fn from_hit(hit: &Hit) -> ProvResult<Self> {
        let mut op: FileOp = from_hit(hit)?;
        op.id = hit.id.clone();
        Ok(op)
    }

    /// Document form, tagged `entry_type = operation`.
    pub fn to_document(&self) -> Document {
        to_document(self, EntryType::Operation)
    }

    /// Application this operation belongs to, if any.
    pub fn app(&self) -> Option<&str> {
        if self.app_id == NO_APP_ID {
            None
        } else {
            Some(self.app_id.as_str())
        }
    }
}

// ============================================================================
// FILE STATE
// ============================================================================

/// Current state of one tracked artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileState {
    #[serde(skip)]
    pub id: String,
    pub inode_id: InodeId,
    #[serde(rename = "parent_i_id")]
    pub parent_inode_id: InodeId,
    #[serde(rename = "project_i_id")]
    pub project_inode_id: InodeId,
    #[serde(rename = "dataset_i_id", default)]
    pub dataset_inode_id: InodeId,
    #[serde(default)]
    pub inode_name: String,
    #[serde(default)]
    pub create_timestamp: i64,
    #[serde(default)]
    pub user_id: i32,
    #[serde(default = "no_app")]
    pub app_id: String,
    #[serde(rename = "ml_type", default)]
    pub doc_subtype: DocSubType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ml_id: Option<String>,
    #[serde(rename = "xattr_prov", default)]
    pub xattrs: BTreeMap<String, Value>,
    /// Footprint bucket, set by footprint classification
    #[serde(skip)]
    pub footprint: Option<FootprintType>,
    /// Application state, set by the app expansion
    #[serde(skip)]
    pub app_state: Option<AppStateSummary>,
}

impl FileState {
    /// Parse a state document.
    pub fn from_hit(hit: &Hit) -> ProvResult<Self> {
        let mut state: FileState = from_hit(hit)?;
        state.id = hit.id.clone();
        Ok(state)
    }

    /// Document form, tagged `entry_type = state`.
    pub fn to_document(&self) -> Document {
        to_document(self, EntryType::State)
    }

    /// Minimal state snapshot derived from an operation event.
    pub fn from_op(op: &FileOp) -> Self {
        Self {
            id: op.id.clone(),
            inode_id: op.inode_id,
            parent_inode_id: op.parent_inode_id,
            project_inode_id: op.project_inode_id,
            dataset_inode_id: op.dataset_inode_id,
            inode_name: op.inode_name.clone(),
            create_timestamp: op.timestamp,
            user_id: op.user_id,
            app_id: op.app_id.clone(),
            doc_subtype: op.doc_subtype,
            ml_id: op.ml_id.clone(),
            xattrs: BTreeMap::new(),
            footprint: None,
            app_state: None,
        }
    }

    /// Application that created this artifact. An app id of `none` falls
    /// back to an `appId` extended attribute.
    pub fn app(&self) -> Option<String> {
        if self.app_id != NO_APP_ID {
            return Some(self.app_id.clone());
        }
        match self.xattrs.get("appId") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }
}

/// Minimal state of an ML asset, used by the artifact footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlAssetState {
    pub ml_id: String,
    pub ml_type: MlType,
    pub project_inode_id: InodeId,
    pub dataset_inode_id: InodeId,
    pub app_id: String,
    #[serde(skip)]
    pub footprint: Option<FootprintType>,
}

impl MlAssetState {
    pub fn from_op(op: &FileOp, ml_id: String, ml_type: MlType) -> Self {
        Self {
            ml_id,
            ml_type,
            project_inode_id: op.project_inode_id,
            dataset_inode_id: op.dataset_inode_id,
            app_id: op.app_id.clone(),
            footprint: None,
        }
    }
}

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// One application state transition as stored in the app index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStateRecord {
    pub app_id: String,
    #[serde(rename = "app_state")]
    pub state: AppState,
    pub timestamp: i64,
    #[serde(rename = "app_name", default)]
    pub name: String,
    #[serde(rename = "app_user", default)]
    pub user: String,
}

impl AppStateRecord {
    pub fn from_hit(hit: &Hit) -> ProvResult<Self> {
        from_hit(hit)
    }

    pub fn to_document(&self) -> Document {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Document::new(),
        }
    }
}

/// Application state attached to query results by the app expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStateSummary {
    pub current_state: AppState,
    pub submit_time: Option<i64>,
    pub start_time: Option<i64>,
    pub finish_time: Option<i64>,
    pub name: Option<String>,
    pub user: Option<String>,
}

impl AppStateSummary {
    /// Summary for an application with no recorded state.
    pub fn unknown() -> Self {
        Self {
            current_state: AppState::Unknown,
            submit_time: None,
            start_time: None,
            finish_time: None,
            name: None,
            user: None,
        }
    }

    /// Fold the recorded states in lifecycle order; the last one is current.
    pub fn from_states(states: &BTreeMap<AppState, AppStateRecord>) -> Self {
        let mut summary = Self::unknown();
        for record in states.values() {
            summary.current_state = record.state;
            match record.state {
                AppState::Submitted => summary.submit_time = Some(record.timestamp),
                AppState::Running => summary.start_time = Some(record.timestamp),
                s if s.is_final() => summary.finish_time = Some(record.timestamp),
                _ => {}
            }
            if summary.name.is_none() && !record.name.is_empty() {
                summary.name = Some(record.name.clone());
            }
            if summary.user.is_none() && !record.user.is_empty() {
                summary.user = Some(record.user.clone());
            }
        }
        summary
    }
}

// ============================================================================
// ARCHIVAL
// ============================================================================

/// Per-artifact archive pointer document (`<inode>-archive`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivePointer {
    pub inode_id: InodeId,
    /// `coldStorePath:line` entries
    #[serde(rename = "archive_loc", default)]
    pub locations: Vec<String>,
}

impl ArchivePointer {
    pub fn empty(inode_id: InodeId) -> Self {
        Self {
            inode_id,
            locations: Vec::new(),
        }
    }

    pub fn from_hit(hit: &Hit) -> ProvResult<Self> {
        from_hit(hit)
    }

    /// Header document, tagged `entry_type = archive`.
    pub fn to_document(&self) -> Document {
        to_document(self, EntryType::Archive)
    }
}

/// A project owning a provenance index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub inode_id: InodeId,
    pub name: String,
    /// Filesystem path of the project root
    pub path: String,
}

impl Project {
    pub fn new(inode_id: InodeId, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            inode_id,
            name: name.into(),
            path: path.into(),
        }
    }
}
