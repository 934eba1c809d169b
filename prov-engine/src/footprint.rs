//! Footprint classification.
//!
//! A footprint records, for one application, which artifacts it created,
//! deleted, read and modified. Classification turns those four sets into
//! input/output buckets with plain set algebra.

use prov_core::{FileOp, FileOperation, FileState, FootprintType, InodeId, MlAssetState};
use std::collections::{BTreeMap, BTreeSet};

/// Operation sets of one execution context, keyed by artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Footprint<K: Ord, V> {
    /// First snapshot seen per artifact
    pub state: BTreeMap<K, V>,
    pub accessed: BTreeSet<K>,
    pub created: BTreeSet<K>,
    pub modified: BTreeSet<K>,
    pub deleted: BTreeSet<K>,
}

impl<K: Ord, V> Default for Footprint<K, V> {
    fn default() -> Self {
        Self {
            state: BTreeMap::new(),
            accessed: BTreeSet::new(),
            created: BTreeSet::new(),
            modified: BTreeSet::new(),
            deleted: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Clone, V> Footprint<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one operation. The snapshot is only built for unseen keys.
    pub fn record(&mut self, key: K, operation: FileOperation, snapshot: impl FnOnce() -> V) {
        self.state.entry(key.clone()).or_insert_with(snapshot);
        self.mark(key, operation);
    }

    fn mark(&mut self, key: K, operation: FileOperation) {
        let set = match operation {
            FileOperation::Create => &mut self.created,
            FileOperation::Delete => &mut self.deleted,
            FileOperation::AccessData => &mut self.accessed,
            FileOperation::ModifyData => &mut self.modified,
        };
        set.insert(key);
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Read but not created here.
    pub fn input(&self) -> BTreeSet<K> {
        self.accessed.difference(&self.created).cloned().collect()
    }

    /// Modified, neither created nor deleted here.
    pub fn output_modified(&self) -> BTreeSet<K> {
        self.modified
            .iter()
            .filter(|k| !self.created.contains(*k) && !self.deleted.contains(*k))
            .cloned()
            .collect()
    }

    /// Created and still present.
    pub fn output_added(&self) -> BTreeSet<K> {
        self.created.difference(&self.deleted).cloned().collect()
    }

    /// Pre-existing and removed.
    pub fn output_removed(&self) -> BTreeSet<K> {
        self.deleted.difference(&self.created).cloned().collect()
    }

    /// Created and deleted within the same context.
    pub fn output_tmp(&self) -> BTreeSet<K> {
        self.created.intersection(&self.deleted).cloned().collect()
    }

    /// Bucket of one artifact under ALL: the first matching rule in the order
    /// input, modified, added, removed, tmp.
    pub fn bucket(&self, key: &K) -> Option<FootprintType> {
        let created = self.created.contains(key);
        let deleted = self.deleted.contains(key);
        if self.accessed.contains(key) && !created {
            Some(FootprintType::Input)
        } else if self.modified.contains(key) && !created && !deleted {
            Some(FootprintType::OutputModified)
        } else if created && !deleted {
            Some(FootprintType::OutputAdded)
        } else if deleted && !created {
            Some(FootprintType::OutputRemoved)
        } else if created && deleted {
            Some(FootprintType::OutputTmp)
        } else {
            None
        }
    }

    fn members(&self, footprint_type: FootprintType) -> BTreeSet<K> {
        match footprint_type {
            FootprintType::All => self.state.keys().cloned().collect(),
            FootprintType::Input => self.input(),
            FootprintType::OutputModified => self.output_modified(),
            FootprintType::OutputAdded => self.output_added(),
            FootprintType::OutputRemoved => self.output_removed(),
            FootprintType::OutputTmp => self.output_tmp(),
        }
    }
}

/// Classify a footprint.
///
/// `ALL` tags every artifact with its [`Footprint::bucket`]; any other type
/// keeps only the members of that bucket. Artifacts without a bucket are
/// dropped.
pub fn classify<K: Ord + Clone, V>(
    mut footprint: Footprint<K, V>,
    footprint_type: FootprintType,
) -> BTreeMap<K, (FootprintType, V)> {
    let members = footprint.members(footprint_type);
    let mut result = BTreeMap::new();
    for key in members {
        let bucket = match footprint_type {
            FootprintType::All => footprint.bucket(&key),
            other => Some(other),
        };
        let Some(bucket) = bucket else {
            continue;
        };
        if let Some(value) = footprint.state.remove(&key) {
            result.insert(key, (bucket, value));
        }
    }
    result
}

/// Operations that can affect a footprint type. Empty means no narrowing.
pub fn footprint_operations(footprint_type: FootprintType) -> Vec<FileOperation> {
    match footprint_type {
        FootprintType::All => Vec::new(),
        FootprintType::Input => vec![FileOperation::Create, FileOperation::AccessData],
        FootprintType::OutputModified => vec![
            FileOperation::Create,
            FileOperation::ModifyData,
            FileOperation::Delete,
        ],
        FootprintType::OutputAdded | FootprintType::OutputTmp | FootprintType::OutputRemoved => {
            vec![FileOperation::Create, FileOperation::Delete]
        }
    }
}

/// File footprint keyed by inode.
pub fn file_footprint<'a>(ops: impl IntoIterator<Item = &'a FileOp>) -> Footprint<InodeId, FileState> {
    let mut footprint = Footprint::new();
    for op in ops {
        footprint.record(op.inode_id, op.operation, || FileState::from_op(op));
    }
    footprint
}

/// ML asset footprint keyed by `ml_id`.
///
/// Only operations on ML assets or their parts count. Creating or deleting a
/// part modifies the owning asset.
pub fn artifact_footprint<'a>(
    ops: impl IntoIterator<Item = &'a FileOp>,
) -> Footprint<String, MlAssetState> {
    let mut footprint = Footprint::new();
    for op in ops {
        let subtype = op.doc_subtype;
        if !subtype.is_ml_parent() && !subtype.is_ml_part() {
            continue;
        }
        let Some(ml_id) = op.ml_id.as_ref() else {
            continue;
        };
        let operation = match op.operation {
            FileOperation::Create | FileOperation::Delete if subtype.is_ml_part() => {
                FileOperation::ModifyData
            }
            other => other,
        };
        footprint.record(ml_id.clone(), operation, || {
            MlAssetState::from_op(op, ml_id.clone(), subtype.ml_type())
        });
    }
    footprint
}
