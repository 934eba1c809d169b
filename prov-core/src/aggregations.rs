//! Named aggregations over operation events and their result parsers.

use crate::enums::{EnumParseError, FileOperation};
use crate::error::QueryError;
use crate::fields::columns;
use crate::query::{AggregationBucket, AggregationSpec, BucketOrder, Metric};
use crate::InodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregations a file-ops query may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvAggregation {
    FilesIn,
    FilesLeastActiveByLastAccessed,
    ProjectsLeastActiveByLastAccessed,
    ArtifactFootprint,
}

impl_db_enum!(ProvAggregation, "aggregation", {
    FilesIn => "FILES_IN",
    FilesLeastActiveByLastAccessed => "FILES_LEAST_ACTIVE_BY_LAST_ACCESSED",
    ProjectsLeastActiveByLastAccessed => "PROJECTS_LEAST_ACTIVE_BY_LAST_ACCESSED",
    ArtifactFootprint => "ARTIFACT_FOOTPRINT",
});

impl ProvAggregation {
    /// Parse an aggregation name, reporting the supported set on failure.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        Self::from_db_str(raw).map_err(|_| QueryError::UnknownAggregation {
            name: raw.to_string(),
            supported: Self::supported(),
        })
    }

    /// Aggregation request; `size` bounds the top level bucket count.
    pub fn spec(&self, size: usize) -> AggregationSpec {
        match self {
            ProvAggregation::FilesIn => {
                AggregationSpec::terms("files_in", columns::INODE_ID, size)
            }
            ProvAggregation::FilesLeastActiveByLastAccessed => AggregationSpec::terms(
                "files_least_active_by_last_accessed",
                columns::INODE_ID,
                size,
            )
            .with_metric(Metric::Max(columns::TIMESTAMP.to_string()))
            .ordered_by(BucketOrder::MetricAsc),
            ProvAggregation::ProjectsLeastActiveByLastAccessed => AggregationSpec::terms(
                "projects_least_active_by_last_accessed",
                columns::PROJECT_I_ID,
                size,
            )
            .with_metric(Metric::Max(columns::TIMESTAMP.to_string()))
            .ordered_by(BucketOrder::MetricAsc),
            ProvAggregation::ArtifactFootprint => {
                AggregationSpec::terms("artifacts", columns::ML_ID, size).with_sub(
                    AggregationSpec::terms("files", columns::INODE_ID, size).with_sub(
                        AggregationSpec::terms("ops", columns::INODE_OPERATION, size)
                            .with_metric(Metric::Min(columns::TIMESTAMP.to_string())),
                    ),
                )
            }
        }
    }

    /// Typed view of the buckets returned for this aggregation.
    pub fn parse_result(&self, buckets: &[AggregationBucket]) -> AggregationResult {
        match self {
            ProvAggregation::FilesIn => {
                AggregationResult::FilesIn(buckets.iter().filter_map(file_count).collect())
            }
            ProvAggregation::FilesLeastActiveByLastAccessed => AggregationResult::FilesLeastActive(
                buckets.iter().filter_map(last_access).collect(),
            ),
            ProvAggregation::ProjectsLeastActiveByLastAccessed => {
                AggregationResult::ProjectsLeastActive(
                    buckets.iter().filter_map(last_access).collect(),
                )
            }
            ProvAggregation::ArtifactFootprint => AggregationResult::ArtifactFootprint(
                buckets.iter().filter_map(artifact_footprint).collect(),
            ),
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Document count per key (an inode or a project inode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAggregation {
    pub inode_id: InodeId,
    pub count: u64,
    #[serde(rename = "lastOpTimestamp", skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<i64>,
}

/// Per-file activity inside one ML artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub inode_id: InodeId,
    pub create: Option<i64>,
    pub delete: Option<i64>,
    pub first_read: Option<i64>,
    pub first_append: Option<i64>,
    pub read_count: u64,
    pub append_count: u64,
}

/// Files composing one ML artifact with their first operation times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFootprint {
    pub ml_id: String,
    pub files: Vec<ArtifactFile>,
}

/// Parsed aggregation output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationResult {
    FilesIn(Vec<FileAggregation>),
    FilesLeastActive(Vec<FileAggregation>),
    ProjectsLeastActive(Vec<FileAggregation>),
    ArtifactFootprint(Vec<ArtifactFootprint>),
}

fn file_count(bucket: &AggregationBucket) -> Option<FileAggregation> {
    Some(FileAggregation {
        inode_id: bucket.key_as_i64()?,
        count: bucket.doc_count,
        last_accessed: None,
    })
}

fn last_access(bucket: &AggregationBucket) -> Option<FileAggregation> {
    Some(FileAggregation {
        inode_id: bucket.key_as_i64()?,
        count: bucket.doc_count,
        last_accessed: bucket.metric.map(|m| m as i64),
    })
}

fn artifact_footprint(bucket: &AggregationBucket) -> Option<ArtifactFootprint> {
    let ml_id = bucket.key_as_str()?.to_string();
    let files = bucket
        .sub
        .iter()
        .filter_map(|file_bucket| {
            let mut file = ArtifactFile {
                inode_id: file_bucket.key_as_i64()?,
                ..ArtifactFile::default()
            };
            for op_bucket in &file_bucket.sub {
                let first = op_bucket.metric.map(|m| m as i64);
                let op = op_bucket.key_as_str().map(FileOperation::from_str);
                match op {
                    Some(Ok(FileOperation::Create)) => file.create = first,
                    Some(Ok(FileOperation::Delete)) => file.delete = first,
                    Some(Ok(FileOperation::AccessData)) => {
                        file.first_read = first;
                        file.read_count = op_bucket.doc_count;
                    }
                    Some(Ok(FileOperation::ModifyData)) => {
                        file.first_append = first;
                        file.append_count = op_bucket.doc_count;
                    }
                    _ => {}
                }
            }
            Some(file)
        })
        .collect();
    Some(ArtifactFootprint { ml_id, files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket(key: serde_json::Value, count: u64, metric: Option<f64>) -> AggregationBucket {
        AggregationBucket {
            key,
            doc_count: count,
            metric,
            sub: Vec::new(),
        }
    }

    #[test]
    fn test_unknown_aggregation_lists_supported() {
        let err = ProvAggregation::parse("MOST_ACTIVE").unwrap_err();
        match err {
            QueryError::UnknownAggregation { name, supported } => {
                assert_eq!(name, "MOST_ACTIVE");
                assert!(supported.contains("ARTIFACT_FOOTPRINT"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            ProvAggregation::parse("files_in").unwrap(),
            ProvAggregation::FilesIn
        );
    }

    #[test]
    fn test_least_active_spec_orders_by_max_timestamp() {
        let spec = ProvAggregation::ProjectsLeastActiveByLastAccessed.spec(50);
        assert_eq!(spec.field, "project_i_id");
        assert_eq!(spec.size, 50);
        assert_eq!(spec.order, BucketOrder::MetricAsc);
        assert_eq!(spec.metric, Some(Metric::Max("timestamp".to_string())));
    }

    #[test]
    fn test_parse_last_access() {
        let buckets = vec![bucket(json!(7), 3, Some(120.0)), bucket(json!(9), 1, Some(300.0))];
        let result = ProvAggregation::FilesLeastActiveByLastAccessed.parse_result(&buckets);
        assert_eq!(
            result,
            AggregationResult::FilesLeastActive(vec![
                FileAggregation {
                    inode_id: 7,
                    count: 3,
                    last_accessed: Some(120)
                },
                FileAggregation {
                    inode_id: 9,
                    count: 1,
                    last_accessed: Some(300)
                },
            ])
        );
    }

    #[test]
    fn test_parse_artifact_footprint() {
        let mut file = bucket(json!(11), 4, None);
        file.sub = vec![
            bucket(json!("CREATE"), 1, Some(10.0)),
            bucket(json!("ACCESS_DATA"), 2, Some(20.0)),
            bucket(json!("MODIFY_DATA"), 1, Some(30.0)),
        ];
        let mut artifact = bucket(json!("model_1"), 4, None);
        artifact.sub = vec![file];

        let result = ProvAggregation::ArtifactFootprint.parse_result(&[artifact]);
        let AggregationResult::ArtifactFootprint(artifacts) = result else {
            panic!("expected artifact footprint");
        };
        assert_eq!(artifacts.len(), 1);
        let file = &artifacts[0].files[0];
        assert_eq!(file.create, Some(10));
        assert_eq!(file.delete, None);
        assert_eq!(file.first_read, Some(20));
        assert_eq!(file.read_count, 2);
        assert_eq!(file.append_count, 1);
    }
}
