//! Configuration types

use crate::error::{ConfigError, ProvResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Page size of archival scrolls.
pub const DEFAULT_ARCHIVAL_PAGE_SIZE: usize = 100;
/// Bucket size of aggregations and size of unpaginated listings.
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_ARCHIVE_SIZE: usize = 100;
pub const DEFAULT_CLEANUP_SIZE: usize = 10;
pub const DEFAULT_ARCHIVE_DELAY: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_TREE_MAX_ROUNDS: usize = 100;
pub const DEFAULT_FILE_INDEX_SUFFIX: &str = "__file_prov";
pub const DEFAULT_APP_INDEX: &str = "app_provenance";

/// Engine configuration. Missing fields take their defaults when
/// deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvConfig {
    pub archival_page_size: usize,
    pub default_page_size: usize,
    /// Operations archived per sweep
    pub archive_size: usize,
    /// Orphan indices or operations discarded per sweep
    pub cleanup_size: usize,
    /// Only operations older than `now - archive_delay` are archived
    #[serde(with = "duration_secs")]
    pub archive_delay: Duration,
    pub tree_max_rounds: usize,
    /// Per-project operation index is `<project_inode><suffix>`
    pub file_index_suffix: String,
    pub app_index: String,
}

impl Default for ProvConfig {
    fn default() -> Self {
        Self {
            archival_page_size: DEFAULT_ARCHIVAL_PAGE_SIZE,
            default_page_size: DEFAULT_PAGE_SIZE,
            archive_size: DEFAULT_ARCHIVE_SIZE,
            cleanup_size: DEFAULT_CLEANUP_SIZE,
            archive_delay: DEFAULT_ARCHIVE_DELAY,
            tree_max_rounds: DEFAULT_TREE_MAX_ROUNDS,
            file_index_suffix: DEFAULT_FILE_INDEX_SUFFIX.to_string(),
            app_index: DEFAULT_APP_INDEX.to_string(),
        }
    }
}

impl ProvConfig {
    /// Load from `PROV_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            archival_page_size: std::env::var("PROV_ARCHIVAL_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.archival_page_size),
            default_page_size: std::env::var("PROV_DEFAULT_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_page_size),
            archive_size: std::env::var("PROV_ARCHIVE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.archive_size),
            cleanup_size: std::env::var("PROV_CLEANUP_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cleanup_size),
            archive_delay: std::env::var("PROV_ARCHIVE_DELAY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.archive_delay),
            tree_max_rounds: std::env::var("PROV_TREE_MAX_ROUNDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.tree_max_rounds),
            file_index_suffix: std::env::var("PROV_FILE_INDEX_SUFFIX")
                .unwrap_or(defaults.file_index_suffix),
            app_index: std::env::var("PROV_APP_INDEX").unwrap_or(defaults.app_index),
        }
    }

    pub fn validate(&self) -> ProvResult<()> {
        for (field, value) in [
            ("archival_page_size", self.archival_page_size),
            ("default_page_size", self.default_page_size),
            ("tree_max_rounds", self.tree_max_rounds),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: format!("{} must be greater than 0", field),
                }
                .into());
            }
        }

        if self.file_index_suffix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "file_index_suffix".to_string(),
                value: String::new(),
                reason: "file_index_suffix must not be empty".to_string(),
            }
            .into());
        }

        if self.app_index.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "app_index".to_string(),
                value: String::new(),
                reason: "app_index must not be empty".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Operation index of a project.
    pub fn project_index(&self, project_inode: crate::InodeId) -> String {
        format!("{}{}", project_inode, self.file_index_suffix)
    }

    /// Pattern matching every project operation index.
    pub fn file_index_pattern(&self) -> String {
        format!("*{}", self.file_index_suffix)
    }

    /// Project inode encoded in an index name, `None` for foreign indices.
    pub fn index_project<'a>(&self, index: &'a str) -> Option<&'a str> {
        index.strip_suffix(self.file_index_suffix.as_str())
    }
}

/// Serde adapter storing a `Duration` as whole seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
