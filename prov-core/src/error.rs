//! Error types for provenance operations

use thiserror::Error;

/// Malformed client queries. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Unknown field: {field} - supported: {supported}")]
    UnknownField { field: String, supported: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Filter {filter} not supported on field {field}")]
    UnsupportedFilter { field: String, filter: String },

    #[error("Unsupported query combination: {reason}")]
    UnsupportedCombination { reason: String },

    #[error("Unknown aggregation: {name} - supported: {supported}")]
    UnknownAggregation { name: String, supported: String },

    #[error("Invalid sort {raw}: {reason}")]
    InvalidSort { raw: String, reason: String },
}

/// Search index failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Index not found: {index}")]
    IndexNotFound { index: String },

    #[error("Document not found in {index}: {id}")]
    DocumentNotFound { index: String, id: String },

    #[error("Scroll context not found: {scroll_id}")]
    ScrollNotFound { scroll_id: String },

    #[error("Malformed document {id}: {reason}")]
    MalformedDocument { id: String, reason: String },

    #[error("Backend lock poisoned")]
    LockPoisoned,
}

/// Cold store layout and write failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArchivalError {
    #[error("Archive directory {path} exists and is not a directory")]
    NotADirectory { path: String },

    #[error("Archive io error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Corrupt archive status file {path}: {reason}")]
    CorruptStatus { path: String, reason: String },

    #[error("Operation document {doc_id} carries no inode id")]
    MissingInode { doc_id: String },

    #[error("Archive project path {path} does not exist anymore")]
    MissingProject { path: String },

    #[error("Archive serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Index mapping problems. Refreshed once before giving up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("No mapping for index {index}")]
    NoIndex { index: String },

    #[error("Index {index} has no mapping for field {field}")]
    MissingField { index: String, field: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },
}

/// Master error type for all provenance errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvError {
    #[error("Malformed query: {0}")]
    Query(#[from] QueryError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Archival store error: {0}")]
    Archival(#[from] ArchivalError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ProvError {
    /// Client-side mistake, reported as-is and never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ProvError::Query(_))
    }

    /// Service failure a later invocation may get past.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProvError::Backend(BackendError::Unavailable { .. })
                | ProvError::Backend(BackendError::LockPoisoned)
        )
    }
}

/// Result type alias for provenance operations.
pub type ProvResult<T> = Result<T, ProvError>;

// =============================================================================
// TESTS
// =============================================================================
