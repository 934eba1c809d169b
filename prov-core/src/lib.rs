//! Provenance Core - data model and query descriptors
//!
//! Record types, the field registry, filter/sort/aggregation descriptors and
//! the parameter builders shared by every other crate. No I/O happens here.

#[macro_use]
pub mod enums;

pub mod aggregations;
pub mod config;
pub mod entities;
pub mod error;
pub mod fields;
pub mod filter;
pub mod params;
pub mod query;

/// Filesystem inode identifier.
pub type InodeId = i64;

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub use aggregations::{
    AggregationResult, ArtifactFile, ArtifactFootprint, FileAggregation, ProvAggregation,
};
pub use config::ProvConfig;
pub use entities::{
    AppStateRecord, AppStateSummary, ArchivePointer, FileOp, FileState, MlAssetState, Project,
    NO_APP_ID,
};
pub use enums::{
    AppState, DocSubType, EntryType, EnumParseError, Expansion, FileOperation, FootprintType,
    MlType, ReturnType, SortOrder,
};
pub use error::{
    ArchivalError, BackendError, ConfigError, MappingError, ProvError, ProvResult, QueryError,
};
pub use fields::{columns, FieldDef, RecordKind, ValueParser};
pub use filter::{add_to_filters, apply_filters, filter_key, FilterMap, FilterOperator, FilterVal};
pub use params::{FileOpsParams, FileStateParams, Pagination, RawFilter};
pub use query::{
    AggregationBucket, AggregationSpec, BoolQuery, BucketOrder, Document, FilterScript, Hit,
    Metric, Query, RangeOp, SearchPage, SearchRequest, SortSpec,
};
