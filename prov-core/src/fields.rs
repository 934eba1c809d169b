//! Field registry.
//!
//! One table per record kind, each entry carrying its backing column, the
//! filter operators it accepts and the parser for its values. Raw query
//! parameters are resolved against these tables only.

use crate::enums::{AppState, DocSubType, EntryType, FileOperation};
use crate::error::QueryError;
use crate::filter::FilterOperator;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;

/// Index column names.
pub mod columns {
    pub const INODE_ID: &str = "inode_id";
    pub const PARENT_I_ID: &str = "parent_i_id";
    pub const PROJECT_I_ID: &str = "project_i_id";
    pub const DATASET_I_ID: &str = "dataset_i_id";
    pub const INODE_NAME: &str = "inode_name";
    pub const PROJECT_NAME: &str = "project_name";
    pub const USER_ID: &str = "user_id";
    pub const APP_ID: &str = "app_id";
    pub const ML_TYPE: &str = "ml_type";
    pub const ML_ID: &str = "ml_id";
    pub const INODE_OPERATION: &str = "inode_operation";
    pub const PARTITION_ID: &str = "partition_id";
    pub const TIMESTAMP: &str = "timestamp";
    pub const LOGICAL_TIME: &str = "logical_time";
    pub const R_TIMESTAMP: &str = "r_timestamp";
    pub const ENTRY_TYPE: &str = "entry_type";
    pub const CREATE_TIMESTAMP: &str = "create_timestamp";
    pub const XATTR_NAME: &str = "xattr_name";
    pub const XATTR_VAL: &str = "xattr_val";
    pub const XATTR_PROV: &str = "xattr_prov";
    pub const ARCHIVE_LOC: &str = "archive_loc";
    pub const APP_STATE: &str = "app_state";
    pub const APP_NAME: &str = "app_name";
    pub const APP_USER: &str = "app_user";
}

/// Record kinds with their own field vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    FileOps,
    FileState,
    AppState,
}

/// How raw parameter values are turned into index values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueParser {
    Int,
    Long,
    Str,
    FileOperation,
    DocSubType,
    AppState,
    EntryType,
}

impl ValueParser {
    /// Parse `raw` for `field`.
    pub fn parse(&self, field: &str, raw: &str) -> Result<Value, QueryError> {
        let invalid = |reason: String| QueryError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason,
        };
        match self {
            ValueParser::Int => raw
                .trim()
                .parse::<i32>()
                .map(Value::from)
                .map_err(|e| invalid(format!("expected int: {}", e))),
            ValueParser::Long => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| invalid(format!("expected long: {}", e))),
            ValueParser::Str => Ok(Value::from(raw)),
            ValueParser::FileOperation => FileOperation::from_db_str(raw)
                .map(|op| Value::from(op.as_db_str()))
                .map_err(|_| invalid(format!("supported: {}", FileOperation::supported()))),
            ValueParser::DocSubType => DocSubType::from_db_str(raw)
                .map(|t| Value::from(t.as_db_str()))
                .map_err(|_| invalid(format!("supported: {}", DocSubType::supported()))),
            ValueParser::AppState => AppState::from_db_str(raw)
                .map(|s| Value::from(s.as_db_str()))
                .map_err(|_| invalid(format!("supported: {}", AppState::supported()))),
            ValueParser::EntryType => EntryType::from_db_str(raw)
                .map(|t| Value::from(t.column_value()))
                .map_err(|_| invalid(format!("supported: {}", EntryType::supported()))),
        }
    }
}

/// One registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Name used in query parameters
    pub name: &'static str,
    /// Backing index column
    pub column: &'static str,
    /// Operator used when the parameter names none
    pub default_filter: FilterOperator,
    /// Operators the field accepts
    pub filters: &'static [FilterOperator],
    pub parser: ValueParser,
    /// Auxiliary fields only exist as filters and cannot be sorted on
    pub aux: bool,
}

impl FieldDef {
    pub fn accepts(&self, operator: FilterOperator) -> bool {
        self.filters.contains(&operator)
    }
}

use columns as c;
use FilterOperator as F;

const EXACT: &[FilterOperator] = &[F::Eq];
const TEXT: &[FilterOperator] = &[F::Eq, F::Like];
const ORDERED: &[FilterOperator] = &[F::Eq, F::Lt, F::Lte, F::Gt, F::Gte];

const fn field(
    name: &'static str,
    column: &'static str,
    filters: &'static [FilterOperator],
    parser: ValueParser,
) -> FieldDef {
    FieldDef {
        name,
        column,
        default_filter: F::Eq,
        filters,
        parser,
        aux: false,
    }
}

const fn aux(
    name: &'static str,
    column: &'static str,
    filter: FilterOperator,
    filters: &'static [FilterOperator],
    parser: ValueParser,
) -> FieldDef {
    FieldDef {
        name,
        column,
        default_filter: filter,
        filters,
        parser,
        aux: true,
    }
}

// ============================================================================
// REGISTRIES
// ============================================================================

/// Fields of operation events.
pub static FILE_OPS_FIELDS: &[FieldDef] = &[
    field("project_i_id", c::PROJECT_I_ID, EXACT, ValueParser::Long),
    field("dataset_i_id", c::DATASET_I_ID, EXACT, ValueParser::Long),
    field("parent_i_id", c::PARENT_I_ID, EXACT, ValueParser::Long),
    field("file_i_id", c::INODE_ID, EXACT, ValueParser::Long),
    field("file_name", c::INODE_NAME, TEXT, ValueParser::Str),
    field("project_name", c::PROJECT_NAME, TEXT, ValueParser::Str),
    field("user_id", c::USER_ID, EXACT, ValueParser::Int),
    field("app_id", c::APP_ID, EXACT, ValueParser::Str),
    field("ml_type", c::ML_TYPE, EXACT, ValueParser::DocSubType),
    field("doc_subtype", c::ML_TYPE, EXACT, ValueParser::DocSubType),
    field("ml_id", c::ML_ID, EXACT, ValueParser::Str),
    field("file_operation", c::INODE_OPERATION, EXACT, ValueParser::FileOperation),
    field("partition_id", c::PARTITION_ID, EXACT, ValueParser::Long),
    field("timestamp", c::TIMESTAMP, ORDERED, ValueParser::Long),
    field("logical_time", c::LOGICAL_TIME, ORDERED, ValueParser::Int),
    field("r_timestamp", c::R_TIMESTAMP, EXACT, ValueParser::Str),
    field("entry_type", c::ENTRY_TYPE, EXACT, ValueParser::EntryType),
    aux("file_name_like", c::INODE_NAME, F::Like, &[F::Like], ValueParser::Str),
    aux("timestamp_lt", c::TIMESTAMP, F::Lt, &[F::Lt], ValueParser::Long),
    aux("timestamp_lte", c::TIMESTAMP, F::Lte, &[F::Lte], ValueParser::Long),
    aux("timestamp_gt", c::TIMESTAMP, F::Gt, &[F::Gt], ValueParser::Long),
    aux("timestamp_gte", c::TIMESTAMP, F::Gte, &[F::Gte], ValueParser::Long),
];

/// Fields of current file states.
pub static FILE_STATE_FIELDS: &[FieldDef] = &[
    field("project_i_id", c::PROJECT_I_ID, EXACT, ValueParser::Long),
    field("dataset_i_id", c::DATASET_I_ID, EXACT, ValueParser::Long),
    field("file_i_id", c::INODE_ID, EXACT, ValueParser::Long),
    field("file_name", c::INODE_NAME, TEXT, ValueParser::Str),
    field("user_id", c::USER_ID, EXACT, ValueParser::Int),
    field("app_id", c::APP_ID, EXACT, ValueParser::Str),
    field("ml_type", c::ML_TYPE, EXACT, ValueParser::DocSubType),
    field("ml_id", c::ML_ID, EXACT, ValueParser::Str),
    field("create_timestamp", c::CREATE_TIMESTAMP, ORDERED, ValueParser::Long),
    aux("file_name_like", c::INODE_NAME, F::Like, &[F::Like], ValueParser::Str),
    aux("create_timestamp_lt", c::CREATE_TIMESTAMP, F::Lt, &[F::Lt], ValueParser::Long),
    aux("create_timestamp_lte", c::CREATE_TIMESTAMP, F::Lte, &[F::Lte], ValueParser::Long),
    aux("create_timestamp_gt", c::CREATE_TIMESTAMP, F::Gt, &[F::Gt], ValueParser::Long),
    aux("create_timestamp_gte", c::CREATE_TIMESTAMP, F::Gte, &[F::Gte], ValueParser::Long),
    aux("createtime", c::CREATE_TIMESTAMP, F::Eq, EXACT, ValueParser::Long),
];

/// Fields of application state records (app expansion filters).
pub static APP_STATE_FIELDS: &[FieldDef] = &[
    field("app_state", c::APP_STATE, EXACT, ValueParser::AppState),
    field("app_id", c::APP_ID, EXACT, ValueParser::Str),
];

static LOOKUP: Lazy<HashMap<(RecordKind, &'static str), &'static FieldDef>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for (kind, table) in [
        (RecordKind::FileOps, FILE_OPS_FIELDS),
        (RecordKind::FileState, FILE_STATE_FIELDS),
        (RecordKind::AppState, APP_STATE_FIELDS),
    ] {
        for def in table {
            map.insert((kind, def.name), def);
        }
    }
    map
});

/// Registry table for a record kind.
pub fn fields(kind: RecordKind) -> &'static [FieldDef] {
    match kind {
        RecordKind::FileOps => FILE_OPS_FIELDS,
        RecordKind::FileState => FILE_STATE_FIELDS,
        RecordKind::AppState => APP_STATE_FIELDS,
    }
}

/// Comma separated field names of a record kind.
pub fn supported_fields(kind: RecordKind) -> String {
    fields(kind)
        .iter()
        .map(|f| f.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolve a raw field name, case-insensitively.
pub fn resolve(kind: RecordKind, name: &str) -> Result<&'static FieldDef, QueryError> {
    let lowered = name.trim().to_ascii_lowercase();
    LOOKUP
        .get(&(kind, lowered.as_str()))
        .copied()
        .ok_or_else(|| QueryError::UnknownField {
            field: name.to_string(),
            supported: supported_fields(kind),
        })
}
