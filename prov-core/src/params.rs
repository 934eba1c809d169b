//! Query parameter parsing and the per-record-kind parameter builders.
//!
//! Raw filters have the shape `field`, `field:value` or `field:op:value`.
//! A bare field is an exact filter on `true`. Sort parameters are comma
//! separated `field[:asc|desc]` lists whose order is preserved.
//!
//! Building is pure: the same parameters always produce the same
//! [`SearchRequest`].

use crate::aggregations::ProvAggregation;
use crate::enums::{EntryType, Expansion, FileOperation, SortOrder};
use crate::error::QueryError;
use crate::fields::{self, columns, RecordKind};
use crate::filter::{add_to_filters, apply_filters, FilterMap, FilterOperator};
use crate::query::{BoolQuery, FilterScript, Query, SearchRequest, SortSpec};
use crate::InodeId;
use serde_json::Value;
use std::collections::BTreeSet;

// ============================================================================
// RAW GRAMMAR
// ============================================================================

/// A filter parameter split into its parts, not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFilter {
    pub field: String,
    pub operator: Option<FilterOperator>,
    pub value: String,
}

/// Split a raw `field[:op]:value` parameter.
///
/// When the middle part of a three part parameter is not an operator the
/// remainder is taken as the value, so values may contain `:`.
pub fn parse_raw_filter(raw: &str) -> Result<RawFilter, QueryError> {
    let trimmed = raw.trim();
    let parts: Vec<&str> = trimmed.splitn(3, ':').collect();
    let field = parts.first().map(|f| f.trim()).unwrap_or_default();
    if field.is_empty() {
        return Err(QueryError::InvalidValue {
            field: String::new(),
            value: raw.to_string(),
            reason: "missing field name".to_string(),
        });
    }
    let (operator, value) = match parts.as_slice() {
        [_] => (None, "true".to_string()),
        [_, value] => (None, value.to_string()),
        [_, op, value] => match FilterOperator::parse(op) {
            Some(op) => (Some(op), value.to_string()),
            None => (None, format!("{}:{}", op, value)),
        },
        _ => (None, String::new()),
    };
    Ok(RawFilter {
        field: field.to_string(),
        operator,
        value,
    })
}

/// Resolve a raw filter against the registry of `kind`.
///
/// Returns the backing column, the operator and the parsed value.
pub fn resolve_filter(
    kind: RecordKind,
    raw: &str,
) -> Result<(&'static str, FilterOperator, Value), QueryError> {
    let parsed = parse_raw_filter(raw)?;
    let def = fields::resolve(kind, &parsed.field)?;
    let operator = match parsed.operator {
        Some(op) if def.accepts(op) => op,
        Some(op) => {
            return Err(QueryError::UnsupportedFilter {
                field: def.name.to_string(),
                filter: op.as_str().to_string(),
            })
        }
        None => def.default_filter,
    };
    let value = def.parser.parse(def.name, &parsed.value)?;
    Ok((def.column, operator, value))
}

/// Split a comma separated sort parameter into field names and orders.
pub fn parse_sort_specs(raw: &str) -> Result<Vec<(String, SortOrder)>, QueryError> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (field, order) = match item.split_once(':') {
                Some((field, order)) => {
                    let order =
                        SortOrder::from_db_str(order).map_err(|_| QueryError::InvalidSort {
                            raw: item.to_string(),
                            reason: format!("supported orders: {}", SortOrder::supported()),
                        })?;
                    (field.trim(), order)
                }
                None => (item, SortOrder::Asc),
            };
            if field.is_empty() {
                return Err(QueryError::InvalidSort {
                    raw: item.to_string(),
                    reason: "missing field name".to_string(),
                });
            }
            Ok((field.to_string(), order))
        })
        .collect()
}

/// Resolve a sort parameter against the registry of `kind`.
pub fn resolve_sort(kind: RecordKind, raw: &str) -> Result<Vec<SortSpec>, QueryError> {
    parse_sort_specs(raw)?
        .into_iter()
        .map(|(field, order)| {
            let def = fields::resolve(kind, &field)?;
            if def.aux {
                return Err(QueryError::InvalidSort {
                    raw: field,
                    reason: "auxiliary filter fields cannot be sorted on".to_string(),
                });
            }
            Ok(SortSpec::new(def.column, order))
        })
        .collect()
}

/// Offset/limit pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Pagination {
    pub fn new(offset: i64, limit: i64) -> Result<Self, QueryError> {
        Ok(Self {
            offset: non_negative("offset", offset)?,
            limit: non_negative("limit", limit)?,
        })
    }

    /// `None` when neither parameter is given; a missing side takes
    /// `0` / `default_limit`.
    pub fn from_params(
        offset: Option<i64>,
        limit: Option<i64>,
        default_limit: usize,
    ) -> Result<Option<Self>, QueryError> {
        match (offset, limit) {
            (None, None) => Ok(None),
            (offset, limit) => Ok(Some(Self {
                offset: non_negative("offset", offset.unwrap_or(0))?,
                limit: match limit {
                    Some(l) => non_negative("limit", l)?,
                    None => default_limit,
                },
            })),
        }
    }
}

fn non_negative(field: &str, value: i64) -> Result<usize, QueryError> {
    usize::try_from(value).map_err(|_| QueryError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: "must not be negative".to_string(),
    })
}

fn parse_expansion(raw: &str) -> Result<Expansion, QueryError> {
    Expansion::from_db_str(raw).map_err(|_| QueryError::InvalidValue {
        field: "expand".to_string(),
        value: raw.to_string(),
        reason: format!("supported: {}", Expansion::supported()),
    })
}

fn add_raw_filters<I, S>(kind: RecordKind, filters: &mut FilterMap, raw: I) -> Result<(), QueryError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for param in raw {
        let (column, operator, value) = resolve_filter(kind, param.as_ref())?;
        add_to_filters(filters, column, operator, value);
    }
    Ok(())
}

fn filter_by_field(
    kind: RecordKind,
    filters: &mut FilterMap,
    name: &str,
    operator: FilterOperator,
    raw_value: &str,
) -> Result<(), QueryError> {
    let def = fields::resolve(kind, name)?;
    if !def.accepts(operator) {
        return Err(QueryError::UnsupportedFilter {
            field: def.name.to_string(),
            filter: operator.as_str().to_string(),
        });
    }
    let value = def.parser.parse(def.name, raw_value)?;
    add_to_filters(filters, def.column, operator, value);
    Ok(())
}

fn request(query: Query, sort: Vec<SortSpec>, pagination: Option<Pagination>, default_size: usize) -> SearchRequest {
    let request = SearchRequest::new(query, default_size).with_sort(sort);
    match pagination {
        Some(p) => request.paginate(p.offset, p.limit),
        None => request,
    }
}

// ============================================================================
// FILE OPERATION PARAMETERS
// ============================================================================

/// Parameters of an operation-event query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileOpsParams {
    pub filters: FilterMap,
    pub sort: Vec<SortSpec>,
    pub pagination: Option<Pagination>,
    pub expansions: BTreeSet<Expansion>,
    pub app_state_filters: FilterMap,
    pub scripts: Vec<FilterScript>,
    pub aggregations: Vec<ProvAggregation>,
}

impl FileOpsParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter_params<I, S>(mut self, raw: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        add_raw_filters(RecordKind::FileOps, &mut self.filters, raw)?;
        Ok(self)
    }

    pub fn with_sort_param(mut self, raw: &str) -> Result<Self, QueryError> {
        self.sort.extend(resolve_sort(RecordKind::FileOps, raw)?);
        Ok(self)
    }

    pub fn with_pagination(
        mut self,
        offset: Option<i64>,
        limit: Option<i64>,
        default_limit: usize,
    ) -> Result<Self, QueryError> {
        self.pagination = Pagination::from_params(offset, limit, default_limit)?;
        Ok(self)
    }

    pub fn paginate(mut self, offset: usize, limit: usize) -> Self {
        self.pagination = Some(Pagination { offset, limit });
        self
    }

    pub fn with_expansion_params<I, S>(mut self, raw: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for param in raw {
            self.expansions.insert(parse_expansion(param.as_ref())?);
        }
        Ok(self)
    }

    pub fn with_expansion(mut self, expansion: Expansion) -> Self {
        self.expansions.insert(expansion);
        self
    }

    pub fn with_app_state_params<I, S>(mut self, raw: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        add_raw_filters(RecordKind::AppState, &mut self.app_state_filters, raw)?;
        Ok(self)
    }

    pub fn with_aggregation_params<I, S>(mut self, raw: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for param in raw {
            let agg = ProvAggregation::parse(param.as_ref())?;
            if !self.aggregations.contains(&agg) {
                self.aggregations.push(agg);
            }
        }
        Ok(self)
    }

    pub fn with_aggregation(mut self, aggregation: ProvAggregation) -> Self {
        if !self.aggregations.contains(&aggregation) {
            self.aggregations.push(aggregation);
        }
        self
    }

    pub fn with_script(mut self, script: FilterScript) -> Self {
        if !self.scripts.contains(&script) {
            self.scripts.push(script);
        }
        self
    }

    pub fn with_project(mut self, project: InodeId) -> Self {
        add_to_filters(
            &mut self.filters,
            columns::PROJECT_I_ID,
            FilterOperator::Eq,
            Value::from(project),
        );
        self
    }

    pub fn with_inode(mut self, inode: InodeId) -> Self {
        add_to_filters(
            &mut self.filters,
            columns::INODE_ID,
            FilterOperator::Eq,
            Value::from(inode),
        );
        self
    }

    pub fn with_app_id(mut self, app_id: &str) -> Self {
        add_to_filters(
            &mut self.filters,
            columns::APP_ID,
            FilterOperator::Eq,
            Value::from(app_id),
        );
        self
    }

    pub fn filter_by_operation(mut self, operation: FileOperation) -> Self {
        add_to_filters(
            &mut self.filters,
            columns::INODE_OPERATION,
            FilterOperator::Eq,
            Value::from(operation.as_db_str()),
        );
        self
    }

    /// Filter on a registry field by name with an explicit operator.
    pub fn filter_by_field(
        mut self,
        name: &str,
        operator: FilterOperator,
        raw_value: &str,
    ) -> Result<Self, QueryError> {
        filter_by_field(RecordKind::FileOps, &mut self.filters, name, operator, raw_value)?;
        Ok(self)
    }

    /// Whether an operation type filter was already set.
    pub fn has_operation_filter(&self) -> bool {
        self.filters.values().any(|f| f.column == columns::INODE_OPERATION)
    }

    pub fn has_app_expansion(&self) -> bool {
        self.expansions.contains(&Expansion::App)
    }

    /// Operation documents matching every filter and script.
    pub fn query(&self) -> Query {
        let mut query = BoolQuery::new().must(Query::term(
            columns::ENTRY_TYPE,
            EntryType::Operation.column_value(),
        ));
        query = apply_filters(query, &self.filters);
        for script in &self.scripts {
            query = query.must(Query::Script(*script));
        }
        query.build()
    }

    pub fn search_request(&self, default_size: usize) -> SearchRequest {
        request(self.query(), self.sort.clone(), self.pagination, default_size)
    }
}

// ============================================================================
// FILE STATE PARAMETERS
// ============================================================================

/// Parameters of a file-state query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileStateParams {
    pub filters: FilterMap,
    pub sort: Vec<SortSpec>,
    /// Exact and like filters on `xattr_prov.<key>`
    pub xattr_filters: FilterMap,
    /// Keys that must be present
    pub has_xattrs: BTreeSet<String>,
    pub xattr_sort: Vec<SortSpec>,
    pub pagination: Option<Pagination>,
    pub expansions: BTreeSet<Expansion>,
    pub app_state_filters: FilterMap,
}

/// Index path of an extended attribute key.
pub fn xattr_column(key: &str) -> String {
    format!("{}.{}", columns::XATTR_PROV, key.trim())
}

fn split_xattr(raw: &str) -> Result<(String, String), QueryError> {
    match raw.split_once(':') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((xattr_column(key), value.to_string()))
        }
        _ => Err(QueryError::InvalidValue {
            field: columns::XATTR_PROV.to_string(),
            value: raw.to_string(),
            reason: "expected key:value".to_string(),
        }),
    }
}

impl FileStateParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter_params<I, S>(mut self, raw: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        add_raw_filters(RecordKind::FileState, &mut self.filters, raw)?;
        Ok(self)
    }

    pub fn with_sort_param(mut self, raw: &str) -> Result<Self, QueryError> {
        self.sort.extend(resolve_sort(RecordKind::FileState, raw)?);
        Ok(self)
    }

    /// Exact xattr filters, `key:value`; values match case-insensitively.
    pub fn with_exact_xattr_params<I, S>(mut self, raw: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for param in raw {
            let (column, value) = split_xattr(param.as_ref())?;
            add_to_filters(
                &mut self.xattr_filters,
                &column,
                FilterOperator::Eq,
                Value::from(value.to_lowercase()),
            );
        }
        Ok(self)
    }

    /// Fuzzy xattr filters, `key:value`.
    pub fn with_like_xattr_params<I, S>(mut self, raw: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for param in raw {
            let (column, value) = split_xattr(param.as_ref())?;
            add_to_filters(
                &mut self.xattr_filters,
                &column,
                FilterOperator::Like,
                Value::from(value),
            );
        }
        Ok(self)
    }

    pub fn with_has_xattr<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.has_xattrs.insert(xattr_column(key.as_ref()));
        }
        self
    }

    /// Sort on xattr values, `key[:asc|desc]` comma separated.
    pub fn with_xattr_sort_param(mut self, raw: &str) -> Result<Self, QueryError> {
        for (key, order) in parse_sort_specs(raw)? {
            self.xattr_sort.push(SortSpec::new(xattr_column(&key), order));
        }
        Ok(self)
    }

    pub fn with_pagination(
        mut self,
        offset: Option<i64>,
        limit: Option<i64>,
        default_limit: usize,
    ) -> Result<Self, QueryError> {
        self.pagination = Pagination::from_params(offset, limit, default_limit)?;
        Ok(self)
    }

    pub fn paginate(mut self, offset: usize, limit: usize) -> Self {
        self.pagination = Some(Pagination { offset, limit });
        self
    }

    pub fn with_expansion_params<I, S>(mut self, raw: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for param in raw {
            self.expansions.insert(parse_expansion(param.as_ref())?);
        }
        Ok(self)
    }

    pub fn with_expansion(mut self, expansion: Expansion) -> Self {
        self.expansions.insert(expansion);
        self
    }

    pub fn with_app_state_params<I, S>(mut self, raw: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        add_raw_filters(RecordKind::AppState, &mut self.app_state_filters, raw)?;
        Ok(self)
    }

    pub fn filter_by_field(
        mut self,
        name: &str,
        operator: FilterOperator,
        raw_value: &str,
    ) -> Result<Self, QueryError> {
        filter_by_field(RecordKind::FileState, &mut self.filters, name, operator, raw_value)?;
        Ok(self)
    }

    pub fn has_app_expansion(&self) -> bool {
        self.expansions.contains(&Expansion::App)
    }

    /// Every sort key in application order: fields first, then xattrs.
    pub fn sort_specs(&self) -> Vec<SortSpec> {
        self.sort
            .iter()
            .chain(self.xattr_sort.iter())
            .cloned()
            .collect()
    }

    /// State documents matching every filter.
    pub fn query(&self) -> Query {
        let mut query = BoolQuery::new().must(Query::term(
            columns::ENTRY_TYPE,
            EntryType::State.column_value(),
        ));
        query = apply_filters(query, &self.filters);
        query = apply_filters(query, &self.xattr_filters);
        for key in &self.has_xattrs {
            query = query.must(Query::exists(key.clone()));
        }
        query.build()
    }

    pub fn search_request(&self, default_size: usize) -> SearchRequest {
        request(self.query(), self.sort_specs(), self.pagination, default_size)
    }
}
