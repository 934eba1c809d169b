//! Accumulated filter values.
//!
//! Every resolved filter parameter lands in a [`FilterMap`] under its filter
//! key. Predicates sharing a key are OR'ed, distinct keys are AND'ed.

use crate::query::{BoolQuery, Query, RangeOp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Exact term match
    Eq,
    /// Fuzzy full-text match
    Like,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
}

impl FilterOperator {
    pub const ALL: &'static [FilterOperator] = &[
        FilterOperator::Eq,
        FilterOperator::Like,
        FilterOperator::Lt,
        FilterOperator::Lte,
        FilterOperator::Gt,
        FilterOperator::Gte,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Like => "like",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eq" | "exact" => Some(FilterOperator::Eq),
            "like" => Some(FilterOperator::Like),
            "lt" => Some(FilterOperator::Lt),
            "lte" => Some(FilterOperator::Lte),
            "gt" => Some(FilterOperator::Gt),
            "gte" => Some(FilterOperator::Gte),
            _ => None,
        }
    }

    fn range(&self) -> Option<RangeOp> {
        match self {
            FilterOperator::Lt => Some(RangeOp::Lt),
            FilterOperator::Lte => Some(RangeOp::Lte),
            FilterOperator::Gt => Some(RangeOp::Gt),
            FilterOperator::Gte => Some(RangeOp::Gte),
            FilterOperator::Eq | FilterOperator::Like => None,
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// All predicates accumulated for one filter key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterVal {
    /// Index column the predicates apply to
    pub column: String,
    pub operator: FilterOperator,
    /// OR'ed values
    pub values: Vec<Value>,
}

impl FilterVal {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            column: column.into(),
            operator,
            values: vec![value],
        }
    }

    /// Add another alternative; duplicates are ignored.
    pub fn add(&mut self, value: Value) {
        if !self.values.contains(&value) {
            self.values.push(value);
        }
    }

    /// The resolved predicate.
    pub fn query(&self) -> Query {
        let mut alternatives: Vec<Query> = match (self.operator, self.operator.range()) {
            (_, Some(range)) => self
                .values
                .iter()
                .map(|v| Query::range(self.column.clone(), range, v.clone()))
                .collect(),
            (FilterOperator::Like, None) => self
                .values
                .iter()
                .map(|v| Query::like(self.column.clone(), &value_text(v)))
                .collect(),
            _ if self.values.len() == 1 => {
                vec![Query::term(self.column.clone(), self.values[0].clone())]
            }
            _ => vec![Query::terms(self.column.clone(), self.values.clone())],
        };
        if alternatives.len() == 1 {
            alternatives.remove(0)
        } else {
            let mut b = BoolQuery::new();
            for alt in alternatives {
                b = b.should(alt);
            }
            b.build()
        }
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Filter map keyed by [`filter_key`].
pub type FilterMap = BTreeMap<String, FilterVal>;

/// Key a predicate is accumulated under: the bare column for exact filters,
/// `column:op` otherwise.
pub fn filter_key(column: &str, operator: FilterOperator) -> String {
    match operator {
        FilterOperator::Eq => column.to_string(),
        op => format!("{}:{}", column, op.as_str()),
    }
}

/// Accumulate one predicate.
pub fn add_to_filters(
    filters: &mut FilterMap,
    column: &str,
    operator: FilterOperator,
    value: Value,
) {
    let key = filter_key(column, operator);
    match filters.get_mut(&key) {
        Some(existing) => existing.add(value),
        None => {
            filters.insert(key, FilterVal::new(column, operator, value));
        }
    }
}

/// AND every filter of the map into `query`.
pub fn apply_filters(mut query: BoolQuery, filters: &FilterMap) -> BoolQuery {
    for filter in filters.values() {
        query = query.must(filter.query());
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_column_exact_values_are_ored() {
        let mut filters = FilterMap::new();
        add_to_filters(&mut filters, "inode_operation", FilterOperator::Eq, json!("CREATE"));
        add_to_filters(&mut filters, "inode_operation", FilterOperator::Eq, json!("DELETE"));
        add_to_filters(&mut filters, "inode_operation", FilterOperator::Eq, json!("CREATE"));
        assert_eq!(filters.len(), 1);
        assert_eq!(
            filters["inode_operation"].query(),
            Query::terms("inode_operation", vec![json!("CREATE"), json!("DELETE")])
        );
    }

    #[test]
    fn test_ranges_on_same_column_are_anded() {
        let mut filters = FilterMap::new();
        add_to_filters(&mut filters, "timestamp", FilterOperator::Gt, json!(10));
        add_to_filters(&mut filters, "timestamp", FilterOperator::Lt, json!(20));
        assert_eq!(filters.len(), 2);
        let q = apply_filters(BoolQuery::new(), &filters);
        assert_eq!(q.must.len(), 2);
    }

    #[test]
    fn test_multiple_like_values_become_should() {
        let mut filters = FilterMap::new();
        add_to_filters(&mut filters, "inode_name", FilterOperator::Like, json!("Train"));
        add_to_filters(&mut filters, "inode_name", FilterOperator::Like, json!("test"));
        match filters["inode_name:like"].query() {
            Query::Bool(b) => {
                assert_eq!(b.should.len(), 2);
                assert_eq!(b.should[0], Query::like("inode_name", "train"));
            }
            other => panic!("expected bool, got {:?}", other),
        }
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!(FilterOperator::parse("LTE"), Some(FilterOperator::Lte));
        assert_eq!(FilterOperator::parse("exact"), Some(FilterOperator::Eq));
        assert_eq!(FilterOperator::parse("between"), None);
    }
}
