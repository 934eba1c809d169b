//! Backend-agnostic query, sort and aggregation descriptors.
//!
//! These describe *what* to ask the search index; executing them is the job
//! of a `SearchIndex` implementation in prov-storage.

use crate::SortOrder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored document: column name to JSON value.
pub type Document = serde_json::Map<String, Value>;

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Index-assigned document id
    pub id: String,
    /// Document body
    pub source: Document,
}

impl Hit {
    pub fn new(id: impl Into<String>, source: Document) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }
}

// ============================================================================
// FILTER QUERIES
// ============================================================================

/// Range comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl RangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeOp::Lt => "lt",
            RangeOp::Lte => "lte",
            RangeOp::Gt => "gt",
            RangeOp::Gte => "gte",
        }
    }
}

/// Closed set of scripted filters the index must understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterScript {
    /// Document is tagged with an ML type other than NONE.
    MlAsset,
    /// Document carries at least one extended attribute.
    HasXattrs,
}

/// Filter query tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    MatchAll,
    Term { field: String, value: Value },
    Terms { field: String, values: Vec<Value> },
    Range { field: String, op: RangeOp, value: Value },
    Exists { field: String },
    /// Fuzzy full-text match (phrase, prefix, fuzzy or `*text*` wildcard).
    Like { field: String, text: String },
    Ids(Vec<String>),
    Script(FilterScript),
    Bool(BoolQuery),
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn terms(field: impl Into<String>, values: Vec<Value>) -> Self {
        Query::Terms {
            field: field.into(),
            values,
        }
    }

    pub fn range(field: impl Into<String>, op: RangeOp, value: impl Into<Value>) -> Self {
        Query::Range {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Query::Exists {
            field: field.into(),
        }
    }

    /// Full-text "like" match; the text is lower-cased.
    pub fn like(field: impl Into<String>, text: &str) -> Self {
        Query::Like {
            field: field.into(),
            text: text.to_lowercase(),
        }
    }

    pub fn ids(ids: Vec<String>) -> Self {
        Query::Ids(ids)
    }
}

/// Boolean compound: all `must`, none of `must_not`, and at least one of
/// `should` when `should` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub must_not: Vec<Query>,
    pub should: Vec<Query>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    pub fn must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn should(mut self, query: Query) -> Self {
        self.should.push(query);
        self
    }

    pub fn build(self) -> Query {
        Query::Bool(self)
    }
}

// ============================================================================
// SEARCH REQUESTS
// ============================================================================

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortOrder::Asc)
    }
}

/// A paginated (or scrolled) search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: Query,
    pub sort: Vec<SortSpec>,
    pub from: usize,
    pub size: usize,
}

impl SearchRequest {
    pub fn new(query: Query, size: usize) -> Self {
        Self {
            query,
            sort: Vec::new(),
            from: 0,
            size,
        }
    }

    pub fn with_sort(mut self, sort: Vec<SortSpec>) -> Self {
        self.sort = sort;
        self
    }

    pub fn sort_by(mut self, spec: SortSpec) -> Self {
        self.sort.push(spec);
        self
    }

    pub fn paginate(mut self, from: usize, size: usize) -> Self {
        self.from = from;
        self.size = size;
        self
    }
}

/// One page of results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    /// Total matching documents, regardless of pagination
    pub total: u64,
    pub hits: Vec<Hit>,
}

// ============================================================================
// AGGREGATIONS
// ============================================================================

/// Single-value metric computed per bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Max(String),
    Min(String),
}

/// Bucket ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BucketOrder {
    /// Largest doc count first, ties broken by key
    #[default]
    CountDesc,
    /// Smallest metric value first
    MetricAsc,
}

/// Terms aggregation with an optional metric and nested terms aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub name: String,
    pub field: String,
    pub size: usize,
    pub metric: Option<Metric>,
    pub order: BucketOrder,
    pub sub: Option<Box<AggregationSpec>>,
}

impl AggregationSpec {
    pub fn terms(name: impl Into<String>, field: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            size,
            metric: None,
            order: BucketOrder::CountDesc,
            sub: None,
        }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn ordered_by(mut self, order: BucketOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_sub(mut self, sub: AggregationSpec) -> Self {
        self.sub = Some(Box::new(sub));
        self
    }
}

/// One aggregation bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationBucket {
    pub key: Value,
    pub doc_count: u64,
    pub metric: Option<f64>,
    pub sub: Vec<AggregationBucket>,
}

impl AggregationBucket {
    /// Bucket key as an integer, when it is one.
    pub fn key_as_i64(&self) -> Option<i64> {
        self.key.as_i64()
    }

    pub fn key_as_str(&self) -> Option<&str> {
        self.key.as_str()
    }
}
