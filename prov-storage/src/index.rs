//! Search index abstraction.

use prov_core::{
    AggregationBucket, AggregationSpec, Document, Hit, ProvResult, Query, SearchPage,
    SearchRequest,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Field paths an index knows about. Nested objects contribute dotted paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMapping {
    pub fields: BTreeSet<String>,
}

impl IndexMapping {
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains(field)
    }
}

/// One page of a scrolled search.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollPage {
    pub scroll_id: String,
    /// Total matches of the scrolled query
    pub total: u64,
    /// Empty once the scroll is exhausted
    pub hits: Vec<Hit>,
}

/// Aggregation buckets keyed by aggregation name.
pub type AggregationResponse = BTreeMap<String, Vec<AggregationBucket>>;

/// Document search index.
///
/// All calls are blocking; a missing index surfaces as
/// `BackendError::IndexNotFound` unless stated otherwise.
pub trait SearchIndex: Send + Sync {
    // === Index Operations ===

    /// Create an empty index. Creating an existing index is a no-op.
    fn create_index(&self, index: &str) -> ProvResult<()>;

    /// Delete an index and all of its documents.
    fn delete_index(&self, index: &str) -> ProvResult<()>;

    /// Index names matching a `*` wildcard pattern, sorted.
    fn list_indices(&self, pattern: &str) -> ProvResult<Vec<String>>;

    /// Field mapping of an index, `None` when the index does not exist.
    /// Mappings may be served from a cache unless `force_refresh` is set.
    fn get_mapping(&self, index: &str, force_refresh: bool) -> ProvResult<Option<IndexMapping>>;

    // === Document Operations ===

    /// Index (or replace) a document; the index is created on demand.
    /// Returns the document id, generated when `id` is `None`.
    fn index_doc(&self, index: &str, id: Option<&str>, doc: Document) -> ProvResult<String>;

    fn get_doc(&self, index: &str, id: &str) -> ProvResult<Option<Hit>>;

    /// Overwrite the given top level fields of an existing document.
    fn update_doc(&self, index: &str, id: &str, partial: Document) -> ProvResult<()>;

    /// Delete documents by id, returning how many existed.
    fn bulk_delete(&self, index: &str, ids: &[String]) -> ProvResult<usize>;

    // === Search Operations ===

    fn search(&self, index: &str, request: &SearchRequest) -> ProvResult<SearchPage>;

    fn count(&self, index: &str, query: &Query) -> ProvResult<u64>;

    fn aggregate(
        &self,
        index: &str,
        query: &Query,
        aggregations: &[AggregationSpec],
    ) -> ProvResult<AggregationResponse>;

    /// Start a scroll; the first page has `request.size` hits at most.
    fn open_scroll(&self, index: &str, request: &SearchRequest) -> ProvResult<ScrollPage>;

    fn scroll_next(&self, scroll_id: &str) -> ProvResult<ScrollPage>;

    /// Release a scroll context.
    fn clear_scroll(&self, scroll_id: &str) -> ProvResult<()>;
}

// ============================================================================
// SCROLL HANDLE
// ============================================================================

/// Page-at-a-time reader over a scroll context.
///
/// The context is released when the handle is dropped, whether or not the
/// scroll was read to the end.
pub struct Scroll<'a, I: SearchIndex + ?Sized> {
    index: &'a I,
    scroll_id: Option<String>,
    first: Option<Vec<Hit>>,
    total: u64,
    exhausted: bool,
}

impl<'a, I: SearchIndex + ?Sized> Scroll<'a, I> {
    pub fn open(index: &'a I, name: &str, request: &SearchRequest) -> ProvResult<Self> {
        let page = index.open_scroll(name, request)?;
        Ok(Self {
            index,
            scroll_id: Some(page.scroll_id),
            exhausted: page.hits.is_empty(),
            first: Some(page.hits),
            total: page.total,
        })
    }

    /// Total matches of the scrolled query.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Next non-empty page, `None` once exhausted.
    pub fn next_page(&mut self) -> ProvResult<Option<Vec<Hit>>> {
        if let Some(first) = self.first.take() {
            if !first.is_empty() {
                return Ok(Some(first));
            }
        }
        if self.exhausted {
            return Ok(None);
        }
        let Some(scroll_id) = self.scroll_id.as_deref() else {
            return Ok(None);
        };
        let page = self.index.scroll_next(scroll_id)?;
        self.scroll_id = Some(page.scroll_id);
        if page.hits.is_empty() {
            self.exhausted = true;
            Ok(None)
        } else {
            Ok(Some(page.hits))
        }
    }

    /// Read every remaining page.
    pub fn collect_all(mut self) -> ProvResult<Vec<Hit>> {
        let mut hits = Vec::new();
        while let Some(page) = self.next_page()? {
            hits.extend(page);
        }
        Ok(hits)
    }
}

impl<I: SearchIndex + ?Sized> Drop for Scroll<'_, I> {
    fn drop(&mut self) {
        if let Some(scroll_id) = self.scroll_id.take() {
            if let Err(e) = self.index.clear_scroll(&scroll_id) {
                tracing::debug!(scroll_id = %scroll_id, error = %e, "Failed to clear scroll");
            }
        }
    }
}
