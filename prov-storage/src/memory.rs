//! In-memory search index for tests and local runs.

use crate::eval::{compare_docs, lookup, matches, sort_cmp, wildcard};
use crate::index::{AggregationResponse, IndexMapping, ScrollPage, SearchIndex};
use prov_core::{
    AggregationBucket, AggregationSpec, BackendError, BucketOrder, Document, Hit, Metric,
    ProvResult, Query, SearchPage, SearchRequest,
};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

type Docs = BTreeMap<String, Document>;

#[derive(Debug)]
struct ScrollContext {
    hits: Vec<Hit>,
    cursor: usize,
    size: usize,
    total: u64,
}

impl ScrollContext {
    fn next_page(&mut self) -> Vec<Hit> {
        let end = (self.cursor + self.size).min(self.hits.len());
        let page = self.hits[self.cursor..end].to_vec();
        self.cursor = end;
        page
    }
}

/// Search index held in memory.
///
/// Scrolls snapshot their full result set when opened. Mappings are cached
/// per index on first read and only recomputed on a forced refresh.
#[derive(Debug, Default)]
pub struct InMemorySearchIndex {
    indices: Arc<RwLock<BTreeMap<String, Docs>>>,
    scrolls: Arc<RwLock<HashMap<String, ScrollContext>>>,
    mappings: Arc<RwLock<HashMap<String, IndexMapping>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `BackendError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    /// Documents currently stored in `index`, 0 when it does not exist.
    pub fn doc_count(&self, index: &str) -> ProvResult<usize> {
        let indices = self.indices.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(indices.get(index).map(|docs| docs.len()).unwrap_or(0))
    }

    /// Scroll contexts not yet cleared.
    pub fn open_scrolls(&self) -> ProvResult<usize> {
        let scrolls = self.scrolls.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(scrolls.len())
    }

    fn check_available(&self) -> ProvResult<()> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(BackendError::Unavailable {
                reason: "search index marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Sorted hits of `request.query`, unpaginated.
    fn matching(&self, index: &str, request: &SearchRequest) -> ProvResult<Vec<Hit>> {
        let indices = self.indices.read().map_err(|_| BackendError::LockPoisoned)?;
        let docs = indices.get(index).ok_or_else(|| not_found(index))?;
        let mut hits: Vec<(&String, &Document)> = docs
            .iter()
            .filter(|(id, doc)| matches(&request.query, id, doc))
            .collect();
        hits.sort_by(|(a_id, a), (b_id, b)| {
            compare_docs(&request.sort, (a_id.as_str(), *a), (b_id.as_str(), *b))
        });
        Ok(hits
            .into_iter()
            .map(|(id, doc)| Hit::new(id.clone(), doc.clone()))
            .collect())
    }
}

fn not_found(index: &str) -> BackendError {
    BackendError::IndexNotFound {
        index: index.to_string(),
    }
}

fn collect_fields(prefix: &str, doc: &Document, fields: &mut BTreeSet<String>) {
    for (key, value) in doc {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        if let Value::Object(inner) = value {
            collect_fields(&path, inner, fields);
        }
        fields.insert(path);
    }
}

fn metric_value(metric: &Metric, docs: &[&Document]) -> Option<f64> {
    let (field, pick_max) = match metric {
        Metric::Max(field) => (field, true),
        Metric::Min(field) => (field, false),
    };
    docs.iter()
        .filter_map(|doc| lookup(doc, field).and_then(Value::as_f64))
        .fold(None, |acc: Option<f64>, v| match acc {
            None => Some(v),
            Some(a) if pick_max => Some(a.max(v)),
            Some(a) => Some(a.min(v)),
        })
}

fn buckets(spec: &AggregationSpec, docs: &[&Document]) -> Vec<AggregationBucket> {
    let mut groups: Vec<(Value, Vec<&Document>)> = Vec::new();
    for doc in docs {
        let Some(key) = lookup(doc, &spec.field) else {
            continue;
        };
        if key.is_null() {
            continue;
        }
        match groups.iter_mut().find(|(k, _)| *k == *key) {
            Some((_, members)) => members.push(*doc),
            None => groups.push((key.clone(), vec![*doc])),
        }
    }

    let mut result: Vec<AggregationBucket> = groups
        .into_iter()
        .map(|(key, members)| AggregationBucket {
            key,
            doc_count: members.len() as u64,
            metric: spec.metric.as_ref().and_then(|m| metric_value(m, &members)),
            sub: spec
                .sub
                .as_ref()
                .map(|sub| buckets(sub, &members))
                .unwrap_or_default(),
        })
        .collect();

    result.sort_by(|a, b| {
        let primary = match spec.order {
            BucketOrder::CountDesc => b.doc_count.cmp(&a.doc_count),
            BucketOrder::MetricAsc => match (a.metric, b.metric) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };
        primary.then_with(|| sort_cmp(Some(&a.key), Some(&b.key)))
    });
    result.truncate(spec.size);
    result
}

impl SearchIndex for InMemorySearchIndex {
    fn create_index(&self, index: &str) -> ProvResult<()> {
        self.check_available()?;
        let mut indices = self.indices.write().map_err(|_| BackendError::LockPoisoned)?;
        indices.entry(index.to_string()).or_default();
        Ok(())
    }

    fn delete_index(&self, index: &str) -> ProvResult<()> {
        self.check_available()?;
        let mut indices = self.indices.write().map_err(|_| BackendError::LockPoisoned)?;
        indices.remove(index).ok_or_else(|| not_found(index))?;
        let mut mappings = self.mappings.write().map_err(|_| BackendError::LockPoisoned)?;
        mappings.remove(index);
        Ok(())
    }

    fn list_indices(&self, pattern: &str) -> ProvResult<Vec<String>> {
        self.check_available()?;
        let re = wildcard(pattern).ok_or_else(|| BackendError::Unavailable {
            reason: format!("invalid index pattern {}", pattern),
        })?;
        let indices = self.indices.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(indices.keys().filter(|name| re.is_match(name)).cloned().collect())
    }

    fn get_mapping(&self, index: &str, force_refresh: bool) -> ProvResult<Option<IndexMapping>> {
        self.check_available()?;
        if !force_refresh {
            let mappings = self.mappings.read().map_err(|_| BackendError::LockPoisoned)?;
            if let Some(mapping) = mappings.get(index) {
                return Ok(Some(mapping.clone()));
            }
        }
        let indices = self.indices.read().map_err(|_| BackendError::LockPoisoned)?;
        let Some(docs) = indices.get(index) else {
            return Ok(None);
        };
        let mut fields = BTreeSet::new();
        for doc in docs.values() {
            collect_fields("", doc, &mut fields);
        }
        let mapping = IndexMapping { fields };
        let mut mappings = self.mappings.write().map_err(|_| BackendError::LockPoisoned)?;
        mappings.insert(index.to_string(), mapping.clone());
        Ok(Some(mapping))
    }

    fn index_doc(&self, index: &str, id: Option<&str>, doc: Document) -> ProvResult<String> {
        self.check_available()?;
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let mut indices = self.indices.write().map_err(|_| BackendError::LockPoisoned)?;
        indices
            .entry(index.to_string())
            .or_default()
            .insert(id.clone(), doc);
        Ok(id)
    }

    fn get_doc(&self, index: &str, id: &str) -> ProvResult<Option<Hit>> {
        self.check_available()?;
        let indices = self.indices.read().map_err(|_| BackendError::LockPoisoned)?;
        let docs = indices.get(index).ok_or_else(|| not_found(index))?;
        Ok(docs.get(id).map(|doc| Hit::new(id, doc.clone())))
    }

    fn update_doc(&self, index: &str, id: &str, partial: Document) -> ProvResult<()> {
        self.check_available()?;
        let mut indices = self.indices.write().map_err(|_| BackendError::LockPoisoned)?;
        let docs = indices.get_mut(index).ok_or_else(|| not_found(index))?;
        let doc = docs.get_mut(id).ok_or_else(|| BackendError::DocumentNotFound {
            index: index.to_string(),
            id: id.to_string(),
        })?;
        for (key, value) in partial {
            doc.insert(key, value);
        }
        Ok(())
    }

    fn bulk_delete(&self, index: &str, ids: &[String]) -> ProvResult<usize> {
        self.check_available()?;
        let mut indices = self.indices.write().map_err(|_| BackendError::LockPoisoned)?;
        let docs = indices.get_mut(index).ok_or_else(|| not_found(index))?;
        Ok(ids.iter().filter(|id| docs.remove(id.as_str()).is_some()).count())
    }

    fn search(&self, index: &str, request: &SearchRequest) -> ProvResult<SearchPage> {
        self.check_available()?;
        let hits = self.matching(index, request)?;
        let total = hits.len() as u64;
        Ok(SearchPage {
            total,
            hits: hits.into_iter().skip(request.from).take(request.size).collect(),
        })
    }

    fn count(&self, index: &str, query: &Query) -> ProvResult<u64> {
        self.check_available()?;
        let indices = self.indices.read().map_err(|_| BackendError::LockPoisoned)?;
        let docs = indices.get(index).ok_or_else(|| not_found(index))?;
        Ok(docs.iter().filter(|(id, doc)| matches(query, id, doc)).count() as u64)
    }

    fn aggregate(
        &self,
        index: &str,
        query: &Query,
        aggregations: &[AggregationSpec],
    ) -> ProvResult<AggregationResponse> {
        self.check_available()?;
        let indices = self.indices.read().map_err(|_| BackendError::LockPoisoned)?;
        let docs = indices.get(index).ok_or_else(|| not_found(index))?;
        let matching: Vec<&Document> = docs
            .iter()
            .filter(|(id, doc)| matches(query, id, doc))
            .map(|(_, doc)| doc)
            .collect();
        Ok(aggregations
            .iter()
            .map(|spec| (spec.name.clone(), buckets(spec, &matching)))
            .collect())
    }

    fn open_scroll(&self, index: &str, request: &SearchRequest) -> ProvResult<ScrollPage> {
        self.check_available()?;
        let hits = self.matching(index, request)?;
        let mut context = ScrollContext {
            total: hits.len() as u64,
            hits,
            cursor: 0,
            size: request.size.max(1),
        };
        let page = context.next_page();
        let scroll_id = Uuid::now_v7().to_string();
        let total = context.total;
        let mut scrolls = self.scrolls.write().map_err(|_| BackendError::LockPoisoned)?;
        scrolls.insert(scroll_id.clone(), context);
        Ok(ScrollPage {
            scroll_id,
            total,
            hits: page,
        })
    }

    fn scroll_next(&self, scroll_id: &str) -> ProvResult<ScrollPage> {
        self.check_available()?;
        let mut scrolls = self.scrolls.write().map_err(|_| BackendError::LockPoisoned)?;
        let context = scrolls
            .get_mut(scroll_id)
            .ok_or_else(|| BackendError::ScrollNotFound {
                scroll_id: scroll_id.to_string(),
            })?;
        Ok(ScrollPage {
            scroll_id: scroll_id.to_string(),
            total: context.total,
            hits: context.next_page(),
        })
    }

    fn clear_scroll(&self, scroll_id: &str) -> ProvResult<()> {
        let mut scrolls = self.scrolls.write().map_err(|_| BackendError::LockPoisoned)?;
        scrolls.remove(scroll_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Scroll;
    use prov_core::{SortSpec, SortOrder};
    use proptest::prelude::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn seeded(n: i64) -> InMemorySearchIndex {
        let index = InMemorySearchIndex::new();
        for i in 0..n {
            index
                .index_doc(
                    "1__file_prov",
                    Some(&format!("d{:03}", i)),
                    doc(json!({"inode_id": i % 3, "timestamp": 100 - i})),
                )
                .unwrap();
        }
        index
    }

    #[test]
    fn test_search_sorts_and_paginates() {
        let index = seeded(10);
        let request = SearchRequest::new(Query::MatchAll, 3)
            .sort_by(SortSpec::asc("timestamp"))
            .paginate(1, 3);
        let page = index.search("1__file_prov", &request).unwrap();
        assert_eq!(page.total, 10);
        let ts: Vec<_> = page.hits.iter().map(|h| h.source["timestamp"].clone()).collect();
        assert_eq!(ts, vec![json!(92), json!(93), json!(94)]);
    }

    #[test]
    fn test_missing_index_errors() {
        let index = InMemorySearchIndex::new();
        let err = index.count("nope", &Query::MatchAll).unwrap_err();
        assert!(err.to_string().contains("nope"));
        assert!(index.get_mapping("nope", false).unwrap().is_none());
    }

    #[test]
    fn test_scroll_pages_and_releases_on_drop() {
        let index = seeded(7);
        let request = SearchRequest::new(Query::MatchAll, 3);
        {
            let mut scroll = Scroll::open(&index, "1__file_prov", &request).unwrap();
            assert_eq!(scroll.total(), 7);
            assert_eq!(scroll.next_page().unwrap().map(|p| p.len()), Some(3));
            assert_eq!(index.open_scrolls().unwrap(), 1);
        }
        assert_eq!(index.open_scrolls().unwrap(), 0);

        let all = Scroll::open(&index, "1__file_prov", &request)
            .unwrap()
            .collect_all()
            .unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(index.open_scrolls().unwrap(), 0);
    }

    #[test]
    fn test_scroll_snapshot_survives_deletes() {
        let index = seeded(6);
        let request = SearchRequest::new(Query::MatchAll, 2);
        let mut scroll = Scroll::open(&index, "1__file_prov", &request).unwrap();
        let mut seen = 0;
        while let Some(page) = scroll.next_page().unwrap() {
            let ids: Vec<String> = page.iter().map(|h| h.id.clone()).collect();
            assert_eq!(index.bulk_delete("1__file_prov", &ids).unwrap(), ids.len());
            seen += ids.len();
        }
        assert_eq!(seen, 6);
        assert_eq!(index.doc_count("1__file_prov").unwrap(), 0);
    }

    #[test]
    fn test_mapping_is_cached_until_forced() {
        let index = InMemorySearchIndex::new();
        index
            .index_doc("i", Some("a"), doc(json!({"inode_id": 1})))
            .unwrap();
        let before = index.get_mapping("i", false).unwrap().unwrap();
        assert!(!before.has_field("xattr_prov.owner"));

        index
            .index_doc("i", Some("b"), doc(json!({"xattr_prov": {"owner": "x"}})))
            .unwrap();
        assert!(!index.get_mapping("i", false).unwrap().unwrap().has_field("xattr_prov.owner"));
        assert!(index.get_mapping("i", true).unwrap().unwrap().has_field("xattr_prov.owner"));
    }

    #[test]
    fn test_aggregation_with_metric_order() {
        let index = InMemorySearchIndex::new();
        for (i, (inode, ts)) in [(1, 10), (1, 50), (2, 20), (3, 5)].iter().enumerate() {
            index
                .index_doc(
                    "i",
                    Some(&i.to_string()),
                    doc(json!({"inode_id": inode, "timestamp": ts})),
                )
                .unwrap();
        }
        let spec = AggregationSpec::terms("least", "inode_id", 10)
            .with_metric(Metric::Max("timestamp".to_string()))
            .ordered_by(BucketOrder::MetricAsc);
        let result = index.aggregate("i", &Query::MatchAll, &[spec]).unwrap();
        let keys: Vec<_> = result["least"].iter().map(|b| b.key.clone()).collect();
        assert_eq!(keys, vec![json!(3), json!(2), json!(1)]);
        assert_eq!(result["least"][2].doc_count, 2);
        assert_eq!(result["least"][2].metric, Some(50.0));
    }

    #[test]
    fn test_list_indices_pattern() {
        let index = InMemorySearchIndex::new();
        for name in ["2__file_prov", "10__file_prov", "app_provenance"] {
            index.create_index(name).unwrap();
        }
        assert_eq!(
            index.list_indices("*__file_prov").unwrap(),
            vec!["10__file_prov".to_string(), "2__file_prov".to_string()]
        );
    }

    #[test]
    fn test_unavailable_toggle() {
        let index = seeded(1);
        index.set_unavailable(true);
        let err = index.count("1__file_prov", &Query::MatchAll).unwrap_err();
        assert!(err.is_retryable());
        index.set_unavailable(false);
        assert_eq!(index.count("1__file_prov", &Query::MatchAll).unwrap(), 1);
    }

    #[test]
    fn test_update_missing_doc() {
        let index = seeded(1);
        let err = index
            .update_doc("1__file_prov", "zzz", Document::new())
            .unwrap_err();
        assert!(err.to_string().contains("zzz"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_desc_sort_is_reverse_of_asc(values in proptest::collection::vec(0i64..50, 1..20)) {
            let index = InMemorySearchIndex::new();
            for (i, v) in values.iter().enumerate() {
                index.index_doc("i", Some(&format!("{:03}", i)), doc(json!({"v": v}))).unwrap();
            }
            let asc = index
                .search("i", &SearchRequest::new(Query::MatchAll, 100).sort_by(SortSpec::asc("v")))
                .unwrap();
            let desc = index
                .search("i", &SearchRequest::new(Query::MatchAll, 100).sort_by(SortSpec::new("v", SortOrder::Desc)))
                .unwrap();
            let a: Vec<_> = asc.hits.iter().map(|h| h.source["v"].as_i64()).collect();
            let mut d: Vec<_> = desc.hits.iter().map(|h| h.source["v"].as_i64()).collect();
            d.reverse();
            prop_assert_eq!(a, d);
        }
    }
}
