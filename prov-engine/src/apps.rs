//! Application state lookups for the APP expansion.

use prov_core::{
    apply_filters, columns, AppState, AppStateRecord, AppStateSummary, BackendError, BoolQuery,
    FilterMap, ProvError, ProvResult, Query, SearchRequest,
};
use prov_storage::{Scroll, SearchIndex};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Application states keyed by app id.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct AppStates {
    pub summaries: BTreeMap<String, AppStateSummary>,
    /// Apps with a record matching the app-state filters, `None` when no
    /// filter was given
    pub matching: Option<BTreeSet<String>>,
}

impl AppStates {
    /// Summary of an app, `unknown` when nothing was recorded.
    pub fn summary(&self, app_id: Option<&str>) -> AppStateSummary {
        app_id
            .and_then(|id| self.summaries.get(id))
            .cloned()
            .unwrap_or_else(AppStateSummary::unknown)
    }

    /// Whether an app passes the app-state filters.
    pub fn accepts(&self, app_id: Option<&str>) -> bool {
        match (&self.matching, app_id) {
            (None, _) => true,
            (Some(matching), Some(id)) => matching.contains(id),
            (Some(_), None) => false,
        }
    }
}

fn scroll_records(
    index: &dyn SearchIndex,
    app_index: &str,
    query: Query,
    page_size: usize,
) -> ProvResult<Vec<AppStateRecord>> {
    let request = SearchRequest::new(query, page_size);
    let hits = match Scroll::open(index, app_index, &request) {
        Ok(scroll) => scroll.collect_all()?,
        Err(ProvError::Backend(BackendError::IndexNotFound { .. })) => {
            tracing::debug!(index = %app_index, "No application state index");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };
    hits.iter().map(AppStateRecord::from_hit).collect()
}

/// Fetch the recorded states of `app_ids`.
pub(crate) fn app_states(
    index: &dyn SearchIndex,
    app_index: &str,
    app_ids: &BTreeSet<String>,
    filters: &FilterMap,
    page_size: usize,
) -> ProvResult<AppStates> {
    if app_ids.is_empty() {
        return Ok(AppStates {
            summaries: BTreeMap::new(),
            matching: (!filters.is_empty()).then(BTreeSet::new),
        });
    }
    let ids: Vec<Value> = app_ids.iter().map(|id| Value::from(id.as_str())).collect();
    let by_app = Query::terms(columns::APP_ID, ids);

    let mut grouped: BTreeMap<String, BTreeMap<AppState, AppStateRecord>> = BTreeMap::new();
    for record in scroll_records(index, app_index, by_app.clone(), page_size)? {
        grouped
            .entry(record.app_id.clone())
            .or_default()
            .insert(record.state, record);
    }
    let summaries = grouped
        .iter()
        .map(|(app, states)| (app.clone(), AppStateSummary::from_states(states)))
        .collect();

    let matching = if filters.is_empty() {
        None
    } else {
        let query = apply_filters(BoolQuery::new().must(by_app), filters).build();
        Some(
            scroll_records(index, app_index, query, page_size)?
                .into_iter()
                .map(|r| r.app_id)
                .collect(),
        )
    };

    Ok(AppStates {
        summaries,
        matching,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prov_core::{add_to_filters, FilterOperator};
    use prov_storage::InMemorySearchIndex;

    fn record(app: &str, state: AppState, ts: i64) -> AppStateRecord {
        AppStateRecord {
            app_id: app.to_string(),
            state,
            timestamp: ts,
            name: "job".to_string(),
            user: "alice".to_string(),
        }
    }

    fn seeded() -> InMemorySearchIndex {
        let index = InMemorySearchIndex::new();
        for r in [
            record("a1", AppState::Submitted, 1),
            record("a1", AppState::Running, 2),
            record("a1", AppState::Finished, 3),
            record("a2", AppState::Submitted, 5),
        ] {
            index.index_doc("apps", None, r.to_document()).unwrap();
        }
        index
    }

    fn ids(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_summaries_and_unknown() {
        let index = seeded();
        let states = app_states(&index, "apps", &ids(&["a1", "a3"]), &FilterMap::new(), 10).unwrap();
        assert_eq!(states.summary(Some("a1")).current_state, AppState::Finished);
        assert_eq!(states.summary(Some("a3")), AppStateSummary::unknown());
        assert_eq!(states.summary(None), AppStateSummary::unknown());
        assert!(states.accepts(Some("a3")));
    }

    #[test]
    fn test_filters_select_apps() {
        let index = seeded();
        let mut filters = FilterMap::new();
        add_to_filters(
            &mut filters,
            columns::APP_STATE,
            FilterOperator::Eq,
            Value::from("FINISHED"),
        );
        let states = app_states(&index, "apps", &ids(&["a1", "a2"]), &filters, 10).unwrap();
        assert!(states.accepts(Some("a1")));
        assert!(!states.accepts(Some("a2")));
        assert!(!states.accepts(None));
    }

    #[test]
    fn test_missing_app_index_is_empty() {
        let index = InMemorySearchIndex::new();
        let states = app_states(&index, "apps", &ids(&["a1"]), &FilterMap::new(), 10).unwrap();
        assert!(states.summaries.is_empty());
    }
}
