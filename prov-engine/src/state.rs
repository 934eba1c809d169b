//! Queries over file state documents.

use crate::apps::app_states;
use crate::ops::fetch_hits;
use crate::tree::{full_tree, min_tree, AncestorSource, TreeResult};
use prov_core::{
    add_to_filters, columns, BoolQuery, EntryType, FileState, FileStateParams, FilterOperator,
    InodeId, MappingError, ProvConfig, ProvResult, Query, QueryError, SearchRequest,
};
use prov_storage::{IndexMapping, SearchIndex};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatePage {
    pub total: u64,
    pub items: Vec<FileState>,
}

/// File state queries scoped to one project index.
pub struct StateController {
    index: Arc<dyn SearchIndex>,
    config: ProvConfig,
}

impl StateController {
    pub fn new(index: Arc<dyn SearchIndex>, config: ProvConfig) -> Self {
        Self { index, config }
    }

    fn project_index(&self, project: InodeId) -> String {
        self.config.project_index(project)
    }

    fn scoped(project: InodeId, params: &FileStateParams) -> FileStateParams {
        let mut params = params.clone();
        add_to_filters(
            &mut params.filters,
            columns::PROJECT_I_ID,
            FilterOperator::Eq,
            Value::from(project),
        );
        params
    }

    fn mapping(&self, index: &str, force_refresh: bool) -> ProvResult<IndexMapping> {
        self.index
            .get_mapping(index, force_refresh)?
            .ok_or_else(|| {
                MappingError::NoIndex {
                    index: index.to_string(),
                }
                .into()
            })
    }

    /// Every sort column must be mapped. A cached mapping missing a column is
    /// refreshed once before giving up.
    fn check_mapping(&self, index: &str, params: &FileStateParams) -> ProvResult<()> {
        let mut mapping = self.mapping(index, false)?;
        let mut refreshed = false;
        for spec in params.sort_specs() {
            if mapping.has_field(&spec.field) {
                continue;
            }
            if !refreshed {
                tracing::debug!(index = %index, field = %spec.field, "Refreshing index mapping");
                mapping = self.mapping(index, true)?;
                refreshed = true;
                if mapping.has_field(&spec.field) {
                    continue;
                }
            }
            tracing::warn!(index = %index, field = %spec.field, "Sort field missing from mapping");
            return Err(MappingError::MissingField {
                index: index.to_string(),
                field: spec.field,
            }
            .into());
        }
        Ok(())
    }

    /// File states of `project` matching `params`.
    ///
    /// With the APP expansion every state carries the summary of the app that
    /// created it. App-state filters drop the states of non-matching apps,
    /// which cannot be combined with pagination.
    pub fn list(&self, project: InodeId, params: &FileStateParams) -> ProvResult<StatePage> {
        let index = self.project_index(project);
        self.check_mapping(&index, params)?;
        let paginated = params.pagination.is_some();
        let expand = params.has_app_expansion();
        if paginated && expand && !params.app_state_filters.is_empty() {
            return Err(QueryError::UnsupportedCombination {
                reason: "app state filters cannot be combined with pagination".to_string(),
            }
            .into());
        }

        let params = Self::scoped(project, params);
        let request = params.search_request(self.config.default_page_size);
        let page = fetch_hits(self.index.as_ref(), &index, &request, paginated)?;
        let mut items = page
            .hits
            .iter()
            .map(FileState::from_hit)
            .collect::<ProvResult<Vec<_>>>()?;
        let mut total = page.total;

        if expand {
            let ids: BTreeSet<String> = items.iter().filter_map(FileState::app).collect();
            let states = app_states(
                self.index.as_ref(),
                &self.config.app_index,
                &ids,
                &params.app_state_filters,
                self.config.default_page_size,
            )?;
            if states.matching.is_some() {
                items.retain(|s| states.accepts(s.app().as_deref()));
                total = items.len() as u64;
            }
            for item in &mut items {
                item.app_state = Some(states.summary(item.app().as_deref()));
            }
        }
        Ok(StatePage { total, items })
    }

    pub fn count(&self, project: InodeId, params: &FileStateParams) -> ProvResult<u64> {
        let params = Self::scoped(project, params);
        self.index
            .count(&self.project_index(project), &params.query())
    }

    pub fn min_tree(
        &self,
        project: InodeId,
        params: &FileStateParams,
    ) -> ProvResult<TreeResult<FileState>> {
        Ok(min_tree(self.list(project, params)?.items))
    }

    pub fn full_tree(
        &self,
        project: InodeId,
        params: &FileStateParams,
    ) -> ProvResult<TreeResult<FileState>> {
        let items = self.list(project, params)?.items;
        full_tree(items, &self.ancestors(project), self.config.tree_max_rounds)
    }

    /// Ancestor lookups against the state documents of `project`.
    pub fn ancestors(&self, project: InodeId) -> StateAncestors {
        StateAncestors::new(
            self.index.clone(),
            self.project_index(project),
            self.config.default_page_size,
        )
    }
}

/// Ancestors looked up by their state documents.
pub struct StateAncestors {
    index: Arc<dyn SearchIndex>,
    index_name: String,
    page_size: usize,
}

impl StateAncestors {
    pub fn new(index: Arc<dyn SearchIndex>, index_name: impl Into<String>, page_size: usize) -> Self {
        Self {
            index,
            index_name: index_name.into(),
            page_size,
        }
    }
}

impl AncestorSource<FileState> for StateAncestors {
    fn fetch(&self, inode_ids: &BTreeSet<InodeId>) -> ProvResult<Vec<FileState>> {
        let ids: Vec<Value> = inode_ids.iter().map(|id| Value::from(*id)).collect();
        let query = BoolQuery::new()
            .must(Query::term(
                columns::ENTRY_TYPE,
                EntryType::State.column_value(),
            ))
            .must(Query::terms(columns::INODE_ID, ids))
            .build();
        let request = SearchRequest::new(query, self.page_size);
        fetch_hits(self.index.as_ref(), &self.index_name, &request, false)?
            .hits
            .iter()
            .map(FileState::from_hit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prov_core::{
        AppState, AppStateRecord, DocSubType, Expansion, ProvError, NO_APP_ID,
    };
    use prov_storage::InMemorySearchIndex;
    use serde_json::json;
    use std::collections::BTreeMap;

    const PROJECT: InodeId = 1;

    fn state(inode: InodeId, parent: InodeId, app: &str, created: i64) -> FileState {
        FileState {
            id: String::new(),
            inode_id: inode,
            parent_inode_id: parent,
            project_inode_id: PROJECT,
            dataset_inode_id: 2,
            inode_name: format!("f{}", inode),
            create_timestamp: created,
            user_id: 1,
            app_id: app.to_string(),
            doc_subtype: DocSubType::None,
            ml_id: None,
            xattrs: BTreeMap::new(),
            footprint: None,
            app_state: None,
        }
    }

    fn setup(states: &[FileState]) -> (Arc<InMemorySearchIndex>, StateController) {
        let index = Arc::new(InMemorySearchIndex::new());
        let config = ProvConfig::default();
        let name = config.project_index(PROJECT);
        for s in states {
            index.index_doc(&name, None, s.to_document()).unwrap();
        }
        (index.clone(), StateController::new(index, config))
    }

    fn tree_states() -> Vec<FileState> {
        vec![
            state(PROJECT, PROJECT, NO_APP_ID, 0),
            state(2, PROJECT, NO_APP_ID, 1),
            state(3, 2, "app1", 2),
            state(4, 2, "app2", 3),
            state(5, 3, "app1", 4),
        ]
    }

    #[test]
    fn test_list_sorted_and_paginated() {
        let (_, states) = setup(&tree_states());
        let params = FileStateParams::new()
            .with_sort_param("create_timestamp:desc")
            .unwrap()
            .paginate(0, 2);
        let page = states.list(PROJECT, &params).unwrap();
        assert_eq!(page.total, 5);
        let ids: Vec<InodeId> = page.items.iter().map(|s| s.inode_id).collect();
        assert_eq!(ids, vec![5, 4]);
    }

    #[test]
    fn test_missing_index_has_no_mapping() {
        let (_, states) = setup(&[]);
        let err = states.list(PROJECT, &FileStateParams::new()).unwrap_err();
        assert!(matches!(err, ProvError::Mapping(MappingError::NoIndex { .. })));
    }

    #[test]
    fn test_mapping_refreshed_once_for_new_sort_field() {
        let (index, states) = setup(&tree_states());
        // warm the mapping cache
        states.list(PROJECT, &FileStateParams::new()).unwrap();

        let mut tagged = state(6, 2, NO_APP_ID, 5);
        tagged.xattrs.insert("owner".to_string(), json!("bob"));
        index
            .index_doc(&states.config.project_index(PROJECT), None, tagged.to_document())
            .unwrap();

        let params = FileStateParams::new()
            .with_xattr_sort_param("owner:asc")
            .unwrap();
        assert!(states.list(PROJECT, &params).is_ok());

        let params = FileStateParams::new()
            .with_xattr_sort_param("missing")
            .unwrap();
        let err = states.list(PROJECT, &params).unwrap_err();
        assert!(matches!(
            err,
            ProvError::Mapping(MappingError::MissingField { .. })
        ));
    }

    #[test]
    fn test_app_expansion_attaches_and_filters() {
        let (index, states) = setup(&tree_states());
        let record = AppStateRecord {
            app_id: "app1".to_string(),
            state: AppState::Running,
            timestamp: 10,
            name: "job".to_string(),
            user: "alice".to_string(),
        };
        index
            .index_doc(&states.config.app_index, None, record.to_document())
            .unwrap();

        let expanded = FileStateParams::new().with_expansion(Expansion::App);
        let page = states.list(PROJECT, &expanded).unwrap();
        assert_eq!(page.total, 5);
        let four = page.items.iter().find(|s| s.inode_id == 4).unwrap();
        assert_eq!(
            four.app_state.as_ref().map(|a| a.current_state),
            Some(AppState::Unknown)
        );

        let filtered = expanded
            .clone()
            .with_app_state_params(["app_state:RUNNING"])
            .unwrap();
        let page = states.list(PROJECT, &filtered).unwrap();
        let ids: BTreeSet<InodeId> = page.items.iter().map(|s| s.inode_id).collect();
        assert_eq!(ids, BTreeSet::from([3, 5]));
        assert_eq!(page.total, 2);

        let err = states
            .list(PROJECT, &filtered.paginate(0, 10))
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_app_falls_back_to_xattr() {
        let mut tagged = state(6, 2, NO_APP_ID, 5);
        tagged.xattrs.insert("appId".to_string(), json!("app9"));
        let (_, states) = setup(&[tagged]);
        let params = FileStateParams::new().with_expansion(Expansion::App);
        let page = states.list(PROJECT, &params).unwrap();
        assert_eq!(page.items[0].app().as_deref(), Some("app9"));
        assert!(page.items[0].app_state.is_some());
    }

    #[test]
    fn test_count() {
        let (_, states) = setup(&tree_states());
        let params = FileStateParams::new()
            .with_filter_params(["app_id:app1"])
            .unwrap();
        assert_eq!(states.count(PROJECT, &params).unwrap(), 2);
    }

    #[test]
    fn test_trees() {
        let (_, states) = setup(&tree_states());
        let params = FileStateParams::new()
            .with_filter_params(["file_i_id:5"])
            .unwrap();

        let min = states.min_tree(PROJECT, &params).unwrap();
        assert!(min.complete.is_empty());
        assert!(min.incomplete.contains_key(&5));

        let full = states.full_tree(PROJECT, &params).unwrap();
        assert!(full.is_complete());
        let dir = &full.complete[&PROJECT].children[&2];
        assert!(dir.children[&3].children.contains_key(&5));
        assert!(!dir.children.contains_key(&4));
    }
}
