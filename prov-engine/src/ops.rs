//! Queries over operation events: listings, counts, aggregations, footprints
//! and trees.

use crate::apps::{app_states, AppStates};
use crate::footprint::{artifact_footprint, classify, file_footprint, footprint_operations};
use crate::state::StateAncestors;
use crate::tree::{full_tree, min_tree, AncestorSource, TreeResult};
use prov_core::{
    columns, AggregationResult, AppStateSummary, ArtifactFootprint, BoolQuery, EntryType, FileOp,
    FileOpsParams, FileOperation, FileState, FootprintType, InodeId, MlAssetState,
    ProvAggregation, ProvConfig, ProvResult, Query, QueryError, ReturnType, SearchPage,
    SearchRequest, SortSpec,
};
use prov_storage::{Scroll, SearchIndex};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Search a page when paginated, scroll through every match otherwise.
pub(crate) fn fetch_hits(
    index: &dyn SearchIndex,
    name: &str,
    request: &SearchRequest,
    paginated: bool,
) -> ProvResult<SearchPage> {
    if paginated {
        return index.search(name, request);
    }
    let scroll = Scroll::open(index, name, request)?;
    let total = scroll.total();
    let hits = scroll.collect_all()?;
    Ok(SearchPage { total, hits })
}

fn unsupported(reason: &str) -> QueryError {
    QueryError::UnsupportedCombination {
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpsPage {
    pub total: u64,
    pub items: Vec<FileOp>,
    /// App states of the listed operations, filled by the APP expansion
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub apps: BTreeMap<String, AppStateSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpsCount {
    pub count: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aggregations: BTreeMap<ProvAggregation, AggregationResult>,
}

/// Outcome of a footprint query, shaped by its [`ReturnType`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FootprintResult {
    List { total: u64, items: Vec<FileState> },
    Count(OpsCount),
    MinTree(TreeResult<FileState>),
    FullTree(TreeResult<FileState>),
    Artifacts(Vec<MlAssetState>),
}

/// Operation queries scoped to one project index.
pub struct OpsController {
    index: Arc<dyn SearchIndex>,
    config: ProvConfig,
}

impl OpsController {
    pub fn new(index: Arc<dyn SearchIndex>, config: ProvConfig) -> Self {
        Self { index, config }
    }

    fn project_index(&self, project: InodeId) -> String {
        self.config.project_index(project)
    }

    fn apps_of<'a>(
        &self,
        app_ids: impl Iterator<Item = Option<&'a str>>,
        params: &FileOpsParams,
    ) -> ProvResult<AppStates> {
        let ids: BTreeSet<String> = app_ids.flatten().map(str::to_string).collect();
        app_states(
            self.index.as_ref(),
            &self.config.app_index,
            &ids,
            &params.app_state_filters,
            self.config.default_page_size,
        )
    }

    /// Operations of `project` matching `params`.
    ///
    /// Without pagination every match is scrolled. With the APP expansion the
    /// states of the involved apps are attached, and operations of apps not
    /// matching the app-state filters are dropped.
    pub fn list(&self, project: InodeId, params: &FileOpsParams) -> ProvResult<OpsPage> {
        if !params.aggregations.is_empty() {
            return Err(unsupported("aggregations currently only allowed with count").into());
        }
        let paginated = params.pagination.is_some();
        if paginated && params.has_app_expansion() && !params.app_state_filters.is_empty() {
            return Err(unsupported("app state filters cannot be combined with pagination").into());
        }
        let params = params.clone().with_project(project);
        let request = params.search_request(self.config.default_page_size);
        let page = fetch_hits(
            self.index.as_ref(),
            &self.project_index(project),
            &request,
            paginated,
        )?;
        let mut items = page
            .hits
            .iter()
            .map(FileOp::from_hit)
            .collect::<ProvResult<Vec<_>>>()?;
        let mut total = page.total;

        let mut apps = BTreeMap::new();
        if params.has_app_expansion() {
            let states = self.apps_of(items.iter().map(FileOp::app), &params)?;
            if states.matching.is_some() {
                items.retain(|op| states.accepts(op.app()));
                total = items.len() as u64;
            }
            apps = items
                .iter()
                .filter_map(FileOp::app)
                .map(|app| (app.to_string(), states.summary(Some(app))))
                .collect();
        }
        Ok(OpsPage { total, items, apps })
    }

    /// Number of matching operations, plus any requested aggregations.
    pub fn count(&self, project: InodeId, params: &FileOpsParams) -> ProvResult<OpsCount> {
        let params = params.clone().with_project(project);
        let count = self
            .index
            .count(&self.project_index(project), &params.query())?;
        let aggregations = if params.aggregations.is_empty() {
            BTreeMap::new()
        } else {
            self.run_aggregations(project, &params)?
        };
        Ok(OpsCount {
            count,
            aggregations,
        })
    }

    /// Requested aggregations over the matching operations.
    pub fn aggregations(
        &self,
        project: InodeId,
        params: &FileOpsParams,
    ) -> ProvResult<BTreeMap<ProvAggregation, AggregationResult>> {
        self.run_aggregations(project, &params.clone().with_project(project))
    }

    fn run_aggregations(
        &self,
        project: InodeId,
        params: &FileOpsParams,
    ) -> ProvResult<BTreeMap<ProvAggregation, AggregationResult>> {
        let specs: Vec<_> = params
            .aggregations
            .iter()
            .map(|agg| agg.spec(self.config.default_page_size))
            .collect();
        let mut response =
            self.index
                .aggregate(&self.project_index(project), &params.query(), &specs)?;
        Ok(params
            .aggregations
            .iter()
            .zip(specs.iter())
            .map(|(agg, spec)| {
                let buckets = response.remove(&spec.name).unwrap_or_default();
                (*agg, agg.parse_result(&buckets))
            })
            .collect())
    }

    /// Footprint of application `app_id` in `project`.
    ///
    /// Only the operations relevant to `footprint_type` are fetched. LIST
    /// pagination applies to the classified artifacts.
    pub fn footprint(
        &self,
        project: InodeId,
        app_id: &str,
        footprint_type: FootprintType,
        return_type: ReturnType,
        params: &FileOpsParams,
    ) -> ProvResult<FootprintResult> {
        if params.has_operation_filter() {
            return Err(
                unsupported("footprint should have no predefined file operation filters").into(),
            );
        }
        if !params.aggregations.is_empty() && return_type != ReturnType::Count {
            return Err(unsupported("aggregations currently only allowed with count").into());
        }

        let mut fetch = params.clone().with_project(project).with_app_id(app_id);
        for operation in footprint_operations(footprint_type) {
            fetch = fetch.filter_by_operation(operation);
        }
        fetch.pagination = None;
        fetch.sort = vec![SortSpec::asc(columns::TIMESTAMP)];
        let index = self.project_index(project);
        let request = fetch.search_request(self.config.default_page_size);
        let ops = fetch_hits(self.index.as_ref(), &index, &request, false)?
            .hits
            .iter()
            .map(FileOp::from_hit)
            .collect::<ProvResult<Vec<_>>>()?;
        tracing::debug!(
            project,
            app_id = %app_id,
            footprint = %footprint_type,
            ops = ops.len(),
            "Computing footprint"
        );

        if return_type == ReturnType::Artifacts {
            let assets = classify(artifact_footprint(&ops), footprint_type)
                .into_values()
                .map(|(bucket, mut asset)| {
                    asset.footprint = Some(bucket);
                    asset
                })
                .collect();
            return Ok(FootprintResult::Artifacts(assets));
        }

        let states: Vec<FileState> = classify(file_footprint(&ops), footprint_type)
            .into_values()
            .map(|(bucket, mut state)| {
                state.footprint = Some(bucket);
                state
            })
            .collect();

        Ok(match return_type {
            ReturnType::List => {
                let total = states.len() as u64;
                let items = match params.pagination {
                    Some(p) => states.into_iter().skip(p.offset).take(p.limit).collect(),
                    None => states,
                };
                FootprintResult::List { total, items }
            }
            ReturnType::Count => {
                let aggregations = if fetch.aggregations.is_empty() {
                    BTreeMap::new()
                } else {
                    self.run_aggregations(project, &fetch)?
                };
                FootprintResult::Count(OpsCount {
                    count: states.len() as u64,
                    aggregations,
                })
            }
            ReturnType::MinTree => FootprintResult::MinTree(min_tree(states)),
            ReturnType::FullTree => {
                let source = StateAncestors::new(
                    self.index.clone(),
                    index,
                    self.config.default_page_size,
                );
                FootprintResult::FullTree(full_tree(
                    states,
                    &source,
                    self.config.tree_max_rounds,
                )?)
            }
            ReturnType::Artifacts => FootprintResult::Artifacts(Vec::new()),
        })
    }

    /// Files of every ML artifact an application touched, with their first
    /// operation times.
    pub fn app_artifact_footprint(
        &self,
        project: InodeId,
        app_id: &str,
    ) -> ProvResult<Vec<ArtifactFootprint>> {
        let params = FileOpsParams::new()
            .with_app_id(app_id)
            .with_aggregation(ProvAggregation::ArtifactFootprint);
        let mut count = self.count(project, &params)?;
        match count
            .aggregations
            .remove(&ProvAggregation::ArtifactFootprint)
        {
            Some(AggregationResult::ArtifactFootprint(artifacts)) => Ok(artifacts),
            _ => Ok(Vec::new()),
        }
    }

    /// Tree of the matching operations, without ancestor lookups.
    pub fn min_tree(&self, project: InodeId, params: &FileOpsParams) -> ProvResult<TreeResult<FileOp>> {
        Ok(min_tree(self.list(project, params)?.items))
    }

    /// Tree of the matching operations, climbing to the project root through
    /// CREATE and DELETE operations of the ancestors.
    pub fn full_tree(&self, project: InodeId, params: &FileOpsParams) -> ProvResult<TreeResult<FileOp>> {
        let items = self.list(project, params)?.items;
        let source = OpsAncestors::new(
            self.index.clone(),
            self.project_index(project),
            self.config.default_page_size,
        );
        full_tree(items, &source, self.config.tree_max_rounds)
    }
}

/// Ancestors looked up through their CREATE and DELETE operations. The
/// latest such operation represents the inode.
pub struct OpsAncestors {
    index: Arc<dyn SearchIndex>,
    index_name: String,
    page_size: usize,
}

impl OpsAncestors {
    pub fn new(index: Arc<dyn SearchIndex>, index_name: impl Into<String>, page_size: usize) -> Self {
        Self {
            index,
            index_name: index_name.into(),
            page_size,
        }
    }
}

impl AncestorSource<FileOp> for OpsAncestors {
    fn fetch(&self, inode_ids: &BTreeSet<InodeId>) -> ProvResult<Vec<FileOp>> {
        let ids: Vec<Value> = inode_ids.iter().map(|id| Value::from(*id)).collect();
        let operations = [FileOperation::Create, FileOperation::Delete]
            .iter()
            .map(|op| Value::from(op.as_db_str()))
            .collect();
        let query = BoolQuery::new()
            .must(Query::term(
                columns::ENTRY_TYPE,
                EntryType::Operation.column_value(),
            ))
            .must(Query::terms(columns::INODE_ID, ids))
            .must(Query::terms(columns::INODE_OPERATION, operations))
            .build();
        let request =
            SearchRequest::new(query, self.page_size).sort_by(SortSpec::asc(columns::TIMESTAMP));
        let hits = fetch_hits(self.index.as_ref(), &self.index_name, &request, false)?.hits;
        let mut latest = BTreeMap::new();
        for hit in &hits {
            let op = FileOp::from_hit(hit)?;
            latest.insert(op.inode_id, op);
        }
        Ok(latest.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prov_core::{
        AppState, AppStateRecord, DocSubType, Expansion, FilterOperator, MlType, ProvError,
        NO_APP_ID,
    };
    use prov_storage::InMemorySearchIndex;

    const PROJECT: InodeId = 1;
    const DIR: InodeId = 2;

    fn op(inode: InodeId, parent: InodeId, operation: FileOperation, ts: i64, app: &str) -> FileOp {
        FileOp {
            id: String::new(),
            inode_id: inode,
            parent_inode_id: parent,
            project_inode_id: PROJECT,
            dataset_inode_id: DIR,
            inode_name: format!("f{}", inode),
            project_name: "demo".to_string(),
            user_id: 1,
            app_id: app.to_string(),
            operation,
            timestamp: ts,
            logical_time: 0,
            partition_id: 0,
            doc_subtype: DocSubType::None,
            ml_id: None,
            xattr_name: None,
            xattr_val: None,
        }
    }

    fn state(inode: InodeId, parent: InodeId) -> FileState {
        FileState::from_op(&op(inode, parent, FileOperation::Create, 0, NO_APP_ID))
    }

    fn setup(ops: &[FileOp]) -> (Arc<InMemorySearchIndex>, OpsController) {
        let index = Arc::new(InMemorySearchIndex::new());
        let config = ProvConfig {
            default_page_size: 2,
            ..ProvConfig::default()
        };
        let name = config.project_index(PROJECT);
        for o in ops {
            index.index_doc(&name, None, o.to_document()).unwrap();
        }
        (index.clone(), OpsController::new(index, config))
    }

    fn app_run() -> Vec<FileOp> {
        vec![
            op(10, DIR, FileOperation::AccessData, 1, "app1"),
            op(11, DIR, FileOperation::Create, 2, "app1"),
            op(12, DIR, FileOperation::Create, 3, "app1"),
            op(12, DIR, FileOperation::Delete, 4, "app1"),
            op(13, DIR, FileOperation::ModifyData, 5, "app1"),
            op(14, DIR, FileOperation::Delete, 6, "app1"),
            op(20, DIR, FileOperation::Create, 7, "app2"),
        ]
    }

    #[test]
    fn test_list_scrolls_everything_without_pagination() {
        let (_, ops) = setup(&app_run());
        let page = ops.list(PROJECT, &FileOpsParams::new()).unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(page.items.len(), 7);
        assert!(page.apps.is_empty());
    }

    #[test]
    fn test_list_paginated() {
        let (_, ops) = setup(&app_run());
        let params = FileOpsParams::new()
            .with_sort_param("timestamp:desc")
            .unwrap()
            .paginate(1, 2);
        let page = ops.list(PROJECT, &params).unwrap();
        assert_eq!(page.total, 7);
        let ts: Vec<i64> = page.items.iter().map(|o| o.timestamp).collect();
        assert_eq!(ts, vec![6, 5]);
    }

    #[test]
    fn test_list_rejects_aggregations() {
        let (_, ops) = setup(&app_run());
        let params = FileOpsParams::new().with_aggregation(ProvAggregation::FilesIn);
        let err = ops.list(PROJECT, &params).unwrap_err();
        assert!(err.to_string().contains("aggregations currently only allowed with count"));
    }

    #[test]
    fn test_list_app_expansion_filters_apps() {
        let (index, ops) = setup(&app_run());
        let record = AppStateRecord {
            app_id: "app1".to_string(),
            state: AppState::Finished,
            timestamp: 10,
            name: "job".to_string(),
            user: "alice".to_string(),
        };
        index
            .index_doc(&ops.config.app_index, None, record.to_document())
            .unwrap();

        let params = FileOpsParams::new()
            .with_expansion(Expansion::App)
            .with_app_state_params(["app_state:FINISHED"])
            .unwrap();
        let page = ops.list(PROJECT, &params).unwrap();
        assert_eq!(page.total, 6);
        assert!(page.items.iter().all(|o| o.app_id == "app1"));
        assert_eq!(page.apps["app1"].current_state, AppState::Finished);
    }

    #[test]
    fn test_count_with_aggregation() {
        let (_, ops) = setup(&app_run());
        let params = FileOpsParams::new().with_aggregation(ProvAggregation::FilesIn);
        let count = ops.count(PROJECT, &params).unwrap();
        assert_eq!(count.count, 7);
        match &count.aggregations[&ProvAggregation::FilesIn] {
            AggregationResult::FilesIn(files) => {
                let twelve = files.iter().find(|f| f.inode_id == 12).unwrap();
                assert_eq!(twelve.count, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_footprint_all_tags_buckets() {
        let (_, ops) = setup(&app_run());
        let result = ops
            .footprint(
                PROJECT,
                "app1",
                FootprintType::All,
                ReturnType::List,
                &FileOpsParams::new(),
            )
            .unwrap();
        let FootprintResult::List { total, items } = result else {
            panic!("expected a list");
        };
        assert_eq!(total, 5);
        let tagged: BTreeMap<InodeId, FootprintType> = items
            .iter()
            .map(|s| (s.inode_id, s.footprint.unwrap()))
            .collect();
        assert_eq!(tagged[&10], FootprintType::Input);
        assert_eq!(tagged[&11], FootprintType::OutputAdded);
        assert_eq!(tagged[&12], FootprintType::OutputTmp);
        assert_eq!(tagged[&13], FootprintType::OutputModified);
        assert_eq!(tagged[&14], FootprintType::OutputRemoved);
    }

    #[test]
    fn test_footprint_count_and_pagination() {
        let (_, ops) = setup(&app_run());
        let count = ops
            .footprint(
                PROJECT,
                "app1",
                FootprintType::OutputAdded,
                ReturnType::Count,
                &FileOpsParams::new(),
            )
            .unwrap();
        assert!(matches!(count, FootprintResult::Count(OpsCount { count: 1, .. })));

        let page = ops
            .footprint(
                PROJECT,
                "app1",
                FootprintType::All,
                ReturnType::List,
                &FileOpsParams::new().paginate(4, 10),
            )
            .unwrap();
        assert!(matches!(page, FootprintResult::List { total: 5, ref items } if items.len() == 1));
    }

    #[test]
    fn test_footprint_rejects_operation_filters() {
        let (_, ops) = setup(&app_run());
        let params = FileOpsParams::new().filter_by_operation(FileOperation::Create);
        let err = ops
            .footprint(PROJECT, "app1", FootprintType::All, ReturnType::List, &params)
            .unwrap_err();
        assert!(matches!(
            err,
            ProvError::Query(QueryError::UnsupportedCombination { .. })
        ));
    }

    #[test]
    fn test_footprint_aggregations_only_with_count() {
        let (_, ops) = setup(&app_run());
        let params = FileOpsParams::new().with_aggregation(ProvAggregation::FilesIn);
        assert!(ops
            .footprint(PROJECT, "app1", FootprintType::All, ReturnType::MinTree, &params)
            .is_err());
        let count = ops
            .footprint(PROJECT, "app1", FootprintType::Input, ReturnType::Count, &params)
            .unwrap();
        let FootprintResult::Count(count) = count else {
            panic!("expected a count");
        };
        assert_eq!(count.count, 1);
        assert!(count.aggregations.contains_key(&ProvAggregation::FilesIn));
    }

    #[test]
    fn test_footprint_full_tree_uses_states() {
        let (index, ops) = setup(&app_run());
        let name = ops.config.project_index(PROJECT);
        for s in [state(PROJECT, PROJECT), state(DIR, PROJECT)] {
            index.index_doc(&name, None, s.to_document()).unwrap();
        }
        let result = ops
            .footprint(
                PROJECT,
                "app1",
                FootprintType::Input,
                ReturnType::FullTree,
                &FileOpsParams::new(),
            )
            .unwrap();
        let FootprintResult::FullTree(tree) = result else {
            panic!("expected a tree");
        };
        assert!(tree.is_complete());
        let root = &tree.complete[&PROJECT];
        assert!(root.children[&DIR].children.contains_key(&10));
    }

    #[test]
    fn test_footprint_artifacts() {
        let mut run = app_run();
        let mut part = op(30, 31, FileOperation::Create, 8, "app1");
        part.doc_subtype = DocSubType::ModelPart;
        part.ml_id = Some("mnist_1".to_string());
        run.push(part);
        let (_, ops) = setup(&run);
        let result = ops
            .footprint(
                PROJECT,
                "app1",
                FootprintType::All,
                ReturnType::Artifacts,
                &FileOpsParams::new(),
            )
            .unwrap();
        let FootprintResult::Artifacts(assets) = result else {
            panic!("expected artifacts");
        };
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].ml_type, MlType::Model);
        assert_eq!(assets[0].footprint, Some(FootprintType::OutputModified));
    }

    #[test]
    fn test_app_artifact_footprint() {
        let mut run = app_run();
        let mut file = op(30, 31, FileOperation::Create, 8, "app1");
        file.doc_subtype = DocSubType::ModelPart;
        file.ml_id = Some("mnist_1".to_string());
        run.push(file);
        let (_, ops) = setup(&run);
        let artifacts = ops.app_artifact_footprint(PROJECT, "app1").unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].ml_id, "mnist_1");
        assert_eq!(artifacts[0].files[0].create, Some(8));
    }

    #[test]
    fn test_ops_full_tree_climbs_create_ops() {
        let mut run = app_run();
        run.push(op(DIR, PROJECT, FileOperation::Create, 0, NO_APP_ID));
        run.push(op(PROJECT, PROJECT, FileOperation::Create, 0, NO_APP_ID));
        let (_, ops) = setup(&run);
        let params = FileOpsParams::new()
            .filter_by_field("file_i_id", FilterOperator::Eq, "10")
            .unwrap();
        let tree = ops.full_tree(PROJECT, &params).unwrap();
        assert!(tree.is_complete());
        assert!(tree.complete[&PROJECT].children[&DIR].children.contains_key(&10));

        let min = ops.min_tree(PROJECT, &params).unwrap();
        assert!(min.complete.is_empty());
        assert!(min.incomplete.contains_key(&10));
    }
}
