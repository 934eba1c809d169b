//! Provenance Test Utilities
//!
//! Shared test infrastructure for the provenance workspace:
//! - Proptest generators for operation events and query parameters
//! - Fixtures for a small project with a seeded in-memory index
//! - Custom assertions over `ProvResult`

pub use prov_core::{
    AppState, AppStateRecord, ArchivalError, BackendError, DocSubType, FileOp, FileOperation,
    FileState, FootprintType, InodeId, MappingError, Project, ProvConfig, ProvError, ProvResult,
    QueryError, NO_APP_ID,
};
pub use prov_storage::{InMemoryColdStore, InMemorySearchIndex, SearchIndex};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for provenance records.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_file_operation() -> impl Strategy<Value = FileOperation> {
        prop_oneof![
            Just(FileOperation::Create),
            Just(FileOperation::Delete),
            Just(FileOperation::AccessData),
            Just(FileOperation::ModifyData),
        ]
    }

    pub fn arb_footprint_type() -> impl Strategy<Value = FootprintType> {
        prop_oneof![
            Just(FootprintType::All),
            Just(FootprintType::Input),
            Just(FootprintType::OutputModified),
            Just(FootprintType::OutputAdded),
            Just(FootprintType::OutputTmp),
            Just(FootprintType::OutputRemoved),
        ]
    }

    pub fn arb_doc_subtype() -> impl Strategy<Value = DocSubType> {
        prop_oneof![
            4 => Just(DocSubType::None),
            1 => Just(DocSubType::Model),
            1 => Just(DocSubType::ModelPart),
            1 => Just(DocSubType::TrainingDataset),
            1 => Just(DocSubType::TrainingDatasetPart),
            1 => Just(DocSubType::Hive),
        ]
    }

    /// One operation on an inode of the fixture directory.
    pub fn arb_file_op() -> impl Strategy<Value = FileOp> {
        (10i64..30, arb_file_operation(), 0i64..1_000_000).prop_map(|(inode, op, ts)| {
            fixtures::file_op(inode, fixtures::DIR_INODE, op, ts, fixtures::APP_ID)
        })
    }

    /// A run of one application over `pool` inodes, timestamps ascending.
    pub fn arb_op_sequence(pool: i64, max_len: usize) -> impl Strategy<Value = Vec<FileOp>> {
        prop::collection::vec((0..pool.max(1), arb_file_operation()), 0..max_len).prop_map(
            |steps| {
                steps
                    .into_iter()
                    .enumerate()
                    .map(|(i, (offset, op))| {
                        fixtures::file_op(
                            10 + offset,
                            fixtures::DIR_INODE,
                            op,
                            i as i64,
                            fixtures::APP_ID,
                        )
                    })
                    .collect()
            },
        )
    }

    /// Operations tagged with ML subtypes; parts and parents share `ml_id`s.
    pub fn arb_ml_op_sequence(max_len: usize) -> impl Strategy<Value = Vec<FileOp>> {
        prop::collection::vec(
            (10i64..20, arb_file_operation(), arb_doc_subtype(), 0u8..3),
            0..max_len,
        )
        .prop_map(|steps| {
            steps
                .into_iter()
                .enumerate()
                .map(|(i, (inode, op, subtype, asset))| {
                    let mut file_op =
                        fixtures::file_op(inode, fixtures::DIR_INODE, op, i as i64, fixtures::APP_ID);
                    file_op.doc_subtype = subtype;
                    if subtype != DocSubType::None {
                        file_op.ml_id = Some(format!("asset_{}", asset));
                    }
                    file_op
                })
                .collect()
        })
    }

    /// Raw filter parameters, valid or not, in the `field[:op]:value` grammar.
    pub fn arb_raw_filter() -> impl Strategy<Value = String> {
        let fields = prop_oneof![
            Just("file_i_id"),
            Just("file_name"),
            Just("file_name_like"),
            Just("timestamp"),
            Just("timestamp_lt"),
            Just("file_operation"),
            Just("app_id"),
            Just("ml_type"),
            Just("unknown_field"),
        ];
        let ops = prop_oneof![
            Just(""),
            Just("eq:"),
            Just("like:"),
            Just("lt:"),
            Just("gte:"),
            Just("bogus:"),
        ];
        (fields, ops, "[a-zA-Z0-9_*]{0,12}")
            .prop_map(|(field, op, value)| format!("{}:{}{}", field, op, value))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records for a single project `demo` (inode 1) whose files
    //! live in directory inode 2.

    use super::*;

    pub const PROJECT_INODE: InodeId = 1;
    pub const DIR_INODE: InodeId = 2;
    pub const APP_ID: &str = "application_1_0001";
    pub const PROJECT_PATH: &str = "/Projects/demo";

    pub fn project() -> Project {
        Project::new(PROJECT_INODE, "demo", PROJECT_PATH)
    }

    /// Config with small pages so paging paths get exercised.
    pub fn test_config() -> ProvConfig {
        ProvConfig {
            archival_page_size: 2,
            default_page_size: 3,
            ..ProvConfig::default()
        }
    }

    pub fn file_op(
        inode: InodeId,
        parent: InodeId,
        operation: FileOperation,
        timestamp: i64,
        app_id: &str,
    ) -> FileOp {
        FileOp {
            id: String::new(),
            inode_id: inode,
            parent_inode_id: parent,
            project_inode_id: PROJECT_INODE,
            dataset_inode_id: DIR_INODE,
            inode_name: format!("file_{}", inode),
            project_name: "demo".to_string(),
            user_id: 1,
            app_id: app_id.to_string(),
            operation,
            timestamp,
            logical_time: 0,
            partition_id: 0,
            doc_subtype: DocSubType::None,
            ml_id: None,
            xattr_name: None,
            xattr_val: None,
        }
    }

    pub fn file_state(inode: InodeId, parent: InodeId) -> FileState {
        let mut state = FileState::from_op(&file_op(
            inode,
            parent,
            FileOperation::Create,
            0,
            NO_APP_ID,
        ));
        state.inode_name = if inode == PROJECT_INODE {
            "demo".to_string()
        } else {
            format!("file_{}", inode)
        };
        state
    }

    /// States of the project root and the files directory.
    pub fn skeleton_states() -> Vec<FileState> {
        vec![
            file_state(PROJECT_INODE, PROJECT_INODE),
            file_state(DIR_INODE, PROJECT_INODE),
        ]
    }

    pub fn app_record(app_id: &str, state: AppState, timestamp: i64) -> AppStateRecord {
        AppStateRecord {
            app_id: app_id.to_string(),
            state,
            timestamp,
            name: "job".to_string(),
            user: "alice".to_string(),
        }
    }

    /// One application touching one file per footprint bucket:
    /// 10 input, 11 added, 12 tmp, 13 modified, 14 removed.
    pub fn footprint_run() -> Vec<FileOp> {
        vec![
            file_op(10, DIR_INODE, FileOperation::AccessData, 100, APP_ID),
            file_op(11, DIR_INODE, FileOperation::Create, 101, APP_ID),
            file_op(12, DIR_INODE, FileOperation::Create, 102, APP_ID),
            file_op(12, DIR_INODE, FileOperation::Delete, 103, APP_ID),
            file_op(13, DIR_INODE, FileOperation::ModifyData, 104, APP_ID),
            file_op(14, DIR_INODE, FileOperation::Delete, 105, APP_ID),
        ]
    }

    /// Full lifecycle of one file, ending with a DELETE.
    pub fn closed_lifecycle(inode: InodeId, start: i64) -> Vec<FileOp> {
        vec![
            file_op(inode, DIR_INODE, FileOperation::Create, start, APP_ID),
            file_op(inode, DIR_INODE, FileOperation::ModifyData, start + 1, APP_ID),
            file_op(inode, DIR_INODE, FileOperation::AccessData, start + 2, APP_ID),
            file_op(inode, DIR_INODE, FileOperation::Delete, start + 3, APP_ID),
        ]
    }

    /// In-memory index holding `ops` and `states` in the project index of
    /// `config`. Returns the index and the generated document ids of `ops`.
    pub fn seeded_index(
        config: &ProvConfig,
        ops: &[FileOp],
        states: &[FileState],
    ) -> ProvResult<(InMemorySearchIndex, Vec<String>)> {
        let index = InMemorySearchIndex::new();
        let name = config.project_index(PROJECT_INODE);
        index.create_index(&name)?;
        let mut ids = Vec::with_capacity(ops.len());
        for op in ops {
            ids.push(index.index_doc(&name, None, op.to_document())?);
        }
        for state in states {
            index.index_doc(&name, None, state.to_document())?;
        }
        Ok((index, ids))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over provenance results.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &ProvResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &ProvResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert a malformed-query error.
    #[track_caller]
    pub fn assert_query_error<T: std::fmt::Debug>(result: &ProvResult<T>) {
        match result {
            Err(ProvError::Query(_)) => {}
            other => panic!("Expected Query error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_unsupported_combination<T: std::fmt::Debug>(result: &ProvResult<T>) {
        match result {
            Err(ProvError::Query(QueryError::UnsupportedCombination { .. })) => {}
            other => panic!("Expected UnsupportedCombination, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_backend_error<T: std::fmt::Debug>(result: &ProvResult<T>) {
        match result {
            Err(ProvError::Backend(_)) => {}
            other => panic!("Expected Backend error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_mapping_error<T: std::fmt::Debug>(result: &ProvResult<T>) {
        match result {
            Err(ProvError::Mapping(_)) => {}
            other => panic!("Expected Mapping error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_archival_error<T: std::fmt::Debug>(result: &ProvResult<T>) {
        match result {
            Err(ProvError::Archival(_)) => {}
            other => panic!("Expected Archival error, got: {:?}", other),
        }
    }

    /// Assert the footprint bucket assigned to one inode.
    #[track_caller]
    pub fn assert_footprint(states: &[FileState], inode: InodeId, expected: FootprintType) {
        match states.iter().find(|s| s.inode_id == inode) {
            Some(state) => assert_eq!(
                state.footprint,
                Some(expected),
                "Wrong footprint for inode {}",
                inode
            ),
            None => panic!("Inode {} missing from footprint {:?}", inode, states),
        }
    }

    /// Assert that no generated document id is left in an index.
    #[track_caller]
    pub fn assert_docs_gone(index: &dyn SearchIndex, name: &str, ids: &[String]) {
        for id in ids {
            match index.get_doc(name, id) {
                Ok(None) => {}
                Ok(Some(hit)) => panic!("Document {} still present: {:?}", id, hit),
                Err(e) => panic!("Lookup of {} failed: {}", id, e),
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_seeded_index_fixture() {
        let config = fixtures::test_config();
        let (index, ids) = fixtures::seeded_index(
            &config,
            &fixtures::footprint_run(),
            &fixtures::skeleton_states(),
        )
        .unwrap();
        assert_eq!(ids.len(), 6);
        assert_eq!(
            index.doc_count(&config.project_index(fixtures::PROJECT_INODE)).unwrap(),
            8
        );
    }

    #[test]
    fn test_skeleton_is_rooted() {
        let states = fixtures::skeleton_states();
        assert_eq!(states[0].inode_id, states[0].project_inode_id);
        assert_eq!(states[1].parent_inode_id, fixtures::PROJECT_INODE);
    }

    #[test]
    fn test_assertion_unsupported_combination() {
        let result: ProvResult<()> = Err(QueryError::UnsupportedCombination {
            reason: "x".to_string(),
        }
        .into());
        assertions::assert_query_error(&result);
        assertions::assert_unsupported_combination(&result);
    }

    #[test]
    fn test_assertion_docs_gone() {
        let index = InMemorySearchIndex::new();
        index.create_index("i").unwrap();
        assertions::assert_docs_gone(&index, "i", &["missing".to_string()]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_op_sequence_is_time_ordered(ops in generators::arb_op_sequence(5, 40)) {
            prop_assert!(ops.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
            prop_assert!(ops.iter().all(|o| (10..15).contains(&o.inode_id)));
        }

        #[test]
        fn prop_ml_ops_carry_ids(ops in generators::arb_ml_op_sequence(30)) {
            for op in ops {
                prop_assert_eq!(op.ml_id.is_some(), op.doc_subtype != DocSubType::None);
            }
        }
    }
}
