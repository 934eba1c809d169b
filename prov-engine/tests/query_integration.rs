//! Footprint and tree queries over a seeded index.

use prov_core::{
    AppState, Expansion, FileOpsParams, FileStateParams, FootprintType, ReturnType,
};
use prov_engine::{FootprintResult, OpsController, StateController};
use prov_storage::SearchIndex;
use prov_test_utils::{assertions, fixtures, generators};
use proptest::prelude::*;
use std::sync::Arc;

fn controllers() -> (Arc<prov_storage::InMemorySearchIndex>, OpsController, StateController) {
    let config = fixtures::test_config();
    let mut states = fixtures::skeleton_states();
    for inode in 10..15 {
        states.push(fixtures::file_state(inode, fixtures::DIR_INODE));
    }
    let (index, _) =
        fixtures::seeded_index(&config, &fixtures::footprint_run(), &states).unwrap();
    let index = Arc::new(index);
    (
        index.clone(),
        OpsController::new(index.clone(), config.clone()),
        StateController::new(index, config),
    )
}

#[test]
fn footprint_buckets_through_controller() {
    let (_, ops, _) = controllers();
    let result = ops
        .footprint(
            fixtures::PROJECT_INODE,
            fixtures::APP_ID,
            FootprintType::All,
            ReturnType::List,
            &FileOpsParams::new(),
        )
        .unwrap();
    let FootprintResult::List { items, .. } = result else {
        panic!("expected a list, got {:?}", result);
    };
    assertions::assert_footprint(&items, 10, FootprintType::Input);
    assertions::assert_footprint(&items, 11, FootprintType::OutputAdded);
    assertions::assert_footprint(&items, 12, FootprintType::OutputTmp);
    assertions::assert_footprint(&items, 13, FootprintType::OutputModified);
    assertions::assert_footprint(&items, 14, FootprintType::OutputRemoved);
}

#[test]
fn footprint_full_tree_reaches_project_root() {
    let (_, ops, _) = controllers();
    let result = ops
        .footprint(
            fixtures::PROJECT_INODE,
            fixtures::APP_ID,
            FootprintType::OutputAdded,
            ReturnType::FullTree,
            &FileOpsParams::new(),
        )
        .unwrap();
    let FootprintResult::FullTree(tree) = result else {
        panic!("expected a tree, got {:?}", result);
    };
    assert!(tree.is_complete());
    let dir = &tree.complete[&fixtures::PROJECT_INODE].children[&fixtures::DIR_INODE];
    assert_eq!(dir.children.keys().copied().collect::<Vec<_>>(), vec![11]);
}

#[test]
fn footprint_rejects_predefined_operations() {
    let (_, ops, _) = controllers();
    let params = FileOpsParams::new().filter_by_operation(prov_core::FileOperation::Delete);
    let result = ops.footprint(
        fixtures::PROJECT_INODE,
        fixtures::APP_ID,
        FootprintType::All,
        ReturnType::Count,
        &params,
    );
    assertions::assert_unsupported_combination(&result);
}

#[test]
fn state_listing_with_app_expansion() {
    let (index, _, states) = controllers();
    let config = fixtures::test_config();
    index
        .index_doc(
            &config.app_index,
            None,
            fixtures::app_record(fixtures::APP_ID, AppState::Finished, 5).to_document(),
        )
        .unwrap();
    let params = FileStateParams::new()
        .with_expansion(Expansion::App)
        .with_filter_params(["file_i_id:11"])
        .unwrap();
    let page = states.list(fixtures::PROJECT_INODE, &params).unwrap();
    // the fixture states carry no app
    assert_eq!(page.items.len(), 1);
    assert_eq!(
        page.items[0].app_state.as_ref().map(|s| s.current_state),
        Some(AppState::Unknown)
    );
}

#[test]
fn state_full_tree_over_every_file() {
    let (_, _, states) = controllers();
    let tree = states
        .full_tree(fixtures::PROJECT_INODE, &FileStateParams::new())
        .unwrap();
    assert!(tree.is_complete());
    assert_eq!(tree.complete[&fixtures::PROJECT_INODE].size(), 7);
}

#[test]
fn unknown_filter_field_is_rejected() {
    let result = FileOpsParams::new().with_filter_params(["nope:1"]);
    assert!(result.is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_count_matches_list(ops in generators::arb_op_sequence(6, 30), ft in generators::arb_footprint_type()) {
        let config = fixtures::test_config();
        let (index, _) = fixtures::seeded_index(&config, &ops, &[]).unwrap();
        let controller = OpsController::new(Arc::new(index), config);
        let list = controller
            .footprint(fixtures::PROJECT_INODE, fixtures::APP_ID, ft, ReturnType::List, &FileOpsParams::new())
            .unwrap();
        let count = controller
            .footprint(fixtures::PROJECT_INODE, fixtures::APP_ID, ft, ReturnType::Count, &FileOpsParams::new())
            .unwrap();
        match (list, count) {
            (FootprintResult::List { total, items }, FootprintResult::Count(count)) => {
                prop_assert_eq!(total, items.len() as u64);
                prop_assert_eq!(count.count, total);
                if ft != FootprintType::All {
                    prop_assert!(items.iter().all(|s| s.footprint == Some(ft)));
                }
            }
            other => prop_assert!(false, "unexpected results {:?}", other),
        }
    }
}
