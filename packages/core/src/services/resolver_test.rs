//! Resolver Tests
//!
//! Covers the concrete family scenario from the engine requirements:
//! out-of-order and gapped selections, the family-wide candidate policy,
//! and the invalid-selection error paths.

use crate::db::{ClosureIndex, DatabaseService, SegmentTreeStore};
use crate::models::{NewSegment, Selection};
use crate::services::resolver::CompatibilityResolver;
use crate::services::VariantServiceError;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

struct TestTree {
    resolver: CompatibilityResolver,
    store: Arc<SegmentTreeStore>,
    ids: HashMap<&'static str, i64>,
    _temp: TempDir,
}

/// CAR family: level 1 {ENGINE-A, ENGINE-B}; ENGINE-A -> {TRANS-X,
/// TRANS-Y}; TRANS-X -> {RED, BLUE}; ENGINE-B -> {TRANS-Z} -> {BLACK,
/// WHITE}.
async fn create_car_tree() -> TestTree {
    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(
        DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap(),
    );
    let store = Arc::new(SegmentTreeStore::new(db.clone()));
    let reach = Arc::new(ClosureIndex::new(db));

    let mut ids = HashMap::new();
    let family = store.create_node(NewSegment::family("CAR")).await.unwrap();
    ids.insert("CAR", family.id);

    for engine in ["ENGINE-A", "ENGINE-B"] {
        let node = store
            .create_node(NewSegment::selectable(family.id, engine, 3))
            .await
            .unwrap();
        ids.insert(engine, node.id);
    }

    for (trans, engine) in [
        ("TRANS-X", "ENGINE-A"),
        ("TRANS-Y", "ENGINE-A"),
        ("TRANS-Z", "ENGINE-B"),
    ] {
        let node = store
            .create_node(NewSegment::selectable(ids[engine], trans, 11))
            .await
            .unwrap();
        ids.insert(trans, node.id);
    }

    for (color, trans) in [
        ("RED", "TRANS-X"),
        ("BLUE", "TRANS-X"),
        ("BLACK", "TRANS-Z"),
        ("WHITE", "TRANS-Z"),
    ] {
        let node = store
            .create_node(NewSegment::selectable(ids[trans], color, 18))
            .await
            .unwrap();
        ids.insert(color, node.id);
    }

    let resolver = CompatibilityResolver::new(store.clone(), reach);
    TestTree {
        resolver,
        store,
        ids,
        _temp: temp_dir,
    }
}

fn selection(tree: &TestTree, level: i64, code: &'static str) -> Selection {
    Selection {
        level,
        node_id: tree.ids[code],
    }
}

fn compat_map(results: &[crate::models::CandidateResult]) -> HashMap<String, bool> {
    results
        .iter()
        .map(|r| (r.code.clone(), r.is_compatible))
        .collect()
}

#[tokio::test]
async fn test_empty_selections_mark_everything_compatible() {
    let tree = create_car_tree().await;

    let results = tree
        .resolver
        .resolve(tree.ids["CAR"], 1, &[])
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_compatible));
}

#[tokio::test]
async fn test_forward_check_marks_foreign_branch_incompatible() {
    let tree = create_car_tree().await;

    let results = tree
        .resolver
        .resolve(tree.ids["CAR"], 2, &[selection(&tree, 1, "ENGINE-A")])
        .await
        .unwrap();

    // Family-wide policy: TRANS-Z is returned, flagged incompatible
    let compat = compat_map(&results);
    assert_eq!(results.len(), 3);
    assert!(compat["TRANS-X"]);
    assert!(compat["TRANS-Y"]);
    assert!(!compat["TRANS-Z"]);
}

#[tokio::test]
async fn test_backward_check_from_deeper_selection() {
    let tree = create_car_tree().await;

    // Level 3 chosen first, level 1 queried: only the branch containing
    // BLACK stays open
    let results = tree
        .resolver
        .resolve(tree.ids["CAR"], 1, &[selection(&tree, 3, "BLACK")])
        .await
        .unwrap();

    let compat = compat_map(&results);
    assert!(!compat["ENGINE-A"]);
    assert!(compat["ENGINE-B"]);
}

#[tokio::test]
async fn test_gap_consistency_on_middle_level() {
    let tree = create_car_tree().await;

    // Gapped selection: level 3 picked, level 2 queried, level 1 open
    let results = tree
        .resolver
        .resolve(tree.ids["CAR"], 2, &[selection(&tree, 3, "RED")])
        .await
        .unwrap();

    let compat = compat_map(&results);
    assert!(compat["TRANS-X"]);
    assert!(!compat["TRANS-Y"]);
    assert!(!compat["TRANS-Z"]);
}

#[tokio::test]
async fn test_forward_and_backward_combined() {
    let tree = create_car_tree().await;

    let results = tree
        .resolver
        .resolve(
            tree.ids["CAR"],
            2,
            &[selection(&tree, 3, "RED"), selection(&tree, 1, "ENGINE-A")],
        )
        .await
        .unwrap();

    let compat = compat_map(&results);
    assert!(compat["TRANS-X"]);
    assert!(!compat["TRANS-Y"]);
    assert!(!compat["TRANS-Z"]);
}

#[tokio::test]
async fn test_disconnected_before_chain_yields_all_incompatible() {
    let tree = create_car_tree().await;

    // ENGINE-B and TRANS-X contradict each other; that is a valid (if
    // unhelpful) query, not an error
    let results = tree
        .resolver
        .resolve(
            tree.ids["CAR"],
            3,
            &[
                selection(&tree, 1, "ENGINE-B"),
                selection(&tree, 2, "TRANS-X"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| !r.is_compatible));
}

#[tokio::test]
async fn test_selection_at_target_level_is_informational() {
    let tree = create_car_tree().await;

    let results = tree
        .resolver
        .resolve(tree.ids["CAR"], 1, &[selection(&tree, 1, "ENGINE-A")])
        .await
        .unwrap();

    // Re-querying the chosen level must not constrain its alternatives
    assert!(results.iter().all(|r| r.is_compatible));
}

#[tokio::test]
async fn test_duplicate_selection_level_rejected() {
    let tree = create_car_tree().await;

    let result = tree
        .resolver
        .resolve(
            tree.ids["CAR"],
            3,
            &[
                selection(&tree, 1, "ENGINE-A"),
                selection(&tree, 1, "ENGINE-B"),
            ],
        )
        .await;

    assert!(matches!(
        result,
        Err(VariantServiceError::InvalidSelection { .. })
    ));
}

#[tokio::test]
async fn test_grouping_node_selection_rejected() {
    let tree = create_car_tree().await;

    let bucket = tree
        .store
        .create_node(NewSegment::grouping(tree.ids["TRANS-Y"], 3, 18))
        .await
        .unwrap();

    let result = tree
        .resolver
        .resolve(
            tree.ids["CAR"],
            1,
            &[Selection {
                level: 3,
                node_id: bucket.id,
            }],
        )
        .await;

    assert!(matches!(
        result,
        Err(VariantServiceError::InvalidSelection { .. })
    ));
}

#[tokio::test]
async fn test_mismatched_level_tag_rejected() {
    let tree = create_car_tree().await;

    let result = tree
        .resolver
        .resolve(tree.ids["CAR"], 2, &[selection(&tree, 3, "ENGINE-A")])
        .await;

    assert!(matches!(
        result,
        Err(VariantServiceError::InvalidSelection { .. })
    ));
}

#[tokio::test]
async fn test_selection_outside_family_rejected() {
    let tree = create_car_tree().await;

    let other = tree
        .store
        .create_node(NewSegment::family("TRUCK"))
        .await
        .unwrap();
    let foreign = tree
        .store
        .create_node(NewSegment::selectable(other.id, "ENGINE-Q", 5))
        .await
        .unwrap();

    let result = tree
        .resolver
        .resolve(
            tree.ids["CAR"],
            2,
            &[Selection {
                level: 1,
                node_id: foreign.id,
            }],
        )
        .await;

    assert!(matches!(
        result,
        Err(VariantServiceError::InvalidSelection { .. })
    ));
}

#[tokio::test]
async fn test_results_keep_position_code_order_and_parent_codes() {
    let tree = create_car_tree().await;

    let results = tree
        .resolver
        .resolve(tree.ids["CAR"], 3, &[selection(&tree, 1, "ENGINE-A")])
        .await
        .unwrap();

    let codes: Vec<&str> = results.iter().map(|r| r.code.as_str()).collect();
    assert_eq!(codes, vec!["BLACK", "BLUE", "RED", "WHITE"]);

    for result in &results {
        let expected_parent = match result.code.as_str() {
            "RED" | "BLUE" => "TRANS-X",
            _ => "TRANS-Z",
        };
        assert_eq!(result.parent_code.as_deref(), Some(expected_parent));
    }
}
