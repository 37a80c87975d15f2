//! Closure Index Property Tests
//!
//! Structural invariants of the closure index against independent
//! parent-walks:
//! - completeness: ancestors via parent links == ancestors via closure,
//!   distances included
//! - deletion symmetry: no closure row survives a subtree removal
//! - backend equivalence: the recursive-walk fallback answers exactly like
//!   the closure table

use std::collections::HashMap;
use std::sync::Arc;
use typetree_core::db::{
    ClosureIndex, DatabaseService, Reachability, RecursiveReachability, SegmentTreeStore,
};
use tempfile::TempDir;
use typetree_core::models::{NewSegment, SegmentNode};

async fn create_test_store() -> (Arc<DatabaseService>, Arc<SegmentTreeStore>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(
        DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap(),
    );
    let store = Arc::new(SegmentTreeStore::new(db.clone()));
    (db, store, temp_dir)
}

/// Mixed tree with grouping buckets: two families, three levels
async fn build_forest(store: &SegmentTreeStore) -> Vec<SegmentNode> {
    let mut all = Vec::new();

    for family_code in ["CAR", "VAN"] {
        let family = store
            .create_node(NewSegment::family(family_code))
            .await
            .unwrap();

        let bucket = store
            .create_node(NewSegment::grouping(family.id, 2, 3))
            .await
            .unwrap();

        for engine in ["EA", "EB"] {
            let engine_node = store
                .create_node(NewSegment::selectable(bucket.id, engine, 3))
                .await
                .unwrap();

            for trans in ["T1", "T2"] {
                let trans_node = store
                    .create_node(NewSegment::selectable(engine_node.id, trans, 5))
                    .await
                    .unwrap();
                all.push(trans_node);
            }
            all.push(engine_node);
        }
        all.push(bucket);
        all.push(family);
    }

    all
}

/// Ancestors with distances by walking parent pointers in memory
fn walk_ancestors(node: &SegmentNode, by_id: &HashMap<i64, SegmentNode>) -> HashMap<i64, i64> {
    let mut ancestors = HashMap::new();
    ancestors.insert(node.id, 0);

    let mut distance = 0;
    let mut current = node.clone();
    while let Some(parent_id) = current.parent_id {
        distance += 1;
        ancestors.insert(parent_id, distance);
        current = by_id[&parent_id].clone();
    }
    ancestors
}

/// Ancestors with distances from the closure table
async fn closure_ancestors(db: &DatabaseService, node_id: i64) -> HashMap<i64, i64> {
    let conn = db.connect_with_timeout().await.unwrap();
    let mut rows = conn
        .query(
            "SELECT ancestor_id, distance FROM node_paths WHERE descendant_id = ?",
            [node_id],
        )
        .await
        .unwrap();

    let mut ancestors = HashMap::new();
    while let Some(row) = rows.next().await.unwrap() {
        ancestors.insert(row.get::<i64>(0).unwrap(), row.get::<i64>(1).unwrap());
    }
    ancestors
}

#[tokio::test]
async fn test_closure_completeness() {
    let (db, store, _temp) = create_test_store().await;
    let nodes = build_forest(&store).await;

    let by_id: HashMap<i64, SegmentNode> =
        nodes.iter().map(|n| (n.id, n.clone())).collect();

    for node in &nodes {
        let walked = walk_ancestors(node, &by_id);
        let indexed = closure_ancestors(&db, node.id).await;
        assert_eq!(
            walked, indexed,
            "Closure mismatch for node {} ({:?})",
            node.id,
            node.code()
        );
    }
}

#[tokio::test]
async fn test_closure_symmetry_of_deletion() {
    let (db, store, _temp) = create_test_store().await;
    let nodes = build_forest(&store).await;

    // Remove one engine subtree of the first family
    let engine = nodes
        .iter()
        .find(|n| n.code() == Some("EA"))
        .unwrap();
    let removed_ids: Vec<i64> = nodes
        .iter()
        .filter(|n| {
            n.id == engine.id || n.parent_id == Some(engine.id)
        })
        .map(|n| n.id)
        .collect();

    store.delete_subtree(engine.id).await.unwrap();

    let conn = db.connect_with_timeout().await.unwrap();
    for id in removed_ids {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM node_paths WHERE ancestor_id = ? OR descendant_id = ?",
                (id, id),
            )
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 0, "Closure rows survived for removed node {}", id);
    }
}

#[tokio::test]
async fn test_reachability_backends_agree() {
    let (db, store, _temp) = create_test_store().await;
    let nodes = build_forest(&store).await;

    let closure = ClosureIndex::new(db.clone());
    let recursive = RecursiveReachability::new(db);

    for a in &nodes {
        for b in &nodes {
            let fast = closure.is_reachable(a.id, b.id).await.unwrap();
            let slow = recursive.is_reachable(a.id, b.id).await.unwrap();
            assert_eq!(
                fast, slow,
                "Backends disagree on {} -> {}",
                a.id, b.id
            );
        }

        assert_eq!(
            closure.max_depth_below(a.id).await.unwrap(),
            recursive.max_depth_below(a.id).await.unwrap(),
            "Backends disagree on depth below {}",
            a.id
        );
    }
}

#[tokio::test]
async fn test_max_depth_counts_raw_tree_edges() {
    let (db, store, _temp) = create_test_store().await;
    build_forest(&store).await;

    let closure = ClosureIndex::new(db);
    let family = store.family_by_code("CAR").await.unwrap().unwrap();

    // family -> bucket -> engine -> trans: three edges
    assert_eq!(closure.max_depth_below(family.id).await.unwrap(), 3);
}
