//! Closure Index
//!
//! Precomputed reachability over the segment tree: one `node_paths` row per
//! (ancestor, descendant) pair connected by parent links, including the
//! reflexive row at distance 0.
//!
//! Reads go through the [`Reachability`] trait so the resolver does not care
//! how reachability is answered:
//!
//! - [`ClosureIndex`] is the steady-state implementation, an indexed point
//!   lookup per test.
//! - [`RecursiveReachability`] walks parent links with `WITH RECURSIVE` at
//!   query time. Acceptable for small trees and as a fallback when the
//!   closure has not been materialized; both implementations must return
//!   identical answers.
//!
//! Closure rows are never written here on their own: the maintenance
//! helpers at the bottom run inside the store's transactions, so a node is
//! never visible without its closure rows.

use crate::db::error::DatabaseError;
use crate::db::DatabaseService;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Reachability tests over the tree's root-to-leaf direction.
///
/// `path_exists` is an alias of `is_reachable`: callers reason about it as
/// "can we still route from A to B", but direction always follows the
/// ancestor-to-descendant order.
#[async_trait]
pub trait Reachability: Send + Sync {
    /// True iff `descendant_id` is reachable from `ancestor_id` via parent
    /// links (reflexively true for the node itself)
    async fn is_reachable(&self, ancestor_id: i64, descendant_id: i64) -> Result<bool>;

    /// Longest remaining chain below a node: `MAX(distance)` over its
    /// descendants, 0 for a leaf
    async fn max_depth_below(&self, node_id: i64) -> Result<i64>;

    /// Alias of `is_reachable`
    async fn path_exists(&self, from_id: i64, to_id: i64) -> Result<bool> {
        self.is_reachable(from_id, to_id).await
    }
}

/// Steady-state reachability over the `node_paths` closure table
pub struct ClosureIndex {
    db: Arc<DatabaseService>,
}

impl ClosureIndex {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Reachability for ClosureIndex {
    async fn is_reachable(&self, ancestor_id: i64, descendant_id: i64) -> Result<bool> {
        let conn = self.db.connect_with_timeout().await?;

        let mut rows = conn
            .query(
                "SELECT 1 FROM node_paths WHERE ancestor_id = ? AND descendant_id = ? LIMIT 1",
                (ancestor_id, descendant_id),
            )
            .await?;

        Ok(rows.next().await?.is_some())
    }

    async fn max_depth_below(&self, node_id: i64) -> Result<i64> {
        let conn = self.db.connect_with_timeout().await?;

        let mut rows = conn
            .query(
                "SELECT COALESCE(MAX(distance), 0) FROM node_paths WHERE ancestor_id = ?",
                [node_id],
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| anyhow::anyhow!("MAX query returned no row"))?;
        Ok(row.get::<i64>(0)?)
    }
}

/// Query-time reachability via recursive parent walks.
///
/// No closure storage required; cost grows with tree depth per test.
pub struct RecursiveReachability {
    db: Arc<DatabaseService>,
}

impl RecursiveReachability {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Reachability for RecursiveReachability {
    async fn is_reachable(&self, ancestor_id: i64, descendant_id: i64) -> Result<bool> {
        let conn = self.db.connect_with_timeout().await?;

        // Climb from the descendant; the walk includes the start node, so
        // the reflexive case answers true like the closure table does.
        let mut rows = conn
            .query(
                "WITH RECURSIVE walk_up(id) AS (
                    SELECT id FROM nodes WHERE id = ?
                    UNION ALL
                    SELECT n.parent_id FROM nodes n
                    JOIN walk_up w ON n.id = w.id
                    WHERE n.parent_id IS NOT NULL
                )
                SELECT 1 FROM walk_up WHERE id = ? LIMIT 1",
                (descendant_id, ancestor_id),
            )
            .await?;

        Ok(rows.next().await?.is_some())
    }

    async fn max_depth_below(&self, node_id: i64) -> Result<i64> {
        let conn = self.db.connect_with_timeout().await?;

        let mut rows = conn
            .query(
                "WITH RECURSIVE depth_calc(id, depth) AS (
                    SELECT id, 0 FROM nodes WHERE id = ?
                    UNION ALL
                    SELECT n.id, d.depth + 1 FROM nodes n
                    JOIN depth_calc d ON n.parent_id = d.id
                )
                SELECT COALESCE(MAX(depth), 0) FROM depth_calc",
                [node_id],
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| anyhow::anyhow!("MAX query returned no row"))?;
        Ok(row.get::<i64>(0)?)
    }
}

//
// MAINTENANCE (store-transaction scope)
//

/// Insert the closure rows for a freshly inserted node.
///
/// Adds the reflexive `(id, id, 0)` row, then one row per ancestor of the
/// parent at distance + 1. Must run on the same connection/transaction as
/// the node INSERT.
pub(crate) async fn insert_closure_rows(
    conn: &libsql::Connection,
    node_id: i64,
    parent_id: Option<i64>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO node_paths (ancestor_id, descendant_id, distance) VALUES (?, ?, 0)",
        (node_id, node_id),
    )
    .await
    .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert self closure row: {}", e)))?;

    if let Some(parent_id) = parent_id {
        conn.execute(
            "INSERT INTO node_paths (ancestor_id, descendant_id, distance)
             SELECT ancestor_id, ?, distance + 1
             FROM node_paths WHERE descendant_id = ?",
            (node_id, parent_id),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to insert ancestor closure rows: {}", e))
        })?;
    }

    Ok(())
}

/// Remove every closure row referencing one of the given nodes, on either
/// side of the relation.
///
/// Must run on the same connection/transaction as the node DELETE. The
/// foreign keys would cascade these rows anyway; deleting them explicitly
/// keeps the closure bookkeeping in one place and independent of cascade
/// configuration. Ids are interpolated directly: they are i64 values the
/// store just read back, not caller input.
pub(crate) async fn purge_closure_rows(
    conn: &libsql::Connection,
    ids: &[i64],
) -> Result<(), DatabaseError> {
    if ids.is_empty() {
        return Ok(());
    }

    let id_list = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    conn.execute(
        &format!(
            "DELETE FROM node_paths
             WHERE ancestor_id IN ({id_list}) OR descendant_id IN ({id_list})"
        ),
        (),
    )
    .await
    .map_err(|e| DatabaseError::sql_execution(format!("Failed to purge closure rows: {}", e)))?;

    Ok(())
}
