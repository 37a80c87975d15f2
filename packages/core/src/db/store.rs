//! Segment Tree Store
//!
//! Authoritative storage for segment nodes and their parent/child
//! structure. Every structural mutation (insert, subtree delete, bulk
//! import) runs in a single transaction together with its closure-index
//! maintenance, so readers never observe a node without its closure rows
//! or closure rows referencing a deleted node.

use crate::db::closure::{insert_closure_rows, purge_closure_rows};
use crate::db::error::DatabaseError;
use crate::db::DatabaseService;
use crate::models::{NewSegment, SegmentKind, SegmentNode, SegmentTree, ValidationError};
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::Row;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors from segment tree storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed segment definition, nothing was written
    #[error("Segment validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Underlying database failure
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),
}

/// Column list shared by every node SELECT; `row_to_segment` depends on
/// this exact order.
const NODE_COLUMNS: &str = "id, parent_id, code, group_length, category, label, label_en, \
     position, level, full_typecode, is_intermediate, cross_group, created_at, modified_at";

/// Same columns, qualified for joined queries
const NODE_COLUMNS_N: &str = "n.id, n.parent_id, n.code, n.group_length, n.category, n.label, \
     n.label_en, n.position, n.level, n.full_typecode, n.is_intermediate, n.cross_group, \
     n.created_at, n.modified_at";

/// Authoritative storage of segment nodes
///
/// # Examples
///
/// ```no_run
/// use typetree_core::db::{DatabaseService, SegmentTreeStore};
/// use typetree_core::models::NewSegment;
/// use std::path::PathBuf;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db = Arc::new(DatabaseService::new(PathBuf::from("./data/typetree.db")).await?);
///     let store = SegmentTreeStore::new(db);
///
///     let family = store.create_node(NewSegment::family("CAR")).await?;
///     let engine = store
///         .create_node(NewSegment::selectable(family.id, "ENGINE-A", 3))
///         .await?;
///     assert_eq!(engine.level, Some(1));
///     Ok(())
/// }
/// ```
pub struct SegmentTreeStore {
    db: Arc<DatabaseService>,
}

impl SegmentTreeStore {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }

    /// Access to the underlying database service
    pub fn database(&self) -> Arc<DatabaseService> {
        self.db.clone()
    }

    /// Parse timestamp from database - handles both SQLite and RFC3339
    /// formats ("YYYY-MM-DD HH:MM:SS" from CURRENT_TIMESTAMP, RFC3339 from
    /// imported data)
    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Ok(naive.and_utc());
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }

        Err(DatabaseError::sql_execution(format!(
            "Unable to parse timestamp '{}' as SQLite or RFC3339 format",
            s
        )))
    }

    /// Convert a libsql Row (in `NODE_COLUMNS` order) to a SegmentNode
    fn row_to_segment(row: &Row) -> Result<SegmentNode, DatabaseError> {
        let id: i64 = row.get(0)?;
        let parent_id: Option<i64> = row.get(1)?;
        let code: Option<String> = row.get(2)?;
        let group_length: Option<i64> = row.get(3)?;
        let category: Option<String> = row.get(4)?;
        let label: Option<String> = row.get(5)?;
        let label_en: Option<String> = row.get(6)?;
        let position: i64 = row.get(7)?;
        let level: Option<i64> = row.get(8)?;
        let full_typecode: Option<String> = row.get(9)?;
        let is_intermediate: i64 = row.get(10)?;
        let cross_group: Option<String> = row.get(11)?;
        let created_at_str: String = row.get(12)?;
        let modified_at_str: String = row.get(13)?;

        let kind = match (code, group_length) {
            (Some(code), None) => SegmentKind::Selectable { code },
            (None, Some(group_length)) => SegmentKind::Grouping { group_length },
            _ => {
                return Err(DatabaseError::sql_execution(format!(
                    "Node {} violates the code/group_length invariant",
                    id
                )))
            }
        };

        Ok(SegmentNode {
            id,
            parent_id,
            kind,
            category,
            label,
            label_en,
            position,
            level,
            full_typecode,
            is_intermediate: is_intermediate != 0,
            cross_group,
            created_at: Self::parse_timestamp(&created_at_str)?,
            modified_at: Self::parse_timestamp(&modified_at_str)?,
        })
    }

    /// Collect all rows of a node query
    async fn collect_segments(mut rows: libsql::Rows) -> Result<Vec<SegmentNode>, DatabaseError> {
        let mut segments = Vec::new();
        while let Some(row) = rows.next().await? {
            segments.push(Self::row_to_segment(&row)?);
        }
        Ok(segments)
    }

    //
    // WRITE PATH
    //

    /// Insert a node row plus its closure rows on an open transaction.
    ///
    /// No validation here; `create_node` and the bulk importer validate
    /// before calling. Returns the assigned id.
    pub(crate) async fn insert_segment_tx(
        conn: &libsql::Connection,
        segment: &NewSegment,
        level: Option<i64>,
    ) -> Result<i64, DatabaseError> {
        conn.execute(
            "INSERT INTO nodes (parent_id, code, group_length, category, label, label_en, \
             position, level, full_typecode, cross_group)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                segment.parent_id,
                segment.kind.code().map(str::to_string),
                segment.kind.group_length(),
                segment.category.clone(),
                segment.label.clone(),
                segment.label_en.clone(),
                segment.position,
                level,
                segment.full_typecode.clone(),
                segment.cross_group.clone(),
            ),
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert node: {}", e)))?;

        let node_id = conn.last_insert_rowid();

        insert_closure_rows(conn, node_id, segment.parent_id).await?;

        Ok(node_id)
    }

    /// Set `full_typecode` (and the intermediate flag) on an existing row
    /// within an open transaction; used by the bulk importer's finalization
    /// pass.
    pub(crate) async fn finalize_product_tx(
        conn: &libsql::Connection,
        node_id: i64,
        full_typecode: &str,
        is_intermediate: bool,
    ) -> Result<(), DatabaseError> {
        conn.execute(
            "UPDATE nodes SET full_typecode = ?, is_intermediate = ?, \
             modified_at = CURRENT_TIMESTAMP WHERE id = ?",
            (full_typecode, is_intermediate as i64, node_id),
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to finalize product: {}", e)))?;
        Ok(())
    }

    /// Create a single node.
    ///
    /// Validates the definition (kind invariant, parent existence, position
    /// monotonicity), then inserts the node together with its closure rows
    /// in one transaction. If the parent carries a `full_typecode`, it
    /// becomes an intermediate node in the same transaction.
    ///
    /// # Errors
    ///
    /// - `StoreError::Validation` for malformed definitions; nothing is
    ///   written
    /// - `StoreError::Database` for storage failures; the transaction rolls
    ///   back
    pub async fn create_node(&self, segment: NewSegment) -> Result<SegmentNode, StoreError> {
        segment.validate()?;

        let conn = self.db.connect_with_timeout().await?;

        let level = match segment.parent_id {
            Some(parent_id) => {
                let parent = self
                    .get_node(parent_id)
                    .await?
                    .ok_or(ValidationError::MissingParent { parent_id })?;

                if segment.position < parent.position {
                    return Err(ValidationError::NonMonotonicPosition {
                        position: segment.position,
                        parent_position: parent.position,
                    }
                    .into());
                }

                if segment.kind.is_selectable() {
                    let parent_level = Self::effective_level_at(&conn, parent_id).await?;
                    Some(parent_level + 1)
                } else {
                    None
                }
            }
            None => Some(0),
        };

        conn.execute("BEGIN TRANSACTION", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to begin transaction: {}", e)))?;

        let result = Self::create_node_tx(&conn, &segment, level).await;

        let node_id = match result {
            Ok(id) => id,
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(e.into());
            }
        };

        conn.execute("COMMIT", ()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to commit transaction: {}", e))
        })?;

        self.get_node(node_id).await?.ok_or_else(|| {
            StoreError::Database(DatabaseError::sql_execution(format!(
                "Created node {} not readable after commit",
                node_id
            )))
        })
    }

    /// Transactional body of `create_node`
    async fn create_node_tx(
        conn: &libsql::Connection,
        segment: &NewSegment,
        level: Option<i64>,
    ) -> Result<i64, DatabaseError> {
        let node_id = Self::insert_segment_tx(conn, segment, level).await?;

        if let Some(parent_id) = segment.parent_id {
            conn.execute(
                "UPDATE nodes SET is_intermediate = TRUE \
                 WHERE id = ? AND full_typecode IS NOT NULL",
                [parent_id],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!(
                    "Failed to update intermediate flag on parent: {}",
                    e
                ))
            })?;
        }

        Ok(node_id)
    }

    /// Selection level of the nearest selectable node at or above `node_id`
    ///
    /// Uses the closure table (the node's ancestors are already indexed
    /// when this runs).
    async fn effective_level_at(
        conn: &libsql::Connection,
        node_id: i64,
    ) -> Result<i64, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT MAX(n.level) FROM nodes n
                 JOIN node_paths p ON p.ancestor_id = n.id
                 WHERE p.descendant_id = ? AND n.code IS NOT NULL",
                [node_id],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to query effective level: {}", e))
            })?;

        let level: Option<i64> = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => None,
        };

        level.ok_or_else(|| {
            DatabaseError::sql_execution(format!(
                "No selectable ancestor found for node {}",
                node_id
            ))
        })
    }

    /// Delete a node and its whole subtree.
    ///
    /// Closure rows referencing any removed node are purged in the same
    /// transaction. If the parent carried a `full_typecode` and loses its
    /// last child, its intermediate flag is cleared. Returns the number of
    /// removed nodes; deleting a non-existent node is a no-op returning 0.
    pub async fn delete_subtree(&self, node_id: i64) -> Result<u64, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let root = match self.get_node(node_id).await? {
            Some(node) => node,
            None => return Ok(0),
        };

        let mut rows = conn
            .query(
                "SELECT descendant_id FROM node_paths WHERE ancestor_id = ?",
                [node_id],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to collect subtree ids: {}", e))
            })?;

        let mut doomed: Vec<i64> = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(DatabaseError::LibsqlError)?
        {
            doomed.push(row.get(0).map_err(DatabaseError::LibsqlError)?);
        }

        conn.execute("BEGIN TRANSACTION", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to begin transaction: {}", e)))?;

        if let Err(e) = Self::delete_subtree_tx(&conn, &doomed, root.parent_id).await {
            let _ = conn.execute("ROLLBACK", ()).await;
            return Err(e.into());
        }

        conn.execute("COMMIT", ()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to commit transaction: {}", e))
        })?;

        tracing::debug!(
            "Deleted subtree below node {}: {} nodes removed",
            node_id,
            doomed.len()
        );

        Ok(doomed.len() as u64)
    }

    /// Transactional body of `delete_subtree`
    async fn delete_subtree_tx(
        conn: &libsql::Connection,
        doomed: &[i64],
        parent_id: Option<i64>,
    ) -> Result<(), DatabaseError> {
        purge_closure_rows(conn, doomed).await?;

        let id_list = doomed
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        conn.execute(&format!("DELETE FROM nodes WHERE id IN ({id_list})"), ())
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to delete subtree nodes: {}", e))
            })?;

        if let Some(parent_id) = parent_id {
            conn.execute(
                "UPDATE nodes SET is_intermediate = FALSE
                 WHERE id = ?
                   AND NOT EXISTS (SELECT 1 FROM nodes c WHERE c.parent_id = ?)",
                (parent_id, parent_id),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!(
                    "Failed to clear intermediate flag on parent: {}",
                    e
                ))
            })?;
        }

        Ok(())
    }

    //
    // READ PATH
    //

    /// Get a node by id
    pub async fn get_node(&self, node_id: i64) -> Result<Option<SegmentNode>, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let mut rows = conn
            .query(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"),
                [node_id],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to query node: {}", e)))?;

        match rows.next().await.map_err(DatabaseError::LibsqlError)? {
            Some(row) => Ok(Some(Self::row_to_segment(&row)?)),
            None => Ok(None),
        }
    }

    /// All nodes carrying the given code, anywhere in the forest.
    ///
    /// Codes are not globally unique; the same code may occur in several
    /// branches and families.
    pub async fn get_nodes_by_code(&self, code: &str) -> Result<Vec<SegmentNode>, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let rows = conn
            .query(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE code = ? ORDER BY level, id"),
                [code],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to query nodes by code: {}", e))
            })?;

        Ok(Self::collect_segments(rows).await?)
    }

    /// Direct children of a node, ordered by (position, code).
    ///
    /// With `include_grouping = false`, grouping buckets are filtered out
    /// (but NOT flattened; see `selectable_children`).
    pub async fn get_children(
        &self,
        node_id: i64,
        include_grouping: bool,
    ) -> Result<Vec<SegmentNode>, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let filter = if include_grouping {
            ""
        } else {
            " AND code IS NOT NULL"
        };

        let rows = conn
            .query(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes WHERE parent_id = ?{filter} \
                     ORDER BY position, code"
                ),
                [node_id],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to query children: {}", e)))?;

        Ok(Self::collect_segments(rows).await?)
    }

    /// Selectable children with grouping buckets flattened.
    ///
    /// Children of a grouping child are spliced in at the bucket's place
    /// (recursively, in case buckets nest). This is the decoder's view of
    /// "what can follow this node".
    pub async fn selectable_children(&self, node_id: i64) -> Result<Vec<SegmentNode>, StoreError> {
        let mut result = Vec::new();
        let mut frontier = vec![node_id];

        while let Some(current) = frontier.pop() {
            for child in self.get_children(current, true).await? {
                if child.is_grouping() {
                    frontier.push(child.id);
                } else {
                    result.push(child);
                }
            }
        }

        result.sort_by(|a, b| {
            (a.position, a.code())
                .cmp(&(b.position, b.code()))
        });
        Ok(result)
    }

    /// All family roots, ordered by code
    pub async fn families(&self) -> Result<Vec<SegmentNode>, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes WHERE parent_id IS NULL ORDER BY code"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to query families: {}", e)))?;

        Ok(Self::collect_segments(rows).await?)
    }

    /// Family root by its code (family prefix)
    pub async fn family_by_code(&self, code: &str) -> Result<Option<SegmentNode>, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes \
                     WHERE parent_id IS NULL AND code = ? LIMIT 1"
                ),
                [code],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to query family: {}", e)))?;

        match rows.next().await.map_err(DatabaseError::LibsqlError)? {
            Some(row) => Ok(Some(Self::row_to_segment(&row)?)),
            None => Ok(None),
        }
    }

    /// All selectable nodes at a level within one family's subtree,
    /// ordered by (position, code)
    pub async fn nodes_at_level(
        &self,
        family_id: i64,
        level: i64,
    ) -> Result<Vec<SegmentNode>, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {NODE_COLUMNS_N} FROM nodes n
                     JOIN node_paths p ON p.descendant_id = n.id
                     WHERE p.ancestor_id = ? AND n.level = ? AND n.code IS NOT NULL
                     ORDER BY n.position, n.code"
                ),
                (family_id, level),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to query level nodes: {}", e))
            })?;

        Ok(Self::collect_segments(rows).await?)
    }

    /// Level-mates plus each node's nearest selectable ancestor code, in
    /// one query; the resolver's candidate enumeration
    pub async fn candidates_at_level(
        &self,
        family_id: i64,
        level: i64,
    ) -> Result<Vec<(SegmentNode, Option<String>)>, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {NODE_COLUMNS_N},
                            (SELECT a.code FROM nodes a
                             JOIN node_paths pa ON pa.ancestor_id = a.id
                             WHERE pa.descendant_id = n.id AND pa.distance > 0
                               AND a.code IS NOT NULL
                             ORDER BY pa.distance ASC LIMIT 1) AS parent_code
                     FROM nodes n
                     JOIN node_paths p ON p.descendant_id = n.id
                     WHERE p.ancestor_id = ? AND n.level = ? AND n.code IS NOT NULL
                     ORDER BY n.position, n.code"
                ),
                (family_id, level),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to query candidates: {}", e))
            })?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next().await.map_err(DatabaseError::LibsqlError)? {
            let segment = Self::row_to_segment(&row)?;
            let parent_code: Option<String> = row.get(14).map_err(DatabaseError::LibsqlError)?;
            candidates.push((segment, parent_code));
        }
        Ok(candidates)
    }

    /// Nodes matching (level, code) within one family's subtree.
    ///
    /// The same code can occur in several branches at the same level; the
    /// resolver treats the result as a selection's candidate node set.
    pub async fn nodes_by_level_code(
        &self,
        family_id: i64,
        level: i64,
        code: &str,
    ) -> Result<Vec<SegmentNode>, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {NODE_COLUMNS_N} FROM nodes n
                     JOIN node_paths p ON p.descendant_id = n.id
                     WHERE p.ancestor_id = ? AND n.level = ? AND n.code = ?
                     ORDER BY n.position, n.id"
                ),
                (family_id, level, code),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to query selection nodes: {}", e))
            })?;

        Ok(Self::collect_segments(rows).await?)
    }

    /// Nearest selectable ancestor strictly above the node; `None` for
    /// family roots
    pub async fn selectable_parent(
        &self,
        node_id: i64,
    ) -> Result<Option<SegmentNode>, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {NODE_COLUMNS_N} FROM nodes n
                     JOIN node_paths p ON p.ancestor_id = n.id
                     WHERE p.descendant_id = ? AND p.distance > 0 AND n.code IS NOT NULL
                     ORDER BY p.distance ASC LIMIT 1"
                ),
                [node_id],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to query selectable parent: {}", e))
            })?;

        match rows.next().await.map_err(DatabaseError::LibsqlError)? {
            Some(row) => Ok(Some(Self::row_to_segment(&row)?)),
            None => Ok(None),
        }
    }

    /// Root-to-node path of selectable segments (grouping buckets skipped),
    /// including the node itself when selectable
    pub async fn selectable_path(&self, node_id: i64) -> Result<Vec<SegmentNode>, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {NODE_COLUMNS_N} FROM nodes n
                     JOIN node_paths p ON p.ancestor_id = n.id
                     WHERE p.descendant_id = ? AND n.code IS NOT NULL
                     ORDER BY p.distance DESC"
                ),
                [node_id],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to query path: {}", e)))?;

        Ok(Self::collect_segments(rows).await?)
    }

    /// Every node of a family carrying a `full_typecode` (leaves and
    /// intermediates), ordered by the typecode string
    pub async fn products_in_family(
        &self,
        family_id: i64,
    ) -> Result<Vec<SegmentNode>, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {NODE_COLUMNS_N} FROM nodes n
                     JOIN node_paths p ON p.descendant_id = n.id
                     WHERE p.ancestor_id = ? AND n.full_typecode IS NOT NULL
                     ORDER BY n.full_typecode"
                ),
                [family_id],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to query family products: {}", e))
            })?;

        Ok(Self::collect_segments(rows).await?)
    }

    /// Product lookup by complete typecode within a family
    pub async fn find_by_typecode(
        &self,
        family_id: i64,
        full_typecode: &str,
    ) -> Result<Option<SegmentNode>, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {NODE_COLUMNS_N} FROM nodes n
                     JOIN node_paths p ON p.descendant_id = n.id
                     WHERE p.ancestor_id = ? AND n.full_typecode = ? LIMIT 1"
                ),
                (family_id, full_typecode),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to query by typecode: {}", e))
            })?;

        match rows.next().await.map_err(DatabaseError::LibsqlError)? {
            Some(row) => Ok(Some(Self::row_to_segment(&row)?)),
            None => Ok(None),
        }
    }

    /// Export a family subtree as a nested structure.
    ///
    /// One query for the whole subtree (closure join), assembled in memory.
    pub async fn export_family(&self, family_id: i64) -> Result<Option<SegmentTree>, StoreError> {
        let conn = self.db.connect_with_timeout().await?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {NODE_COLUMNS_N} FROM nodes n
                     JOIN node_paths p ON p.descendant_id = n.id
                     WHERE p.ancestor_id = ?
                     ORDER BY n.position, n.code"
                ),
                [family_id],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to query family subtree: {}", e))
            })?;

        let segments = Self::collect_segments(rows).await?;
        if segments.is_empty() {
            return Ok(None);
        }

        let mut by_parent: HashMap<i64, Vec<SegmentNode>> = HashMap::new();
        let mut root = None;
        for segment in segments {
            if segment.id == family_id {
                root = Some(segment);
            } else if let Some(parent_id) = segment.parent_id {
                by_parent.entry(parent_id).or_default().push(segment);
            }
        }

        fn attach(node: SegmentNode, by_parent: &mut HashMap<i64, Vec<SegmentNode>>) -> SegmentTree {
            let children = by_parent
                .remove(&node.id)
                .unwrap_or_default()
                .into_iter()
                .map(|child| attach(child, by_parent))
                .collect();
            SegmentTree { node, children }
        }

        Ok(root.map(|root| attach(root, &mut by_parent)))
    }
}
