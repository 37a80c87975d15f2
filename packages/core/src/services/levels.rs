//! Level Projector
//!
//! Translates tree structure into user-facing selection levels. Grouping
//! buckets are invisible here: they carry no level, are never returned, and
//! their children sit at the level right below the nearest selectable
//! ancestor.

use crate::db::SegmentTreeStore;
use crate::models::SegmentNode;
use crate::services::error::VariantServiceError;
use std::sync::Arc;

/// Maps nodes to selection levels and enumerates level-mates
pub struct LevelProjector {
    store: Arc<SegmentTreeStore>,
}

impl LevelProjector {
    pub fn new(store: Arc<SegmentTreeStore>) -> Self {
        Self { store }
    }

    /// Selection level of a node: 0 for family roots, counting selectable
    /// nodes only below that.
    ///
    /// # Errors
    ///
    /// `InvalidSelection` for grouping nodes - they have no level and must
    /// never reach level-based APIs. `NodeNotFound` for unknown ids.
    pub async fn level_of(&self, node_id: i64) -> Result<i64, VariantServiceError> {
        let node = self
            .store
            .get_node(node_id)
            .await?
            .ok_or(VariantServiceError::NodeNotFound { id: node_id })?;

        self.level_of_node(&node)
    }

    /// Same as `level_of` for an already-fetched node
    pub fn level_of_node(&self, node: &SegmentNode) -> Result<i64, VariantServiceError> {
        if node.is_grouping() {
            return Err(VariantServiceError::invalid_selection(format!(
                "Node {} is a grouping node and has no selection level",
                node.id
            )));
        }

        node.level.ok_or_else(|| {
            VariantServiceError::query_failed(format!(
                "Selectable node {} has no stored level",
                node.id
            ))
        })
    }

    /// All selectable nodes at a level within a family, (position, code)
    /// ordered
    pub async fn nodes_at_level(
        &self,
        family_id: i64,
        level: i64,
    ) -> Result<Vec<SegmentNode>, VariantServiceError> {
        Ok(self.store.nodes_at_level(family_id, level).await?)
    }

    /// Level-mates with each node's nearest selectable ancestor code; the
    /// resolver's candidate enumeration
    pub async fn candidates_at_level(
        &self,
        family_id: i64,
        level: i64,
    ) -> Result<Vec<(SegmentNode, Option<String>)>, VariantServiceError> {
        Ok(self.store.candidates_at_level(family_id, level).await?)
    }

    /// Nearest selectable ancestor, walking past grouping buckets.
    ///
    /// `None` for family roots.
    pub async fn immediate_selectable_parent(
        &self,
        node_id: i64,
    ) -> Result<Option<SegmentNode>, VariantServiceError> {
        if self.store.get_node(node_id).await?.is_none() {
            return Err(VariantServiceError::NodeNotFound { id: node_id });
        }

        Ok(self.store.selectable_parent(node_id).await?)
    }
}
