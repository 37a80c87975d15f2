//! Variant Service - External Query Interface
//!
//! The engine's facade for transport layers: option resolution, typecode
//! decoding, and remaining-depth queries. Callers hand in selections as
//! `(level, code)` pairs; this service maps them to node sets, validates
//! them, and delegates to the resolver and assembler. It holds no state of
//! its own - every query carries its full selection set explicitly.

use crate::db::{Reachability, SegmentTreeStore};
use crate::models::{
    CandidateResult, DecodedTypecode, SegmentNode, Selection, SelectionByCode,
};
use crate::services::assembler::TypecodeAssembler;
use crate::services::error::VariantServiceError;
use crate::services::resolver::{CompatibilityResolver, SelectionSet};
use std::collections::HashSet;
use std::sync::Arc;

/// Facade over the resolver, assembler, and reachability index
pub struct VariantService {
    store: Arc<SegmentTreeStore>,
    reach: Arc<dyn Reachability>,
    resolver: CompatibilityResolver,
    assembler: TypecodeAssembler,
}

impl VariantService {
    pub fn new(store: Arc<SegmentTreeStore>, reach: Arc<dyn Reachability>) -> Self {
        let resolver = CompatibilityResolver::new(store.clone(), reach.clone());
        let assembler = TypecodeAssembler::new(store.clone());
        Self {
            store,
            reach,
            resolver,
            assembler,
        }
    }

    /// Fetch a family root or fail
    async fn require_family(&self, family_id: i64) -> Result<SegmentNode, VariantServiceError> {
        match self.store.get_node(family_id).await? {
            Some(node) if node.is_root() => Ok(node),
            _ => Err(VariantServiceError::family_not_found(family_id)),
        }
    }

    /// Compatible options at a target level, given prior selections by
    /// `(level, code)`.
    ///
    /// Candidates are enumerated family-wide and annotated with
    /// `is_compatible`; incompatible level-mates are returned, not
    /// dropped.
    ///
    /// # Errors
    ///
    /// `FamilyNotFound`; `InvalidSelection` when a code is unknown at its
    /// claimed level within the family, or two selections claim the same
    /// level.
    pub async fn resolve_options(
        &self,
        family_id: i64,
        target_level: i64,
        selections: &[SelectionByCode],
    ) -> Result<Vec<CandidateResult>, VariantServiceError> {
        self.require_family(family_id).await?;

        let mut seen_levels = HashSet::new();
        let mut sets = Vec::with_capacity(selections.len());

        for selection in selections {
            if !seen_levels.insert(selection.level) {
                return Err(VariantServiceError::invalid_selection(format!(
                    "Two selections claim level {}",
                    selection.level
                )));
            }

            let nodes = self
                .store
                .nodes_by_level_code(family_id, selection.level, &selection.code)
                .await?;
            if nodes.is_empty() {
                return Err(VariantServiceError::invalid_selection(format!(
                    "No node with code '{}' at level {} in family {}",
                    selection.code, selection.level, family_id
                )));
            }

            sets.push(SelectionSet {
                level: selection.level,
                nodes,
            });
        }

        self.resolver
            .resolve_sets(family_id, target_level, sets)
            .await
    }

    /// Compatible options for id-based selections; see
    /// [`CompatibilityResolver::resolve`]
    pub async fn resolve_options_by_id(
        &self,
        family_id: i64,
        target_level: i64,
        selections: &[Selection],
    ) -> Result<Vec<CandidateResult>, VariantServiceError> {
        self.require_family(family_id).await?;
        self.resolver
            .resolve(family_id, target_level, selections)
            .await
    }

    /// Decode a typecode string against a family.
    ///
    /// A string whose tail matches no child resolves to the successfully
    /// decoded prefix with `is_complete = false`; decode errors never
    /// escape this method, only `FamilyNotFound` and storage failures do.
    pub async fn decode_typecode(
        &self,
        family_id: i64,
        typecode: &str,
    ) -> Result<DecodedTypecode, VariantServiceError> {
        let family = self.require_family(family_id).await?;

        match self.assembler.decode(&family, typecode).await {
            Ok(decoded) => Ok(decoded),
            Err(VariantServiceError::Decode { offset, partial }) => {
                tracing::debug!(
                    "Partial decode of '{}' in family {}: unmatched at offset {}",
                    typecode,
                    family_id,
                    offset
                );
                Ok(DecodedTypecode {
                    path: partial,
                    is_complete: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Deepest remaining selection chain below a node: how many further
    /// selection steps are still possible
    pub async fn max_remaining_depth(&self, node_id: i64) -> Result<i64, VariantServiceError> {
        if self.store.get_node(node_id).await?.is_none() {
            return Err(VariantServiceError::node_not_found(node_id));
        }

        self.reach
            .max_depth_below(node_id)
            .await
            .map_err(|e| VariantServiceError::query_failed(e.to_string()))
    }

    /// Assemble the typecode string for a path given by node ids
    pub async fn assemble_path(&self, node_ids: &[i64]) -> Result<String, VariantServiceError> {
        let mut path = Vec::with_capacity(node_ids.len());
        for &node_id in node_ids {
            let node = self
                .store
                .get_node(node_id)
                .await?
                .ok_or(VariantServiceError::NodeNotFound { id: node_id })?;
            path.push(node);
        }

        self.assembler.assemble(&path)
    }
}
