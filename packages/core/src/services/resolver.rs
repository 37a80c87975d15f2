//! Compatibility Resolver
//!
//! Given a target level and an arbitrary set of prior selections - out of
//! order, with gaps, anywhere above or below the target - computes for
//! every candidate at the target level whether a single consistent
//! root-to-leaf path exists through all selections and the candidate.
//!
//! # Procedure
//!
//! Selections are partitioned around the target level. Candidates must be
//! reachable from the `before` chain (selections at lower levels, checked
//! left to right as a survivor pass) and must reach the `after` chain
//! (selections at higher levels, whose internal connectivity is evaluated
//! once per query, not per candidate). Each reachability test is a single
//! indexed closure lookup.
//!
//! # Candidate policy
//!
//! Candidates are enumerated family-wide and annotated: a level-mate in a
//! disjoint branch is returned with `is_compatible = false`, never silently
//! dropped. Compatibility is carried solely by the flag.
//!
//! A selection may resolve to several nodes when its code occurs in more
//! than one branch at the same level; chain checks therefore operate on
//! node sets, keeping at each step the members consistent with some choice
//! for every earlier selection.

use crate::db::{Reachability, SegmentTreeStore};
use crate::models::{CandidateResult, SegmentNode, Selection};
use crate::services::error::VariantServiceError;
use crate::services::levels::LevelProjector;
use std::collections::HashSet;
use std::sync::Arc;

/// One selection step expanded to its candidate node set
#[derive(Debug, Clone)]
pub(crate) struct SelectionSet {
    pub level: i64,
    pub nodes: Vec<SegmentNode>,
}

/// Resolves compatible options at a target level
pub struct CompatibilityResolver {
    store: Arc<SegmentTreeStore>,
    levels: LevelProjector,
    reach: Arc<dyn Reachability>,
}

impl CompatibilityResolver {
    pub fn new(store: Arc<SegmentTreeStore>, reach: Arc<dyn Reachability>) -> Self {
        let levels = LevelProjector::new(store.clone());
        Self {
            store,
            levels,
            reach,
        }
    }

    /// Resolve options for id-based selections.
    ///
    /// Validates every selection (existing, selectable, level tag matching
    /// the stored level, inside the family, no two selections at one
    /// level), then runs the chain checks.
    ///
    /// # Errors
    ///
    /// `InvalidSelection` for grouping nodes, level mismatches, foreign
    /// nodes, or duplicate levels; `NodeNotFound` for unknown ids.
    pub async fn resolve(
        &self,
        family_id: i64,
        target_level: i64,
        selections: &[Selection],
    ) -> Result<Vec<CandidateResult>, VariantServiceError> {
        let mut sets = Vec::with_capacity(selections.len());

        for selection in selections {
            let node = self
                .store
                .get_node(selection.node_id)
                .await?
                .ok_or(VariantServiceError::NodeNotFound {
                    id: selection.node_id,
                })?;

            let level = self.levels.level_of_node(&node)?;
            if level != selection.level {
                return Err(VariantServiceError::invalid_selection(format!(
                    "Selection node {} is at level {}, not the claimed level {}",
                    node.id, level, selection.level
                )));
            }

            let inside = self
                .reach
                .is_reachable(family_id, node.id)
                .await
                .map_err(|e| VariantServiceError::query_failed(e.to_string()))?;
            if !inside {
                return Err(VariantServiceError::invalid_selection(format!(
                    "Selection node {} does not belong to family {}",
                    node.id, family_id
                )));
            }

            sets.push(SelectionSet {
                level,
                nodes: vec![node],
            });
        }

        self.resolve_sets(family_id, target_level, sets).await
    }

    /// Resolve options for selections already expanded to node sets.
    ///
    /// The variant service uses this entry point after mapping
    /// `(level, code)` pairs to their matching nodes.
    pub(crate) async fn resolve_sets(
        &self,
        family_id: i64,
        target_level: i64,
        selections: Vec<SelectionSet>,
    ) -> Result<Vec<CandidateResult>, VariantServiceError> {
        let mut seen_levels = HashSet::new();
        for set in &selections {
            if !seen_levels.insert(set.level) {
                return Err(VariantServiceError::invalid_selection(format!(
                    "Two selections claim level {}",
                    set.level
                )));
            }
        }

        // A selection exactly at the target level means the caller is
        // re-querying an already-chosen level; it is informational and must
        // not constrain the other candidates.
        let mut selections: Vec<SelectionSet> = selections
            .into_iter()
            .filter(|set| set.level != target_level)
            .collect();
        selections.sort_by_key(|set| set.level);

        let split = selections.partition_point(|set| set.level < target_level);
        let (before, after) = selections.split_at(split);

        // Forward survivor pass: members of each chain step reachable from
        // some survivor of the previous step. Independent of candidates.
        let mut forward_survivors: Option<Vec<i64>> = None;
        for set in before {
            let next = match &forward_survivors {
                None => set.nodes.iter().map(|n| n.id).collect(),
                Some(previous) => self.survivors_below(previous, &set.nodes).await?,
            };
            forward_survivors = Some(next);
        }

        // Backward viability, right to left: members of each step that can
        // still reach the rest of the chain. Also candidate-independent.
        let mut backward_viable: Option<Vec<i64>> = None;
        for set in after.iter().rev() {
            let next = match &backward_viable {
                None => set.nodes.iter().map(|n| n.id).collect(),
                Some(deeper) => self.survivors_above(&set.nodes, deeper).await?,
            };
            backward_viable = Some(next);
        }

        let candidates = self
            .levels
            .candidates_at_level(family_id, target_level)
            .await?;

        tracing::debug!(
            "Resolving level {} of family {}: {} candidates, {} before / {} after selections",
            target_level,
            family_id,
            candidates.len(),
            before.len(),
            after.len()
        );

        let mut results = Vec::with_capacity(candidates.len());
        for (node, parent_code) in candidates {
            let forward_ok = match &forward_survivors {
                None => true,
                Some(survivors) => self.reachable_from_any(survivors, node.id).await?,
            };

            let backward_ok = if forward_ok {
                match &backward_viable {
                    None => true,
                    Some(viable) => self.reaches_any(node.id, viable).await?,
                }
            } else {
                false
            };

            results.push(Self::candidate_result(
                node,
                parent_code,
                forward_ok && backward_ok,
            ));
        }

        Ok(results)
    }

    /// Members of `step` reachable from at least one of `survivors`
    async fn survivors_below(
        &self,
        survivors: &[i64],
        step: &[SegmentNode],
    ) -> Result<Vec<i64>, VariantServiceError> {
        let mut next = Vec::new();
        for node in step {
            if self.reachable_from_any(survivors, node.id).await? {
                next.push(node.id);
            }
        }
        Ok(next)
    }

    /// Members of `step` that reach at least one of `viable`
    async fn survivors_above(
        &self,
        step: &[SegmentNode],
        viable: &[i64],
    ) -> Result<Vec<i64>, VariantServiceError> {
        let mut next = Vec::new();
        for node in step {
            if self.reaches_any(node.id, viable).await? {
                next.push(node.id);
            }
        }
        Ok(next)
    }

    async fn reachable_from_any(
        &self,
        ancestors: &[i64],
        node_id: i64,
    ) -> Result<bool, VariantServiceError> {
        for &ancestor in ancestors {
            let hit = self
                .reach
                .is_reachable(ancestor, node_id)
                .await
                .map_err(|e| VariantServiceError::query_failed(e.to_string()))?;
            if hit {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn reaches_any(
        &self,
        node_id: i64,
        descendants: &[i64],
    ) -> Result<bool, VariantServiceError> {
        for &descendant in descendants {
            let hit = self
                .reach
                .is_reachable(node_id, descendant)
                .await
                .map_err(|e| VariantServiceError::query_failed(e.to_string()))?;
            if hit {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn candidate_result(
        node: SegmentNode,
        parent_code: Option<String>,
        is_compatible: bool,
    ) -> CandidateResult {
        CandidateResult {
            // Enumeration filters on code IS NOT NULL, so this is present
            code: node.code().unwrap_or_default().to_string(),
            label: node.label,
            label_en: node.label_en,
            level: node.level.unwrap_or_default(),
            full_typecode: node.full_typecode,
            is_intermediate: node.is_intermediate,
            is_compatible,
            parent_code,
        }
    }
}

#[cfg(test)]
#[path = "resolver_test.rs"]
mod resolver_test;
