//! Typecode Assembler / Decoder
//!
//! Bidirectional mapping between an ordered selection path and the
//! flattened typecode string. Assembly concatenates segment codes in
//! root-to-leaf order; decoding walks the family tree, matching each
//! child's code as a prefix at the current offset. Sibling codes of
//! different lengths can both be valid prefixes, so the decoder tries the
//! longest match first and backtracks until the remainder resolves.

use crate::db::SegmentTreeStore;
use crate::models::{DecodedTypecode, PathSegment, SegmentNode};
use crate::services::error::VariantServiceError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Assembles and decodes typecode strings against the segment tree
pub struct TypecodeAssembler {
    store: Arc<SegmentTreeStore>,
}

impl TypecodeAssembler {
    pub fn new(store: Arc<SegmentTreeStore>) -> Self {
        Self { store }
    }

    /// Concatenate a selection path into its typecode string.
    ///
    /// Grouping buckets in the input are skipped. The remaining path must
    /// start at a family root (level 0) and cover every selectable level
    /// without gaps; input order does not matter.
    ///
    /// # Errors
    ///
    /// `IncompletePath` naming the first missing level.
    pub fn assemble(&self, path: &[SegmentNode]) -> Result<String, VariantServiceError> {
        let mut selectable: Vec<&SegmentNode> =
            path.iter().filter(|node| !node.is_grouping()).collect();
        selectable.sort_by_key(|node| node.level);

        let mut typecode = String::new();
        for (expected, node) in selectable.iter().enumerate() {
            let level = node.level.unwrap_or_default();
            if level != expected as i64 {
                return Err(VariantServiceError::IncompletePath {
                    missing_level: expected as i64,
                });
            }
            if let Some(code) = node.code() {
                typecode.push_str(code);
            }
        }

        if typecode.is_empty() {
            return Err(VariantServiceError::IncompletePath { missing_level: 0 });
        }

        Ok(typecode)
    }

    /// Decode a typecode string against a family tree.
    ///
    /// Greedy descent from the family root: at each node, every selectable
    /// child whose code prefixes the remaining string is tried, longest
    /// first, until the remainder resolves. The string is fully consumed
    /// for a successful decode; `is_complete` reports whether the final
    /// node is a complete product (`full_typecode` set) or has no further
    /// selectable children.
    ///
    /// # Errors
    ///
    /// `Decode` with the unmatched offset and the partial path
    /// reconstructed so far when no continuation resolves. Callers that
    /// accept partial decodes can recover the prefix from the error.
    pub async fn decode(
        &self,
        family: &SegmentNode,
        typecode: &str,
    ) -> Result<DecodedTypecode, VariantServiceError> {
        let family_code = family.code().unwrap_or_default();
        if !typecode.starts_with(family_code) || family_code.is_empty() {
            return Err(VariantServiceError::Decode {
                offset: 0,
                partial: Vec::new(),
            });
        }

        let mut path = vec![Self::path_segment(family)];
        let mut best: (usize, Vec<PathSegment>) = (family_code.len(), path.clone());

        match self
            .descend(family, typecode, family_code.len(), &mut path, &mut best)
            .await?
        {
            Some(is_complete) => Ok(DecodedTypecode { path, is_complete }),
            None => Err(VariantServiceError::Decode {
                offset: best.0,
                partial: best.1,
            }),
        }
    }

    /// Backtracking descent; returns `Some(is_complete)` when the rest of
    /// the string resolves below `node`, `None` otherwise. `best` tracks
    /// the deepest offset any attempt reached, for the error report.
    fn descend<'a>(
        &'a self,
        node: &'a SegmentNode,
        typecode: &'a str,
        offset: usize,
        path: &'a mut Vec<PathSegment>,
        best: &'a mut (usize, Vec<PathSegment>),
    ) -> Pin<Box<dyn Future<Output = Result<Option<bool>, VariantServiceError>> + Send + 'a>> {
        Box::pin(async move {
            let children = self.store.selectable_children(node.id).await?;

            if offset == typecode.len() {
                let is_complete = node.full_typecode.is_some() || children.is_empty();
                return Ok(Some(is_complete));
            }

            let remainder = &typecode[offset..];
            let mut matching: Vec<&SegmentNode> = children
                .iter()
                .filter(|child| {
                    child
                        .code()
                        .map(|code| remainder.starts_with(code))
                        .unwrap_or(false)
                })
                .collect();
            // Longest match first; shorter prefixes only on backtrack
            matching.sort_by_key(|child| {
                std::cmp::Reverse(child.code().map(str::len).unwrap_or_default())
            });

            for child in matching {
                let code_len = child.code().map(str::len).unwrap_or_default();
                path.push(Self::path_segment(child));

                if offset + code_len > best.0 {
                    *best = (offset + code_len, path.clone());
                }

                if let Some(is_complete) = self
                    .descend(child, typecode, offset + code_len, path, best)
                    .await?
                {
                    return Ok(Some(is_complete));
                }
                path.pop();
            }

            Ok(None)
        })
    }

    fn path_segment(node: &SegmentNode) -> PathSegment {
        PathSegment {
            node_id: node.id,
            code: node.code().unwrap_or_default().to_string(),
            label: node.label.clone(),
            level: node.level.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseService;
    use crate::models::NewSegment;
    use tempfile::TempDir;

    async fn create_test_assembler() -> (TypecodeAssembler, Arc<SegmentTreeStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            DatabaseService::new(temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        let store = Arc::new(SegmentTreeStore::new(db));
        (TypecodeAssembler::new(store.clone()), store, temp_dir)
    }

    /// PMP family with ambiguous sibling prefixes: "M3" and "M31" both
    /// prefix "M313..."
    async fn build_pump_tree(store: &SegmentTreeStore) -> SegmentNode {
        let family = store.create_node(NewSegment::family("PMP")).await.unwrap();

        let m3 = store
            .create_node(NewSegment::selectable(family.id, "M3", 3))
            .await
            .unwrap();
        let m31 = store
            .create_node(NewSegment::selectable(family.id, "M31", 3))
            .await
            .unwrap();

        // Under M3: "13X" - so "PMPM313X" resolves through M3 only
        store
            .create_node(
                NewSegment::selectable(m3.id, "13X", 5).with_full_typecode("PMPM313X"),
            )
            .await
            .unwrap();
        // Under M31: "050" - "PMPM31050"
        store
            .create_node(
                NewSegment::selectable(m31.id, "050", 6).with_full_typecode("PMPM31050"),
            )
            .await
            .unwrap();

        family
    }

    #[tokio::test]
    async fn test_assemble_concatenates_in_level_order() {
        let (assembler, store, _temp) = create_test_assembler().await;

        let family = store.create_node(NewSegment::family("CAR")).await.unwrap();
        let engine = store
            .create_node(NewSegment::selectable(family.id, "ENGINE-A", 3))
            .await
            .unwrap();
        let trans = store
            .create_node(NewSegment::selectable(engine.id, "TRANS-X", 11))
            .await
            .unwrap();

        // Input order does not matter
        let typecode = assembler.assemble(&[trans, family, engine]).unwrap();
        assert_eq!(typecode, "CARENGINE-ATRANS-X");
    }

    #[tokio::test]
    async fn test_assemble_reports_first_missing_level() {
        let (assembler, store, _temp) = create_test_assembler().await;

        let family = store.create_node(NewSegment::family("CAR")).await.unwrap();
        let engine = store
            .create_node(NewSegment::selectable(family.id, "ENGINE-A", 3))
            .await
            .unwrap();
        let trans = store
            .create_node(NewSegment::selectable(engine.id, "TRANS-X", 11))
            .await
            .unwrap();

        let result = assembler.assemble(&[family, trans]);
        assert!(matches!(
            result,
            Err(VariantServiceError::IncompletePath { missing_level: 1 })
        ));
    }

    #[tokio::test]
    async fn test_assemble_skips_grouping_nodes() {
        let (assembler, store, _temp) = create_test_assembler().await;

        let family = store.create_node(NewSegment::family("CAR")).await.unwrap();
        let bucket = store
            .create_node(NewSegment::grouping(family.id, 8, 3))
            .await
            .unwrap();
        let engine = store
            .create_node(NewSegment::selectable(bucket.id, "ENGINE-A", 3))
            .await
            .unwrap();

        let typecode = assembler.assemble(&[family, bucket, engine]).unwrap();
        assert_eq!(typecode, "CARENGINE-A");
    }

    #[tokio::test]
    async fn test_decode_walks_through_grouping_buckets() {
        let (assembler, store, _temp) = create_test_assembler().await;

        let family = store.create_node(NewSegment::family("CAR")).await.unwrap();
        let bucket = store
            .create_node(NewSegment::grouping(family.id, 8, 3))
            .await
            .unwrap();
        store
            .create_node(NewSegment::selectable(bucket.id, "ENGINE-A", 3))
            .await
            .unwrap();

        let decoded = assembler.decode(&family, "CARENGINE-A").await.unwrap();
        let codes: Vec<&str> = decoded.path.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, vec!["CAR", "ENGINE-A"]);
        // The bucket never appears in decoded paths
        assert!(decoded.path.iter().all(|s| s.node_id != bucket.id));
    }

    #[tokio::test]
    async fn test_decode_prefers_longest_match_that_resolves() {
        let (assembler, store, _temp) = create_test_assembler().await;
        let family = build_pump_tree(&store).await;

        // "M31" wins as the longer prefix when its continuation resolves
        let decoded = assembler.decode(&family, "PMPM31050").await.unwrap();
        let codes: Vec<&str> = decoded.path.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, vec!["PMP", "M31", "050"]);
        assert!(decoded.is_complete);

        // "M313X" forces backtracking to the shorter "M3" prefix
        let decoded = assembler.decode(&family, "PMPM313X").await.unwrap();
        let codes: Vec<&str> = decoded.path.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, vec!["PMP", "M3", "13X"]);
        assert!(decoded.is_complete);
    }

    #[tokio::test]
    async fn test_decode_error_carries_offset_and_partial_path() {
        let (assembler, store, _temp) = create_test_assembler().await;
        let family = build_pump_tree(&store).await;

        let result = assembler.decode(&family, "PMPM31ZZZ").await;
        match result {
            Err(VariantServiceError::Decode { offset, partial }) => {
                // Matched "PMP" + "M31" before running aground
                assert_eq!(offset, 6);
                let codes: Vec<&str> = partial.iter().map(|s| s.code.as_str()).collect();
                assert_eq!(codes, vec!["PMP", "M31"]);
            }
            other => panic!("Expected decode error, got {:?}", other.map(|d| d.path)),
        }
    }

    #[tokio::test]
    async fn test_decode_partial_stop_without_product_flag() {
        let (assembler, store, _temp) = create_test_assembler().await;

        let family = store.create_node(NewSegment::family("CAR")).await.unwrap();
        let engine = store
            .create_node(NewSegment::selectable(family.id, "ENGINE-A", 3))
            .await
            .unwrap();
        store
            .create_node(NewSegment::selectable(engine.id, "TRANS-X", 11))
            .await
            .unwrap();

        // The string stops at a branch node that is not a product
        let decoded = assembler.decode(&family, "CARENGINE-A").await.unwrap();
        assert!(!decoded.is_complete);
    }
}
