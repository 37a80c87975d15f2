//! Bulk Typecode Import
//!
//! Builds the segment forest from flat typecode records. Each typecode is
//! tokenized into segments; the first segment names the product family,
//! the rest become selectable nodes bucketed by segment length under
//! grouping nodes. The whole import runs as one exclusive transaction -
//! closure rows included - which is acceptable because imports are an
//! offline maintenance action, not a steady-state path.
//!
//! Finalization marks products: every leaf gets its concatenated
//! `full_typecode`; an interior node gets one too when its own path occurs
//! in the input (making it an intermediate node - simultaneously a
//! complete product and a branch point).

use crate::db::{SegmentTreeStore, StoreError};
use crate::models::{NewSegment, SegmentTree};
use crate::services::error::VariantServiceError;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One flat input row: a raw typecode plus optional product metadata
#[derive(Debug, Clone)]
pub struct TypecodeRecord {
    pub typecode: String,
    pub label: Option<String>,
    pub label_en: Option<String>,
    pub category: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl TypecodeRecord {
    pub fn new(typecode: impl Into<String>) -> Self {
        Self {
            typecode: typecode.into(),
            label: None,
            label_en: None,
            category: None,
            created: None,
            modified: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_label_en(mut self, label_en: impl Into<String>) -> Self {
        self.label_en = Some(label_en.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Outcome counters of one import run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    /// Input rows processed
    pub records: usize,
    /// Rows skipped because they held fewer than two segments
    pub skipped: usize,
    /// Distinct families in the forest after the run
    pub families: usize,
    /// Nodes inserted by this run (buckets included)
    pub nodes_created: usize,
}

/// Per-node bookkeeping during a run
struct BuildNode {
    concat: String,
    has_children: bool,
    is_root: bool,
}

/// Builds the segment forest from typecode records
pub struct TypecodeImporter {
    store: Arc<SegmentTreeStore>,
    splitter: Regex,
}

impl TypecodeImporter {
    pub fn new(store: Arc<SegmentTreeStore>) -> Self {
        // Segment delimiters of the raw source format: dashes, whitespace,
        // underscores, in any run length. Assembled typecodes carry none
        // of them.
        let splitter = Regex::new(r"[_\s\-]+").expect("static regex");
        Self { store, splitter }
    }

    /// Tokenize a raw typecode into normalized segments
    pub fn split_typecode(&self, raw: &str) -> Vec<String> {
        self.splitter
            .split(&raw.to_uppercase())
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Import a batch of records into the forest.
    ///
    /// Idempotent and incremental: structure already present (from earlier
    /// imports) is reused, only missing nodes are inserted. Records with
    /// fewer than two segments are skipped and counted.
    pub async fn import(
        &self,
        records: &[TypecodeRecord],
    ) -> Result<ImportSummary, VariantServiceError> {
        let mut family_ids: HashMap<String, i64> = HashMap::new();
        let mut bucket_ids: HashMap<(i64, i64), i64> = HashMap::new();
        let mut part_ids: HashMap<(i64, String), i64> = HashMap::new();
        let mut nodes: HashMap<i64, BuildNode> = HashMap::new();

        self.preload_forest(&mut family_ids, &mut bucket_ids, &mut part_ids, &mut nodes)
            .await?;

        let mut skipped = 0usize;
        let mut tokenized = Vec::with_capacity(records.len());
        let mut record_for: HashMap<String, &TypecodeRecord> = HashMap::new();
        let mut full_set: HashSet<String> = HashSet::new();

        for record in records {
            let parts = self.split_typecode(&record.typecode);
            if parts.len() < 2 {
                skipped += 1;
                continue;
            }
            let concat = parts.concat();
            record_for.entry(concat.clone()).or_insert(record);
            full_set.insert(concat);
            tokenized.push(parts);
        }

        if skipped > 0 {
            tracing::warn!("Skipping {} records with fewer than two segments", skipped);
        }

        let db = self.store.database();
        let conn = db.connect_with_timeout().await?;

        conn.execute("BEGIN TRANSACTION", ())
            .await
            .map_err(|e| StoreError::Database(crate::db::DatabaseError::sql_execution(
                format!("Failed to begin import transaction: {}", e),
            )))?;

        let result = self
            .import_tx(
                &conn,
                &tokenized,
                &full_set,
                &record_for,
                &mut family_ids,
                &mut bucket_ids,
                &mut part_ids,
                &mut nodes,
            )
            .await;

        let nodes_created = match result {
            Ok(count) => count,
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(e);
            }
        };

        conn.execute("COMMIT", ()).await.map_err(|e| {
            StoreError::Database(crate::db::DatabaseError::sql_execution(format!(
                "Failed to commit import transaction: {}",
                e
            )))
        })?;

        let summary = ImportSummary {
            records: records.len(),
            skipped,
            families: family_ids.len(),
            nodes_created,
        };

        tracing::info!(
            "Imported {} records: {} families, {} new nodes, {} skipped",
            summary.records,
            summary.families,
            summary.nodes_created,
            summary.skipped
        );

        Ok(summary)
    }

    /// Rebuild the lookup maps from structure already in the store, so
    /// repeated imports extend instead of duplicate
    async fn preload_forest(
        &self,
        family_ids: &mut HashMap<String, i64>,
        bucket_ids: &mut HashMap<(i64, i64), i64>,
        part_ids: &mut HashMap<(i64, String), i64>,
        nodes: &mut HashMap<i64, BuildNode>,
    ) -> Result<(), VariantServiceError> {
        for family in self.store.families().await? {
            let code = family.code().unwrap_or_default().to_string();
            family_ids.insert(code, family.id);

            if let Some(tree) = self.store.export_family(family.id).await? {
                Self::index_subtree(&tree, None, "", bucket_ids, part_ids, nodes);
            }
        }
        Ok(())
    }

    /// Walk an exported subtree, restoring the same keys the build pass
    /// would have produced
    fn index_subtree(
        tree: &SegmentTree,
        parent_selectable: Option<i64>,
        parent_concat: &str,
        bucket_ids: &mut HashMap<(i64, i64), i64>,
        part_ids: &mut HashMap<(i64, String), i64>,
        nodes: &mut HashMap<i64, BuildNode>,
    ) {
        let node = &tree.node;

        if let Some(group_length) = node.kind.group_length() {
            if let Some(owner) = parent_selectable {
                bucket_ids.insert((owner, group_length), node.id);
            }
            for child in &tree.children {
                Self::index_subtree(
                    child,
                    parent_selectable,
                    parent_concat,
                    bucket_ids,
                    part_ids,
                    nodes,
                );
            }
            return;
        }

        let code = node.code().unwrap_or_default();
        let concat = format!("{parent_concat}{code}");

        if let Some(owner) = node.parent_id {
            part_ids.insert((owner, code.to_string()), node.id);
        }
        if let Some(owner) = parent_selectable {
            if let Some(info) = nodes.get_mut(&owner) {
                info.has_children = true;
            }
        }
        nodes.insert(
            node.id,
            BuildNode {
                concat: concat.clone(),
                has_children: false,
                is_root: node.is_root(),
            },
        );

        for child in &tree.children {
            Self::index_subtree(child, Some(node.id), &concat, bucket_ids, part_ids, nodes);
        }
    }

    /// Transactional body: structure build plus product finalization
    #[allow(clippy::too_many_arguments)]
    async fn import_tx(
        &self,
        conn: &libsql::Connection,
        tokenized: &[Vec<String>],
        full_set: &HashSet<String>,
        record_for: &HashMap<String, &TypecodeRecord>,
        family_ids: &mut HashMap<String, i64>,
        bucket_ids: &mut HashMap<(i64, i64), i64>,
        part_ids: &mut HashMap<(i64, String), i64>,
        nodes: &mut HashMap<i64, BuildNode>,
    ) -> Result<usize, VariantServiceError> {
        let mut created = 0usize;

        for parts in tokenized {
            let family_code = &parts[0];

            let family_id = match family_ids.get(family_code) {
                Some(&id) => id,
                None => {
                    let id = SegmentTreeStore::insert_segment_tx(
                        conn,
                        &NewSegment::family(family_code.clone()),
                        Some(0),
                    )
                    .await
                    .map_err(StoreError::Database)?;
                    created += 1;
                    family_ids.insert(family_code.clone(), id);
                    nodes.insert(
                        id,
                        BuildNode {
                            concat: family_code.clone(),
                            has_children: false,
                            is_root: true,
                        },
                    );
                    id
                }
            };

            let mut current = family_id;
            let mut position = family_code.len() as i64;

            for (slot, part) in parts[1..].iter().enumerate() {
                let length = part.len() as i64;

                let bucket_id = match bucket_ids.get(&(current, length)) {
                    Some(&id) => id,
                    None => {
                        let id = SegmentTreeStore::insert_segment_tx(
                            conn,
                            &NewSegment::grouping(current, length, position),
                            None,
                        )
                        .await
                        .map_err(StoreError::Database)?;
                        created += 1;
                        bucket_ids.insert((current, length), id);
                        id
                    }
                };

                let part_id = match part_ids.get(&(bucket_id, part.clone())) {
                    Some(&id) => id,
                    None => {
                        let id = SegmentTreeStore::insert_segment_tx(
                            conn,
                            &NewSegment::selectable(bucket_id, part.clone(), position),
                            Some(slot as i64 + 1),
                        )
                        .await
                        .map_err(StoreError::Database)?;
                        created += 1;
                        part_ids.insert((bucket_id, part.clone()), id);

                        let concat = nodes
                            .get(&current)
                            .map(|info| format!("{}{}", info.concat, part))
                            .unwrap_or_else(|| part.clone());
                        if let Some(info) = nodes.get_mut(&current) {
                            info.has_children = true;
                        }
                        nodes.insert(
                            id,
                            BuildNode {
                                concat,
                                has_children: false,
                                is_root: false,
                            },
                        );
                        id
                    }
                };

                current = part_id;
                position += length;
            }
        }

        // Product finalization: leaves always, interior nodes when their
        // path is itself an input typecode
        for (&id, info) in nodes.iter() {
            if info.is_root {
                continue;
            }

            let in_set = full_set.contains(&info.concat);
            let is_leaf = !info.has_children;
            if !is_leaf && !in_set {
                continue;
            }

            SegmentTreeStore::finalize_product_tx(conn, id, &info.concat, !is_leaf)
                .await
                .map_err(StoreError::Database)?;

            if let Some(record) = record_for.get(&info.concat) {
                Self::apply_record_tx(conn, id, record).await?;
            }
        }

        Ok(created)
    }

    /// Apply a record's product metadata to its finalized node
    async fn apply_record_tx(
        conn: &libsql::Connection,
        node_id: i64,
        record: &TypecodeRecord,
    ) -> Result<(), VariantServiceError> {
        conn.execute(
            "UPDATE nodes SET
                label = COALESCE(?, label),
                label_en = COALESCE(?, label_en),
                category = COALESCE(?, category),
                created_at = COALESCE(?, created_at),
                modified_at = COALESCE(?, modified_at)
             WHERE id = ?",
            (
                record.label.clone(),
                record.label_en.clone(),
                record.category.clone(),
                record.created.map(|dt| dt.to_rfc3339()),
                record.modified.map(|dt| dt.to_rfc3339()),
                node_id,
            ),
        )
        .await
        .map_err(|e| {
            StoreError::Database(crate::db::DatabaseError::sql_execution(format!(
                "Failed to apply record metadata: {}",
                e
            )))
        })?;
        Ok(())
    }
}
