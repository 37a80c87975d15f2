//! Segment Node Data Structures
//!
//! This module defines the `SegmentNode` struct and related types for the
//! typecode variant tree.
//!
//! # Architecture
//!
//! - **Tagged kind**: a node is either a selectable code segment or a
//!   grouping bucket, never both. The variant carries the field that only
//!   makes sense for it (`code` vs `group_length`), so the invariant is
//!   enforced at construction instead of by runtime checks on two nullable
//!   columns.
//! - **Surrogate ids**: node identity is the storage-assigned `i64` rowid,
//!   immutable once created.
//! - **Stored levels**: the user-facing selection level is computed at
//!   insert time and persisted; grouping buckets carry no level.
//!
//! # Examples
//!
//! ```rust
//! use typetree_core::models::{NewSegment, SegmentKind};
//!
//! // A family root ("CAR") and a selectable child under it
//! let family = NewSegment::family("CAR");
//! let engine = NewSegment::selectable(1, "ENGINE-A", 3);
//! assert!(engine.kind.is_selectable());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for segment definitions
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Code position moves backwards relative to the parent
    #[error("Position {position} precedes parent position {parent_position}")]
    NonMonotonicPosition { position: i64, parent_position: i64 },

    /// Parent id does not reference an existing node
    #[error("Parent node not found: {parent_id}")]
    MissingParent { parent_id: i64 },

    /// A family root must be a selectable segment, not a grouping bucket
    #[error("Family roots cannot be grouping nodes")]
    GroupingRoot,

    /// Selectable segments need a non-empty code
    #[error("Segment code must not be empty")]
    EmptyCode,

    /// Grouping buckets need a positive segment length
    #[error("Invalid group length: {0}")]
    InvalidGroupLength(i64),
}

/// What a node in the tree represents.
///
/// `Selectable` nodes contribute a literal `code` fragment to the assembled
/// typecode and occupy a selection level. `Grouping` nodes only bucket
/// sibling codes by character length; they are invisible to users, carry no
/// level, and contribute nothing to the typecode string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SegmentKind {
    /// User-selectable code segment
    Selectable { code: String },
    /// Organizational bucket for sibling codes of one length
    #[serde(rename_all = "camelCase")]
    Grouping { group_length: i64 },
}

impl SegmentKind {
    pub fn is_selectable(&self) -> bool {
        matches!(self, SegmentKind::Selectable { .. })
    }

    pub fn is_grouping(&self) -> bool {
        matches!(self, SegmentKind::Grouping { .. })
    }

    /// The code fragment, if this is a selectable segment
    pub fn code(&self) -> Option<&str> {
        match self {
            SegmentKind::Selectable { code } => Some(code),
            SegmentKind::Grouping { .. } => None,
        }
    }

    /// The bucketed segment length, if this is a grouping node
    pub fn group_length(&self) -> Option<i64> {
        match self {
            SegmentKind::Selectable { .. } => None,
            SegmentKind::Grouping { group_length } => Some(*group_length),
        }
    }
}

/// One node of the typecode hierarchy.
///
/// # Fields
///
/// - `id`: storage-assigned surrogate key, unique and immutable
/// - `parent_id`: parent reference; `None` for family roots
/// - `kind`: selectable segment or grouping bucket (see [`SegmentKind`])
/// - `category`: human label for the choice this node represents
///   (e.g. "Engine Type")
/// - `label` / `label_en`: localized descriptions
/// - `position`: 0-based character offset of this segment within the fully
///   assembled typecode
/// - `level`: user-facing selection level; 0 for family roots, `None` for
///   grouping buckets
/// - `full_typecode`: set only if this node denotes a complete, orderable
///   product
/// - `is_intermediate`: true if the node carries a `full_typecode` AND has
///   children, i.e. it is simultaneously a finished product and a branch
///   point for further refinement
/// - `cross_group`: optional label grouping nodes across branches
///   independent of tree position (e.g. a "Performance" tier)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentNode {
    pub id: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,

    #[serde(flatten)]
    pub kind: SegmentKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_en: Option<String>,

    pub position: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_typecode: Option<String>,

    pub is_intermediate: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_group: Option<String>,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,
}

impl SegmentNode {
    /// Check if this node is a family root (no parent)
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_grouping(&self) -> bool {
        self.kind.is_grouping()
    }

    /// The code fragment, if selectable
    pub fn code(&self) -> Option<&str> {
        self.kind.code()
    }
}

/// Parameters for creating a single segment node
///
/// Used by `SegmentTreeStore::create_node()`. Position monotonicity and
/// parent existence are checked against the stored parent at insert time;
/// the kind invariant is checked here.
#[derive(Debug, Clone)]
pub struct NewSegment {
    /// Parent node id; `None` creates a family root
    pub parent_id: Option<i64>,
    pub kind: SegmentKind,
    pub category: Option<String>,
    pub label: Option<String>,
    pub label_en: Option<String>,
    /// 0-based offset within the assembled typecode
    pub position: i64,
    pub full_typecode: Option<String>,
    pub cross_group: Option<String>,
}

impl NewSegment {
    /// A family root: selectable, position 0, level 0
    pub fn family(code: impl Into<String>) -> Self {
        Self {
            parent_id: None,
            kind: SegmentKind::Selectable { code: code.into() },
            category: None,
            label: None,
            label_en: None,
            position: 0,
            full_typecode: None,
            cross_group: None,
        }
    }

    /// A selectable segment under `parent_id` at the given offset
    pub fn selectable(parent_id: i64, code: impl Into<String>, position: i64) -> Self {
        Self {
            parent_id: Some(parent_id),
            kind: SegmentKind::Selectable { code: code.into() },
            category: None,
            label: None,
            label_en: None,
            position,
            full_typecode: None,
            cross_group: None,
        }
    }

    /// A grouping bucket under `parent_id` for codes of `group_length` chars
    pub fn grouping(parent_id: i64, group_length: i64, position: i64) -> Self {
        Self {
            parent_id: Some(parent_id),
            kind: SegmentKind::Grouping { group_length },
            category: None,
            label: None,
            label_en: None,
            position,
            full_typecode: None,
            cross_group: None,
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

    pub fn with_full_typecode(mut self, full_typecode: impl Into<String>) -> Self {
        self.full_typecode = Some(full_typecode.into());
        self
    }

    pub fn with_cross_group(mut self, cross_group: impl Into<String>) -> Self {
        self.cross_group = Some(cross_group.into());
        self
    }

    /// Validate the parts of the definition that don't need the parent row
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if:
    /// - a root is defined as a grouping bucket
    /// - a selectable code is empty
    /// - a group length is not positive
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.kind {
            SegmentKind::Selectable { code } => {
                if code.is_empty() {
                    return Err(ValidationError::EmptyCode);
                }
            }
            SegmentKind::Grouping { group_length } => {
                if self.parent_id.is_none() {
                    return Err(ValidationError::GroupingRoot);
                }
                if *group_length <= 0 {
                    return Err(ValidationError::InvalidGroupLength(*group_length));
                }
            }
        }
        Ok(())
    }
}

/// A nested, serializable view of a family subtree.
///
/// Produced by `SegmentTreeStore::export_family()` for downstream tooling;
/// mirrors the tree shape the import consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentTree {
    #[serde(flatten)]
    pub node: SegmentNode,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<SegmentTree>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_constructor() {
        let family = NewSegment::family("CAR");
        assert!(family.parent_id.is_none());
        assert_eq!(family.kind.code(), Some("CAR"));
        assert_eq!(family.position, 0);
        assert!(family.validate().is_ok());
    }

    #[test]
    fn test_grouping_root_rejected() {
        let mut bucket = NewSegment::grouping(1, 3, 3);
        bucket.parent_id = None;
        assert!(matches!(
            bucket.validate(),
            Err(ValidationError::GroupingRoot)
        ));
    }

    #[test]
    fn test_empty_code_rejected() {
        let seg = NewSegment::selectable(1, "", 3);
        assert!(matches!(seg.validate(), Err(ValidationError::EmptyCode)));
    }

    #[test]
    fn test_nonpositive_group_length_rejected() {
        let bucket = NewSegment::grouping(1, 0, 3);
        assert!(matches!(
            bucket.validate(),
            Err(ValidationError::InvalidGroupLength(0))
        ));
    }

    #[test]
    fn test_kind_accessors() {
        let selectable = SegmentKind::Selectable {
            code: "ENGINE-A".to_string(),
        };
        assert!(selectable.is_selectable());
        assert_eq!(selectable.code(), Some("ENGINE-A"));
        assert_eq!(selectable.group_length(), None);

        let grouping = SegmentKind::Grouping { group_length: 4 };
        assert!(grouping.is_grouping());
        assert_eq!(grouping.code(), None);
        assert_eq!(grouping.group_length(), Some(4));
    }

    #[test]
    fn test_kind_serialization_is_tagged() {
        let selectable = SegmentKind::Selectable {
            code: "TRANS-X".to_string(),
        };
        let json = serde_json::to_value(&selectable).unwrap();
        assert_eq!(json["kind"], "selectable");
        assert_eq!(json["code"], "TRANS-X");

        let grouping = SegmentKind::Grouping { group_length: 2 };
        let json = serde_json::to_value(&grouping).unwrap();
        assert_eq!(json["kind"], "grouping");
        assert_eq!(json["groupLength"], 2);
    }
}
