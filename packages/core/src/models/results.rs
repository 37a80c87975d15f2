//! Query Result Types
//!
//! Types crossing the query interface: selections supplied by callers and
//! the annotated candidate/decoding results handed back.

use serde::{Deserialize, Serialize};

/// A prior selection identified by node id, tagged with its level.
///
/// The resolver's internal currency. Selections may arrive in any order and
/// with level gaps; they never reference grouping nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub level: i64,
    pub node_id: i64,
}

/// A prior selection identified by code, as external callers supply it.
///
/// Codes are not globally unique; the service resolves each `(level, code)`
/// pair to the set of matching nodes within the queried family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionByCode {
    pub level: i64,
    pub code: String,
}

impl SelectionByCode {
    pub fn new(level: i64, code: impl Into<String>) -> Self {
        Self {
            level,
            code: code.into(),
        }
    }
}

/// One candidate at the target level, annotated with compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateResult {
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_en: Option<String>,

    pub level: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_typecode: Option<String>,

    pub is_intermediate: bool,

    /// Whether a consistent end-to-end path exists through every prior
    /// selection and this candidate
    pub is_compatible: bool,

    /// Code of the nearest selectable ancestor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_code: Option<String>,
}

/// One resolved segment of a decoded typecode string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSegment {
    pub node_id: i64,
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    pub level: i64,
}

/// Result of decoding a typecode string against a family tree.
///
/// `is_complete` is true when the string was fully consumed and the final
/// node is a complete product (carries a `full_typecode`) or has no further
/// selectable children. A partial decode keeps the successfully matched
/// prefix in `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedTypecode {
    pub path: Vec<PathSegment>,
    pub is_complete: bool,
}
