//! Service Layer Error Types
//!
//! Error types for the query services, mirroring the engine's error
//! taxonomy: invalid selections, incomplete paths, decode failures, plus
//! chained validation and storage errors. All errors are local to a single
//! call; there is no cross-call recovery inside the engine.

use crate::db::{DatabaseError, StoreError};
use crate::models::{PathSegment, ValidationError};
use thiserror::Error;

/// Variant service operation errors
#[derive(Error, Debug)]
pub enum VariantServiceError {
    /// Node not found by id
    #[error("Node not found: {id}")]
    NodeNotFound { id: i64 },

    /// Family root not found (or the id does not reference a root)
    #[error("Family not found: {family_id}")]
    FamilyNotFound { family_id: i64 },

    /// Resolver called with an unusable selection: unknown code, grouping
    /// node, or two selections claiming the same level
    #[error("Invalid selection: {reason}")]
    InvalidSelection { reason: String },

    /// Assembler invoked on a path with a missing selectable level
    #[error("Incomplete path: no selection at level {missing_level}")]
    IncompletePath { missing_level: i64 },

    /// Decoder could not match the remaining string against any child.
    ///
    /// Carries the unmatched offset and the partial path reconstructed so
    /// far; callers may choose to accept the partial decode.
    #[error("Typecode decoding failed at offset {offset}")]
    Decode {
        offset: usize,
        partial: Vec<PathSegment>,
    },

    /// Validation failed for a segment definition
    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    /// Storage operation failed
    #[error("Store operation failed: {0}")]
    StoreFailed(#[from] StoreError),

    /// Database operation failed
    #[error("Database operation failed: {0}")]
    DatabaseFailed(#[from] DatabaseError),

    /// Query execution error (reachability backend or ad-hoc query)
    #[error("Query failed: {0}")]
    QueryFailed(String),
}

impl VariantServiceError {
    /// Create a node not found error
    pub fn node_not_found(id: i64) -> Self {
        Self::NodeNotFound { id }
    }

    /// Create a family not found error
    pub fn family_not_found(family_id: i64) -> Self {
        Self::FamilyNotFound { family_id }
    }

    /// Create an invalid selection error
    pub fn invalid_selection(reason: impl Into<String>) -> Self {
        Self::InvalidSelection {
            reason: reason.into(),
        }
    }

    /// Create a query failed error
    pub fn query_failed(msg: impl Into<String>) -> Self {
        Self::QueryFailed(msg.into())
    }
}
