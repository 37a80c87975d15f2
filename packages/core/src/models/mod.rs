//! Data Models
//!
//! Core data structures for the segment tree: nodes, creation parameters,
//! and the result types returned across the query interface.

pub mod results;
pub mod segment;

pub use results::{CandidateResult, DecodedTypecode, PathSegment, Selection, SelectionByCode};
pub use segment::{NewSegment, SegmentKind, SegmentNode, SegmentTree, ValidationError};
