//! TypeTree Core Engine
//!
//! Hierarchical typecode decoding: a forest of segment trees - one per
//! product family - answers which options remain reachable for any
//! partially completed, possibly gapped selection, and maps selection
//! paths to flat typecode strings and back.
//!
//! # Architecture
//!
//! - **Segment Tree Store**: authoritative node storage over libsql, with
//!   selectable segments and organizational grouping buckets as a tagged
//!   variant
//! - **Closure Index**: precomputed `(ancestor, descendant, distance)`
//!   relation maintained transactionally with every structural mutation;
//!   reachability tests are single indexed lookups
//! - **Level Projector**: raw tree depth to user-facing selection levels,
//!   skipping grouping buckets
//! - **Compatibility Resolver**: forward/backward chain checks over the
//!   closure, pure function of the explicit selection set
//! - **Typecode Assembler**: concatenation and longest-match-backtracking
//!   decoding of typecode strings
//!
//! # Modules
//!
//! - [`models`] - data structures (SegmentNode, results, selections)
//! - [`db`] - database layer (store, closure index)
//! - [`services`] - resolver, assembler, importer, search, facade

pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use db::*;
pub use models::*;
pub use services::*;
