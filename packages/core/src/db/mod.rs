//! Database Layer
//!
//! Storage for the segment tree and its closure index using libsql:
//!
//! - `DatabaseService` - connection management and idempotent schema setup
//! - `SegmentTreeStore` - authoritative node storage; every structural
//!   mutation carries its closure maintenance in the same transaction
//! - `Reachability` - read-side reachability seam with two backends: the
//!   precomputed closure table and a recursive-walk fallback for small
//!   trees

mod closure;
mod database;
mod error;
mod store;

pub use closure::{ClosureIndex, Reachability, RecursiveReachability};
pub use database::DatabaseService;
pub use error::DatabaseError;
pub use store::{SegmentTreeStore, StoreError};
