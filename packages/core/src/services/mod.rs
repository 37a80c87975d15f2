//! Query Services
//!
//! Business logic over the segment tree store:
//!
//! - `LevelProjector` - tree depth to user-facing selection levels
//! - `CompatibilityResolver` - options at a level consistent with prior
//!   selections
//! - `TypecodeAssembler` - path to string and back
//! - `TypecodeImporter` - bulk forest construction from flat records
//! - `SchemaSearch` - products by segment-length arrangement
//! - `VariantService` - facade exposing the external query interface

pub mod assembler;
pub mod error;
pub mod import;
pub mod levels;
pub mod resolver;
pub mod search;
pub mod variant_service;

pub use assembler::TypecodeAssembler;
pub use error::VariantServiceError;
pub use import::{ImportSummary, TypecodeImporter, TypecodeRecord};
pub use levels::LevelProjector;
pub use resolver::CompatibilityResolver;
pub use search::{SchemaQuery, SchemaSearch};
pub use variant_service::VariantService;
