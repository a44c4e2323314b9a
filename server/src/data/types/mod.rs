//! Shared data types for the intake pipeline
//!
//! Row types mirror the PostgreSQL tables; payload types model the
//! semi-structured upstream message; metadata types are the JSONB documents
//! persisted on `case_documents`.

mod enums;
mod metadata;
mod payload;
mod rows;

pub use enums::*;
pub use metadata::*;
pub use payload::*;
pub use rows::*;
