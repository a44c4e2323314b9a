//! Repository functions over the service_ops tables
//!
//! Repositories are plain async functions taking an executor, so they run
//! equally against the pool (fresh connection per call) or inside a stage
//! transaction.

pub mod case;
pub mod document;
pub mod inbox;
