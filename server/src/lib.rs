//! Service operations intake pipeline
//!
//! A durable, idempotent document-processing orchestrator: drains an
//! upstream inbox table, materializes per-case aggregates, consolidates
//! and splits document artifacts, extracts fields, and commits progress in
//! incremental checkpoints so any stage resumes after a crash.

pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
