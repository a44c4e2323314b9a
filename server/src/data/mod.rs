//! Data layer: PostgreSQL tables and blob storage

pub mod blob;
pub mod postgres;
pub mod types;

pub use postgres::PostgresService;
