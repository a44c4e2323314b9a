//! PostgreSQL migration management
//!
//! Handles schema initialization and version tracking. The schema is
//! written with idempotent statements, so re-applying it on upgrade is
//! safe; incremental ALTERs get their own versions when they appear.

use sqlx::PgPool;

use super::error::PostgresError;
use super::schema::{DEFAULT_DATA, SCHEMA, SCHEMA_VERSION};

/// Run all pending migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), PostgresError> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = 'service_ops'
            AND table_name = 'schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    let current_version: Option<i32> = if table_exists {
        sqlx::query_scalar("SELECT version FROM service_ops.schema_version WHERE id = 1")
            .fetch_optional(pool)
            .await?
    } else {
        None
    };

    match current_version {
        None => {
            tracing::debug!("Applying initial PostgreSQL schema v{}", SCHEMA_VERSION);
            apply_schema(pool).await?;
        }
        Some(v) if v < SCHEMA_VERSION => {
            tracing::debug!(
                "Migrating PostgreSQL schema from v{} to v{}",
                v,
                SCHEMA_VERSION
            );
            apply_schema(pool).await?;
        }
        Some(v) if v > SCHEMA_VERSION => {
            tracing::warn!(
                "PostgreSQL schema version {} is newer than application version {}. This may cause issues.",
                v,
                SCHEMA_VERSION
            );
        }
        _ => {
            tracing::debug!("PostgreSQL schema is up to date (v{})", SCHEMA_VERSION);
        }
    }

    Ok(())
}

async fn apply_schema(pool: &PgPool) -> Result<(), PostgresError> {
    // Multi-statement scripts must go through the simple query protocol
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| PostgresError::MigrationFailed {
            version: SCHEMA_VERSION,
            error: e.to_string(),
        })?;
    sqlx::raw_sql(DEFAULT_DATA).execute(pool).await?;

    sqlx::query(
        "INSERT INTO service_ops.schema_version (id, version) VALUES (1, $1)
         ON CONFLICT (id) DO UPDATE SET version = EXCLUDED.version, applied_at = NOW()",
    )
    .bind(SCHEMA_VERSION)
    .execute(pool)
    .await?;

    Ok(())
}
