//! PostgreSQL database service
//!
//! Centralized pool management for the intake pipeline:
//! - Connection pooling with min/max bounds
//! - Idle connection cleanup and lifetime cycling
//! - Query timeout protection
//! - Pool utilization readout for background backpressure
//!
//! All schema definitions and migrations are managed here.

pub mod error;
mod migrations;
pub mod repositories;
pub mod schema;

pub use error::PostgresError;
pub use sqlx::PgPool;

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::core::config::PostgresConfig;

/// PostgreSQL database service
///
/// Created once at startup and shared across the poller, processor and
/// reclaimer. Workers coordinate exclusively through this pool; there is no
/// in-memory cross-worker state.
pub struct PostgresService {
    pool: PgPool,
    max_connections: u32,
}

impl PostgresService {
    /// Initialize the database service from configuration
    pub async fn init(config: &PostgresConfig) -> Result<Self, PostgresError> {
        let url = config.url.as_str();
        if url.is_empty() {
            return Err(PostgresError::Config("PostgreSQL URL is required".into()));
        }

        let mut options: PgConnectOptions = url
            .parse()
            .map_err(|e| PostgresError::Config(format!("Invalid PostgreSQL URL: {}", e)))?;

        // Statement timeout at connection level for query protection
        if config.statement_timeout_secs > 0 {
            options = options.options([(
                "statement_timeout",
                format!("{}s", config.statement_timeout_secs),
            )]);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(config.pre_ping)
            .connect_with(options)
            .await?;

        migrations::run_migrations(&pool).await?;

        tracing::debug!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            acquire_timeout_secs = config.acquire_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            statement_timeout_secs = config.statement_timeout_secs,
            "PostgresService initialized"
        );
        Ok(Self {
            pool,
            max_connections: config.max_connections,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fraction of the pool currently checked out, in `[0, 1]`.
    ///
    /// The poller shrinks its batch to 1 when this crosses the configured
    /// critical threshold.
    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            return 0.0;
        }
        let total = self.pool.size() as f64;
        let idle = self.pool.num_idle() as f64;
        ((total - idle).max(0.0)) / self.max_connections as f64
    }

    /// Log pool status when usage is elevated.
    pub fn log_pool_status(&self, critical_threshold: f64) {
        let usage = self.utilization();
        if usage >= critical_threshold {
            tracing::warn!(
                usage = format!("{:.1}%", usage * 100.0),
                "Connection pool CRITICAL; background processing will throttle"
            );
        } else if usage >= 0.7 {
            tracing::info!(
                usage = format!("{:.1}%", usage * 100.0),
                "Connection pool usage elevated"
            );
        }
    }

    /// Close the connection pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("PostgreSQL pool closed");
    }
}

#[cfg(test)]
mod tests {
    // PostgreSQL tests require a running PostgreSQL instance
    // and are typically run as integration tests
}
