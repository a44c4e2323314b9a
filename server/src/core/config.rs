//! Application configuration
//!
//! Configuration is loaded from an optional JSON file, then overridden by
//! environment variables and CLI flags. Every section has working defaults
//! so a bare `serviceops --db-url ...` starts with sane behavior.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use super::cli::Cli;
use super::constants::{
    DEFAULT_BLOB_MAX_RETRIES, DEFAULT_BLOB_RETRY_BASE_MS, DEFAULT_BLOB_TEMP_DIR,
    DEFAULT_INTER_JOB_DELAY_SECS, DEFAULT_MAX_ATTEMPTS, DEFAULT_OCR_CONFIDENCE_THRESHOLD,
    DEFAULT_OCR_COVERSHEET_CONFIDENCE_THRESHOLD, DEFAULT_OCR_DELAY_BETWEEN_REQUESTS_SECS,
    DEFAULT_OCR_MAX_PAGES_PER_DOC, DEFAULT_OCR_MAX_RETRIES, DEFAULT_OCR_MIN_COVERSHEET_FIELDS,
    DEFAULT_OCR_TIMEOUT_SECS, DEFAULT_OCR_TOTAL_ATTEMPTS_BUDGET, DEFAULT_POLL_BATCH_SIZE,
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_POOL_CRITICAL_THRESHOLD, DEFAULT_STALE_LOCK_MINUTES,
    POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS, POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS,
    POSTGRES_DEFAULT_MAX_CONNECTIONS, POSTGRES_DEFAULT_MAX_LIFETIME_SECS,
    POSTGRES_DEFAULT_MIN_CONNECTIONS, POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS,
};

/// Scheduler timing for the inbox poller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub batch_size: i64,
    pub inter_job_delay_seconds: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: DEFAULT_POLL_INTERVAL_SECS,
            batch_size: DEFAULT_POLL_BATCH_SIZE,
            inter_job_delay_seconds: DEFAULT_INTER_JOB_DELAY_SECS,
        }
    }
}

/// Reclaim and dead-letter thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    pub stale_lock_minutes: i32,
    pub max_attempts: i32,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            stale_lock_minutes: DEFAULT_STALE_LOCK_MINUTES,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// OCR service knobs. An empty `base_url` disables OCR entirely; documents
/// on OCR channels then fail over to inbox backoff.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub max_pages_per_doc: usize,
    pub total_attempts_budget: u32,
    pub delay_between_requests_seconds: f64,
    pub stop_after_coversheet: bool,
    pub coversheet_confidence_threshold: f64,
    pub min_coversheet_fields: usize,
    /// Per-field confidence floor used by the coversheet detector.
    pub confidence_threshold: f64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_seconds: DEFAULT_OCR_TIMEOUT_SECS,
            max_retries: DEFAULT_OCR_MAX_RETRIES,
            max_pages_per_doc: DEFAULT_OCR_MAX_PAGES_PER_DOC,
            total_attempts_budget: DEFAULT_OCR_TOTAL_ATTEMPTS_BUDGET,
            delay_between_requests_seconds: DEFAULT_OCR_DELAY_BETWEEN_REQUESTS_SECS,
            stop_after_coversheet: true,
            coversheet_confidence_threshold: DEFAULT_OCR_COVERSHEET_CONFIDENCE_THRESHOLD,
            min_coversheet_fields: DEFAULT_OCR_MIN_COVERSHEET_FIELDS,
            confidence_threshold: DEFAULT_OCR_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Blob storage plumbing. SOURCE is read-only and owned by upstream; DEST
/// receives everything this service writes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    pub source_container: String,
    pub dest_container: String,
    pub temp_dir: String,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            source_container: String::new(),
            dest_container: String::new(),
            temp_dir: DEFAULT_BLOB_TEMP_DIR.to_string(),
            max_retries: DEFAULT_BLOB_MAX_RETRIES,
            retry_base_ms: DEFAULT_BLOB_RETRY_BASE_MS,
            region: None,
            endpoint: None,
        }
    }
}

/// PostgreSQL pool discipline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    /// Connections are recycled after this lifetime.
    pub max_lifetime_secs: u64,
    /// Statement timeout in seconds, 0 to disable.
    pub statement_timeout_secs: u64,
    /// Verify connections before use.
    pub pre_ping: bool,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: POSTGRES_DEFAULT_MAX_CONNECTIONS,
            min_connections: POSTGRES_DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS,
            idle_timeout_secs: POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS,
            max_lifetime_secs: POSTGRES_DEFAULT_MAX_LIFETIME_SECS,
            statement_timeout_secs: POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS,
            pre_ping: true,
        }
    }
}

/// Backpressure cutoffs for background work.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Above this pool utilization the poll batch shrinks to 1.
    pub pool_critical_threshold: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            pool_critical_threshold: DEFAULT_POOL_CRITICAL_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub poller: PollerConfig,
    pub inbox: InboxConfig,
    pub ocr: OcrConfig,
    pub blob: BlobConfig,
    pub database: PostgresConfig,
    pub backpressure: BackpressureConfig,
}

impl AppConfig {
    /// Load configuration from file (when present) and apply CLI overrides.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(url) = &cli.db_url {
            config.database.url = url.clone();
        }
        if cli.no_poller {
            config.poller.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Validate cross-field constraints.
    ///
    /// The container check prevents the worst misconfiguration: pointing
    /// DEST at the upstream SOURCE container and overwriting its artifacts.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            bail!("PostgreSQL URL is required (config database.url or --db-url)");
        }

        let source = self.blob.source_container.trim();
        let dest = self.blob.dest_container.trim();
        if source.is_empty() {
            bail!("blob.source_container is required");
        }
        if dest.is_empty() {
            bail!("blob.dest_container is required");
        }
        if source == dest {
            bail!(
                "blob.source_container and blob.dest_container must be distinct (both are '{source}')"
            );
        }

        let threshold = self.backpressure.pool_critical_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            bail!("backpressure.pool_critical_threshold must be within [0, 1], got {threshold}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.database.url = "postgres://localhost/serviceops".into();
        config.blob.source_container = "intake-source".into();
        config.blob.dest_container = "serviceops-artifacts".into();
        config
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.poller.enabled);
        assert_eq!(config.poller.interval_seconds, 180);
        assert_eq!(config.poller.batch_size, 7);
        assert_eq!(config.inbox.stale_lock_minutes, 10);
        assert_eq!(config.inbox.max_attempts, 5);
        assert_eq!(config.ocr.max_pages_per_doc, 10);
        assert_eq!(config.ocr.total_attempts_budget, 3);
        assert_eq!(config.backpressure.pool_critical_threshold, 0.95);
    }

    #[test]
    fn test_validate_requires_distinct_containers() {
        let mut config = valid_config();
        config.blob.dest_container = config.blob.source_container.clone();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("distinct"));
    }

    #[test]
    fn test_validate_requires_containers() {
        let mut config = valid_config();
        config.blob.source_container = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"poller": {"batch_size": 3}, "ocr": {"base_url": "http://localhost:5080"}}"#,
        )
        .unwrap();
        assert_eq!(config.poller.batch_size, 3);
        assert_eq!(config.poller.interval_seconds, 180);
        assert_eq!(config.ocr.base_url, "http://localhost:5080");
        assert_eq!(config.ocr.max_retries, 5);
    }
}
