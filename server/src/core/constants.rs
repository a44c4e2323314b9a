//! Application-wide constants and defaults

pub const APP_NAME_LOWER: &str = "serviceops";

// Environment variables
pub const ENV_LOG: &str = "SERVICEOPS_LOG";
pub const ENV_CONFIG: &str = "SERVICEOPS_CONFIG";
pub const ENV_DATABASE_URL: &str = "SERVICEOPS_DATABASE_URL";

// Poller defaults
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 180;
pub const DEFAULT_POLL_BATCH_SIZE: i64 = 7;
/// Jobs drained per tick are capped regardless of the poll batch size.
pub const MAX_JOBS_PER_TICK: usize = 5;
/// Delay between jobs within one tick; yields pool connections back to
/// interactive requests and paces the OCR service.
pub const DEFAULT_INTER_JOB_DELAY_SECS: f64 = 3.0;
/// The reclaimer runs every N poll ticks.
pub const RECLAIMER_EVERY_TICKS: u32 = 5;
pub const RECLAIMER_BATCH_SIZE: i64 = 200;

// Inbox defaults
pub const DEFAULT_STALE_LOCK_MINUTES: i32 = 10;
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
/// Stored error strings are truncated to this many characters.
pub const LAST_ERROR_MAX_LEN: usize = 1000;
/// Terminal status writes retry up to this many times on fresh connections.
pub const STATUS_WRITE_MAX_RETRIES: u32 = 10;

// OCR defaults
pub const DEFAULT_OCR_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_OCR_MAX_RETRIES: u32 = 5;
pub const DEFAULT_OCR_MAX_PAGES_PER_DOC: usize = 10;
pub const DEFAULT_OCR_TOTAL_ATTEMPTS_BUDGET: u32 = 3;
pub const DEFAULT_OCR_DELAY_BETWEEN_REQUESTS_SECS: f64 = 0.5;
pub const DEFAULT_OCR_COVERSHEET_CONFIDENCE_THRESHOLD: f64 = 0.7;
pub const DEFAULT_OCR_MIN_COVERSHEET_FIELDS: usize = 20;
pub const DEFAULT_OCR_CONFIDENCE_THRESHOLD: f64 = 0.5;

// Blob defaults
pub const DEFAULT_BLOB_TEMP_DIR: &str = "/tmp/serviceops_blobs";
pub const DEFAULT_BLOB_MAX_RETRIES: u32 = 5;
pub const DEFAULT_BLOB_RETRY_BASE_MS: u64 = 1000;

// Database pool defaults
pub const POSTGRES_DEFAULT_MAX_CONNECTIONS: u32 = 20;
pub const POSTGRES_DEFAULT_MIN_CONNECTIONS: u32 = 2;
pub const POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const POSTGRES_DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;
pub const POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 60;

// Backpressure
pub const DEFAULT_POOL_CRITICAL_THRESHOLD: f64 = 0.95;

// Shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// Domain constants
/// Placeholder written to case columns that extraction fills in later.
pub const TBD_SENTINEL: &str = "TBD";
pub const EXTERNAL_CASE_ID_PREFIX: &str = "SVC";
pub const EXTERNAL_DOCUMENT_ID_PREFIX: &str = "DOC";
pub const PROCESSING_ROOT: &str = "service_ops_processing";

pub const DETAILED_STATUS_NEW: &str = "Pending - New";
pub const DETAILED_STATUS_ACKNOWLEDGED: &str = "Pending - Acknowledged";
pub const DETAILED_STATUS_ACK_FAILED: &str = "Pending - Ack Failed";
