//! Stuck job reclamation
//!
//! A job is stuck when its inbox row sits in PROCESSING with a lock older
//! than the stale threshold: the worker died, was cancelled, or lost its
//! status write. Recovery is two atomic batches:
//!
//! - rows under the attempt limit are reset to NEW in a single CTE update
//!   (oldest lock first, skip-locked),
//! - rows at the limit are first claimed under this reclaimer's id, then
//!   pushed through the status writer so DEAD promotion and the backoff
//!   ladder apply uniformly.

use sqlx::PgPool;
use uuid::Uuid;

use crate::core::constants::RECLAIMER_BATCH_SIZE;
use crate::data::postgres::PostgresError;

use super::status::StatusWriter;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimStats {
    pub detected: i64,
    pub reset_to_new: usize,
    pub marked_failed: usize,
    pub errors: usize,
}

pub struct Reclaimer {
    pool: PgPool,
    status_writer: StatusWriter,
    stale_lock_minutes: i32,
    max_attempts: i32,
    batch_size: i64,
    reclaimer_id: String,
}

impl Reclaimer {
    pub fn new(
        pool: PgPool,
        status_writer: StatusWriter,
        stale_lock_minutes: i32,
        max_attempts: i32,
    ) -> Self {
        let reclaimer_id = format!("reclaimer:{}", &Uuid::new_v4().simple().to_string()[..8]);
        Self {
            pool,
            status_writer,
            stale_lock_minutes,
            max_attempts,
            batch_size: RECLAIMER_BATCH_SIZE,
            reclaimer_id,
        }
    }

    /// Detect and recover stuck jobs. Never throws: per-row failures are
    /// counted and the sweep continues.
    pub async fn detect_and_recover(&self) -> ReclaimStats {
        let mut stats = ReclaimStats::default();

        match self.count_stale().await {
            Ok(count) => stats.detected = count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to count stuck jobs");
                stats.errors += 1;
                return stats;
            }
        }

        if stats.detected == 0 {
            tracing::debug!("No stuck jobs detected");
            return stats;
        }

        tracing::warn!(
            detected = stats.detected,
            stale_lock_minutes = self.stale_lock_minutes,
            "Detected stuck job(s) in PROCESSING status"
        );

        match self.reset_batch_to_new().await {
            Ok(reset) => {
                stats.reset_to_new = reset.len();
                if !reset.is_empty() {
                    tracing::info!(count = reset.len(), "Batch reset stuck job(s) to NEW");
                }
                for (inbox_id, attempt_count, decision_tracking_id) in &reset {
                    tracing::debug!(
                        inbox_id,
                        attempt_count,
                        %decision_tracking_id,
                        "Reset stuck job"
                    );
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reset stuck jobs to NEW");
                stats.errors += 1;
            }
        }

        match self.claim_exhausted_batch().await {
            Ok(claimed) => {
                if !claimed.is_empty() {
                    tracing::info!(
                        count = claimed.len(),
                        reclaimer_id = %self.reclaimer_id,
                        "Claimed job(s) at the attempt limit for FAILED marking"
                    );
                }
                for (inbox_id, attempt_count, decision_tracking_id) in claimed {
                    let error_msg = format!(
                        "Stuck in PROCESSING for over {} minutes; max attempts ({}) exceeded",
                        self.stale_lock_minutes, self.max_attempts
                    );
                    let outcome = self
                        .status_writer
                        .mark_failed_with_retry(inbox_id, &error_msg, Some(attempt_count))
                        .await;
                    if outcome.success {
                        stats.marked_failed += 1;
                        tracing::warn!(
                            inbox_id,
                            attempt_count,
                            %decision_tracking_id,
                            "Marked stuck job as dead-lettered"
                        );
                    } else {
                        // Row stays claimed under this reclaimer id; the
                        // next sweep retries it
                        stats.errors += 1;
                        tracing::error!(
                            inbox_id,
                            attempts = outcome.attempts,
                            error = outcome.error.as_deref().unwrap_or("unknown"),
                            "Failed to mark stuck job"
                        );
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim exhausted stuck jobs");
                stats.errors += 1;
            }
        }

        tracing::info!(
            detected = stats.detected,
            reset_to_new = stats.reset_to_new,
            marked_failed = stats.marked_failed,
            errors = stats.errors,
            "Stuck job recovery completed"
        );
        stats
    }

    async fn count_stale(&self) -> Result<i64, PostgresError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM service_ops.intake_inbox
            WHERE status = 'PROCESSING'
              AND locked_at IS NOT NULL
              AND locked_at < NOW() - make_interval(mins => $1)
            "#,
        )
        .bind(self.stale_lock_minutes)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn reset_batch_to_new(&self) -> Result<Vec<(i64, i32, Uuid)>, PostgresError> {
        let rows: Vec<(i64, i32, Uuid)> = sqlx::query_as(
            r#"
            WITH candidates AS (
                SELECT inbox_id
                FROM service_ops.intake_inbox
                WHERE status = 'PROCESSING'
                  AND locked_at IS NOT NULL
                  AND locked_at < NOW() - make_interval(mins => $1)
                  AND attempt_count < $2
                ORDER BY locked_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE service_ops.intake_inbox AS inbox
            SET
                status = 'NEW',
                locked_by = NULL,
                locked_at = NULL,
                updated_at = NOW()
            FROM candidates
            WHERE inbox.inbox_id = candidates.inbox_id
              AND inbox.status = 'PROCESSING'
              AND inbox.locked_at < NOW() - make_interval(mins => $1)
            RETURNING inbox.inbox_id, inbox.attempt_count, inbox.decision_tracking_id
            "#,
        )
        .bind(self.stale_lock_minutes)
        .bind(self.max_attempts)
        .bind(self.batch_size)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn claim_exhausted_batch(&self) -> Result<Vec<(i64, i32, Uuid)>, PostgresError> {
        let rows: Vec<(i64, i32, Uuid)> = sqlx::query_as(
            r#"
            WITH candidates AS (
                SELECT inbox_id
                FROM service_ops.intake_inbox
                WHERE status = 'PROCESSING'
                  AND locked_at IS NOT NULL
                  AND locked_at < NOW() - make_interval(mins => $1)
                  AND attempt_count >= $2
                  AND (locked_by IS NULL OR locked_by NOT LIKE 'reclaimer:%')
                ORDER BY locked_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE service_ops.intake_inbox AS inbox
            SET
                locked_by = $4,
                updated_at = NOW()
            FROM candidates
            WHERE inbox.inbox_id = candidates.inbox_id
              AND inbox.status = 'PROCESSING'
              AND inbox.locked_at < NOW() - make_interval(mins => $1)
              AND inbox.attempt_count >= $2
            RETURNING inbox.inbox_id, inbox.attempt_count, inbox.decision_tracking_id
            "#,
        )
        .bind(self.stale_lock_minutes)
        .bind(self.max_attempts)
        .bind(self.batch_size)
        .bind(&self.reclaimer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    // Reclaimer sweeps require a running PostgreSQL instance and are
    // covered by integration tests.
}
