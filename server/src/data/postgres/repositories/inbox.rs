//! Inbox repository: watermarked polling, idempotent inserts, atomic
//! claiming and terminal status updates
//!
//! Every operation acquires a fresh connection from the pool, so a failed
//! statement can never poison a long-lived session.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::core::constants::LAST_ERROR_MAX_LEN;
use crate::data::postgres::PostgresError;
use crate::data::types::{ClaimedJob, InboxStatus, SourceMessage, Watermark};

/// Get the current polling watermark.
///
/// A missing row is repaired with an idempotent epoch insert; when even
/// that fails (e.g. insufficient grants) the epoch default is returned and
/// the row gets created by the first `update_watermark`.
pub async fn get_watermark(pool: &PgPool) -> Result<Watermark, PostgresError> {
    let row: Option<Watermark> = sqlx::query_as(
        "SELECT last_created_at, last_message_id
         FROM service_ops.intake_poll_watermark
         WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    if let Some(wm) = row {
        return Ok(wm);
    }

    tracing::warn!(
        "Watermark row (id=1) not found in intake_poll_watermark; attempting to initialize it"
    );
    let init = sqlx::query(
        "INSERT INTO service_ops.intake_poll_watermark (id, last_created_at, last_message_id, updated_at)
         VALUES (1, '1970-01-01 00:00:00+00', 0, NOW())
         ON CONFLICT (id) DO NOTHING",
    )
    .execute(pool)
    .await;

    if let Err(e) = init {
        tracing::warn!(
            error = %e,
            "Failed to initialize watermark row; using epoch default (row will be created on first update)"
        );
    }

    Ok(Watermark::epoch())
}

/// Poll for new source messages beyond the watermark.
///
/// Intake rows (type 1 or NULL) must look like a file package or carry a
/// decision_tracking_id; ack rows (2, 3) must carry a decision_tracking_id.
/// Rows failing the shape filter are left behind the watermark and re-seen
/// on every poll until they disappear or become well-formed.
pub async fn poll_new(
    pool: &PgPool,
    watermark: &Watermark,
    batch_size: i64,
) -> Result<Vec<SourceMessage>, PostgresError> {
    let rows: Vec<SourceMessage> = sqlx::query_as(
        r#"
        SELECT
            message_id,
            decision_tracking_id,
            payload,
            created_at,
            channel_type_id,
            message_type_id
        FROM integration.intake_messages
        WHERE is_deleted = FALSE
            AND (message_type_id IN (1, 2, 3) OR message_type_id IS NULL)
            AND (
                (message_type_id = 1 OR message_type_id IS NULL)
                AND (
                    payload->>'message_type' = 'ingest_file_package'
                    OR payload->>'decision_tracking_id' IS NOT NULL
                )
                OR
                message_type_id IN (2, 3)
                AND payload->>'decision_tracking_id' IS NOT NULL
            )
            AND (
                created_at > $1
                OR (created_at = $1 AND message_id > $2)
            )
        ORDER BY created_at ASC, message_id ASC
        LIMIT $3
        "#,
    )
    .bind(watermark.last_created_at)
    .bind(watermark.last_message_id)
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Idempotently insert a message into the inbox.
///
/// Returns the new `inbox_id`, or `None` when a row for this `message_id`
/// already exists (the unique index swallows the duplicate).
pub async fn insert_new(
    pool: &PgPool,
    message_id: i64,
    decision_tracking_id: Uuid,
    message_type: &str,
    source_created_at: DateTime<Utc>,
    channel_type_id: Option<i16>,
    message_type_id: Option<i16>,
) -> Result<Option<i64>, PostgresError> {
    let inbox_id: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO service_ops.intake_inbox (
            message_id,
            decision_tracking_id,
            message_type,
            source_created_at,
            status,
            channel_type_id,
            message_type_id
        )
        VALUES ($1, $2, $3, $4, 'NEW', $5, $6)
        ON CONFLICT (message_id) DO NOTHING
        RETURNING inbox_id
        "#,
    )
    .bind(message_id)
    .bind(decision_tracking_id)
    .bind(message_type)
    .bind(source_created_at)
    .bind(channel_type_id)
    .bind(message_type_id)
    .fetch_optional(pool)
    .await?;

    Ok(inbox_id)
}

/// Atomically claim one eligible job for processing (multi-worker safe).
///
/// One statement: the CTE selects the oldest eligible row with
/// `FOR UPDATE SKIP LOCKED`, so concurrent workers never claim the same
/// row; the losing worker simply gets `None`.
pub async fn claim_one(
    pool: &PgPool,
    worker_id: &str,
    stale_lock_minutes: i32,
) -> Result<Option<ClaimedJob>, PostgresError> {
    let job: Option<ClaimedJob> = sqlx::query_as(
        r#"
        WITH claimed AS (
            UPDATE service_ops.intake_inbox
            SET
                status = 'PROCESSING',
                locked_by = $1,
                locked_at = NOW(),
                attempt_count = attempt_count + 1,
                updated_at = NOW()
            WHERE inbox_id = (
                SELECT inbox_id
                FROM service_ops.intake_inbox
                WHERE status IN ('NEW', 'FAILED')
                    AND next_attempt_at <= NOW()
                    AND (
                        locked_at IS NULL
                        OR locked_at < NOW() - make_interval(mins => $2)
                    )
                ORDER BY source_created_at ASC, message_id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING
                inbox_id,
                message_id,
                decision_tracking_id,
                message_type,
                source_created_at,
                attempt_count,
                channel_type_id,
                message_type_id
        )
        SELECT
            inbox_id,
            message_id,
            decision_tracking_id,
            message_type,
            source_created_at,
            attempt_count,
            channel_type_id,
            message_type_id
        FROM claimed
        "#,
    )
    .bind(worker_id)
    .bind(stale_lock_minutes)
    .fetch_optional(pool)
    .await?;

    Ok(job)
}

/// Mark a job as successfully completed. Returns false if the row is gone.
pub async fn mark_done(conn: &mut PgConnection, inbox_id: i64) -> Result<bool, PostgresError> {
    let result = sqlx::query(
        r#"
        UPDATE service_ops.intake_inbox
        SET
            status = 'DONE',
            updated_at = NOW(),
            locked_by = NULL,
            locked_at = NULL,
            last_error = NULL
        WHERE inbox_id = $1
        "#,
    )
    .bind(inbox_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Backoff ladder indexed by the number of failures before this one:
/// the first failure waits 1 minute, the second 5, and so on.
pub fn backoff_minutes(prior_failures: i32) -> i32 {
    match prior_failures {
        i32::MIN..=0 => 1,
        1 => 5,
        2 => 15,
        3 => 60,
        4 => 360,
        _ => 1440,
    }
}

/// Fetch the current attempt count of an inbox row.
pub async fn fetch_attempt_count(
    conn: &mut PgConnection,
    inbox_id: i64,
) -> Result<Option<i32>, PostgresError> {
    let count: Option<i32> =
        sqlx::query_scalar("SELECT attempt_count FROM service_ops.intake_inbox WHERE inbox_id = $1")
            .bind(inbox_id)
            .fetch_optional(conn)
            .await?;
    Ok(count)
}

/// Mark a job as failed with exponential backoff.
///
/// `attempt_count` is the row's current count (the claim already
/// incremented it): the first failure arrives with 1 and waits a minute;
/// at `max_attempts` the row is promoted to DEAD and `next_attempt_at` is
/// left untouched. Returns false if the row is gone.
pub async fn mark_failed(
    conn: &mut PgConnection,
    inbox_id: i64,
    error_message: &str,
    attempt_count: i32,
    max_attempts: i32,
) -> Result<bool, PostgresError> {
    let new_status = if attempt_count >= max_attempts {
        InboxStatus::Dead
    } else {
        InboxStatus::Failed
    };
    let truncated: String = error_message.chars().take(LAST_ERROR_MAX_LEN).collect();

    let result = sqlx::query(
        r#"
        UPDATE service_ops.intake_inbox
        SET
            status = $2,
            last_error = $3,
            next_attempt_at = CASE
                WHEN attempt_count >= $4 THEN next_attempt_at
                ELSE NOW() + make_interval(mins => $5)
            END,
            locked_by = NULL,
            locked_at = NULL,
            updated_at = NOW()
        WHERE inbox_id = $1
        "#,
    )
    .bind(inbox_id)
    .bind(new_status.as_str())
    .bind(&truncated)
    .bind(max_attempts)
    .bind(backoff_minutes(attempt_count - 1))
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Advance the polling watermark after a processed batch.
///
/// The upsert takes the element-wise max of the stored tuple and the
/// argument tuple, so the watermark is monotonically non-decreasing even
/// under concurrent updates.
pub async fn update_watermark(
    pool: &PgPool,
    max_created_at: DateTime<Utc>,
    max_message_id: i64,
) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO service_ops.intake_poll_watermark (
            id,
            last_created_at,
            last_message_id,
            updated_at
        )
        VALUES (1, $1, $2, NOW())
        ON CONFLICT (id)
        DO UPDATE SET
            last_created_at = GREATEST(
                service_ops.intake_poll_watermark.last_created_at,
                EXCLUDED.last_created_at
            ),
            last_message_id = GREATEST(
                service_ops.intake_poll_watermark.last_message_id,
                EXCLUDED.last_message_id
            ),
            updated_at = NOW()
        "#,
    )
    .bind(max_created_at)
    .bind(max_message_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch the original source message for a claimed job.
pub async fn get_source_message(
    pool: &PgPool,
    message_id: i64,
) -> Result<Option<SourceMessage>, PostgresError> {
    let row: Option<SourceMessage> = sqlx::query_as(
        "SELECT message_id, decision_tracking_id, payload, created_at, channel_type_id, message_type_id
         FROM integration.intake_messages
         WHERE message_id = $1",
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Repository behavior against a live database is covered by integration
    // tests; the backoff ladder is pure and tested here.

    #[test]
    fn test_backoff_ladder() {
        assert_eq!(backoff_minutes(0), 1);
        assert_eq!(backoff_minutes(1), 5);
        assert_eq!(backoff_minutes(2), 15);
        assert_eq!(backoff_minutes(3), 60);
        assert_eq!(backoff_minutes(4), 360);
        assert_eq!(backoff_minutes(5), 1440);
        assert_eq!(backoff_minutes(17), 1440);
        // Defensive: a zeroed row still gets the shortest backoff
        assert_eq!(backoff_minutes(-1), 1);
    }
}
