//! Guaranteed terminal status writes
//!
//! An inbox row must never be abandoned in PROCESSING because the final
//! UPDATE happened to fail. Both writers retry on a fresh pool connection
//! with exponential backoff; if every attempt fails the row is left for
//! the stale-lock reclaimer, which is the final backstop.

use std::time::Duration;

use sqlx::PgPool;

use crate::core::constants::STATUS_WRITE_MAX_RETRIES;
use crate::data::postgres::repositories::inbox;

/// Result of a terminal status write.
#[derive(Debug, Clone)]
pub struct StatusUpdateOutcome {
    pub success: bool,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct StatusWriter {
    pool: PgPool,
    max_retries: u32,
    max_attempts: i32,
}

enum Target<'a> {
    Done,
    Failed {
        error_message: &'a str,
        attempt_count: Option<i32>,
    },
}

impl StatusWriter {
    pub fn new(pool: PgPool, max_attempts: i32) -> Self {
        Self {
            pool,
            max_retries: STATUS_WRITE_MAX_RETRIES,
            max_attempts,
        }
    }

    /// Mark a job DONE, retrying until it sticks or the budget runs out.
    pub async fn mark_done_with_retry(&self, inbox_id: i64) -> StatusUpdateOutcome {
        self.update_with_retry(inbox_id, Target::Done).await
    }

    /// Mark a job FAILED (or DEAD once the attempt limit is reached),
    /// applying the backoff ladder.
    pub async fn mark_failed_with_retry(
        &self,
        inbox_id: i64,
        error_message: &str,
        attempt_count: Option<i32>,
    ) -> StatusUpdateOutcome {
        self.update_with_retry(
            inbox_id,
            Target::Failed {
                error_message,
                attempt_count,
            },
        )
        .await
    }

    async fn update_with_retry(&self, inbox_id: i64, target: Target<'_>) -> StatusUpdateOutcome {
        let target_name = match target {
            Target::Done => "DONE",
            Target::Failed { .. } => "FAILED",
        };
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.max_retries {
            // Fresh connection per attempt: a broken one never poisons the
            // next try
            match self.try_once(inbox_id, &target).await {
                Ok(true) => {
                    tracing::info!(
                        inbox_id,
                        status = target_name,
                        attempts = attempt,
                        "Status update succeeded"
                    );
                    return StatusUpdateOutcome {
                        success: true,
                        attempts: attempt,
                        error: None,
                    };
                }
                Ok(false) => {
                    return StatusUpdateOutcome {
                        success: false,
                        attempts: attempt,
                        error: Some(format!("Inbox row {inbox_id} not found")),
                    };
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    if attempt < self.max_retries {
                        let wait = Duration::from_secs(2u64.pow(attempt - 1));
                        tracing::warn!(
                            inbox_id,
                            status = target_name,
                            attempt,
                            max = self.max_retries,
                            wait_secs = wait.as_secs(),
                            error = %e,
                            "Status update failed, retrying"
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        tracing::error!(
            inbox_id,
            status = target_name,
            attempts = self.max_retries,
            error = last_error.as_deref().unwrap_or("unknown"),
            "CRITICAL: status update failed after all retries; row may sit in PROCESSING \
             until the stale-lock reclaimer resets it"
        );

        StatusUpdateOutcome {
            success: false,
            attempts: self.max_retries,
            error: last_error,
        }
    }

    async fn try_once(
        &self,
        inbox_id: i64,
        target: &Target<'_>,
    ) -> Result<bool, crate::data::postgres::PostgresError> {
        let mut conn = self.pool.acquire().await?;

        match target {
            Target::Done => inbox::mark_done(&mut conn, inbox_id).await,
            Target::Failed {
                error_message,
                attempt_count,
            } => {
                let attempt_count = match attempt_count {
                    Some(count) => *count,
                    None => match inbox::fetch_attempt_count(&mut conn, inbox_id).await? {
                        Some(count) => count,
                        None => return Ok(false),
                    },
                };
                inbox::mark_failed(
                    &mut conn,
                    inbox_id,
                    error_message,
                    attempt_count,
                    self.max_attempts,
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // Retry behavior against a live database is covered by integration
    // tests; the backoff ladder itself is tested in the inbox repository.
}
