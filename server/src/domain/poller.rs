//! Inbox poller and worker loop
//!
//! One tick does the full drain sequence: poll the upstream source table
//! past the watermark, insert new inbox rows (idempotent), advance the
//! watermark, then claim and process jobs one at a time. Every N ticks the
//! stuck-job reclaimer sweeps. All workers may run this loop concurrently;
//! claim_one's skip-locked semantics keep them from colliding.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::config::AppConfig;
use crate::core::constants::{MAX_JOBS_PER_TICK, RECLAIMER_EVERY_TICKS};
use crate::data::PostgresService;
use crate::data::postgres::repositories::inbox;
use crate::data::types::{ClaimedJob, MessageType, SourceMessage};

use super::acks;
use super::processor::DocumentProcessor;
use super::reclaimer::Reclaimer;
use super::status::StatusWriter;

pub struct PollerService {
    db: Arc<PostgresService>,
    processor: Arc<DocumentProcessor>,
    status_writer: StatusWriter,
    reclaimer: Reclaimer,
    config: Arc<AppConfig>,
    worker_id: String,
}

impl PollerService {
    pub fn new(
        db: Arc<PostgresService>,
        processor: Arc<DocumentProcessor>,
        status_writer: StatusWriter,
        reclaimer: Reclaimer,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            processor,
            status_writer,
            reclaimer,
            config,
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }

    /// Spawn the polling loop as a background task.
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval_secs = self.config.poller.interval_seconds.max(1);
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut ticks_until_reclaim = RECLAIMER_EVERY_TICKS;

            tracing::info!(
                interval_seconds = interval_secs,
                batch_size = self.config.poller.batch_size,
                worker_id = %self.worker_id,
                "Message poller started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Message poller shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        self.poll_and_process(&shutdown_rx).await;

                        ticks_until_reclaim -= 1;
                        if ticks_until_reclaim == 0 {
                            ticks_until_reclaim = RECLAIMER_EVERY_TICKS;
                            let stats = self.reclaimer.detect_and_recover().await;
                            if stats.detected > 0 {
                                tracing::info!(
                                    detected = stats.detected,
                                    reset_to_new = stats.reset_to_new,
                                    marked_failed = stats.marked_failed,
                                    "Stuck job reclaimer run"
                                );
                            }
                        }
                    }
                }
            }
        })
    }

    async fn poll_and_process(&self, shutdown_rx: &watch::Receiver<bool>) {
        let threshold = self.config.backpressure.pool_critical_threshold;
        self.db.log_pool_status(threshold);

        let batch_size = effective_batch_size(
            self.db.utilization(),
            threshold,
            self.config.poller.batch_size,
        );

        if let Err(e) = self.drain_new_messages(batch_size).await {
            tracing::error!(error = %e, "Error polling source messages");
        }

        self.process_claimed_jobs(batch_size, shutdown_rx).await;
    }

    /// Poll the source table past the watermark and insert inbox rows.
    async fn drain_new_messages(
        &self,
        batch_size: i64,
    ) -> Result<(), crate::data::postgres::PostgresError> {
        let pool = self.db.pool();
        let mut watermark = inbox::get_watermark(pool).await?;
        let messages = inbox::poll_new(pool, &watermark, batch_size).await?;

        if messages.is_empty() {
            tracing::debug!("No new source messages");
            return Ok(());
        }
        tracing::info!(count = messages.len(), "Found new source message(s)");

        let mut inserted = 0;
        for message in &messages {
            let message_type = infer_message_type(&message.payload, message.message_type_id);
            let inbox_id = inbox::insert_new(
                pool,
                message.message_id,
                message.decision_tracking_id,
                &message_type,
                message.created_at,
                message.channel_type_id,
                message.message_type_id,
            )
            .await?;

            if let Some(inbox_id) = inbox_id {
                inserted += 1;
                tracing::info!(
                    inbox_id,
                    message_id = message.message_id,
                    %message_type,
                    "Inserted message into inbox"
                );
            }

            // The watermark advances over duplicates too; the unique index
            // on message_id makes re-seeing the batch safe
            watermark.advance(message.created_at, message.message_id);
        }

        inbox::update_watermark(pool, watermark.last_created_at, watermark.last_message_id).await?;
        tracing::debug!(
            last_created_at = %watermark.last_created_at,
            last_message_id = watermark.last_message_id,
            inserted,
            "Watermark advanced"
        );
        Ok(())
    }

    /// Claim and process jobs, one at a time, up to the per-tick cap.
    async fn process_claimed_jobs(&self, batch_size: i64, shutdown_rx: &watch::Receiver<bool>) {
        let max_jobs = (batch_size.max(1) as usize).min(MAX_JOBS_PER_TICK);
        let pool = self.db.pool();

        for iteration in 0..max_jobs {
            if *shutdown_rx.borrow() {
                tracing::debug!("Shutdown triggered, stopping job processing");
                break;
            }

            let job = match inbox::claim_one(
                pool,
                &self.worker_id,
                self.config.inbox.stale_lock_minutes,
            )
            .await
            {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Error claiming job");
                    break;
                }
            };

            tracing::info!(
                inbox_id = job.inbox_id,
                message_id = job.message_id,
                attempt = job.attempt_count,
                "Claimed job"
            );

            self.run_job(&job).await;

            // Yield connections between jobs so interactive requests are
            // not starved during a long drain
            if iteration + 1 < max_jobs {
                let delay = self.config.poller.inter_job_delay_seconds.max(0.0);
                if delay > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
            }
        }
    }

    async fn run_job(&self, job: &ClaimedJob) {
        let pool = self.db.pool();

        let source = match inbox::get_source_message(pool, job.message_id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                let error = format!("Source message {} not found", job.message_id);
                tracing::error!(inbox_id = job.inbox_id, "{error}");
                self.status_writer
                    .mark_failed_with_retry(job.inbox_id, &error, Some(job.attempt_count))
                    .await;
                return;
            }
            Err(e) => {
                tracing::error!(inbox_id = job.inbox_id, error = %e, "Failed to load source message");
                self.status_writer
                    .mark_failed_with_retry(job.inbox_id, &e.to_string(), Some(job.attempt_count))
                    .await;
                return;
            }
        };

        match self.dispatch(&source, job).await {
            Ok(()) => {
                let outcome = self.status_writer.mark_done_with_retry(job.inbox_id).await;
                if outcome.success {
                    tracing::info!(inbox_id = job.inbox_id, "Job processed successfully");
                } else {
                    tracing::error!(
                        inbox_id = job.inbox_id,
                        attempts = outcome.attempts,
                        error = outcome.error.as_deref().unwrap_or("unknown"),
                        "Failed to mark job done"
                    );
                }
            }
            Err(error) => {
                tracing::error!(inbox_id = job.inbox_id, %error, "Job processing failed");
                self.status_writer
                    .mark_failed_with_retry(job.inbox_id, &error, Some(job.attempt_count))
                    .await;
            }
        }
    }

    /// Route the job by message type: intake runs the document pipeline,
    /// acks update the case directly.
    async fn dispatch(&self, message: &SourceMessage, job: &ClaimedJob) -> Result<(), String> {
        let message_type = MessageType::from_id(job.message_type_id.or(message.message_type_id));
        match message_type {
            MessageType::Intake => self
                .processor
                .process_message(message, job.inbox_id)
                .await
                .map_err(|e| e.to_string()),
            MessageType::AckSuccess => acks::process_ack_success(self.db.pool(), message)
                .await
                .map_err(|e| e.to_string()),
            MessageType::AckFail => acks::process_ack_fail(self.db.pool(), message)
                .await
                .map_err(|e| e.to_string()),
        }
    }
}

/// Shrink the poll batch to a single record while the pool is critical.
fn effective_batch_size(utilization: f64, critical_threshold: f64, configured: i64) -> i64 {
    if utilization >= critical_threshold {
        tracing::warn!(
            utilization = format!("{:.1}%", utilization * 100.0),
            "Connection pool critical, reducing batch size to 1"
        );
        1
    } else {
        configured.max(1)
    }
}

/// Message type label stored on the inbox row: the payload's own label
/// when present, else inferred from the type id.
fn infer_message_type(payload: &serde_json::Value, message_type_id: Option<i16>) -> String {
    if let Some(label) = payload
        .get("message_type")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
    {
        return label.to_string();
    }

    match MessageType::from_id(message_type_id) {
        MessageType::AckSuccess => "ack_success".to_string(),
        MessageType::AckFail => "ack_fail".to_string(),
        MessageType::Intake => "ingest_file_package".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_effective_batch_size_throttles_at_critical() {
        assert_eq!(effective_batch_size(0.96, 0.95, 7), 1);
        assert_eq!(effective_batch_size(0.95, 0.95, 7), 1);
        assert_eq!(effective_batch_size(0.5, 0.95, 7), 7);
        assert_eq!(effective_batch_size(0.0, 0.95, 0), 1);
    }

    #[test]
    fn test_infer_message_type_prefers_payload_label() {
        assert_eq!(
            infer_message_type(&json!({"message_type": "ingest_file_package"}), Some(2)),
            "ingest_file_package"
        );
    }

    #[test]
    fn test_infer_message_type_from_type_id() {
        assert_eq!(infer_message_type(&json!({}), None), "ingest_file_package");
        assert_eq!(infer_message_type(&json!({}), Some(1)), "ingest_file_package");
        assert_eq!(infer_message_type(&json!({}), Some(2)), "ack_success");
        assert_eq!(infer_message_type(&json!({}), Some(3)), "ack_fail");
        assert_eq!(
            infer_message_type(&json!({"message_type": "  "}), Some(3)),
            "ack_fail"
        );
    }
}
