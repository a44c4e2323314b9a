//! Acknowledgment message handlers
//!
//! Upstream sends ack messages after forwarding a submission: ack-success
//! carries the assigned tracking number, ack-fail carries the failure
//! reason. Both update the existing case in one transaction. A missing
//! case is an error so inbox backoff retries the ack after the intake
//! message lands.

use sqlx::PgPool;
use thiserror::Error;

use crate::core::constants::{DETAILED_STATUS_ACK_FAILED, DETAILED_STATUS_ACKNOWLEDGED};
use crate::data::postgres::PostgresError;
use crate::data::postgres::repositories::case;
use crate::data::types::SourceMessage;

#[derive(Error, Debug)]
pub enum AckError {
    #[error("No case found for decision_tracking_id {0} (intake may not have been processed yet)")]
    CaseNotFound(uuid::Uuid),

    #[error(transparent)]
    Database(#[from] PostgresError),
}

/// Extract the tracking number from an ack payload.
fn tracking_number(payload: &serde_json::Value) -> Option<&str> {
    ["utn", "tracking_number", "unique_tracking_number"]
        .iter()
        .find_map(|key| payload.get(key).and_then(|v| v.as_str()))
        .filter(|s| !s.trim().is_empty())
}

fn failure_reason(payload: &serde_json::Value) -> Option<&str> {
    ["error", "failure_reason", "reason"]
        .iter()
        .find_map(|key| payload.get(key).and_then(|v| v.as_str()))
        .filter(|s| !s.trim().is_empty())
}

/// Handle an ack-success message: store the tracking number and advance the
/// detailed status.
pub async fn process_ack_success(pool: &PgPool, message: &SourceMessage) -> Result<(), AckError> {
    let tracking = tracking_number(&message.payload);
    if tracking.is_none() {
        tracing::warn!(
            message_id = message.message_id,
            "Ack-success payload carries no tracking number"
        );
    }

    let mut tx = pool.begin().await.map_err(PostgresError::from)?;
    let updated = case::record_ack(
        &mut tx,
        message.decision_tracking_id,
        tracking,
        DETAILED_STATUS_ACKNOWLEDGED,
    )
    .await?;
    if !updated {
        return Err(AckError::CaseNotFound(message.decision_tracking_id));
    }
    tx.commit().await.map_err(PostgresError::from)?;

    tracing::info!(
        message_id = message.message_id,
        decision_tracking_id = %message.decision_tracking_id,
        tracking_number = tracking.unwrap_or("(none)"),
        "Processed ack-success"
    );
    Ok(())
}

/// Handle an ack-fail message: record the failure on the case.
pub async fn process_ack_fail(pool: &PgPool, message: &SourceMessage) -> Result<(), AckError> {
    let reason = failure_reason(&message.payload);

    let mut tx = pool.begin().await.map_err(PostgresError::from)?;
    let updated = case::record_ack(
        &mut tx,
        message.decision_tracking_id,
        None,
        DETAILED_STATUS_ACK_FAILED,
    )
    .await?;
    if !updated {
        return Err(AckError::CaseNotFound(message.decision_tracking_id));
    }
    tx.commit().await.map_err(PostgresError::from)?;

    tracing::warn!(
        message_id = message.message_id,
        decision_tracking_id = %message.decision_tracking_id,
        reason = reason.unwrap_or("(none)"),
        "Processed ack-fail"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tracking_number_aliases() {
        assert_eq!(
            tracking_number(&json!({"utn": "UTN-123"})),
            Some("UTN-123")
        );
        assert_eq!(
            tracking_number(&json!({"tracking_number": "T-9"})),
            Some("T-9")
        );
        assert_eq!(tracking_number(&json!({"utn": "  "})), None);
        assert_eq!(tracking_number(&json!({})), None);
    }

    #[test]
    fn test_failure_reason_aliases() {
        assert_eq!(
            failure_reason(&json!({"error": "bad submission"})),
            Some("bad submission")
        );
        assert_eq!(
            failure_reason(&json!({"failure_reason": "rejected"})),
            Some("rejected")
        );
        assert_eq!(failure_reason(&json!({})), None);
    }
}
