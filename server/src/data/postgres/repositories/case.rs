//! Case repository
//!
//! At most one case exists per decision_tracking_id, enforced by a unique
//! index rather than any application-level lock. Creation goes through an
//! insert-or-reuse protocol that is safe under concurrent workers.

use chrono::{DateTime, Datelike, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::core::constants::EXTERNAL_CASE_ID_PREFIX;
use crate::data::postgres::PostgresError;
use crate::data::types::CaseRow;

const CASE_COLUMNS: &str = "case_id, external_id, decision_tracking_id, channel_specific_id, \
     beneficiary_name, beneficiary_mbi, provider_name, provider_npi, \
     received_date, due_date, submission_type, channel_type_id, detailed_status, tracking_number";

/// Attributes for a case that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewCase {
    pub decision_tracking_id: Uuid,
    pub channel_specific_id: Option<String>,
    pub received_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub channel_type_id: Option<i16>,
}

/// Column updates produced by the extraction sync. `None` leaves the
/// column untouched.
#[derive(Debug, Clone, Default)]
pub struct CaseFieldSync {
    pub beneficiary_name: Option<String>,
    pub beneficiary_mbi: Option<String>,
    pub provider_name: Option<String>,
    pub provider_npi: Option<String>,
    pub submission_type: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

impl CaseFieldSync {
    pub fn is_empty(&self) -> bool {
        self.beneficiary_name.is_none()
            && self.beneficiary_mbi.is_none()
            && self.provider_name.is_none()
            && self.provider_npi.is_none()
            && self.submission_type.is_none()
            && self.due_date.is_none()
    }
}

pub async fn get_by_decision_tracking_id(
    conn: &mut PgConnection,
    decision_tracking_id: Uuid,
) -> Result<Option<CaseRow>, PostgresError> {
    let row: Option<CaseRow> = sqlx::query_as(&format!(
        "SELECT {CASE_COLUMNS} FROM service_ops.cases WHERE decision_tracking_id = $1"
    ))
    .bind(decision_tracking_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn get_by_id(
    conn: &mut PgConnection,
    case_id: i64,
) -> Result<Option<CaseRow>, PostgresError> {
    let row: Option<CaseRow> = sqlx::query_as(&format!(
        "SELECT {CASE_COLUMNS} FROM service_ops.cases WHERE case_id = $1"
    ))
    .bind(case_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Candidate external id: `SVC-<year>-<suffix>` where the suffix is built
/// from the tail digits of the unix timestamp plus microsecond digits.
/// Widths widen 7 -> 8 -> 9 -> 10 as collision retries accumulate.
pub fn external_id_candidate(now: DateTime<Utc>, retry: u32) -> String {
    let digit_count = match retry {
        0..=10 => 7usize,
        11..=30 => 8,
        31..=60 => 9,
        _ => 10,
    };

    let ts = now.timestamp().max(0).to_string();
    let ts_tail = &ts[ts.len().saturating_sub(6)..];
    let micros = format!("{:06}", now.timestamp_subsec_micros());
    let micro_digits = digit_count.saturating_sub(ts_tail.len()).min(micros.len());
    let micro_tail = &micros[micros.len() - micro_digits..];

    format!(
        "{}-{}-{}{}",
        EXTERNAL_CASE_ID_PREFIX,
        now.year(),
        ts_tail,
        micro_tail
    )
}

async fn external_id_taken(
    conn: &mut PgConnection,
    external_id: &str,
) -> Result<bool, PostgresError> {
    let exists: Option<i32> =
        sqlx::query_scalar("SELECT 1 FROM service_ops.cases WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(conn)
            .await?;
    Ok(exists.is_some())
}

/// Get the existing case for a decision tracking id or create it.
///
/// Returns `(case, created)`. The race between the initial lookup and the
/// insert is closed by the unique index: a conflicting insert returns no
/// row and the case created by the other worker is re-fetched.
pub async fn get_or_create(
    conn: &mut PgConnection,
    new_case: &NewCase,
) -> Result<(CaseRow, bool), PostgresError> {
    if let Some(existing) = get_by_decision_tracking_id(conn, new_case.decision_tracking_id).await?
    {
        tracing::info!(
            case_id = existing.case_id,
            external_id = %existing.external_id,
            decision_tracking_id = %new_case.decision_tracking_id,
            "Reusing existing case"
        );
        return Ok((existing, false));
    }

    let mut external_id = external_id_candidate(Utc::now(), 0);
    let max_retries = 100u32;
    let mut retry = 0u32;
    while external_id_taken(conn, &external_id).await? {
        retry += 1;
        if retry >= max_retries {
            return Err(PostgresError::Conflict(format!(
                "Failed to generate unique case external_id after {max_retries} attempts \
                 for decision_tracking_id={}",
                new_case.decision_tracking_id
            )));
        }
        external_id = external_id_candidate(Utc::now(), retry);
    }

    let inserted: Option<CaseRow> = sqlx::query_as(&format!(
        r#"
        INSERT INTO service_ops.cases (
            external_id,
            decision_tracking_id,
            channel_specific_id,
            received_date,
            due_date,
            channel_type_id
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (decision_tracking_id) DO NOTHING
        RETURNING {CASE_COLUMNS}
        "#
    ))
    .bind(&external_id)
    .bind(new_case.decision_tracking_id)
    .bind(&new_case.channel_specific_id)
    .bind(new_case.received_date)
    .bind(new_case.due_date)
    .bind(new_case.channel_type_id)
    .fetch_optional(&mut *conn)
    .await?;

    match inserted {
        Some(case) => {
            tracing::info!(
                case_id = case.case_id,
                external_id = %case.external_id,
                decision_tracking_id = %new_case.decision_tracking_id,
                "Created new case"
            );
            Ok((case, true))
        }
        None => {
            // Another worker inserted between our lookup and insert
            let existing = get_by_decision_tracking_id(conn, new_case.decision_tracking_id)
                .await?
                .ok_or_else(|| {
                    PostgresError::Conflict(format!(
                        "Case insert conflicted but no row found for decision_tracking_id={}",
                        new_case.decision_tracking_id
                    ))
                })?;
            tracing::info!(
                case_id = existing.case_id,
                external_id = %existing.external_id,
                decision_tracking_id = %new_case.decision_tracking_id,
                "Reusing case created concurrently by another worker"
            );
            Ok((existing, false))
        }
    }
}

/// Apply extraction-derived column updates in one statement. Columns with
/// `None` keep their current value.
pub async fn apply_field_sync(
    conn: &mut PgConnection,
    case_id: i64,
    sync: &CaseFieldSync,
) -> Result<(), PostgresError> {
    if sync.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE service_ops.cases
        SET
            beneficiary_name = COALESCE($2, beneficiary_name),
            beneficiary_mbi = COALESCE($3, beneficiary_mbi),
            provider_name = COALESCE($4, provider_name),
            provider_npi = COALESCE($5, provider_npi),
            submission_type = COALESCE($6, submission_type),
            due_date = COALESCE($7, due_date),
            updated_at = NOW()
        WHERE case_id = $1
        "#,
    )
    .bind(case_id)
    .bind(&sync.beneficiary_name)
    .bind(&sync.beneficiary_mbi)
    .bind(&sync.provider_name)
    .bind(&sync.provider_npi)
    .bind(&sync.submission_type)
    .bind(sync.due_date)
    .execute(conn)
    .await?;

    Ok(())
}

/// Record a successful acknowledgment: store the tracking number and move
/// the detailed status forward. Returns false when no case exists yet.
pub async fn record_ack(
    conn: &mut PgConnection,
    decision_tracking_id: Uuid,
    tracking_number: Option<&str>,
    detailed_status: &str,
) -> Result<bool, PostgresError> {
    let result = sqlx::query(
        r#"
        UPDATE service_ops.cases
        SET
            tracking_number = COALESCE($2, tracking_number),
            detailed_status = $3,
            updated_at = NOW()
        WHERE decision_tracking_id = $1
        "#,
    )
    .bind(decision_tracking_id)
    .bind(tracking_number)
    .bind(detailed_status)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}
