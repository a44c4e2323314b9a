//! Document repository
//!
//! Exactly one consolidated document exists per case (unique index on
//! case_id). Stage results are committed column-by-column so a crash
//! between stages leaves a resumable checkpoint.

use sqlx::PgConnection;

use crate::core::constants::EXTERNAL_DOCUMENT_ID_PREFIX;
use crate::data::postgres::PostgresError;
use crate::data::types::{DocumentRow, FieldBundle, OcrMetadata, PagesMetadata, PartType, StageStatus};

const DOCUMENT_COLUMNS: &str = "document_id, case_id, external_id, file_name, \
     consolidated_blob_path, processing_path, file_size_bytes, page_count, \
     pages_metadata, ocr_metadata, extracted_fields, updated_extracted_fields, \
     split_status, ocr_status, coversheet_page_number, part_type, needs_manual_review";

pub async fn get_by_case_id(
    conn: &mut PgConnection,
    case_id: i64,
) -> Result<Option<DocumentRow>, PostgresError> {
    let row: Option<DocumentRow> = sqlx::query_as(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM service_ops.case_documents WHERE case_id = $1"
    ))
    .bind(case_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn get_by_id(
    conn: &mut PgConnection,
    document_id: i64,
) -> Result<Option<DocumentRow>, PostgresError> {
    let row: Option<DocumentRow> = sqlx::query_as(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM service_ops.case_documents WHERE document_id = $1"
    ))
    .bind(document_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

async fn free_external_id(
    conn: &mut PgConnection,
    case_id: i64,
) -> Result<String, PostgresError> {
    // Deterministic DOC-<case_id>; the counter suffix only appears when old
    // data already claimed the plain id.
    let base = format!("{EXTERNAL_DOCUMENT_ID_PREFIX}-{case_id}");
    let mut candidate = base.clone();
    let mut counter = 1;
    loop {
        let taken: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM service_ops.case_documents WHERE external_id = $1")
                .bind(&candidate)
                .fetch_optional(&mut *conn)
                .await?;
        if taken.is_none() {
            return Ok(candidate);
        }
        tracing::warn!(external_id = %candidate, "Document external_id collision, widening");
        candidate = format!("{base}-{counter}");
        counter += 1;
    }
}

/// Get the consolidated document for a case or create it with both stages
/// at NOT_STARTED. Returns `(document, created)`.
pub async fn get_or_create_consolidated(
    conn: &mut PgConnection,
    case_id: i64,
) -> Result<(DocumentRow, bool), PostgresError> {
    if let Some(existing) = get_by_case_id(conn, case_id).await? {
        return Ok((existing, false));
    }

    let external_id = free_external_id(conn, case_id).await?;
    let file_name = format!("packet_{case_id}.pdf");

    let row: DocumentRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO service_ops.case_documents (case_id, external_id, file_name)
        VALUES ($1, $2, $3)
        RETURNING {DOCUMENT_COLUMNS}
        "#
    ))
    .bind(case_id)
    .bind(&external_id)
    .bind(&file_name)
    .fetch_one(conn)
    .await?;

    tracing::info!(
        document_id = row.document_id,
        external_id = %external_id,
        case_id,
        "Created consolidated document"
    );
    Ok((row, true))
}

/// Create (or reuse) the document for a payload with no documents: both
/// stages SKIPPED and a MISSING_DOCUMENTS field bundle.
pub async fn get_or_create_skipped(
    conn: &mut PgConnection,
    case_id: i64,
    extracted_fields: &FieldBundle,
) -> Result<(DocumentRow, bool), PostgresError> {
    if let Some(existing) = get_by_case_id(conn, case_id).await? {
        return Ok((existing, false));
    }

    let external_id = free_external_id(conn, case_id).await?;
    let fields_json = serde_json::to_value(extracted_fields)
        .map_err(|e| PostgresError::Conflict(format!("extracted_fields serialization: {e}")))?;

    let row: DocumentRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO service_ops.case_documents (
            case_id,
            external_id,
            file_name,
            split_status,
            ocr_status,
            extracted_fields,
            updated_extracted_fields
        )
        VALUES ($1, $2, 'no_documents.pdf', 'SKIPPED', 'SKIPPED', $3, $3)
        RETURNING {DOCUMENT_COLUMNS}
        "#
    ))
    .bind(case_id)
    .bind(&external_id)
    .bind(&fields_json)
    .fetch_one(conn)
    .await?;

    tracing::info!(
        document_id = row.document_id,
        case_id,
        "Created document with empty state (no payload documents)"
    );
    Ok((row, true))
}

/// Reset stage statuses so an existing document is rebuilt from scratch
/// (REPLACE policy on reprocessing).
pub async fn reset_for_rebuild(
    conn: &mut PgConnection,
    document_id: i64,
) -> Result<(), PostgresError> {
    sqlx::query(
        "UPDATE service_ops.case_documents
         SET split_status = 'NOT_STARTED', ocr_status = 'NOT_STARTED', updated_at = NOW()
         WHERE document_id = $1",
    )
    .bind(document_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Stage B checkpoint: the consolidated artifact exists in blob storage.
pub async fn set_consolidated(
    conn: &mut PgConnection,
    document_id: i64,
    consolidated_blob_path: &str,
    file_name: &str,
    file_size_bytes: i64,
    processing_path: &str,
) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        UPDATE service_ops.case_documents
        SET
            consolidated_blob_path = $2,
            file_name = $3,
            file_size_bytes = $4,
            processing_path = $5,
            updated_at = NOW()
        WHERE document_id = $1
        "#,
    )
    .bind(document_id)
    .bind(consolidated_blob_path)
    .bind(file_name)
    .bind(file_size_bytes)
    .bind(processing_path)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_stage_status(
    conn: &mut PgConnection,
    document_id: i64,
    stage: Stage,
    status: StageStatus,
) -> Result<(), PostgresError> {
    let column = match stage {
        Stage::Split => "split_status",
        Stage::Ocr => "ocr_status",
    };
    sqlx::query(&format!(
        "UPDATE service_ops.case_documents SET {column} = $2, updated_at = NOW() WHERE document_id = $1"
    ))
    .bind(document_id)
    .bind(status.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub enum Stage {
    Split,
    Ocr,
}

/// Stage C checkpoint: page artifacts uploaded and described.
pub async fn set_pages(
    conn: &mut PgConnection,
    document_id: i64,
    page_count: i32,
    pages_metadata: &PagesMetadata,
) -> Result<(), PostgresError> {
    let pages_json = serde_json::to_value(pages_metadata)
        .map_err(|e| PostgresError::Conflict(format!("pages_metadata serialization: {e}")))?;

    sqlx::query(
        r#"
        UPDATE service_ops.case_documents
        SET
            page_count = $2,
            pages_metadata = $3,
            split_status = 'DONE',
            updated_at = NOW()
        WHERE document_id = $1
        "#,
    )
    .bind(document_id)
    .bind(page_count)
    .bind(&pages_json)
    .execute(conn)
    .await?;
    Ok(())
}

/// Stage D checkpoint: extraction results for the whole document.
///
/// `extracted_fields` is the immutable baseline; the working copy starts
/// identical and is the one later edits touch.
#[allow(clippy::too_many_arguments)]
pub async fn set_extraction_results(
    conn: &mut PgConnection,
    document_id: i64,
    ocr_metadata: &OcrMetadata,
    pages_metadata: Option<&PagesMetadata>,
    coversheet_page_number: Option<i32>,
    part_type: PartType,
    baseline: &FieldBundle,
    working: &FieldBundle,
    needs_manual_review: bool,
) -> Result<(), PostgresError> {
    let ocr_json = serde_json::to_value(ocr_metadata)
        .map_err(|e| PostgresError::Conflict(format!("ocr_metadata serialization: {e}")))?;
    let baseline_json = serde_json::to_value(baseline)
        .map_err(|e| PostgresError::Conflict(format!("extracted_fields serialization: {e}")))?;
    let working_json = serde_json::to_value(working)
        .map_err(|e| PostgresError::Conflict(format!("updated_extracted_fields serialization: {e}")))?;
    let pages_json = pages_metadata
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| PostgresError::Conflict(format!("pages_metadata serialization: {e}")))?;

    sqlx::query(
        r#"
        UPDATE service_ops.case_documents
        SET
            ocr_metadata = $2,
            pages_metadata = COALESCE($3, pages_metadata),
            coversheet_page_number = $4,
            part_type = $5,
            extracted_fields = $6,
            updated_extracted_fields = $7,
            ocr_status = 'DONE',
            needs_manual_review = $8,
            updated_at = NOW()
        WHERE document_id = $1
        "#,
    )
    .bind(document_id)
    .bind(&ocr_json)
    .bind(&pages_json)
    .bind(coversheet_page_number)
    .bind(part_type.as_str())
    .bind(&baseline_json)
    .bind(&working_json)
    .bind(needs_manual_review)
    .execute(conn)
    .await?;
    Ok(())
}
