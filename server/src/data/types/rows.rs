//! Row types mirroring the PostgreSQL tables

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::enums::{PartType, StageStatus};

/// One row of the upstream source table. Read-only; upstream owns writes.
#[derive(Debug, Clone, FromRow)]
pub struct SourceMessage {
    pub message_id: i64,
    pub decision_tracking_id: Uuid,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub channel_type_id: Option<i16>,
    pub message_type_id: Option<i16>,
}

/// An inbox row claimed for processing by one worker.
#[derive(Debug, Clone, FromRow)]
pub struct ClaimedJob {
    pub inbox_id: i64,
    pub message_id: i64,
    pub decision_tracking_id: Uuid,
    pub message_type: String,
    pub source_created_at: DateTime<Utc>,
    pub attempt_count: i32,
    pub channel_type_id: Option<i16>,
    pub message_type_id: Option<i16>,
}

/// Polling high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct Watermark {
    pub last_created_at: DateTime<Utc>,
    pub last_message_id: i64,
}

impl Watermark {
    /// Epoch default used before the watermark row exists.
    pub fn epoch() -> Self {
        Self {
            last_created_at: DateTime::UNIX_EPOCH,
            last_message_id: 0,
        }
    }

    /// Element-wise max under the lexicographic `(created_at, message_id)`
    /// order.
    pub fn advance(&mut self, created_at: DateTime<Utc>, message_id: i64) {
        if created_at > self.last_created_at {
            self.last_created_at = created_at;
            self.last_message_id = message_id;
        } else if created_at == self.last_created_at && message_id > self.last_message_id {
            self.last_message_id = message_id;
        }
    }
}

/// The per-correlation case aggregate.
#[derive(Debug, Clone, FromRow)]
pub struct CaseRow {
    pub case_id: i64,
    pub external_id: String,
    pub decision_tracking_id: Uuid,
    pub channel_specific_id: Option<String>,
    pub beneficiary_name: String,
    pub beneficiary_mbi: String,
    pub provider_name: String,
    pub provider_npi: String,
    pub received_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub submission_type: Option<String>,
    pub channel_type_id: Option<i16>,
    pub detailed_status: String,
    pub tracking_number: Option<String>,
}

/// The single consolidated document artifact of a case.
///
/// JSONB columns are carried as raw values; readers validate shape
/// explicitly because a crash can leave partial writes behind.
#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub document_id: i64,
    pub case_id: i64,
    pub external_id: String,
    pub file_name: String,
    pub consolidated_blob_path: Option<String>,
    pub processing_path: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub page_count: i32,
    pub pages_metadata: Option<serde_json::Value>,
    pub ocr_metadata: Option<serde_json::Value>,
    pub extracted_fields: Option<serde_json::Value>,
    pub updated_extracted_fields: Option<serde_json::Value>,
    pub split_status: String,
    pub ocr_status: String,
    pub coversheet_page_number: Option<i32>,
    pub part_type: Option<String>,
    pub needs_manual_review: bool,
}

impl DocumentRow {
    pub fn split_status(&self) -> StageStatus {
        StageStatus::parse(&self.split_status)
    }

    pub fn ocr_status(&self) -> StageStatus {
        StageStatus::parse(&self.ocr_status)
    }

    pub fn part_type(&self) -> Option<PartType> {
        self.part_type.as_deref().and_then(PartType::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::parse_iso_timestamp;

    #[test]
    fn test_watermark_advance_is_monotonic() {
        let t1 = parse_iso_timestamp("2026-01-01T00:00:00Z").unwrap();
        let t2 = parse_iso_timestamp("2026-01-02T00:00:00Z").unwrap();

        let mut wm = Watermark::epoch();
        wm.advance(t2, 5);
        assert_eq!(wm.last_message_id, 5);

        // Older timestamp never moves the mark backwards
        wm.advance(t1, 100);
        assert_eq!(wm.last_created_at, t2);
        assert_eq!(wm.last_message_id, 5);

        // Same timestamp, larger id advances the id only
        wm.advance(t2, 9);
        assert_eq!(wm.last_message_id, 9);
        wm.advance(t2, 3);
        assert_eq!(wm.last_message_id, 9);
    }

    #[test]
    fn test_document_row_status_accessors() {
        let doc = DocumentRow {
            document_id: 1,
            case_id: 1,
            external_id: "DOC-1".into(),
            file_name: "packet_1.pdf".into(),
            consolidated_blob_path: None,
            processing_path: None,
            file_size_bytes: None,
            page_count: 0,
            pages_metadata: None,
            ocr_metadata: None,
            extracted_fields: None,
            updated_extracted_fields: None,
            split_status: "DONE".into(),
            ocr_status: "bogus".into(),
            coversheet_page_number: None,
            part_type: Some("PART_B".into()),
            needs_manual_review: false,
        };
        assert_eq!(doc.split_status(), StageStatus::Done);
        assert_eq!(doc.ocr_status(), StageStatus::NotStarted);
        assert_eq!(doc.part_type(), Some(PartType::PartB));
    }
}
