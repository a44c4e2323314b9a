//! Typed view of the upstream message payload
//!
//! The source payload is a schemaless nested object. It is deserialized
//! once at the pipeline boundary into `ParsedPayload`; anything this core
//! does not name stays available through the retained raw value.

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Invalid payload: {0}")]
    Invalid(String),
}

/// One document reference inside the payload's `documents` array.
#[derive(Debug, Clone, Deserialize)]
pub struct PayloadDocument {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default, alias = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(alias = "sourceAbsoluteUrl")]
    pub source_absolute_url: String,
    #[serde(default, alias = "fileSize")]
    pub file_size: Option<i64>,
    #[serde(default, alias = "documentUniqueIdentifier")]
    pub document_unique_identifier: Option<String>,
}

impl PayloadDocument {
    pub fn display_name(&self) -> &str {
        self.file_name
            .as_deref()
            .or(self.document_unique_identifier.as_deref())
            .unwrap_or("(unnamed)")
    }

    pub fn mime_type_or_pdf(&self) -> &str {
        self.mime_type.as_deref().unwrap_or("application/pdf")
    }
}

/// `payload.submission_metadata` (ESMD and Fax intake).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmissionMetadata {
    #[serde(default, alias = "creationTime")]
    pub creation_time: Option<String>,
    #[serde(default, alias = "esmdTransactionId")]
    pub esmd_transaction_id: Option<String>,
}

/// Parsed intake payload with explicit optional fields.
#[derive(Debug, Clone)]
pub struct ParsedPayload {
    pub message_type: Option<String>,
    pub decision_tracking_id: String,
    pub documents: Vec<PayloadDocument>,
    pub submission_metadata: Option<SubmissionMetadata>,
    /// `payload.ocr`, kept raw; the Portal channel strategy interprets it.
    pub ocr: Option<serde_json::Value>,
    /// Portal's own packet identifier (`PKT-YYYY-NNNNNN`).
    pub packet_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default, alias = "messageType")]
    message_type: Option<String>,
    #[serde(default)]
    decision_tracking_id: Option<String>,
    #[serde(default)]
    documents: Option<Vec<PayloadDocument>>,
    #[serde(default)]
    submission_metadata: Option<SubmissionMetadata>,
    #[serde(default)]
    ocr: Option<serde_json::Value>,
    #[serde(default)]
    packet_id: Option<String>,
}

impl ParsedPayload {
    /// Parse and validate an intake payload.
    ///
    /// Fails fast when the payload is not an object or carries no
    /// `decision_tracking_id`. An absent or empty `documents` array is
    /// valid (the zero-documents path creates a SKIPPED document).
    pub fn parse(payload: &serde_json::Value) -> Result<Self, PayloadError> {
        if !payload.is_object() {
            return Err(PayloadError::Invalid("payload is not an object".into()));
        }

        let raw: RawPayload = serde_json::from_value(payload.clone())
            .map_err(|e| PayloadError::Invalid(e.to_string()))?;

        let decision_tracking_id = raw
            .decision_tracking_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| PayloadError::Invalid("missing decision_tracking_id".into()))?;

        Ok(Self {
            message_type: raw.message_type,
            decision_tracking_id,
            documents: raw.documents.unwrap_or_default(),
            submission_metadata: raw.submission_metadata,
            ocr: raw.ocr,
            packet_id: raw.packet_id,
        })
    }

    pub fn esmd_transaction_id(&self) -> Option<&str> {
        self.submission_metadata
            .as_ref()
            .and_then(|m| m.esmd_transaction_id.as_deref())
    }

    pub fn has_documents(&self) -> bool {
        !self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_intake_payload() {
        let payload = json!({
            "message_type": "ingest_file_package",
            "decision_tracking_id": "978d15a7-9c3b-41de-86f2-7a87d858f57c",
            "documents": [
                {
                    "file_name": "coversheet.pdf",
                    "mime_type": "application/pdf",
                    "source_absolute_url": "incoming/coversheet.pdf",
                    "file_size": 1024
                }
            ],
            "submission_metadata": {
                "creationTime": "2026-01-06T14:25:33Z",
                "esmdTransactionId": "ESMD-0042"
            }
        });

        let parsed = ParsedPayload::parse(&payload).unwrap();
        assert_eq!(
            parsed.decision_tracking_id,
            "978d15a7-9c3b-41de-86f2-7a87d858f57c"
        );
        assert_eq!(parsed.documents.len(), 1);
        assert_eq!(parsed.documents[0].mime_type_or_pdf(), "application/pdf");
        assert_eq!(parsed.esmd_transaction_id(), Some("ESMD-0042"));
    }

    #[test]
    fn test_parse_missing_decision_tracking_id() {
        let payload = json!({"documents": []});
        let err = ParsedPayload::parse(&payload).unwrap_err();
        assert!(err.to_string().contains("decision_tracking_id"));
    }

    #[test]
    fn test_parse_non_object_payload() {
        assert!(ParsedPayload::parse(&json!("nope")).is_err());
        assert!(ParsedPayload::parse(&json!(null)).is_err());
    }

    #[test]
    fn test_parse_absent_documents_is_valid() {
        let payload = json!({"decision_tracking_id": "d1"});
        let parsed = ParsedPayload::parse(&payload).unwrap();
        assert!(!parsed.has_documents());
    }

    #[test]
    fn test_parse_camel_case_aliases() {
        let payload = json!({
            "decision_tracking_id": "d1",
            "documents": [
                {"sourceAbsoluteUrl": "a/b.pdf", "mimeType": "APPLICATION/PDF"}
            ]
        });
        let parsed = ParsedPayload::parse(&payload).unwrap();
        assert_eq!(parsed.documents[0].source_absolute_url, "a/b.pdf");
        assert_eq!(parsed.documents[0].mime_type_or_pdf(), "APPLICATION/PDF");
    }
}
