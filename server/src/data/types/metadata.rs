//! JSONB document shapes persisted on `case_documents`
//!
//! These are written as typed structs but read back leniently: resume logic
//! must survive partial or malformed writes, so readers go through
//! `serde_json::Value` and validate explicitly (see `domain::resume`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::enums::PartType;

pub const METADATA_VERSION: &str = "v1";

/// Field extraction source markers.
pub const SOURCE_OCR_INITIAL: &str = "OCR_INITIAL";
pub const SOURCE_PAYLOAD_INITIAL: &str = "PAYLOAD_INITIAL";
pub const SOURCE_MISSING_DOCUMENTS: &str = "MISSING_DOCUMENTS";

/// One extracted field: value, confidence and a normalized type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: String,
    pub confidence: f64,
    pub field_type: String,
}

/// A complete field bundle as stored in `extracted_fields` and
/// `updated_extracted_fields`.
///
/// `extracted_fields` is the immutable baseline; `updated_extracted_fields`
/// starts as a deep copy and is the only side that auto-fix touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldBundle {
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub coversheet_type: String,
    #[serde(default)]
    pub doc_type: String,
    #[serde(default)]
    pub overall_document_confidence: f64,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub page_number: Option<i32>,
    #[serde(default)]
    pub raw: serde_json::Value,
    pub source: String,
}

impl FieldBundle {
    /// Empty bundle carrying only a source marker. Used for the
    /// missing-documents and graceful-OCR-failure paths.
    pub fn empty(source: &str) -> Self {
        Self {
            fields: BTreeMap::new(),
            coversheet_type: String::new(),
            doc_type: String::new(),
            overall_document_confidence: 0.0,
            duration_ms: 0,
            page_number: None,
            raw: serde_json::Value::Null,
            source: source.to_string(),
        }
    }
}

/// Per-page entry of `pages_metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMetadata {
    pub page_number: i32,
    #[serde(default)]
    pub blob_path: String,
    #[serde(default)]
    pub relative_path: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub is_coversheet: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagesMetadata {
    pub version: String,
    pub pages: Vec<PageMetadata>,
}

impl PagesMetadata {
    pub fn new(pages: Vec<PageMetadata>) -> Self {
        Self {
            version: METADATA_VERSION.to_string(),
            pages,
        }
    }
}

/// Per-page entry of `ocr_metadata`. Every page that was in scope appears
/// here, whether it was processed, skipped or errored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrPageMetadata {
    pub page_number: i32,
    pub fields: serde_json::Value,
    pub overall_document_confidence: f64,
    pub duration_ms: i64,
    #[serde(default)]
    pub error: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrMetadata {
    pub version: String,
    pub pages: Vec<OcrPageMetadata>,
    pub coversheet_page_number: Option<i32>,
    pub part_type: PartType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_bundle_serializes_source_marker() {
        let bundle = FieldBundle::empty(SOURCE_OCR_INITIAL);
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["source"], "OCR_INITIAL");
        assert!(json["fields"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_field_bundle_lenient_deserialization() {
        // Only fields and source are required; everything else defaults.
        let json = serde_json::json!({
            "fields": {"Title": {"value": "x", "confidence": 0.9, "field_type": "STRING"}},
            "source": "PAYLOAD_INITIAL"
        });
        let bundle: FieldBundle = serde_json::from_value(json).unwrap();
        assert_eq!(bundle.fields.len(), 1);
        assert_eq!(bundle.overall_document_confidence, 0.0);
        assert!(bundle.page_number.is_none());
    }

    #[test]
    fn test_ocr_metadata_part_type_tag() {
        let meta = OcrMetadata {
            version: METADATA_VERSION.to_string(),
            pages: vec![],
            coversheet_page_number: Some(1),
            part_type: PartType::PartB,
            source: None,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["part_type"], "PART_B");
        assert!(json.get("source").is_none());
    }
}
