//! Channel processing strategies
//!
//! Each intake channel sources its extracted fields differently:
//!
//! | Channel | OCR | Field source | Coversheet | Part type |
//! |---|---|---|---|---|
//! | ESMD | yes | OCR | detected by OCR | classified from OCR |
//! | Fax | yes | OCR | detected by OCR | classified from OCR |
//! | Portal | no | `payload.ocr.fields` | none | payload or classifier |
//!
//! The set is closed, so this is a sealed enum rather than a trait object.

use thiserror::Error;

use crate::data::types::{
    ChannelType, FieldBundle, PartType, SOURCE_PAYLOAD_INITIAL,
};

use super::fields::normalize_fields;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0:?} extracts fields via OCR, not from the payload")]
    OcrChannel(ChannelType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStrategy {
    Esmd,
    Fax,
    Portal,
}

impl ChannelStrategy {
    pub fn for_channel(channel: ChannelType) -> Self {
        match channel {
            ChannelType::Portal => Self::Portal,
            ChannelType::Fax => Self::Fax,
            ChannelType::Esmd => Self::Esmd,
        }
    }

    /// Whether field extraction goes through the OCR service.
    pub fn runs_ocr(&self) -> bool {
        !matches!(self, Self::Portal)
    }

    /// Extract a normalized field bundle from `payload.ocr` (Portal only).
    pub fn extract_fields_from_payload(
        &self,
        payload: &serde_json::Value,
    ) -> Result<FieldBundle, ChannelError> {
        match self {
            Self::Esmd => Err(ChannelError::OcrChannel(ChannelType::Esmd)),
            Self::Fax => Err(ChannelError::OcrChannel(ChannelType::Fax)),
            Self::Portal => extract_portal_fields(payload),
        }
    }

    /// Coversheet page number when it does not come from OCR.
    ///
    /// Portal submissions are entered through a UI and have no physical
    /// coversheet page.
    pub fn coversheet_page_number(&self) -> Option<i32> {
        match self {
            Self::Portal => None,
            // OCR channels detect the coversheet during Stage D
            Self::Esmd | Self::Fax => Some(1),
        }
    }

    /// Part type for channels that can answer without OCR (Portal only;
    /// OCR channels classify from the chosen coversheet page).
    pub fn part_type_from_payload(&self, payload: &serde_json::Value) -> PartType {
        match self {
            Self::Esmd | Self::Fax => PartType::Unknown,
            Self::Portal => portal_part_type(payload),
        }
    }
}

fn extract_portal_fields(payload: &serde_json::Value) -> Result<FieldBundle, ChannelError> {
    let ocr = payload
        .get("ocr")
        .filter(|v| v.is_object())
        .ok_or_else(|| {
            ChannelError::InvalidPayload(
                "Portal payload missing 'ocr' object or it is not an object".to_string(),
            )
        })?;

    let raw_fields = ocr.get("fields").filter(|v| v.is_object()).ok_or_else(|| {
        ChannelError::InvalidPayload(
            "Portal payload missing 'ocr.fields' object or it is not an object".to_string(),
        )
    })?;
    if raw_fields.as_object().is_some_and(|m| m.is_empty()) {
        return Err(ChannelError::InvalidPayload(
            "Portal payload 'ocr.fields' is empty".to_string(),
        ));
    }

    let fields = normalize_fields(raw_fields);

    Ok(FieldBundle {
        fields,
        coversheet_type: ocr
            .get("coversheet_type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        doc_type: ocr
            .get("doc_type")
            .and_then(|v| v.as_str())
            .unwrap_or("coversheet-extraction")
            .to_string(),
        overall_document_confidence: ocr
            .get("overall_document_confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0),
        duration_ms: 0,
        page_number: None,
        raw: ocr.clone(),
        source: SOURCE_PAYLOAD_INITIAL.to_string(),
    })
}

fn portal_part_type(payload: &serde_json::Value) -> PartType {
    let Some(ocr) = payload.get("ocr").filter(|v| v.is_object()) else {
        return PartType::Unknown;
    };

    // Direct part_type field wins when it is a recognized value
    let direct = ocr
        .get("part_type")
        .or_else(|| ocr.get("partType"))
        .and_then(|v| v.as_str());
    if let Some(raw) = direct
        && let Some(part) = PartType::parse(raw.trim().to_uppercase().as_str())
    {
        return part;
    }

    // Fallback: classify from coversheet_type / title text
    let coversheet_type = ocr.get("coversheet_type").and_then(|v| v.as_str());
    let title = ocr
        .get("fields")
        .and_then(|f| f.get("title"))
        .and_then(|t| t.get("value"))
        .and_then(|v| v.as_str());

    classify_part_type(coversheet_type, title)
}

/// Classify Medicare Part A vs Part B from coversheet text.
///
/// The candidate string is `coversheet_type` when present, else the title
/// field. Matching is on lowercase text with collapsed whitespace; when
/// both markers appear, Part A wins (documented tie-break).
pub fn classify_part_type(coversheet_type: Option<&str>, title: Option<&str>) -> PartType {
    let candidate = match coversheet_type.filter(|s| !s.trim().is_empty()) {
        Some(s) => s,
        None => match title.filter(|s| !s.trim().is_empty()) {
            Some(s) => s,
            None => {
                tracing::warn!("No coversheet_type or title found, returning UNKNOWN");
                return PartType::Unknown;
            }
        },
    };

    let normalized = candidate
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let has_part_a = normalized.contains("medicare part a");
    let has_part_b = normalized.contains("medicare part b");

    match (has_part_a, has_part_b) {
        (true, true) => {
            let preview: String = candidate.chars().take(100).collect();
            tracing::warn!(
                text = %preview,
                "Both Part A and Part B markers found, preferring PART_A"
            );
            PartType::PartA
        }
        (true, false) => PartType::PartA,
        (false, true) => PartType::PartB,
        (false, false) => PartType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            ChannelStrategy::for_channel(ChannelType::from_id(Some(1))),
            ChannelStrategy::Portal
        );
        assert_eq!(
            ChannelStrategy::for_channel(ChannelType::from_id(None)),
            ChannelStrategy::Esmd
        );
        assert!(ChannelStrategy::Esmd.runs_ocr());
        assert!(ChannelStrategy::Fax.runs_ocr());
        assert!(!ChannelStrategy::Portal.runs_ocr());
    }

    #[test]
    fn test_portal_has_no_coversheet_page() {
        assert_eq!(ChannelStrategy::Portal.coversheet_page_number(), None);
    }

    #[test]
    fn test_portal_field_extraction() {
        let payload = json!({
            "ocr": {
                "fields": {
                    "Beneficiary First Name": {
                        "value": "ALICE",
                        "confidence": 1,
                        "field_type": "DocumentFieldType.STRING"
                    }
                },
                "coversheet_type": "Prior Authorization Request for Medicare Part B Services",
                "overall_document_confidence": 0.999
            }
        });

        let bundle = ChannelStrategy::Portal
            .extract_fields_from_payload(&payload)
            .unwrap();
        assert_eq!(bundle.source, "PAYLOAD_INITIAL");
        assert_eq!(bundle.fields["Beneficiary First Name"].value, "ALICE");
        assert_eq!(bundle.fields["Beneficiary First Name"].confidence, 1.0);
        assert_eq!(bundle.fields["Beneficiary First Name"].field_type, "STRING");
        assert_eq!(bundle.overall_document_confidence, 0.999);
    }

    #[test]
    fn test_portal_missing_ocr_is_invalid() {
        let err = ChannelStrategy::Portal
            .extract_fields_from_payload(&json!({"documents": []}))
            .unwrap_err();
        assert!(err.to_string().contains("'ocr'"));

        let err = ChannelStrategy::Portal
            .extract_fields_from_payload(&json!({"ocr": {"doc_type": "x"}}))
            .unwrap_err();
        assert!(err.to_string().contains("ocr.fields"));
    }

    #[test]
    fn test_esmd_rejects_payload_extraction() {
        assert!(
            ChannelStrategy::Esmd
                .extract_fields_from_payload(&json!({}))
                .is_err()
        );
    }

    #[test]
    fn test_portal_part_type_verbatim_from_payload() {
        let payload = json!({"ocr": {"fields": {}, "part_type": "PART_A"}});
        assert_eq!(
            ChannelStrategy::Portal.part_type_from_payload(&payload),
            PartType::PartA
        );
        // Unrecognized direct values fall through to the classifier
        let payload = json!({"ocr": {"fields": {}, "part_type": "PART_C"}});
        assert_eq!(
            ChannelStrategy::Portal.part_type_from_payload(&payload),
            PartType::Unknown
        );
    }

    #[test]
    fn test_portal_part_type_via_classifier() {
        let payload = json!({
            "ocr": {
                "fields": {},
                "coversheet_type": "Prior Authorization Request for Medicare Part B Services"
            }
        });
        assert_eq!(
            ChannelStrategy::Portal.part_type_from_payload(&payload),
            PartType::PartB
        );
    }

    #[test]
    fn test_classify_part_type() {
        assert_eq!(
            classify_part_type(Some("Medicare Part A Services"), None),
            PartType::PartA
        );
        assert_eq!(
            classify_part_type(Some("MEDICARE   PART\tB"), None),
            PartType::PartB
        );
        assert_eq!(classify_part_type(Some("something else"), None), PartType::Unknown);
        assert_eq!(classify_part_type(None, None), PartType::Unknown);
    }

    #[test]
    fn test_classify_part_type_title_fallback() {
        assert_eq!(
            classify_part_type(Some("  "), Some("Request for medicare part b")),
            PartType::PartB
        );
    }

    #[test]
    fn test_classify_part_type_tie_break_prefers_a() {
        assert_eq!(
            classify_part_type(Some("Medicare Part A and Medicare Part B"), None),
            PartType::PartA
        );
    }
}
