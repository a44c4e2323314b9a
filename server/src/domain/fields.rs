//! Field normalization and case column extraction
//!
//! Upstream field bundles arrive in several dialects: OCR output, Portal
//! payloads with integer confidences and `DocumentFieldType.` enum tags,
//! and hand-entered values with stray whitespace. Everything is funneled
//! through one normalized shape before persistence.

use std::collections::BTreeMap;

use crate::data::types::{FieldValue, SubmissionType};

const FIELD_TYPE_PREFIX: &str = "DocumentFieldType.";
const DEFAULT_FIELD_TYPE: &str = "STRING";

/// Normalize a raw `fields` object into the canonical map.
///
/// - object entries keep their value/confidence/field_type, coerced to
///   string/float/stripped-enum respectively;
/// - scalar entries become `{value, confidence: 1.0, field_type: STRING}`;
/// - duplicate names (after trimming) keep the first occurrence.
pub fn normalize_fields(raw: &serde_json::Value) -> BTreeMap<String, FieldValue> {
    let mut normalized = BTreeMap::new();

    let Some(map) = raw.as_object() else {
        return normalized;
    };

    for (name, value) in map {
        let key = name.trim().to_string();
        if key.is_empty() {
            continue;
        }
        if normalized.contains_key(&key) {
            tracing::debug!(field = %key, "Duplicate field name after trimming, keeping first");
            continue;
        }
        normalized.insert(key, normalize_field_value(value));
    }

    normalized
}

fn normalize_field_value(value: &serde_json::Value) -> FieldValue {
    match value.as_object() {
        Some(obj) => {
            let raw_value = match obj.get("value") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            let confidence = obj
                .get("confidence")
                .and_then(|c| c.as_f64())
                .unwrap_or(0.0);
            let field_type = obj
                .get("field_type")
                .and_then(|t| t.as_str())
                .map(normalize_field_type)
                .unwrap_or_else(|| DEFAULT_FIELD_TYPE.to_string());

            FieldValue {
                value: raw_value,
                confidence,
                field_type,
            }
        }
        None => FieldValue {
            value: scalar_to_string(value),
            confidence: 1.0,
            field_type: DEFAULT_FIELD_TYPE.to_string(),
        },
    }
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Strip the `DocumentFieldType.` enum prefix Portal payloads carry.
pub fn normalize_field_type(field_type: &str) -> String {
    let stripped = field_type.trim();
    let stripped = stripped.strip_prefix(FIELD_TYPE_PREFIX).unwrap_or(stripped);
    if stripped.is_empty() {
        DEFAULT_FIELD_TYPE.to_string()
    } else {
        stripped.to_string()
    }
}

/// Silent formatting fixes applied to the working copy only. Returns the
/// names of fields that changed.
pub fn apply_auto_fix(fields: &mut BTreeMap<String, FieldValue>) -> Vec<String> {
    let mut fixed = Vec::new();
    for (name, field) in fields.iter_mut() {
        let cleaned = collapse_whitespace(field.value.trim());
        let cleaned_type = normalize_field_type(&field.field_type);
        if cleaned != field.value || cleaned_type != field.field_type {
            field.value = cleaned;
            field.field_type = cleaned_type;
            fixed.push(name.clone());
        }
    }
    fixed
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map a raw submission type onto the SLA classification by prefix match.
/// Unrecognized values return `None` and are left for manual review.
pub fn normalize_submission_type(raw: &str) -> Option<SubmissionType> {
    let value = raw.trim().to_lowercase();
    if value.is_empty() {
        return None;
    }

    const EXPEDITED: [&str; 4] = ["expedited", "expedite", "urgent", "rush"];
    const STANDARD: [&str; 4] = ["standard", "normal", "routine", "regular"];

    if EXPEDITED.iter().any(|k| value.starts_with(k)) {
        Some(SubmissionType::Expedited)
    } else if STANDARD.iter().any(|k| value.starts_with(k)) {
        Some(SubmissionType::Standard)
    } else {
        None
    }
}

/// Normalize an NPI to 10 digits.
///
/// A 9-digit NPI gets a leading zero (a common OCR truncation); anything
/// else is rejected so the case column stays at its TBD sentinel for
/// manual review.
pub fn normalize_npi(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 => Some(digits),
        9 => {
            tracing::info!(raw, "Padding 9-digit NPI with a leading zero");
            Some(format!("0{digits}"))
        }
        _ => None,
    }
}

/// Find the first non-empty value among a list of alias field names.
pub fn extract_field(fields: &BTreeMap<String, FieldValue>, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        if let Some(field) = fields.get(*alias) {
            let trimmed = field.value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

// Alias lists mirror what the extraction templates actually emit, most
// specific names first.

pub const BENEFICIARY_FIRST_NAME_ALIASES: &[&str] = &[
    "Beneficiary First Name",
    "beneficiaryFirstName",
    "beneficiary_first_name",
    "Patient First Name",
    "patientFirstName",
    "patient_first_name",
    "Member First Name",
    "First Name",
    "firstName",
    "first_name",
];

pub const BENEFICIARY_LAST_NAME_ALIASES: &[&str] = &[
    "Beneficiary Last Name",
    "beneficiaryLastName",
    "beneficiary_last_name",
    "Patient Last Name",
    "patientLastName",
    "patient_last_name",
    "Member Last Name",
    "Last Name",
    "lastName",
    "last_name",
];

pub const BENEFICIARY_FULL_NAME_ALIASES: &[&str] = &[
    "Beneficiary Name",
    "beneficiaryName",
    "beneficiary_name",
    "Patient Name",
    "patientName",
    "patient_name",
    "Member Name",
    "Full Name",
    "fullName",
    "full_name",
];

pub const BENEFICIARY_MBI_ALIASES: &[&str] = &[
    "Beneficiary Medicare ID",
    "Medicare ID",
    "medicareId",
    "MBI",
    "mbi",
    "Beneficiary MBI",
    "beneficiaryMbi",
    "Medicare Beneficiary Identifier",
    "Medicare Number",
    "medicareNumber",
    "HICN",
    "hicn",
];

pub const FACILITY_NAME_ALIASES: &[&str] = &[
    "Facility Provider Name",
    "Facility Name",
    "facilityName",
    "facility_name",
    "Organization Name",
    "organizationName",
    "Practice Name",
    "practiceName",
];

pub const PHYSICIAN_NAME_ALIASES: &[&str] = &[
    "Attending Physician Name",
    "Physician Name",
    "physicianName",
    "physician_name",
    "Ordering/Referring Physician Name",
    "Ordering Physician Name",
    "Referring Physician Name",
    "Attending Physician",
];

pub const PROVIDER_NAME_ALIASES: &[&str] = &[
    "Provider Name",
    "providerName",
    "provider_name",
    "Rendering Provider Name",
    "Billing Provider Name",
];

pub const FACILITY_NPI_ALIASES: &[&str] = &[
    "Facility Provider NPI",
    "Facility NPI",
    "facilityNpi",
    "facility_npi",
    "Organization NPI",
    "organizationNpi",
];

pub const PHYSICIAN_NPI_ALIASES: &[&str] = &[
    "Attending Physician NPI",
    "Physician NPI",
    "physicianNpi",
    "physician_npi",
    "Ordering/Referring Physician NPI",
    "Ordering Physician NPI",
    "Referring Physician NPI",
];

pub const PROVIDER_NPI_ALIASES: &[&str] = &[
    "Provider NPI",
    "providerNpi",
    "provider_npi",
    "Rendering Provider NPI",
    "Billing Provider NPI",
    "NPI",
    "npi",
];

pub const SUBMISSION_TYPE_ALIASES: &[&str] = &[
    "Submission Type",
    "submissionType",
    "submission_type",
    "Priority",
    "priority",
];

pub const SUBMITTED_DATE_FIELD: &str = "Submitted Date";

/// Beneficiary name: first + last when both are present, else a full-name
/// field.
pub fn extract_beneficiary_name(fields: &BTreeMap<String, FieldValue>) -> Option<String> {
    let first = extract_field(fields, BENEFICIARY_FIRST_NAME_ALIASES);
    let last = extract_field(fields, BENEFICIARY_LAST_NAME_ALIASES);
    match (first, last) {
        (Some(f), Some(l)) => Some(format!("{f} {l}").trim().to_string()),
        _ => extract_field(fields, BENEFICIARY_FULL_NAME_ALIASES),
    }
}

/// Provider name: facility wins over physician, generic names last.
pub fn extract_provider_name(fields: &BTreeMap<String, FieldValue>) -> Option<String> {
    extract_field(fields, FACILITY_NAME_ALIASES)
        .or_else(|| extract_field(fields, PHYSICIAN_NAME_ALIASES))
        .or_else(|| extract_field(fields, PROVIDER_NAME_ALIASES))
}

/// Provider NPI: the attending physician NPI is usually the full 10 digits,
/// so it wins over the facility NPI.
pub fn extract_provider_npi(fields: &BTreeMap<String, FieldValue>) -> Option<String> {
    extract_field(fields, PHYSICIAN_NPI_ALIASES)
        .or_else(|| extract_field(fields, FACILITY_NPI_ALIASES))
        .or_else(|| extract_field(fields, PROVIDER_NPI_ALIASES))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(value: &str) -> FieldValue {
        FieldValue {
            value: value.to_string(),
            confidence: 1.0,
            field_type: "STRING".to_string(),
        }
    }

    #[test]
    fn test_normalize_fields_strips_enum_prefix() {
        let raw = json!({
            "Beneficiary First Name": {
                "value": "ALICE",
                "confidence": 1,
                "field_type": "DocumentFieldType.STRING"
            }
        });
        let fields = normalize_fields(&raw);
        let f = &fields["Beneficiary First Name"];
        assert_eq!(f.value, "ALICE");
        assert_eq!(f.confidence, 1.0);
        assert_eq!(f.field_type, "STRING");
    }

    #[test]
    fn test_normalize_fields_scalar_entries() {
        let raw = json!({"Title": "Prior Auth", "Pages": 3});
        let fields = normalize_fields(&raw);
        assert_eq!(fields["Title"].value, "Prior Auth");
        assert_eq!(fields["Title"].confidence, 1.0);
        assert_eq!(fields["Pages"].value, "3");
    }

    #[test]
    fn test_normalize_fields_dedupes_trimmed_names() {
        let raw = json!({"Name": {"value": "first"}, " Name ": {"value": "second"}});
        let fields = normalize_fields(&raw);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["Name"].value, "first");
    }

    #[test]
    fn test_auto_fix_trims_and_collapses() {
        let mut fields = BTreeMap::from([
            ("A".to_string(), field("  spaced   out  ")),
            ("B".to_string(), field("clean")),
        ]);
        let fixed = apply_auto_fix(&mut fields);
        assert_eq!(fixed, vec!["A".to_string()]);
        assert_eq!(fields["A"].value, "spaced out");
        assert_eq!(fields["B"].value, "clean");
    }

    #[test]
    fn test_submission_type_prefix_matching() {
        assert_eq!(
            normalize_submission_type("expedited-initial"),
            Some(SubmissionType::Expedited)
        );
        assert_eq!(
            normalize_submission_type("URGENT review"),
            Some(SubmissionType::Expedited)
        );
        assert_eq!(
            normalize_submission_type("standard-initial"),
            Some(SubmissionType::Standard)
        );
        assert_eq!(
            normalize_submission_type("Routine"),
            Some(SubmissionType::Standard)
        );
        assert_eq!(normalize_submission_type("whenever"), None);
        assert_eq!(normalize_submission_type(""), None);
    }

    #[test]
    fn test_normalize_npi() {
        assert_eq!(normalize_npi("1234567890"), Some("1234567890".to_string()));
        assert_eq!(normalize_npi("123-456-789"), Some("0123456789".to_string()));
        assert_eq!(normalize_npi("12345"), None);
        assert_eq!(normalize_npi("not an npi"), None);
    }

    #[test]
    fn test_extract_beneficiary_name_prefers_split_names() {
        let fields = BTreeMap::from([
            ("Beneficiary First Name".to_string(), field("ALICE")),
            ("Beneficiary Last Name".to_string(), field("SMITH")),
            ("Beneficiary Name".to_string(), field("WRONG PERSON")),
        ]);
        assert_eq!(
            extract_beneficiary_name(&fields),
            Some("ALICE SMITH".to_string())
        );
    }

    #[test]
    fn test_extract_beneficiary_name_falls_back_to_full() {
        let fields = BTreeMap::from([("Patient Name".to_string(), field("BOB JONES"))]);
        assert_eq!(
            extract_beneficiary_name(&fields),
            Some("BOB JONES".to_string())
        );
    }

    #[test]
    fn test_extract_provider_npi_prefers_physician() {
        let fields = BTreeMap::from([
            ("Facility Provider NPI".to_string(), field("999999999")),
            ("Attending Physician NPI".to_string(), field("1234567890")),
        ]);
        assert_eq!(
            extract_provider_npi(&fields),
            Some("1234567890".to_string())
        );
    }

    #[test]
    fn test_extract_field_skips_empty_values() {
        let fields = BTreeMap::from([
            ("Submission Type".to_string(), field("   ")),
            ("Priority".to_string(), field("expedited")),
        ]);
        assert_eq!(
            extract_field(&fields, SUBMISSION_TYPE_ALIASES),
            Some("expedited".to_string())
        );
    }
}
