//! Deterministic blob path derivation
//!
//! Storage layout (date-partitioned):
//!
//! ```text
//! service_ops_processing/
//!   YYYY/
//!     MM-DD/
//!       {decision_tracking_id}/
//!         packet_{case_id}.pdf
//!         packet_{case_id}_pages/
//!           packet_{case_id}_page_0001.pdf
//!           ...
//! ```
//!
//! Paths are pure functions of (decision_tracking_id, case_id, date), so a
//! resumed run regenerates exactly the paths the crashed run used.

use chrono::{DateTime, Datelike, Utc};

use crate::core::constants::PROCESSING_ROOT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedPaths {
    pub processing_root: String,
    pub consolidated_pdf: String,
    pub pages_prefix: String,
}

pub fn build_consolidated_paths(
    decision_tracking_id: &str,
    case_id: i64,
    dt_utc: DateTime<Utc>,
) -> ConsolidatedPaths {
    let processing_root = format!(
        "{}/{}/{:02}-{:02}/{}",
        PROCESSING_ROOT,
        dt_utc.year(),
        dt_utc.month(),
        dt_utc.day(),
        decision_tracking_id
    );
    let consolidated_pdf = format!("{processing_root}/packet_{case_id}.pdf");
    let pages_prefix = format!("{processing_root}/packet_{case_id}_pages");

    ConsolidatedPaths {
        processing_root,
        consolidated_pdf,
        pages_prefix,
    }
}

pub fn build_page_blob_path(pages_prefix: &str, case_id: i64, page_number: i32) -> String {
    format!("{pages_prefix}/packet_{case_id}_page_{page_number:04}.pdf")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::parse_iso_timestamp;

    #[test]
    fn test_build_consolidated_paths() {
        let dt = parse_iso_timestamp("2026-01-02T12:00:00Z").unwrap();
        let paths =
            build_consolidated_paths("978d15a7-9c3b-41de-86f2-7a87d858f57c", 12345, dt);

        assert_eq!(
            paths.processing_root,
            "service_ops_processing/2026/01-02/978d15a7-9c3b-41de-86f2-7a87d858f57c"
        );
        assert_eq!(
            paths.consolidated_pdf,
            "service_ops_processing/2026/01-02/978d15a7-9c3b-41de-86f2-7a87d858f57c/packet_12345.pdf"
        );
        assert_eq!(
            paths.pages_prefix,
            "service_ops_processing/2026/01-02/978d15a7-9c3b-41de-86f2-7a87d858f57c/packet_12345_pages"
        );
    }

    #[test]
    fn test_page_path_is_zero_padded() {
        let dt = parse_iso_timestamp("2026-11-30T23:59:59Z").unwrap();
        let paths = build_consolidated_paths("d1", 7, dt);
        assert_eq!(
            build_page_blob_path(&paths.pages_prefix, 7, 1),
            "service_ops_processing/2026/11-30/d1/packet_7_pages/packet_7_page_0001.pdf"
        );
        assert_eq!(
            build_page_blob_path(&paths.pages_prefix, 7, 123),
            "service_ops_processing/2026/11-30/d1/packet_7_pages/packet_7_page_0123.pdf"
        );
    }

    #[test]
    fn test_month_day_zero_padding() {
        let dt = parse_iso_timestamp("2026-03-05T00:00:00Z").unwrap();
        let paths = build_consolidated_paths("d1", 1, dt);
        assert!(paths.processing_root.contains("/2026/03-05/"));
    }
}
