//! Resume planning
//!
//! Stage commits are non-atomic across transactions, so the planner derives
//! the pipeline entry point from the persisted column state alone. It never
//! trusts `split_status = DONE` on its own: pages_metadata is re-validated
//! against the shape a completed split must have, and a malformed value
//! sends the run back through the split stage.

use std::collections::BTreeMap;

use crate::data::types::{DocumentRow, StageStatus};

/// Where the pipeline resumes for an existing (case, document) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePoint {
    /// Extraction already completed; nothing to do.
    AlreadyDone,
    /// Pages exist and are valid; run extraction only.
    FromOcr,
    /// Consolidated artifact exists; split and continue.
    FromSplit,
    /// Aggregates exist but no artifact yet; merge and continue.
    FromMerge,
    /// No usable state; run everything.
    Beginning,
}

pub fn plan_resume(document: Option<&DocumentRow>) -> ResumePoint {
    let Some(doc) = document else {
        return ResumePoint::Beginning;
    };

    if doc.ocr_status() == StageStatus::Done {
        tracing::info!(document_id = doc.document_id, "Document already fully processed");
        return ResumePoint::AlreadyDone;
    }

    if doc.split_status() == StageStatus::Done {
        if pages_metadata_well_formed(doc.pages_metadata.as_ref()) {
            // Any non-DONE ocr_status resumes from OCR, including an
            // unexpected one left by a worker that died mid-stage.
            return ResumePoint::FromOcr;
        }
        tracing::warn!(
            document_id = doc.document_id,
            "split_status=DONE but pages_metadata is malformed; partial write detected, re-splitting"
        );
        return ResumePoint::FromSplit;
    }

    if doc.consolidated_blob_path.is_some() {
        return ResumePoint::FromSplit;
    }

    ResumePoint::FromMerge
}

/// A completed split must have a non-empty pages list where every entry
/// carries a positive integer page_number and a non-empty blob path.
pub fn pages_metadata_well_formed(pages_metadata: Option<&serde_json::Value>) -> bool {
    let Some(pages) = pages_metadata
        .and_then(|v| v.get("pages"))
        .and_then(|p| p.as_array())
    else {
        return false;
    };

    if pages.is_empty() {
        return false;
    }

    pages.iter().all(|page| {
        let page_number_ok = page
            .get("page_number")
            .and_then(|n| n.as_i64())
            .is_some_and(|n| n >= 1);
        let blob_path_ok = page
            .get("blob_path")
            .or_else(|| page.get("relative_path"))
            .and_then(|p| p.as_str())
            .is_some_and(|p| !p.trim().is_empty());
        page_number_ok && blob_path_ok
    })
}

/// Extract `page_number -> blob_path` from pages_metadata, skipping
/// entries without both.
pub fn page_blob_paths(pages_metadata: &serde_json::Value) -> BTreeMap<i32, String> {
    let mut result = BTreeMap::new();
    let Some(pages) = pages_metadata.get("pages").and_then(|p| p.as_array()) else {
        return result;
    };

    for page in pages {
        let page_number = page.get("page_number").and_then(|n| n.as_i64());
        let blob_path = page
            .get("blob_path")
            .or_else(|| page.get("relative_path"))
            .and_then(|p| p.as_str());
        if let (Some(n), Some(path)) = (page_number, blob_path)
            && n >= 1
            && !path.trim().is_empty()
        {
            result.insert(n as i32, path.to_string());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(
        split_status: &str,
        ocr_status: &str,
        consolidated: Option<&str>,
        pages_metadata: Option<serde_json::Value>,
    ) -> DocumentRow {
        DocumentRow {
            document_id: 10,
            case_id: 1,
            external_id: "DOC-1".into(),
            file_name: "packet_1.pdf".into(),
            consolidated_blob_path: consolidated.map(String::from),
            processing_path: None,
            file_size_bytes: None,
            page_count: 0,
            pages_metadata,
            ocr_metadata: None,
            extracted_fields: None,
            updated_extracted_fields: None,
            split_status: split_status.into(),
            ocr_status: ocr_status.into(),
            coversheet_page_number: None,
            part_type: None,
            needs_manual_review: false,
        }
    }

    fn valid_pages() -> serde_json::Value {
        json!({
            "version": "v1",
            "pages": [
                {"page_number": 1, "blob_path": "x/packet_1_page_0001.pdf"},
                {"page_number": 2, "blob_path": "x/packet_1_page_0002.pdf"}
            ]
        })
    }

    #[test]
    fn test_no_document_starts_from_beginning() {
        assert_eq!(plan_resume(None), ResumePoint::Beginning);
    }

    #[test]
    fn test_ocr_done_is_terminal() {
        let doc = document("DONE", "DONE", Some("x/packet_1.pdf"), Some(valid_pages()));
        assert_eq!(plan_resume(Some(&doc)), ResumePoint::AlreadyDone);
    }

    #[test]
    fn test_split_done_with_valid_pages_resumes_from_ocr() {
        for ocr_status in ["NOT_STARTED", "IN_PROGRESS", "FAILED", "whatever"] {
            let doc = document("DONE", ocr_status, Some("x/packet_1.pdf"), Some(valid_pages()));
            assert_eq!(plan_resume(Some(&doc)), ResumePoint::FromOcr, "{ocr_status}");
        }
    }

    #[test]
    fn test_split_done_with_empty_pages_resplits() {
        let doc = document(
            "DONE",
            "NOT_STARTED",
            Some("x/packet_1.pdf"),
            Some(json!({"version": "v1", "pages": []})),
        );
        assert_eq!(plan_resume(Some(&doc)), ResumePoint::FromSplit);
    }

    #[test]
    fn test_split_done_with_invalid_page_entries_resplits() {
        let bad_page_number = json!({"pages": [{"page_number": 0, "blob_path": "a.pdf"}]});
        let missing_blob = json!({"pages": [{"page_number": 1, "blob_path": "  "}]});
        let not_a_list = json!({"pages": "oops"});

        for meta in [bad_page_number, missing_blob, not_a_list] {
            let doc = document("DONE", "NOT_STARTED", Some("x/p.pdf"), Some(meta));
            assert_eq!(plan_resume(Some(&doc)), ResumePoint::FromSplit);
        }
    }

    #[test]
    fn test_relative_path_satisfies_well_formedness() {
        let meta = json!({"pages": [{"page_number": 1, "relative_path": "a.pdf"}]});
        let doc = document("DONE", "NOT_STARTED", Some("x/p.pdf"), Some(meta));
        assert_eq!(plan_resume(Some(&doc)), ResumePoint::FromOcr);
    }

    #[test]
    fn test_consolidated_blob_resumes_from_split() {
        let doc = document("NOT_STARTED", "NOT_STARTED", Some("x/packet_1.pdf"), None);
        assert_eq!(plan_resume(Some(&doc)), ResumePoint::FromSplit);
    }

    #[test]
    fn test_bare_document_resumes_from_merge() {
        let doc = document("NOT_STARTED", "NOT_STARTED", None, None);
        assert_eq!(plan_resume(Some(&doc)), ResumePoint::FromMerge);
    }

    #[test]
    fn test_page_blob_paths_sorted_and_filtered() {
        let meta = json!({
            "pages": [
                {"page_number": 2, "blob_path": "b.pdf"},
                {"page_number": 1, "relative_path": "a.pdf"},
                {"page_number": 0, "blob_path": "skip.pdf"},
                {"blob_path": "no-number.pdf"}
            ]
        });
        let paths = page_blob_paths(&meta);
        assert_eq!(
            paths.into_iter().collect::<Vec<_>>(),
            vec![(1, "a.pdf".to_string()), (2, "b.pdf".to_string())]
        );
    }
}
