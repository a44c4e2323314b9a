//! Coversheet detection
//!
//! When no page early-accepts during the OCR loop, the detector picks the
//! best candidate among the successfully processed pages: the page with the
//! most fields at or above the per-field confidence floor, ties broken by
//! overall document confidence, then by the lower page number.

use crate::domain::ocr::OcrResponse;

pub fn detect_coversheet_page(
    results: &[(i32, &OcrResponse)],
    confidence_threshold: f64,
) -> Option<i32> {
    let mut best: Option<(i32, usize, f64)> = None;

    for (page_number, response) in results {
        let qualified = response
            .field_confidences()
            .filter(|c| *c >= confidence_threshold)
            .count();
        if qualified == 0 {
            continue;
        }
        let confidence = response.overall_document_confidence;

        let better = match best {
            None => true,
            Some((best_page, best_count, best_conf)) => {
                qualified > best_count
                    || (qualified == best_count && confidence > best_conf)
                    || (qualified == best_count
                        && confidence == best_conf
                        && *page_number < best_page)
            }
        };
        if better {
            best = Some((*page_number, qualified, confidence));
        }
    }

    let chosen = best.map(|(page, _, _)| page);
    match chosen {
        Some(page) => tracing::info!(page, "Coversheet detected"),
        None => tracing::warn!("No page produced any confident field; coversheet unknown"),
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(confidence: f64, fields: serde_json::Value) -> OcrResponse {
        OcrResponse {
            fields,
            overall_document_confidence: confidence,
            duration_ms: 100,
            coversheet_type: String::new(),
            doc_type: String::new(),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_picks_page_with_most_confident_fields() {
        let page1 = response(
            0.9,
            json!({"A": {"value": "x", "confidence": 0.9}}),
        );
        let page2 = response(
            0.6,
            json!({
                "A": {"value": "x", "confidence": 0.8},
                "B": {"value": "y", "confidence": 0.8},
                "C": {"value": "z", "confidence": 0.2}
            }),
        );
        let results = vec![(1, &page1), (2, &page2)];
        assert_eq!(detect_coversheet_page(&results, 0.5), Some(2));
    }

    #[test]
    fn test_ties_break_on_confidence_then_page_number() {
        let page1 = response(0.7, json!({"A": {"value": "x", "confidence": 0.9}}));
        let page2 = response(0.9, json!({"A": {"value": "x", "confidence": 0.9}}));
        let results = vec![(1, &page1), (2, &page2)];
        assert_eq!(detect_coversheet_page(&results, 0.5), Some(2));

        let page3 = response(0.9, json!({"A": {"value": "x", "confidence": 0.9}}));
        let results = vec![(2, &page2), (3, &page3)];
        assert_eq!(detect_coversheet_page(&results, 0.5), Some(2));
    }

    #[test]
    fn test_no_confident_fields_returns_none() {
        let page1 = response(0.9, json!({"A": {"value": "x", "confidence": 0.1}}));
        let results = vec![(1, &page1)];
        assert_eq!(detect_coversheet_page(&results, 0.5), None);
        assert_eq!(detect_coversheet_page(&[], 0.5), None);
    }
}
