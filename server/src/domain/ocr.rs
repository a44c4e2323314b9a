//! OCR client and the per-page extraction loop
//!
//! Pages are processed sequentially with a configurable inter-request
//! delay. Two guards bound the work: a hard cap on pages per document and
//! a total-attempts budget across the whole invocation (successful calls
//! consume budget too). A page whose confidence and field count clear the
//! coversheet thresholds early-accepts and stops the loop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::core::config::OcrConfig;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR request failed: {0}")]
    Request(String),

    #[error("OCR service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("OCR response decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Structured result for one page.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrResponse {
    #[serde(default)]
    pub fields: serde_json::Value,
    #[serde(default)]
    pub overall_document_confidence: f64,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub coversheet_type: String,
    #[serde(default)]
    pub doc_type: String,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl OcrResponse {
    pub fn field_count(&self) -> usize {
        self.fields.as_object().map_or(0, |m| m.len())
    }

    pub fn field_confidences(&self) -> impl Iterator<Item = f64> + '_ {
        self.fields
            .as_object()
            .into_iter()
            .flat_map(|m| m.values())
            .map(|f| f.get("confidence").and_then(|c| c.as_f64()).unwrap_or(0.0))
    }

    pub fn title_value(&self) -> Option<&str> {
        self.fields
            .get("title")
            .and_then(|t| t.get("value"))
            .and_then(|v| v.as_str())
    }
}

/// OCR seam used by the document pipeline.
#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Submit one per-page PDF and receive structured field results.
    async fn extract(&self, pdf_path: &Path) -> Result<OcrResponse, OcrError>;
}

/// HTTP adapter posting page PDFs to the OCR service.
pub struct HttpOcrClient {
    client: reqwest::Client,
    extract_url: String,
    max_retries: u32,
}

impl HttpOcrClient {
    pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| OcrError::Request(e.to_string()))?;

        Ok(Self {
            client,
            extract_url: format!("{}/extract", config.base_url.trim_end_matches('/')),
            max_retries: config.max_retries.max(1),
        })
    }

    async fn extract_once(&self, pdf_path: &Path) -> Result<OcrResponse, OcrError> {
        let bytes = tokio::fs::read(pdf_path).await?;
        let file_name = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page.pdf".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")
            .map_err(|e| OcrError::Request(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.extract_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| OcrError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        response
            .json::<OcrResponse>()
            .await
            .map_err(|e| OcrError::Decode(e.to_string()))
    }
}

#[async_trait]
impl OcrClient for HttpOcrClient {
    async fn extract(&self, pdf_path: &Path) -> Result<OcrResponse, OcrError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.extract_once(pdf_path).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempts < self.max_retries => {
                    let delay = Duration::from_secs(2u64.pow(attempts - 1).min(30));
                    tracing::warn!(
                        error = %e,
                        attempt = attempts,
                        delay_secs = delay.as_secs(),
                        "OCR request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// One page handed to the OCR loop.
#[derive(Debug, Clone)]
pub struct PageInput {
    pub page_number: i32,
    pub local_path: PathBuf,
}

#[derive(Debug)]
pub enum PageResult {
    Processed(OcrResponse),
    Error(String),
    Skipped { reason: String },
}

#[derive(Debug)]
pub struct PageOcrOutcome {
    pub page_number: i32,
    pub result: PageResult,
}

#[derive(Debug)]
pub struct OcrRunOutcome {
    /// One entry per input page, in page order.
    pub pages: Vec<PageOcrOutcome>,
    /// Page that early-accepted as the coversheet, if any.
    pub early_accept_page: Option<i32>,
    pub total_attempts: u32,
    /// True when the run produced zero successful pages; the caller then
    /// persists an empty baseline and flags the document for manual review.
    pub graceful_failure: bool,
}

impl OcrRunOutcome {
    pub fn processed(&self) -> impl Iterator<Item = (i32, &OcrResponse)> {
        self.pages.iter().filter_map(|p| match &p.result {
            PageResult::Processed(response) => Some((p.page_number, response)),
            _ => None,
        })
    }

    pub fn response_for(&self, page_number: i32) -> Option<&OcrResponse> {
        self.pages
            .iter()
            .find(|p| p.page_number == page_number)
            .and_then(|p| match &p.result {
                PageResult::Processed(response) => Some(response),
                _ => None,
            })
    }
}

/// Run OCR over the document's pages.
pub async fn run_ocr_pages(
    client: &dyn OcrClient,
    pages: &[PageInput],
    config: &OcrConfig,
) -> OcrRunOutcome {
    let cap = config.max_pages_per_doc.max(1);
    let in_scope = pages.len().min(cap);

    if pages.len() > cap {
        tracing::info!(
            total_pages = pages.len(),
            cap,
            "Limiting OCR to the first {cap} pages; the rest stay available for manual review"
        );
    }

    let mut outcomes: Vec<PageOcrOutcome> = Vec::with_capacity(pages.len());
    let mut total_attempts = 0u32;
    let mut successes = 0usize;
    let mut early_accept_page: Option<i32> = None;
    let mut stop_reason: Option<String> = None;

    let delay = Duration::from_secs_f64(config.delay_between_requests_seconds.max(0.0));

    for (idx, page) in pages[..in_scope].iter().enumerate() {
        if let Some(reason) = &stop_reason {
            outcomes.push(PageOcrOutcome {
                page_number: page.page_number,
                result: PageResult::Skipped {
                    reason: reason.clone(),
                },
            });
            continue;
        }

        if total_attempts >= config.total_attempts_budget {
            let reason = format!(
                "max total OCR attempts ({}) reached",
                config.total_attempts_budget
            );
            tracing::warn!(
                page = page.page_number,
                "{reason}; skipping remaining pages"
            );
            stop_reason = Some(reason.clone());
            outcomes.push(PageOcrOutcome {
                page_number: page.page_number,
                result: PageResult::Skipped { reason },
            });
            continue;
        }

        total_attempts += 1;
        tracing::info!(
            page = page.page_number,
            attempt = total_attempts,
            budget = config.total_attempts_budget,
            "Running OCR"
        );

        match client.extract(&page.local_path).await {
            Ok(response) => {
                let field_count = response.field_count();
                let confidence = response.overall_document_confidence;
                tracing::info!(
                    page = page.page_number,
                    fields = field_count,
                    confidence,
                    duration_ms = response.duration_ms,
                    "OCR completed"
                );

                let strong_candidate = config.stop_after_coversheet
                    && confidence >= config.coversheet_confidence_threshold
                    && field_count >= config.min_coversheet_fields;

                outcomes.push(PageOcrOutcome {
                    page_number: page.page_number,
                    result: PageResult::Processed(response),
                });
                successes += 1;

                if strong_candidate {
                    tracing::info!(
                        page = page.page_number,
                        confidence,
                        fields = field_count,
                        "Strong coversheet candidate found, stopping OCR early"
                    );
                    early_accept_page = Some(page.page_number);
                    stop_reason = Some(format!(
                        "early stop: coversheet found at page {}",
                        page.page_number
                    ));
                    continue;
                }
            }
            Err(e) => {
                tracing::error!(page = page.page_number, error = %e, "OCR failed for page");
                outcomes.push(PageOcrOutcome {
                    page_number: page.page_number,
                    result: PageResult::Error(e.to_string()),
                });
            }
        }

        if !delay.is_zero() && idx + 1 < in_scope && stop_reason.is_none() {
            tokio::time::sleep(delay).await;
        }
    }

    // Pages beyond the hard cap are always skipped
    for page in &pages[in_scope..] {
        let reason = stop_reason.clone().unwrap_or_else(|| {
            format!("exceeds max pages per document ({})", cap)
        });
        outcomes.push(PageOcrOutcome {
            page_number: page.page_number,
            result: PageResult::Skipped { reason },
        });
    }

    let budget_exhausted = total_attempts >= config.total_attempts_budget;
    let graceful_failure = successes == 0 && (budget_exhausted || !outcomes.is_empty());

    OcrRunOutcome {
        pages: outcomes,
        early_accept_page,
        total_attempts,
        graceful_failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedOcr {
        responses: Mutex<Vec<Result<OcrResponse, OcrError>>>,
    }

    impl ScriptedOcr {
        fn new(responses: Vec<Result<OcrResponse, OcrError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl OcrClient for ScriptedOcr {
        async fn extract(&self, _pdf_path: &Path) -> Result<OcrResponse, OcrError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(OcrError::Request("script exhausted".into()));
            }
            responses.remove(0)
        }
    }

    fn page(n: i32) -> PageInput {
        PageInput {
            page_number: n,
            local_path: PathBuf::from(format!("/tmp/page_{n:04}.pdf")),
        }
    }

    fn strong_response() -> OcrResponse {
        let fields: serde_json::Map<String, serde_json::Value> = (0..25)
            .map(|i| {
                (
                    format!("Field {i}"),
                    json!({"value": "x", "confidence": 0.9}),
                )
            })
            .collect();
        OcrResponse {
            fields: serde_json::Value::Object(fields),
            overall_document_confidence: 0.85,
            duration_ms: 120,
            coversheet_type: "Medicare Part A".into(),
            doc_type: "coversheet-extraction".into(),
            raw: serde_json::Value::Null,
        }
    }

    fn weak_response() -> OcrResponse {
        OcrResponse {
            fields: json!({"A": {"value": "x", "confidence": 0.4}}),
            overall_document_confidence: 0.3,
            duration_ms: 80,
            coversheet_type: String::new(),
            doc_type: String::new(),
            raw: serde_json::Value::Null,
        }
    }

    fn test_config() -> OcrConfig {
        OcrConfig {
            delay_between_requests_seconds: 0.0,
            ..OcrConfig::default()
        }
    }

    #[tokio::test]
    async fn test_early_accept_stops_remaining_pages() {
        let client = ScriptedOcr::new(vec![Ok(strong_response())]);
        let pages = vec![page(1), page(2), page(3)];
        let outcome = run_ocr_pages(&client, &pages, &test_config()).await;

        assert_eq!(outcome.early_accept_page, Some(1));
        assert_eq!(outcome.total_attempts, 1);
        assert!(!outcome.graceful_failure);
        assert_eq!(outcome.pages.len(), 3);
        for skipped in &outcome.pages[1..] {
            match &skipped.result {
                PageResult::Skipped { reason } => assert!(reason.contains("page 1"), "{reason}"),
                other => panic!("expected skip, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_budget_exhaustion_with_zero_successes_is_graceful_failure() {
        let client = ScriptedOcr::new(
            (0..3)
                .map(|_| Err(OcrError::Status { status: 500, body: "boom".into() }))
                .collect(),
        );
        let pages: Vec<PageInput> = (1..=10).map(page).collect();
        let outcome = run_ocr_pages(&client, &pages, &test_config()).await;

        assert_eq!(outcome.total_attempts, 3);
        assert!(outcome.graceful_failure);
        assert!(outcome.early_accept_page.is_none());
        assert_eq!(outcome.pages.len(), 10);
        assert!(matches!(outcome.pages[0].result, PageResult::Error(_)));
        assert!(matches!(outcome.pages[2].result, PageResult::Error(_)));
        for skipped in &outcome.pages[3..] {
            assert!(matches!(skipped.result, PageResult::Skipped { .. }));
        }
    }

    #[tokio::test]
    async fn test_page_cap_limits_attempts() {
        let responses = (0..10).map(|_| Ok(weak_response())).collect();
        let client = ScriptedOcr::new(responses);
        let pages: Vec<PageInput> = (1..=15).map(page).collect();
        let config = OcrConfig {
            total_attempts_budget: 20,
            stop_after_coversheet: false,
            delay_between_requests_seconds: 0.0,
            ..OcrConfig::default()
        };
        let outcome = run_ocr_pages(&client, &pages, &config).await;

        assert_eq!(outcome.total_attempts, 10);
        assert_eq!(outcome.pages.len(), 15);
        for processed in &outcome.pages[..10] {
            assert!(matches!(processed.result, PageResult::Processed(_)));
        }
        for skipped in &outcome.pages[10..] {
            match &skipped.result {
                PageResult::Skipped { reason } => {
                    assert!(reason.contains("max pages"), "{reason}")
                }
                other => panic!("expected skip, got {other:?}"),
            }
        }
        assert!(!outcome.graceful_failure);
    }

    #[tokio::test]
    async fn test_successes_consume_budget() {
        let responses = (0..3).map(|_| Ok(weak_response())).collect();
        let client = ScriptedOcr::new(responses);
        let pages: Vec<PageInput> = (1..=5).map(page).collect();
        let outcome = run_ocr_pages(&client, &pages, &test_config()).await;

        // Budget of 3 spent on pages 1-3 even though they all succeeded
        assert_eq!(outcome.total_attempts, 3);
        assert!(!outcome.graceful_failure);
        assert!(matches!(outcome.pages[3].result, PageResult::Skipped { .. }));
        assert!(matches!(outcome.pages[4].result, PageResult::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_mixed_failure_then_success_is_not_graceful() {
        let client = ScriptedOcr::new(vec![
            Err(OcrError::Request("timeout".into())),
            Ok(weak_response()),
        ]);
        let pages = vec![page(1), page(2)];
        let outcome = run_ocr_pages(&client, &pages, &test_config()).await;

        assert!(!outcome.graceful_failure);
        assert_eq!(outcome.processed().count(), 1);
        assert!(outcome.response_for(2).is_some());
        assert!(outcome.response_for(1).is_none());
    }
}
