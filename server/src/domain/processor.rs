//! Document processor: the stage pipeline
//!
//! One inbox job runs through four stages, each ending in its own commit so
//! a crash between stages leaves a consistent, resumable checkpoint:
//!
//! - Stage A: parse payload, upsert case and document aggregates
//! - Stage B: download payload documents, merge into one consolidated PDF,
//!   upload it, record the blob path
//! - Stage C: split into per-page PDFs, upload every page, record
//!   pages_metadata
//! - Stage D: extract fields (OCR for ESMD/Fax, payload for Portal),
//!   record ocr_metadata and the field bundles, sync case columns
//!
//! Reprocessing the same decision_tracking_id rebuilds the document from
//! the payload (REPLACE policy): blob uploads overwrite, metadata columns
//! are replaced, and the aggregates are reused via their unique indexes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use thiserror::Error;

use crate::core::config::AppConfig;
use crate::core::constants::TBD_SENTINEL;
use crate::data::blob::{BlobError, BlobStore, blob_key_from_reference};
use crate::data::postgres::PostgresError;
use crate::data::postgres::repositories::case::{self, CaseFieldSync, NewCase};
use crate::data::postgres::repositories::document::{self, Stage};
use crate::data::types::{
    CaseRow, ChannelType, DocumentRow, FieldBundle, FieldValue, OcrMetadata, OcrPageMetadata,
    PageMetadata, PagesMetadata, ParsedPayload, PartType, PayloadDocument, PayloadError,
    SOURCE_MISSING_DOCUMENTS, SOURCE_OCR_INITIAL, METADATA_VERSION, SourceMessage,
    StageStatus, SubmissionType,
};
use crate::domain::channel::{ChannelError, ChannelStrategy, classify_part_type};
use crate::domain::coversheet::detect_coversheet_page;
use crate::domain::fields;
use crate::domain::ocr::{OcrClient, OcrError, OcrRunOutcome, PageInput, PageResult, run_ocr_pages};
use crate::domain::paths::{ConsolidatedPaths, build_consolidated_paths, build_page_blob_path};
use crate::domain::pdf::{MergeInput, PdfError, PdfMerger, PdfSplitter};
use crate::domain::resume::{ResumePoint, page_blob_paths, plan_resume};
use crate::utils::time::{calculate_due_date, parse_flexible_timestamp};

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Database(#[from] PostgresError),

    #[error("Blob storage: {0}")]
    Blob(#[from] BlobError),

    #[error("PDF processing: {0}")]
    Pdf(#[from] PdfError),

    #[error("OCR: {0}")]
    Ocr(#[from] OcrError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for ProcessorError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.into())
    }
}

impl From<PayloadError> for ProcessorError {
    fn from(e: PayloadError) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

pub struct DocumentProcessor {
    pool: PgPool,
    blob: Arc<dyn BlobStore>,
    merger: Arc<dyn PdfMerger>,
    splitter: Arc<dyn PdfSplitter>,
    ocr: Option<Arc<dyn OcrClient>>,
    config: Arc<AppConfig>,
}

impl DocumentProcessor {
    pub fn new(
        pool: PgPool,
        blob: Arc<dyn BlobStore>,
        merger: Arc<dyn PdfMerger>,
        splitter: Arc<dyn PdfSplitter>,
        ocr: Option<Arc<dyn OcrClient>>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            pool,
            blob,
            merger,
            splitter,
            ocr,
            config,
        }
    }

    /// Process one intake message end to end.
    ///
    /// Exceptions propagate to the worker, which converts them into
    /// `mark_failed_with_retry`; partial progress stays committed and the
    /// next claim resumes from the right stage.
    pub async fn process_message(
        &self,
        message: &SourceMessage,
        inbox_id: i64,
    ) -> Result<(), ProcessorError> {
        tracing::info!(
            message_id = message.message_id,
            inbox_id,
            "Starting document processing"
        );

        let parsed = ParsedPayload::parse(&message.payload)?;
        let channel = ChannelType::from_id(message.channel_type_id);
        let strategy = ChannelStrategy::for_channel(channel);

        if !parsed.has_documents() {
            return self.process_empty_payload(message, &parsed, channel, strategy).await;
        }

        // Derive the resume point from persisted state
        let existing = self.load_case_and_document(message).await?;
        let resume = plan_resume(existing.as_ref().map(|(_, doc)| doc));
        if resume == ResumePoint::AlreadyDone {
            tracing::info!(
                message_id = message.message_id,
                "Document already fully processed, nothing to do"
            );
            return Ok(());
        }
        if resume != ResumePoint::Beginning {
            tracing::info!(message_id = message.message_id, ?resume, "Resuming pipeline");
        }

        // Temp files are tracked in one list and drained on every exit path
        let mut temp_files: Vec<PathBuf> = Vec::new();
        let result = self
            .run_pipeline(message, &parsed, channel, strategy, resume, existing, &mut temp_files)
            .await;
        cleanup_temp_files(&temp_files);
        result
    }

    async fn load_case_and_document(
        &self,
        message: &SourceMessage,
    ) -> Result<Option<(CaseRow, DocumentRow)>, ProcessorError> {
        let mut conn = self.pool.acquire().await?;
        let Some(case_row) =
            case::get_by_decision_tracking_id(&mut conn, message.decision_tracking_id).await?
        else {
            return Ok(None);
        };
        let Some(doc) = document::get_by_case_id(&mut conn, case_row.case_id).await? else {
            return Ok(None);
        };
        Ok(Some((case_row, doc)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        &self,
        message: &SourceMessage,
        parsed: &ParsedPayload,
        channel: ChannelType,
        strategy: ChannelStrategy,
        resume: ResumePoint,
        existing: Option<(CaseRow, DocumentRow)>,
        temp_files: &mut Vec<PathBuf>,
    ) -> Result<(), ProcessorError> {
        // Stage A: aggregate upsert
        let (case_row, doc) = match resume {
            ResumePoint::Beginning | ResumePoint::FromMerge => {
                self.stage_upsert(message, parsed, channel).await?
            }
            _ => existing.ok_or_else(|| {
                ProcessorError::InvalidState("resume point without persisted aggregates".into())
            })?,
        };
        let document_id = doc.document_id;
        let paths = build_consolidated_paths(
            &message.decision_tracking_id.to_string(),
            case_row.case_id,
            message.created_at,
        );

        // Stage B: merge (or re-fetch the consolidated artifact on resume)
        let consolidated_local = match resume {
            ResumePoint::Beginning | ResumePoint::FromMerge => Some(
                self.stage_merge(message, parsed, &case_row, document_id, &paths, temp_files)
                    .await?,
            ),
            ResumePoint::FromSplit => {
                let blob_path = doc.consolidated_blob_path.clone().ok_or_else(|| {
                    ProcessorError::InvalidState(
                        "cannot resume from split: consolidated_blob_path not set".into(),
                    )
                })?;
                tracing::info!(%blob_path, "Resuming: downloading existing consolidated PDF");
                let local = self
                    .temp_dir()
                    .join(format!("consolidated_resume_{}.pdf", case_row.case_id));
                temp_files.push(local.clone());
                self.blob
                    .download_to_file(&self.config.blob.dest_container, &blob_path, &local)
                    .await?;
                Some(local)
            }
            ResumePoint::FromOcr => None,
            ResumePoint::AlreadyDone => unreachable!("handled by the caller"),
        };

        // Stage C: split and upload pages
        let (page_inputs, pages_metadata) = match resume {
            ResumePoint::FromOcr => {
                self.reload_pages_for_extraction(document_id, &case_row, strategy, temp_files)
                    .await?
            }
            _ => {
                let consolidated = consolidated_local.as_deref().ok_or_else(|| {
                    ProcessorError::InvalidState("split stage without consolidated artifact".into())
                })?;
                self.stage_split(consolidated, &case_row, document_id, &paths, temp_files)
                    .await?
            }
        };

        // Stage D: field extraction
        self.stage_extract(
            message,
            &case_row,
            document_id,
            strategy,
            page_inputs,
            pages_metadata,
        )
        .await?;

        tracing::info!(
            message_id = message.message_id,
            case_id = case_row.case_id,
            document_id,
            "Document processing complete"
        );
        Ok(())
    }

    fn temp_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.blob.temp_dir)
    }

    // ------------------------------------------------------------------
    // Stage A
    // ------------------------------------------------------------------

    async fn stage_upsert(
        &self,
        message: &SourceMessage,
        parsed: &ParsedPayload,
        channel: ChannelType,
    ) -> Result<(CaseRow, DocumentRow), ProcessorError> {
        let mut tx = self.pool.begin().await?;

        let received_date = extract_submission_date(&message.payload, parsed, channel)
            .unwrap_or(message.created_at);
        let new_case = NewCase {
            decision_tracking_id: message.decision_tracking_id,
            channel_specific_id: channel_specific_id(parsed, channel),
            received_date,
            due_date: calculate_due_date(received_date, false),
            channel_type_id: message.channel_type_id,
        };

        let (case_row, _) = case::get_or_create(&mut tx, &new_case).await?;
        let (doc, created) = document::get_or_create_consolidated(&mut tx, case_row.case_id).await?;
        if !created {
            tracing::info!(
                document_id = doc.document_id,
                "Existing consolidated document found, rebuilding from payload"
            );
            document::reset_for_rebuild(&mut tx, doc.document_id).await?;
        }

        tx.commit().await?;
        tracing::info!(
            case_id = case_row.case_id,
            document_id = doc.document_id,
            "Aggregate upsert committed"
        );
        Ok((case_row, doc))
    }

    // ------------------------------------------------------------------
    // Stage B
    // ------------------------------------------------------------------

    async fn stage_merge(
        &self,
        message: &SourceMessage,
        parsed: &ParsedPayload,
        case_row: &CaseRow,
        document_id: i64,
        paths: &ConsolidatedPaths,
        temp_files: &mut Vec<PathBuf>,
    ) -> Result<PathBuf, ProcessorError> {
        let unique_docs = dedup_documents(&parsed.documents);
        let source_container = &self.config.blob.source_container;

        tracing::info!(
            total = parsed.documents.len(),
            unique = unique_docs.len(),
            "Downloading payload documents for merge"
        );

        let download_dir = self
            .temp_dir()
            .join("consolidated")
            .join(message.decision_tracking_id.to_string());
        let mut merge_inputs = Vec::with_capacity(unique_docs.len());
        for (idx, doc) in unique_docs.iter().enumerate() {
            let key = blob_key_from_reference(&doc.source_absolute_url, source_container);
            let local = download_dir.join(format!("input_{idx:03}"));
            temp_files.push(local.clone());
            let size = self
                .blob
                .download_to_file(source_container, &key, &local)
                .await?;
            tracing::info!(
                name = doc.display_name(),
                size_bytes = size,
                "Downloaded payload document"
            );
            merge_inputs.push(MergeInput {
                local_path: local,
                mime_type: doc.mime_type_or_pdf().to_string(),
            });
        }

        let consolidated_local = self.temp_dir().join(format!(
            "consolidated_{}_{}.pdf",
            message.decision_tracking_id, case_row.case_id
        ));
        temp_files.push(consolidated_local.clone());
        if let Some(parent) = consolidated_local.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let page_count = self.merger.merge(&merge_inputs, &consolidated_local)?;
        let file_size = std::fs::metadata(&consolidated_local)?.len() as i64;
        tracing::info!(
            pages = page_count,
            size_bytes = file_size,
            "Merged payload documents into consolidated PDF"
        );

        self.blob
            .upload_file(
                &self.config.blob.dest_container,
                &paths.consolidated_pdf,
                &consolidated_local,
                "application/pdf",
            )
            .await?;

        let blob_file_name = paths
            .consolidated_pdf
            .rsplit('/')
            .next()
            .unwrap_or("consolidated.pdf")
            .to_string();

        let mut tx = self.pool.begin().await?;
        document::set_consolidated(
            &mut tx,
            document_id,
            &paths.consolidated_pdf,
            &blob_file_name,
            file_size,
            &paths.processing_root,
        )
        .await?;
        tx.commit().await?;
        tracing::info!(
            blob_path = %paths.consolidated_pdf,
            "Merge checkpoint committed"
        );

        Ok(consolidated_local)
    }

    // ------------------------------------------------------------------
    // Stage C
    // ------------------------------------------------------------------

    async fn stage_split(
        &self,
        consolidated_local: &std::path::Path,
        case_row: &CaseRow,
        document_id: i64,
        paths: &ConsolidatedPaths,
        temp_files: &mut Vec<PathBuf>,
    ) -> Result<(Vec<PageInput>, PagesMetadata), ProcessorError> {
        {
            let mut conn = self.pool.acquire().await?;
            document::set_stage_status(&mut conn, document_id, Stage::Split, StageStatus::InProgress)
                .await?;
        }

        let split_dir = self.temp_dir().join(format!("pages_{}", case_row.case_id));
        let split_result = match self.splitter.split(consolidated_local, &split_dir) {
            Ok(pages) => pages,
            Err(e) => {
                self.set_stage_failed(document_id, Stage::Split).await;
                return Err(e.into());
            }
        };

        let dest_container = &self.config.blob.dest_container;
        let mut page_entries = Vec::with_capacity(split_result.len());
        let mut page_inputs = Vec::with_capacity(split_result.len());

        for page in &split_result {
            temp_files.push(page.local_path.clone());
            let page_blob_path =
                build_page_blob_path(&paths.pages_prefix, case_row.case_id, page.page_number);
            self.blob
                .upload_file(
                    dest_container,
                    &page_blob_path,
                    &page.local_path,
                    &page.content_type,
                )
                .await?;

            page_entries.push(PageMetadata {
                page_number: page.page_number,
                blob_path: page_blob_path.clone(),
                relative_path: page_blob_path,
                content_type: page.content_type.clone(),
                size_bytes: page.size_bytes,
                sha256: Some(page.sha256.clone()),
                is_coversheet: false,
                ocr_confidence: None,
                ocr_status: None,
                skip_reason: None,
            });
            page_inputs.push(PageInput {
                page_number: page.page_number,
                local_path: page.local_path.clone(),
            });
        }

        let pages_metadata = PagesMetadata::new(page_entries);
        let mut tx = self.pool.begin().await?;
        document::set_pages(&mut tx, document_id, split_result.len() as i32, &pages_metadata)
            .await?;
        tx.commit().await?;
        tracing::info!(pages = split_result.len(), "Split checkpoint committed");

        Ok((page_inputs, pages_metadata))
    }

    /// FromOcr resume: rebuild the page inputs from pages_metadata. OCR
    /// channels need the page PDFs back on disk; Portal only needs the
    /// metadata.
    async fn reload_pages_for_extraction(
        &self,
        document_id: i64,
        case_row: &CaseRow,
        strategy: ChannelStrategy,
        temp_files: &mut Vec<PathBuf>,
    ) -> Result<(Vec<PageInput>, PagesMetadata), ProcessorError> {
        let mut conn = self.pool.acquire().await?;
        let doc = document::get_by_id(&mut conn, document_id)
            .await?
            .ok_or_else(|| {
                ProcessorError::InvalidState("cannot resume extraction: document row gone".into())
            })?;
        drop(conn);

        let pages_value = doc.pages_metadata.as_ref().ok_or_else(|| {
            ProcessorError::InvalidState("cannot resume extraction: pages_metadata missing".into())
        })?;
        let pages_metadata: PagesMetadata =
            serde_json::from_value(pages_value.clone()).map_err(|e| {
                ProcessorError::InvalidState(format!("pages_metadata failed to parse: {e}"))
            })?;

        let blob_paths = page_blob_paths(pages_value);
        if blob_paths.is_empty() {
            return Err(ProcessorError::InvalidState(
                "cannot resume extraction: pages_metadata has no usable pages".into(),
            ));
        }

        let mut page_inputs = Vec::with_capacity(blob_paths.len());
        if strategy.runs_ocr() {
            tracing::info!(
                pages = blob_paths.len(),
                "Resuming extraction: downloading page artifacts"
            );
            for (page_number, blob_path) in &blob_paths {
                let local = self.temp_dir().join(format!(
                    "resume_page_{}_{page_number:04}.pdf",
                    case_row.case_id
                ));
                temp_files.push(local.clone());
                self.blob
                    .download_to_file(&self.config.blob.dest_container, blob_path, &local)
                    .await?;
                page_inputs.push(PageInput {
                    page_number: *page_number,
                    local_path: local,
                });
            }
        } else {
            for page_number in blob_paths.keys() {
                page_inputs.push(PageInput {
                    page_number: *page_number,
                    local_path: PathBuf::new(),
                });
            }
        }

        Ok((page_inputs, pages_metadata))
    }

    // ------------------------------------------------------------------
    // Stage D
    // ------------------------------------------------------------------

    async fn stage_extract(
        &self,
        message: &SourceMessage,
        case_row: &CaseRow,
        document_id: i64,
        strategy: ChannelStrategy,
        page_inputs: Vec<PageInput>,
        pages_metadata: PagesMetadata,
    ) -> Result<(), ProcessorError> {
        {
            let mut conn = self.pool.acquire().await?;
            document::set_stage_status(&mut conn, document_id, Stage::Ocr, StageStatus::InProgress)
                .await?;
        }

        let result = if strategy.runs_ocr() {
            self.extract_via_ocr(case_row, document_id, page_inputs, pages_metadata)
                .await
        } else {
            self.extract_from_payload(message, case_row, document_id, strategy, pages_metadata)
                .await
        };

        if result.is_err() {
            self.set_stage_failed(document_id, Stage::Ocr).await;
        }
        result
    }

    async fn extract_via_ocr(
        &self,
        case_row: &CaseRow,
        document_id: i64,
        page_inputs: Vec<PageInput>,
        mut pages_metadata: PagesMetadata,
    ) -> Result<(), ProcessorError> {
        let ocr = self.ocr.as_ref().ok_or_else(|| {
            ProcessorError::InvalidState(
                "OCR service is not configured but this channel requires OCR".into(),
            )
        })?;

        let outcome = run_ocr_pages(ocr.as_ref(), &page_inputs, &self.config.ocr).await;

        if outcome.graceful_failure {
            return self
                .commit_graceful_ocr_failure(document_id, &outcome, pages_metadata)
                .await;
        }

        // Coversheet: the early-accepted page, else the detector's pick
        let coversheet_page = outcome.early_accept_page.or_else(|| {
            let processed: Vec<_> = outcome.processed().collect();
            detect_coversheet_page(&processed, self.config.ocr.confidence_threshold)
        });

        let coversheet_response = coversheet_page.and_then(|page| outcome.response_for(page));
        let part_type = match coversheet_response {
            Some(response) => classify_part_type(
                Some(response.coversheet_type.as_str()),
                response.title_value(),
            ),
            None => {
                tracing::warn!("No coversheet OCR result, part type UNKNOWN");
                PartType::Unknown
            }
        };

        let ocr_metadata = build_ocr_metadata(&outcome, coversheet_page, part_type, None);
        annotate_pages_metadata(&mut pages_metadata, &outcome, coversheet_page);

        let baseline = match coversheet_response {
            Some(response) => FieldBundle {
                fields: fields::normalize_fields(&response.fields),
                coversheet_type: response.coversheet_type.clone(),
                doc_type: response.doc_type.clone(),
                overall_document_confidence: response.overall_document_confidence,
                duration_ms: response.duration_ms,
                page_number: coversheet_page,
                raw: response.raw.clone(),
                source: SOURCE_OCR_INITIAL.to_string(),
            },
            None => {
                tracing::warn!(
                    coversheet_page,
                    "No coversheet OCR result to populate extracted fields, storing empty baseline"
                );
                FieldBundle {
                    page_number: coversheet_page,
                    ..FieldBundle::empty(SOURCE_OCR_INITIAL)
                }
            }
        };

        // Working copy: deep copy of the baseline plus silent auto-fixes
        let mut working = baseline.clone();
        let fixed = fields::apply_auto_fix(&mut working.fields);
        if !fixed.is_empty() {
            tracing::info!(fields = ?fixed, "Applied auto-fix to extracted fields");
        }

        let mut tx = self.pool.begin().await?;
        document::set_extraction_results(
            &mut tx,
            document_id,
            &ocr_metadata,
            Some(&pages_metadata),
            coversheet_page,
            part_type,
            &baseline,
            &working,
            false,
        )
        .await?;
        self.sync_case_columns(&mut tx, case_row.case_id, &working.fields).await?;
        tx.commit().await?;

        tracing::info!(
            coversheet_page,
            part_type = %part_type,
            pages = ocr_metadata.pages.len(),
            "Extraction checkpoint committed (OCR)"
        );
        Ok(())
    }

    /// All pages failed or the budget ran out with zero successes. Forward
    /// progress wins over completeness: persist an empty baseline, mark the
    /// stage DONE and flag the document for manual review.
    async fn commit_graceful_ocr_failure(
        &self,
        document_id: i64,
        outcome: &OcrRunOutcome,
        mut pages_metadata: PagesMetadata,
    ) -> Result<(), ProcessorError> {
        tracing::warn!(
            attempts = outcome.total_attempts,
            "OCR produced no successful pages; completing with empty fields for manual review"
        );

        let ocr_metadata = build_ocr_metadata(outcome, None, PartType::Unknown, None);
        annotate_pages_metadata(&mut pages_metadata, outcome, None);

        let baseline = FieldBundle::empty(SOURCE_OCR_INITIAL);
        let working = baseline.clone();

        let mut tx = self.pool.begin().await?;
        document::set_extraction_results(
            &mut tx,
            document_id,
            &ocr_metadata,
            Some(&pages_metadata),
            None,
            PartType::Unknown,
            &baseline,
            &working,
            true,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn extract_from_payload(
        &self,
        message: &SourceMessage,
        case_row: &CaseRow,
        document_id: i64,
        strategy: ChannelStrategy,
        mut pages_metadata: PagesMetadata,
    ) -> Result<(), ProcessorError> {
        let bundle = strategy.extract_fields_from_payload(&message.payload)?;
        let coversheet_page = strategy.coversheet_page_number();
        let part_type = strategy.part_type_from_payload(&message.payload);

        let ocr_pages = pages_metadata
            .pages
            .iter()
            .map(|page| OcrPageMetadata {
                page_number: page.page_number,
                fields: serde_json::Value::Object(Default::default()),
                overall_document_confidence: 0.0,
                duration_ms: 0,
                error: None,
                status: "skipped".to_string(),
                skip_reason: Some("fields sourced from payload".to_string()),
            })
            .collect();
        let ocr_metadata = OcrMetadata {
            version: METADATA_VERSION.to_string(),
            pages: ocr_pages,
            coversheet_page_number: coversheet_page,
            part_type,
            source: Some("payload".to_string()),
        };

        for page in &mut pages_metadata.pages {
            page.ocr_status = Some("skipped".to_string());
            page.skip_reason = Some("fields sourced from payload".to_string());
        }

        let mut working = bundle.clone();
        let fixed = fields::apply_auto_fix(&mut working.fields);
        if !fixed.is_empty() {
            tracing::info!(fields = ?fixed, "Applied auto-fix to extracted fields");
        }

        let mut tx = self.pool.begin().await?;
        document::set_extraction_results(
            &mut tx,
            document_id,
            &ocr_metadata,
            Some(&pages_metadata),
            coversheet_page,
            part_type,
            &bundle,
            &working,
            false,
        )
        .await?;
        self.sync_case_columns(&mut tx, case_row.case_id, &working.fields).await?;
        tx.commit().await?;

        tracing::info!(
            part_type = %part_type,
            fields = bundle.fields.len(),
            "Extraction checkpoint committed (payload)"
        );
        Ok(())
    }

    async fn sync_case_columns(
        &self,
        conn: &mut PgConnection,
        case_id: i64,
        working_fields: &BTreeMap<String, FieldValue>,
    ) -> Result<(), ProcessorError> {
        let Some(current) = case::get_by_id(conn, case_id).await? else {
            return Err(ProcessorError::InvalidState(format!(
                "case {case_id} disappeared during extraction"
            )));
        };
        let sync = build_case_sync(&current, working_fields);
        if !sync.is_empty() {
            case::apply_field_sync(conn, case_id, &sync).await?;
            tracing::info!(case_id, "Synced case columns from extracted fields");
        }
        Ok(())
    }

    async fn set_stage_failed(&self, document_id: i64, stage: Stage) {
        // Best effort; the resume planner re-derives state either way
        if let Ok(mut conn) = self.pool.acquire().await
            && let Err(e) =
                document::set_stage_status(&mut conn, document_id, stage, StageStatus::Failed).await
        {
            tracing::warn!(document_id, error = %e, "Failed to record stage failure");
        }
    }

    // ------------------------------------------------------------------
    // Zero-documents path
    // ------------------------------------------------------------------

    async fn process_empty_payload(
        &self,
        message: &SourceMessage,
        parsed: &ParsedPayload,
        channel: ChannelType,
        strategy: ChannelStrategy,
    ) -> Result<(), ProcessorError> {
        tracing::warn!(
            message_id = message.message_id,
            "Payload has no documents; creating case with empty document state"
        );

        let mut tx = self.pool.begin().await?;
        let received_date = extract_submission_date(&message.payload, parsed, channel)
            .unwrap_or(message.created_at);
        let new_case = NewCase {
            decision_tracking_id: message.decision_tracking_id,
            channel_specific_id: channel_specific_id(parsed, channel),
            received_date,
            due_date: calculate_due_date(received_date, false),
            channel_type_id: message.channel_type_id,
        };
        let (case_row, _) = case::get_or_create(&mut tx, &new_case).await?;

        let mut missing = FieldBundle::empty(SOURCE_MISSING_DOCUMENTS);
        missing.raw = serde_json::json!({
            "error": "No documents found in payload",
            "message_id": message.message_id,
            "decision_tracking_id": message.decision_tracking_id.to_string(),
        });
        let (doc, _) = document::get_or_create_skipped(&mut tx, case_row.case_id, &missing).await?;
        tx.commit().await?;

        // Portal payloads can still carry fields worth surfacing even
        // without any document files
        let portal_has_fields = channel == ChannelType::Portal
            && message
                .payload
                .get("ocr")
                .and_then(|o| o.get("fields"))
                .and_then(|f| f.as_object())
                .is_some_and(|f| !f.is_empty());

        if portal_has_fields && doc.ocr_status() != StageStatus::Done {
            let empty_pages = PagesMetadata::new(Vec::new());
            if let Err(e) = self
                .extract_from_payload(message, &case_row, doc.document_id, strategy, empty_pages)
                .await
            {
                // The case and document are already committed; field
                // extraction is surfaced on the next claim if it matters
                tracing::error!(
                    error = %e,
                    case_id = case_row.case_id,
                    "Failed to extract Portal fields for empty-documents payload"
                );
            }
        }

        tracing::info!(
            case_id = case_row.case_id,
            external_id = %case_row.external_id,
            "Created case with empty document state"
        );
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Pure helpers
// ----------------------------------------------------------------------

/// Deduplicate payload documents by source URL, preserving first
/// occurrence. Duplicate URLs would otherwise merge the same blob twice.
pub fn dedup_documents(documents: &[PayloadDocument]) -> Vec<&PayloadDocument> {
    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::with_capacity(documents.len());
    for doc in documents {
        if seen.insert(doc.source_absolute_url.as_str()) {
            unique.push(doc);
        } else {
            tracing::info!(
                url = %doc.source_absolute_url,
                name = doc.display_name(),
                "Skipping duplicate document URL"
            );
        }
    }
    unique
}

/// Channel-specific external identifier for the case.
pub fn channel_specific_id(parsed: &ParsedPayload, channel: ChannelType) -> Option<String> {
    match channel {
        ChannelType::Portal => parsed.packet_id.clone(),
        ChannelType::Esmd => parsed.esmd_transaction_id().map(String::from),
        ChannelType::Fax => None,
    }
}

/// Extract the submission timestamp per channel rule, preserving the raw
/// timezone. ESMD and Fax read `submission_metadata.creationTime`; Portal
/// reads the payload's "Submitted Date" field. Fax deliberately has no OCR
/// fallback.
pub fn extract_submission_date(
    payload: &serde_json::Value,
    parsed: &ParsedPayload,
    channel: ChannelType,
) -> Option<DateTime<Utc>> {
    let raw = match channel {
        ChannelType::Esmd | ChannelType::Fax => parsed
            .submission_metadata
            .as_ref()
            .and_then(|m| m.creation_time.clone()),
        ChannelType::Portal => payload
            .get("ocr")
            .and_then(|o| o.get("fields"))
            .and_then(|f| f.get(fields::SUBMITTED_DATE_FIELD))
            .and_then(|d| d.get("value"))
            .and_then(|v| v.as_str())
            .map(String::from),
    }?;

    let parsed_date = parse_flexible_timestamp(&raw);
    if parsed_date.is_none() {
        tracing::warn!(raw, "Failed to parse submission date from payload");
    }
    parsed_date
}

/// Compute the TBD-guarded case column updates from the working fields.
///
/// Columns are only written while they still hold their placeholder value;
/// manually curated data is never clobbered. A submission type change also
/// recomputes the due date.
pub fn build_case_sync(
    case_row: &CaseRow,
    working_fields: &BTreeMap<String, FieldValue>,
) -> CaseFieldSync {
    let mut sync = CaseFieldSync::default();
    let is_tbd = |value: &str| value.is_empty() || value == TBD_SENTINEL;

    if is_tbd(&case_row.beneficiary_name)
        && let Some(name) = fields::extract_beneficiary_name(working_fields)
    {
        sync.beneficiary_name = Some(name);
    }
    if is_tbd(&case_row.beneficiary_mbi)
        && let Some(mbi) = fields::extract_field(working_fields, fields::BENEFICIARY_MBI_ALIASES)
    {
        sync.beneficiary_mbi = Some(mbi);
    }
    if is_tbd(&case_row.provider_name)
        && let Some(name) = fields::extract_provider_name(working_fields)
    {
        sync.provider_name = Some(name);
    }

    if let Some(raw_npi) = fields::extract_provider_npi(working_fields) {
        let npi_writable = is_tbd(&case_row.provider_npi) || case_row.provider_npi == "0000000000";
        match fields::normalize_npi(&raw_npi) {
            Some(npi) if npi_writable => sync.provider_npi = Some(npi),
            Some(_) => {}
            None => tracing::warn!(
                raw = %raw_npi,
                "Extracted NPI is not 10 digits, leaving placeholder for manual review"
            ),
        }
    }

    if let Some(raw_type) = fields::extract_field(working_fields, fields::SUBMISSION_TYPE_ALIASES) {
        match fields::normalize_submission_type(&raw_type) {
            Some(submission_type) => {
                if case_row.submission_type.as_deref() != Some(submission_type.as_str()) {
                    sync.submission_type = Some(submission_type.as_str().to_string());
                    sync.due_date = Some(calculate_due_date(
                        case_row.received_date,
                        submission_type == SubmissionType::Expedited,
                    ));
                }
            }
            None => tracing::warn!(
                raw = %raw_type,
                "Unrecognized submission type, leaving null for manual review"
            ),
        }
    }

    sync
}

/// One ocr_metadata entry per in-scope page, whatever happened to it.
fn build_ocr_metadata(
    outcome: &OcrRunOutcome,
    coversheet_page: Option<i32>,
    part_type: PartType,
    source: Option<String>,
) -> OcrMetadata {
    let pages = outcome
        .pages
        .iter()
        .map(|page| match &page.result {
            PageResult::Processed(response) => OcrPageMetadata {
                page_number: page.page_number,
                fields: response.fields.clone(),
                overall_document_confidence: response.overall_document_confidence,
                duration_ms: response.duration_ms,
                error: None,
                status: "processed".to_string(),
                skip_reason: None,
            },
            PageResult::Error(error) => OcrPageMetadata {
                page_number: page.page_number,
                fields: serde_json::Value::Object(Default::default()),
                overall_document_confidence: 0.0,
                duration_ms: 0,
                error: Some(error.clone()),
                status: "error".to_string(),
                skip_reason: None,
            },
            PageResult::Skipped { reason } => OcrPageMetadata {
                page_number: page.page_number,
                fields: serde_json::Value::Object(Default::default()),
                overall_document_confidence: 0.0,
                duration_ms: 0,
                error: None,
                status: "skipped".to_string(),
                skip_reason: Some(reason.clone()),
            },
        })
        .collect();

    OcrMetadata {
        version: METADATA_VERSION.to_string(),
        pages,
        coversheet_page_number: coversheet_page,
        part_type,
        source,
    }
}

/// Mirror per-page OCR outcomes onto pages_metadata so the stored page list
/// carries confidence and status next to the blob paths.
fn annotate_pages_metadata(
    pages_metadata: &mut PagesMetadata,
    outcome: &OcrRunOutcome,
    coversheet_page: Option<i32>,
) {
    for page in &mut pages_metadata.pages {
        page.is_coversheet = Some(page.page_number) == coversheet_page;
        let Some(entry) = outcome
            .pages
            .iter()
            .find(|p| p.page_number == page.page_number)
        else {
            continue;
        };
        match &entry.result {
            PageResult::Processed(response) => {
                page.ocr_confidence = Some(response.overall_document_confidence);
                page.ocr_status = Some("processed".to_string());
                page.skip_reason = None;
            }
            PageResult::Error(_) => {
                page.ocr_confidence = Some(0.0);
                page.ocr_status = Some("error".to_string());
            }
            PageResult::Skipped { reason } => {
                page.ocr_confidence = Some(0.0);
                page.ocr_status = Some("skipped".to_string());
                page.skip_reason = Some(reason.clone());
            }
        }
    }
}

fn cleanup_temp_files(temp_files: &[PathBuf]) {
    for path in temp_files {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to clean up temp file");
            }
        } else {
            tracing::debug!(path = %path.display(), "Cleaned up temp file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::SubmissionMetadata;
    use crate::utils::time::parse_iso_timestamp;
    use serde_json::json;
    use uuid::Uuid;

    fn case_with_placeholders() -> CaseRow {
        CaseRow {
            case_id: 1,
            external_id: "SVC-2026-1234567".into(),
            decision_tracking_id: Uuid::nil(),
            channel_specific_id: None,
            beneficiary_name: "TBD".into(),
            beneficiary_mbi: "TBD".into(),
            provider_name: "TBD".into(),
            provider_npi: "TBD".into(),
            received_date: parse_iso_timestamp("2026-01-06T14:25:33Z").unwrap(),
            due_date: parse_iso_timestamp("2026-01-09T00:00:00Z").unwrap(),
            submission_type: None,
            channel_type_id: Some(3),
            detailed_status: "Pending - New".into(),
            tracking_number: None,
        }
    }

    fn field(value: &str) -> FieldValue {
        FieldValue {
            value: value.into(),
            confidence: 0.9,
            field_type: "STRING".into(),
        }
    }

    fn payload_doc(url: &str) -> PayloadDocument {
        serde_json::from_value(json!({
            "file_name": "doc.pdf",
            "mime_type": "application/pdf",
            "source_absolute_url": url
        }))
        .unwrap()
    }

    #[test]
    fn test_dedup_documents_preserves_first_occurrence() {
        let docs = vec![
            payload_doc("a/one.pdf"),
            payload_doc("a/two.pdf"),
            payload_doc("a/one.pdf"),
        ];
        let unique = dedup_documents(&docs);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].source_absolute_url, "a/one.pdf");
        assert_eq!(unique[1].source_absolute_url, "a/two.pdf");
    }

    #[test]
    fn test_channel_specific_id_per_channel() {
        let parsed = ParsedPayload {
            message_type: None,
            decision_tracking_id: "d1".into(),
            documents: vec![],
            submission_metadata: Some(SubmissionMetadata {
                creation_time: None,
                esmd_transaction_id: Some("ESMD-7".into()),
            }),
            ocr: None,
            packet_id: Some("PKT-2026-000074".into()),
        };
        assert_eq!(
            channel_specific_id(&parsed, ChannelType::Portal).as_deref(),
            Some("PKT-2026-000074")
        );
        assert_eq!(
            channel_specific_id(&parsed, ChannelType::Esmd).as_deref(),
            Some("ESMD-7")
        );
        assert_eq!(channel_specific_id(&parsed, ChannelType::Fax), None);
    }

    #[test]
    fn test_extract_submission_date_esmd() {
        let payload = json!({
            "decision_tracking_id": "d1",
            "submission_metadata": {"creationTime": "2026-01-06T14:25:33.4392211-05:00"}
        });
        let parsed = ParsedPayload::parse(&payload).unwrap();
        let date = extract_submission_date(&payload, &parsed, ChannelType::Esmd).unwrap();
        assert_eq!(date, parse_iso_timestamp("2026-01-06T19:25:33.4392211Z").unwrap());
    }

    #[test]
    fn test_extract_submission_date_portal_reads_submitted_date_field() {
        let payload = json!({
            "decision_tracking_id": "d1",
            "ocr": {"fields": {"Submitted Date": {"value": "01/06/2026"}}}
        });
        let parsed = ParsedPayload::parse(&payload).unwrap();
        let date = extract_submission_date(&payload, &parsed, ChannelType::Portal).unwrap();
        assert_eq!(date, parse_iso_timestamp("2026-01-06T00:00:00Z").unwrap());
    }

    #[test]
    fn test_extract_submission_date_fax_has_no_ocr_fallback() {
        // Fax reads submission_metadata only; an OCR-style Submitted Date
        // in the payload is ignored
        let payload = json!({
            "decision_tracking_id": "d1",
            "ocr": {"fields": {"Submitted Date": {"value": "01/06/2026"}}}
        });
        let parsed = ParsedPayload::parse(&payload).unwrap();
        assert_eq!(
            extract_submission_date(&payload, &parsed, ChannelType::Fax),
            None
        );
    }

    #[test]
    fn test_build_case_sync_fills_placeholders() {
        let case_row = case_with_placeholders();
        let fields = BTreeMap::from([
            ("Beneficiary First Name".to_string(), field("ALICE")),
            ("Beneficiary Last Name".to_string(), field("SMITH")),
            ("Beneficiary Medicare ID".to_string(), field("1EG4-TE5-MK73")),
            ("Attending Physician Name".to_string(), field("DR WHO")),
            ("Attending Physician NPI".to_string(), field("123456789")),
        ]);

        let sync = build_case_sync(&case_row, &fields);
        assert_eq!(sync.beneficiary_name.as_deref(), Some("ALICE SMITH"));
        assert_eq!(sync.beneficiary_mbi.as_deref(), Some("1EG4-TE5-MK73"));
        assert_eq!(sync.provider_name.as_deref(), Some("DR WHO"));
        // 9-digit NPI left-padded to 10
        assert_eq!(sync.provider_npi.as_deref(), Some("0123456789"));
        assert!(sync.submission_type.is_none());
        assert!(sync.due_date.is_none());
    }

    #[test]
    fn test_build_case_sync_respects_non_placeholder_values() {
        let mut case_row = case_with_placeholders();
        case_row.beneficiary_name = "CURATED NAME".into();
        case_row.provider_npi = "1111111111".into();

        let fields = BTreeMap::from([
            ("Beneficiary Name".to_string(), field("OCR NAME")),
            ("Provider NPI".to_string(), field("2222222222")),
        ]);
        let sync = build_case_sync(&case_row, &fields);
        assert!(sync.beneficiary_name.is_none());
        assert!(sync.provider_npi.is_none());
    }

    #[test]
    fn test_build_case_sync_invalid_npi_left_for_review() {
        let case_row = case_with_placeholders();
        let fields = BTreeMap::from([("Provider NPI".to_string(), field("12345"))]);
        let sync = build_case_sync(&case_row, &fields);
        assert!(sync.provider_npi.is_none());
    }

    #[test]
    fn test_build_case_sync_expedited_recomputes_due_date() {
        let case_row = case_with_placeholders();
        let fields = BTreeMap::from([(
            "Submission Type".to_string(),
            field("expedited-initial"),
        )]);
        let sync = build_case_sync(&case_row, &fields);
        assert_eq!(sync.submission_type.as_deref(), Some("Expedited"));
        assert_eq!(
            sync.due_date,
            Some(parse_iso_timestamp("2026-01-08T00:00:00Z").unwrap())
        );
    }

    #[test]
    fn test_build_case_sync_same_submission_type_is_a_noop() {
        let mut case_row = case_with_placeholders();
        case_row.submission_type = Some("Standard".into());
        let fields = BTreeMap::from([("Submission Type".to_string(), field("standard"))]);
        let sync = build_case_sync(&case_row, &fields);
        assert!(sync.submission_type.is_none());
        assert!(sync.due_date.is_none());
    }

    #[test]
    fn test_build_case_sync_unrecognized_submission_type() {
        let case_row = case_with_placeholders();
        let fields = BTreeMap::from([("Submission Type".to_string(), field("whenever"))]);
        let sync = build_case_sync(&case_row, &fields);
        assert!(sync.submission_type.is_none());
    }
}
