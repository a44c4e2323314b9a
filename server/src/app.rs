//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::cli;
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::PostgresService;
use crate::data::blob::{BlobStore, S3BlobStore};
use crate::domain::ocr::{HttpOcrClient, OcrClient};
use crate::domain::pdf::{LopdfMerger, LopdfSplitter};
use crate::domain::poller::PollerService;
use crate::domain::processor::DocumentProcessor;
use crate::domain::reclaimer::Reclaimer;
use crate::domain::status::StatusWriter;

pub struct CoreApp;

impl CoreApp {
    /// Run the worker: load configuration, initialize the database and
    /// adapters, start the poller, and block until shutdown.
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let cli = cli::parse();
        let config = Arc::new(AppConfig::load(&cli)?);

        let db = Arc::new(
            PostgresService::init(&config.database)
                .await
                .context("Failed to initialize PostgreSQL")?,
        );

        let shutdown = ShutdownService::new();
        shutdown.install_signal_handlers();

        if config.poller.enabled {
            let blob: Arc<dyn BlobStore> = Arc::new(
                S3BlobStore::new(&config.blob)
                    .await
                    .context("Failed to initialize blob storage")?,
            );

            let ocr: Option<Arc<dyn OcrClient>> = if config.ocr.base_url.trim().is_empty() {
                tracing::warn!(
                    "OCR service not configured; ESMD and Fax jobs will fail into backoff"
                );
                None
            } else {
                Some(Arc::new(
                    HttpOcrClient::new(&config.ocr).context("Failed to initialize OCR client")?,
                ))
            };

            let processor = Arc::new(DocumentProcessor::new(
                db.pool().clone(),
                blob,
                Arc::new(LopdfMerger),
                Arc::new(LopdfSplitter),
                ocr,
                config.clone(),
            ));
            let status_writer = StatusWriter::new(db.pool().clone(), config.inbox.max_attempts);
            let reclaimer = Reclaimer::new(
                db.pool().clone(),
                status_writer.clone(),
                config.inbox.stale_lock_minutes,
                config.inbox.max_attempts,
            );
            let poller = Arc::new(PollerService::new(
                db.clone(),
                processor,
                status_writer,
                reclaimer,
                config.clone(),
            ));

            let handle = poller.spawn(shutdown.subscribe());
            shutdown.register(handle).await;
        } else {
            tracing::info!("Poller disabled; running idle until shutdown");
        }

        // Block until Ctrl+C / SIGTERM, then drain background tasks
        shutdown.wait().await;
        shutdown.shutdown().await;
        db.close().await;

        tracing::debug!("Shutdown complete");
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_env_filter(filter)
            .init();
    }
}
