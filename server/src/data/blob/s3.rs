//! S3-backed blob storage
//!
//! Works against AWS S3 or any S3-compatible service (MinIO etc.) via a
//! custom endpoint. Transient failures are retried with exponential
//! backoff inside the adapter; persistent failures surface as stage errors
//! and flow into inbox backoff.

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

use crate::core::config::BlobConfig;
use crate::utils::retry::retry_with_backoff;

use super::error::BlobError;
use super::BlobStore;

#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    max_retries: u32,
    retry_base_ms: u64,
}

impl S3BlobStore {
    pub async fn new(config: &BlobConfig) -> Result<Self, BlobError> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &config.region {
            config_loader = config_loader.region(aws_sdk_s3::config::Region::new(region.clone()));
        }

        let sdk_config = config_loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint_url) = &config.endpoint {
            // Path-style addressing is required by most S3-compatible services
            s3_config = s3_config.endpoint_url(endpoint_url).force_path_style(true);
        }

        let client = Client::from_conf(s3_config.build());

        tracing::debug!(
            source = %config.source_container,
            dest = %config.dest_container,
            "S3 blob store initialized"
        );

        Ok(Self {
            client,
            max_retries: config.max_retries.max(1),
            retry_base_ms: config.retry_base_ms,
        })
    }

    async fn download_once(
        &self,
        container: &str,
        blob_path: &str,
        local_path: &Path,
    ) -> Result<u64, BlobError> {
        let response = self
            .client
            .get_object()
            .bucket(container)
            .key(blob_path)
            .send()
            .await
            .map_err(|err| {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    BlobError::NotFound(format!("{container}/{blob_path}"))
                } else {
                    BlobError::Backend(format!("S3 get_object error: {service_err}"))
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| BlobError::Backend(format!("S3 body read error: {e}")))?
            .into_bytes();

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &bytes).await?;

        Ok(bytes.len() as u64)
    }

    async fn upload_once(
        &self,
        container: &str,
        blob_path: &str,
        local_path: &Path,
        content_type: &str,
    ) -> Result<u64, BlobError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| BlobError::Backend(format!("Failed to read {}: {e}", local_path.display())))?;
        let size = tokio::fs::metadata(local_path).await?.len();

        // put_object overwrites unconditionally; uploads are idempotent
        self.client
            .put_object()
            .bucket(container)
            .key(blob_path)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| BlobError::Backend(format!("S3 put_object error: {e}")))?;

        Ok(size)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn download_to_file(
        &self,
        container: &str,
        blob_path: &str,
        local_path: &Path,
    ) -> Result<u64, BlobError> {
        retry_with_backoff(self.max_retries, self.retry_base_ms, || {
            self.download_once(container, blob_path, local_path)
        })
        .await
        .map_err(|(e, attempts)| {
            tracing::error!(
                container,
                blob_path,
                attempts,
                error = %e,
                "Blob download failed after retries"
            );
            e
        })
    }

    async fn upload_file(
        &self,
        container: &str,
        blob_path: &str,
        local_path: &Path,
        content_type: &str,
    ) -> Result<u64, BlobError> {
        retry_with_backoff(self.max_retries, self.retry_base_ms, || {
            self.upload_once(container, blob_path, local_path, content_type)
        })
        .await
        .map_err(|(e, attempts)| {
            tracing::error!(
                container,
                blob_path,
                attempts,
                error = %e,
                "Blob upload failed after retries"
            );
            e
        })
    }
}
