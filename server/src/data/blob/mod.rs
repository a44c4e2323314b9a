//! Blob storage abstraction
//!
//! Two logically distinct containers are in play: SOURCE (read-only,
//! upstream owns its contents) and DEST (this service's artifacts). All
//! uploads overwrite, which is what makes reprocessing idempotent at the
//! blob layer.

pub mod error;
mod s3;

pub use error::BlobError;
pub use s3::S3BlobStore;

use std::path::Path;

use async_trait::async_trait;

/// Storage seam used by the document pipeline.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Download a blob to a local file, creating parent directories.
    /// Returns the size in bytes.
    async fn download_to_file(
        &self,
        container: &str,
        blob_path: &str,
        local_path: &Path,
    ) -> Result<u64, BlobError>;

    /// Upload a local file, overwriting any existing blob at the path.
    /// Returns the size in bytes.
    async fn upload_file(
        &self,
        container: &str,
        blob_path: &str,
        local_path: &Path,
        content_type: &str,
    ) -> Result<u64, BlobError>;
}

/// Reduce a document reference to a blob key.
///
/// Upstream sometimes sends full URLs (`https://host/container/a/b.pdf`)
/// and sometimes container-relative paths; either way the key inside the
/// SOURCE container is what the store needs.
pub fn blob_key_from_reference(reference: &str, container: &str) -> String {
    let trimmed = reference.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"));

    let path = match without_scheme {
        Some(rest) => match rest.split_once('/') {
            Some((_host, path)) => path,
            None => rest,
        },
        None => trimmed,
    };

    let path = path.trim_start_matches('/');
    match path.strip_prefix(container) {
        Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
        _ => path.to_string(),
    }
}
