#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod fs;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use emviz_core::types::{DatasetMetadata, DatasetMetadataError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("a different record already exists for {0}")]
    AlreadyExists(String),
    #[error("invalid metadata: {0}")]
    InvalidMetadata(#[from] DatasetMetadataError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Runtime(String),
}

/// Object storage as seen by one bucket.
///
/// - Keys are `/`-delimited strings; prefixes are plain string prefixes.
/// - `list` returns keys in ascending byte order.
/// - `put` replaces atomically: readers observe either the old or the new bytes.
pub trait BlobStore: Send + Sync + 'static {
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

/// Dataset registration records, keyed by `(owner, dataset)`.
pub trait MetadataStore: Send + Sync + 'static {
    /// `Ok(None)` when the dataset is not (yet) registered.
    fn lookup(&self, owner: &str, dataset: &str) -> Result<Option<DatasetMetadata>, StoreError>;

    /// Create-only. Re-registering an identical record succeeds.
    fn register(&self, metadata: &DatasetMetadata) -> Result<(), StoreError>;

    fn datasets_for_owner(&self, owner: &str) -> Result<Vec<String>, StoreError>;
}

const S3_SCHEME: &str = "s3://";

/// Opens the blob store for `bucket` under `root`.
///
/// `root` is either a local directory (each bucket is a sub-directory) or
/// `s3://` to address real buckets with ambient AWS credentials.
pub fn open_blob_store(root: &str, bucket: &str) -> Result<Arc<dyn BlobStore>, StoreError> {
    if !validate_key_component(bucket) {
        return Err(StoreError::InvalidKey(format!("invalid bucket name: {bucket:?}")));
    }
    if root.starts_with(S3_SCHEME) {
        return open_s3(root, bucket);
    }
    let dir = Path::new(root).join(bucket);
    tracing::debug!(
        target: "emviz_store",
        event = "open_fs",
        root,
        bucket,
        "opening blob store"
    );
    Ok(Arc::new(fs::FsBlobStore::new(dir)))
}

#[cfg(feature = "s3")]
fn open_s3(root: &str, bucket: &str) -> Result<Arc<dyn BlobStore>, StoreError> {
    if root.trim_end_matches('/') != S3_SCHEME.trim_end_matches('/') {
        return Err(StoreError::Runtime(format!(
            "s3 root must be exactly {S3_SCHEME:?}; the bucket is passed separately (got {root:?})"
        )));
    }
    tracing::debug!(target: "emviz_store", event = "open_s3", bucket, "opening blob store");
    Ok(Arc::new(s3::S3BlobStore::from_env(bucket)?))
}

#[cfg(not(feature = "s3"))]
fn open_s3(root: &str, _bucket: &str) -> Result<Arc<dyn BlobStore>, StoreError> {
    Err(StoreError::Runtime(format!("store root {root:?} needs the `s3` feature")))
}

pub fn open_metadata_store(root: &str) -> Result<Arc<dyn MetadataStore>, StoreError> {
    if root.trim().is_empty() || root.starts_with(S3_SCHEME) {
        return Err(StoreError::Runtime(format!(
            "metadata root must be a local directory (got {root:?})"
        )));
    }
    Ok(Arc::new(fs::FsMetadataStore::new(root)))
}

pub fn validate_key_component(value: &str) -> bool {
    if value.trim().is_empty() {
        return false;
    }
    if value.contains('/') || value.contains('\\') {
        return false;
    }
    if value.contains("..") {
        return false;
    }
    true
}

pub(crate) fn validate_object_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.starts_with('/') || key.ends_with('/') {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    if key.contains('\\') {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

pub(crate) fn validate_registration(metadata: &DatasetMetadata) -> Result<(), StoreError> {
    metadata.validate()?;
    if !validate_key_component(&metadata.owner) {
        return Err(StoreError::InvalidKey(metadata.owner.clone()));
    }
    if !validate_key_component(&metadata.dataset) {
        return Err(StoreError::InvalidKey(metadata.dataset.clone()));
    }
    Ok(())
}

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

// `staging_dir` must share a filesystem with the final destination.
pub(crate) fn write_staged(staging_dir: &Path, bytes: &[u8]) -> Result<PathBuf, std::io::Error> {
    use std::io::Write;

    std::fs::create_dir_all(staging_dir)?;
    let name = format!(
        "tmp.{}.{}.{}",
        std::process::id(),
        unix_time_ms(),
        STAGING_SEQ.fetch_add(1, Ordering::Relaxed)
    );
    let tmp = staging_dir.join(name);
    {
        let mut f = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    Ok(tmp)
}

pub(crate) fn write_atomic(
    staging_dir: &Path,
    path: &Path,
    bytes: &[u8],
) -> Result<(), std::io::Error> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path must have parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let tmp = write_staged(staging_dir, bytes)?;
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}

pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_reject_empty_and_traversal_segments() {
        assert!(validate_object_key("alice/trip/thumbnails/a.png").is_ok());
        assert!(validate_object_key("alice//trip/a.png").is_err());
        assert!(validate_object_key("alice/../etc/passwd").is_err());
        assert!(validate_object_key("/abs/key").is_err());
        assert!(validate_object_key("alice/trip/").is_err());
        assert!(validate_object_key("").is_err());
    }

    #[test]
    fn open_rejects_bad_roots_and_buckets() {
        assert!(matches!(
            open_blob_store("/tmp", "a/b"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(open_metadata_store("s3://").is_err());
        assert!(open_metadata_store("").is_err());
        #[cfg(not(feature = "s3"))]
        assert!(matches!(
            open_blob_store("s3://", "photos"),
            Err(StoreError::Runtime(_))
        ));
    }

    #[test]
    fn components_reject_separators() {
        assert!(validate_key_component("bosticc@example.com"));
        assert!(!validate_key_component("a/b"));
        assert!(!validate_key_component(".."));
        assert!(!validate_key_component("  "));
    }
}
