use emviz_core::types::AggregateKind;
use emviz_store::{BlobStore, StoreError};
use rayon::prelude::*;
use thiserror::Error;

use crate::catalog::ArtifactSet;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("no artifacts to aggregate")]
    EmptyInput,
    #[error("dimension mismatch at {key}: expected {expected}, found {found}")]
    DimensionMismatch {
        key: String,
        expected: String,
        found: String,
    },
    #[error("decode {key} failed: {reason}")]
    Decode { key: String, reason: String },
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("projection failed: {0}")]
    Projection(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Folds a complete artifact set into the bytes of one aggregate object.
///
/// Output must be a pure function of the set's contents in key order, so that
/// concurrent or repeated runs overwrite each other with identical bytes.
pub trait Aggregator: Send + Sync + 'static {
    fn kind(&self) -> AggregateKind;
    fn aggregate(&self, store: &dyn BlobStore, set: &ArtifactSet)
        -> Result<Vec<u8>, AggregateError>;
}

/// Fetches and decodes every artifact, preserving key order.
pub(crate) fn load_all<T, F>(
    store: &dyn BlobStore,
    set: &ArtifactSet,
    decode: F,
) -> Result<Vec<T>, AggregateError>
where
    T: Send,
    F: Fn(&str, Vec<u8>) -> Result<T, AggregateError> + Sync,
{
    if set.is_empty() {
        return Err(AggregateError::EmptyInput);
    }
    set.keys()
        .par_iter()
        .map(|key| {
            let bytes = store.get(key)?;
            decode(key, bytes)
        })
        .collect()
}
