#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod aggregate;
pub mod catalog;
pub mod embedding;
pub mod gate;
pub mod handler;
pub mod npy;
pub mod projection;
pub mod spritesheet;
pub mod thumbnail;

use std::fmt;
use std::sync::Arc;

use emviz_core::exclusion::{ExclusionPolicy, RejectReason, Verdict};
use emviz_core::object_key::ObjectPath;
use emviz_core::types::AggregateKind;
use emviz_observe::metrics::StageMetrics;
use emviz_store::{BlobStore, MetadataStore, StoreError};
use thiserror::Error;

use crate::aggregate::AggregateError;
use crate::embedding::{EmbeddingStage, HistogramEmbedder};
use crate::handler::AggregationHandler;
use crate::projection::{EmbeddingProjector, PcaProjection};
use crate::spritesheet::SpritesheetBuilder;
use crate::thumbnail::ThumbnailStage;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("aggregate error: {0}")]
    Aggregate(#[from] AggregateError),
    #[error("image error for {key}: {source}")]
    Image {
        key: String,
        #[source]
        source: image::ImageError,
    },
    #[error("embedder failed for {key}: {reason}")]
    Embed { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub bucket: String,
    pub key: String,
}

impl Notification {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Rejected(RejectReason),
    InvalidKey,
    NoDataset,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Rejected(r) => r.as_str(),
            SkipReason::InvalidKey => "invalid_key",
            SkipReason::NoDataset => "no_dataset",
        }
    }
}

/// How a notification was resolved. Every variant is a successful invocation;
/// failures are `Err(HandlerError)` and left to the trigger's redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    /// No registration record yet; a later notification re-checks.
    Unregistered,
    NotReady {
        observed: usize,
        expected: u32,
    },
    Aggregated {
        output_key: String,
        artifacts: usize,
        bytes: usize,
    },
    Derived {
        output_key: String,
    },
}

pub trait NotificationHandler: Send + Sync + 'static {
    fn stage(&self) -> Stage;
    fn handle(&self, notification: &Notification) -> Result<Outcome, HandlerError>;
    fn metrics(&self) -> Arc<StageMetrics>;
}

pub(crate) fn record_outcome(metrics: &StageMetrics, result: &Result<Outcome, HandlerError>) {
    match result {
        Ok(Outcome::Skipped(_)) => metrics.skipped.inc(),
        Ok(Outcome::Unregistered) => metrics.unregistered.inc(),
        Ok(Outcome::NotReady { .. }) => metrics.not_ready.inc(),
        Ok(Outcome::Aggregated { .. }) | Ok(Outcome::Derived { .. }) => metrics.completed.inc(),
        Err(_) => metrics.failed.inc(),
    }
}

/// Everything a stage checks before its first store call: the exclusion table
/// on the raw key, decomposition, then the watched category.
pub(crate) fn screen_notification(
    policy: &ExclusionPolicy,
    key: &str,
) -> Result<ObjectPath, SkipReason> {
    if let Verdict::Reject(reason) = policy.screen(key) {
        tracing::debug!(
            target: "emviz_gate",
            event = "skip",
            key,
            reason = reason.as_str(),
            "notification screened out"
        );
        return Err(SkipReason::Rejected(reason));
    }

    let path = match ObjectPath::parse(key) {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!(
                target: "emviz_gate",
                event = "invalid_key",
                key,
                error = %e,
                "dropping notification"
            );
            return Err(SkipReason::InvalidKey);
        }
    };
    if let Verdict::Reject(reason) = policy.admit_path(&path) {
        tracing::debug!(
            target: "emviz_gate",
            event = "skip",
            key,
            reason = reason.as_str(),
            "notification outside watched category"
        );
        return Err(SkipReason::Rejected(reason));
    }
    if !path.has_dataset() {
        tracing::warn!(
            target: "emviz_gate",
            event = "no_dataset",
            key,
            "dropping notification"
        );
        return Err(SkipReason::NoDataset);
    }
    Ok(path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Thumbnail,
    Embedding,
    Spritesheet,
    Projection,
}

impl Stage {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        let stage = match s.as_str() {
            "thumbnail" | "thumbnails" => Stage::Thumbnail,
            "embedding" | "embeddings" => Stage::Embedding,
            "spritesheet" => Stage::Spritesheet,
            "projection" | "tsne" | "coordinates" => Stage::Projection,
            _ => return None,
        };
        Some(stage)
    }

    pub fn aggregate_kind(&self) -> Option<AggregateKind> {
        match self {
            Stage::Spritesheet => Some(AggregateKind::Spritesheet),
            Stage::Projection => Some(AggregateKind::Projection),
            Stage::Thumbnail | Stage::Embedding => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Thumbnail => "thumbnail",
            Stage::Embedding => "embedding",
            Stage::Spritesheet => "spritesheet",
            Stage::Projection => "projection",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Edge length of the square thumbnails the spritesheet is built from.
    pub thumbnail_size: u32,
    pub max_embed_resolution: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            thumbnail_size: 64,
            max_embed_resolution: 800,
        }
    }
}

#[derive(Clone)]
pub struct StageStores {
    pub source: Arc<dyn BlobStore>,
    pub output: Arc<dyn BlobStore>,
    pub metadata: Arc<dyn MetadataStore>,
}

pub fn handler_for(
    stage: Stage,
    stores: StageStores,
    cfg: &PipelineConfig,
) -> Arc<dyn NotificationHandler> {
    match stage {
        Stage::Thumbnail => Arc::new(ThumbnailStage::new(
            stores.source,
            stores.output,
            cfg.thumbnail_size,
        )),
        Stage::Embedding => Arc::new(EmbeddingStage::new(
            stores.source,
            stores.output,
            Arc::new(HistogramEmbedder::default()),
            cfg.max_embed_resolution,
        )),
        Stage::Spritesheet => Arc::new(AggregationHandler::new(
            stores.output,
            stores.metadata,
            Arc::new(SpritesheetBuilder),
        )),
        Stage::Projection => Arc::new(AggregationHandler::new(
            stores.output,
            stores.metadata,
            Arc::new(EmbeddingProjector::new(Arc::new(PcaProjection::default()))),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_parse_case_insensitively() {
        assert_eq!(Stage::parse("Spritesheet"), Some(Stage::Spritesheet));
        assert_eq!(Stage::parse(" tsne "), Some(Stage::Projection));
        assert_eq!(Stage::parse("thumbnails"), Some(Stage::Thumbnail));
        assert_eq!(Stage::parse("resize"), None);
        for stage in [
            Stage::Thumbnail,
            Stage::Embedding,
            Stage::Spritesheet,
            Stage::Projection,
        ] {
            assert_eq!(Stage::parse(&stage.to_string()), Some(stage));
        }
    }
}
