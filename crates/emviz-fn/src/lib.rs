#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

//! Shared wiring for the `emviz-*` binaries.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use emviz_core::types::{AggregateKind, DatasetRef};
use emviz_store::{BlobStore, StoreError};
use emviz_pipeline::{
    handler_for, NotificationHandler, Outcome, PipelineConfig, Stage, StageStores,
};

/// Where a deployment keeps its buckets and registration records.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub store_root: String,
    pub metadata_root: String,
    pub output_bucket: String,
}

impl Deployment {
    /// Wires `stage` for notifications arriving from `source_bucket`.
    ///
    /// Aggregation stages are triggered by the output bucket itself, so for
    /// them the source bucket is ignored.
    pub fn handler(
        &self,
        stage: Stage,
        source_bucket: &str,
        cfg: &PipelineConfig,
    ) -> Result<Arc<dyn NotificationHandler>> {
        let output = emviz_store::open_blob_store(&self.store_root, &self.output_bucket)
            .with_context(|| format!("open output bucket {:?}", self.output_bucket))?;
        let source = if stage.aggregate_kind().is_some() || source_bucket == self.output_bucket {
            output.clone()
        } else {
            emviz_store::open_blob_store(&self.store_root, source_bucket)
                .with_context(|| format!("open source bucket {source_bucket:?}"))?
        };
        let metadata = emviz_store::open_metadata_store(&self.metadata_root)
            .with_context(|| format!("open metadata root {:?}", self.metadata_root))?;

        tracing::info!(
            target: "emviz_fn",
            event = "stage_wired",
            stage = %stage,
            store_root = %self.store_root,
            source_bucket,
            output_bucket = %self.output_bucket,
            "stage ready"
        );
        Ok(handler_for(
            stage,
            StageStores {
                source,
                output,
                metadata,
            },
            cfg,
        ))
    }

    /// Reads a finished aggregate back out of the output bucket.
    pub fn fetch(&self, dataset: &DatasetRef, kind: AggregateKind) -> Result<Vec<u8>> {
        for part in [&dataset.owner, &dataset.dataset] {
            if !emviz_store::validate_key_component(part) {
                anyhow::bail!("invalid owner or dataset name {part:?}");
            }
        }
        let output = emviz_store::open_blob_store(&self.store_root, &self.output_bucket)
            .with_context(|| format!("open output bucket {:?}", self.output_bucket))?;
        let key = dataset.aggregate_key(kind);
        match output.get(&key) {
            Ok(bytes) => Ok(bytes),
            Err(StoreError::NotFound(_)) => {
                anyhow::bail!("{dataset} has no {kind} yet ({key} not written)")
            }
            Err(e) => Err(e).with_context(|| format!("read {key}")),
        }
    }
}

pub fn parse_aggregate_kind(s: &str) -> Result<AggregateKind> {
    Stage::parse(s)
        .and_then(|stage| stage.aggregate_kind())
        .ok_or_else(|| {
            anyhow::anyhow!("invalid aggregate {s:?} (expected spritesheet|projection)")
        })
}

pub fn parse_stage(s: &str) -> Result<Stage> {
    Stage::parse(s).ok_or_else(|| {
        anyhow::anyhow!(
            "invalid stage {s:?} (expected spritesheet|projection|thumbnail|embedding)"
        )
    })
}

pub fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Skipped(reason) => format!("skipped ({})", reason.as_str()),
        Outcome::Unregistered => "unregistered (dataset has no metadata yet)".to_string(),
        Outcome::NotReady { observed, expected } => {
            format!("not ready ({observed}/{expected})")
        }
        Outcome::Aggregated {
            output_key,
            artifacts,
            bytes,
        } => format!("aggregated {artifacts} artifacts into {output_key} ({bytes} bytes)"),
        Outcome::Derived { output_key } => format!("wrote {output_key}"),
    }
}

/// One object key per line. Blank lines and `#` comments are ignored.
pub fn read_keys(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read notification list {}", path.display()))?;
    Ok(parse_keys(&text))
}

pub fn parse_keys(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use emviz_core::exclusion::RejectReason;
    use emviz_pipeline::SkipReason;

    #[test]
    fn key_lists_skip_comments_and_blanks() {
        let text = "# batch 1\nalice/trip/thumbnails/a.png\n\n  alice/trip/thumbnails/b.png  \n";
        let keys = parse_keys(text);
        assert_eq!(
            keys,
            vec!["alice/trip/thumbnails/a.png", "alice/trip/thumbnails/b.png"]
        );
    }

    #[test]
    fn outcomes_render_for_humans() {
        assert_eq!(
            describe(&Outcome::NotReady {
                observed: 2,
                expected: 3
            }),
            "not ready (2/3)"
        );
        assert_eq!(
            describe(&Outcome::Skipped(SkipReason::Rejected(
                RejectReason::AggregateOutput
            ))),
            "skipped (aggregate_output)"
        );
    }

    #[test]
    fn only_aggregating_stages_name_an_aggregate() {
        assert_eq!(
            parse_aggregate_kind("coordinates").ok(),
            Some(AggregateKind::Projection)
        );
        assert_eq!(
            parse_aggregate_kind("Spritesheet").ok(),
            Some(AggregateKind::Spritesheet)
        );
        assert!(parse_aggregate_kind("thumbnail").is_err());
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!(parse_stage("resize").is_err());
        assert_eq!(parse_stage("tsne").ok(), Some(Stage::Projection));
    }
}
