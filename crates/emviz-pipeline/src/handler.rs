use std::sync::Arc;

use emviz_core::exclusion::ExclusionPolicy;
use emviz_core::types::AggregateKind;
use emviz_observe::metrics::{ScopedTimer, StageMetrics};
use emviz_store::{BlobStore, MetadataStore};
use sha2::{Digest, Sha256};

use crate::aggregate::Aggregator;
use crate::catalog::ArtifactCatalog;
use crate::gate::{Readiness, ReadinessGate};
use crate::{
    record_outcome, screen_notification, HandlerError, Notification, NotificationHandler, Outcome,
    Stage,
};

/// Runs the completion barrier for one aggregate kind.
///
/// Stateless between calls: every notification re-derives readiness from a
/// fresh listing, so redelivered, reordered or concurrent notifications all
/// converge on the same aggregate bytes.
pub struct AggregationHandler {
    store: Arc<dyn BlobStore>,
    gate: ReadinessGate,
    aggregator: Arc<dyn Aggregator>,
    policy: ExclusionPolicy,
    metrics: Arc<StageMetrics>,
}

impl AggregationHandler {
    pub fn new(
        store: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        aggregator: Arc<dyn Aggregator>,
    ) -> Self {
        let catalog = ArtifactCatalog::new(store.clone());
        let policy = ExclusionPolicy::for_aggregate(aggregator.kind());
        Self {
            store,
            gate: ReadinessGate::new(metadata, catalog),
            aggregator,
            policy,
            metrics: Arc::new(StageMetrics::default()),
        }
    }

    fn run(&self, notification: &Notification) -> Result<Outcome, HandlerError> {
        let path = match screen_notification(&self.policy, &notification.key) {
            Ok(path) => path,
            Err(reason) => return Ok(Outcome::Skipped(reason)),
        };

        let dataset = path.dataset_ref();
        let set = match self.gate.evaluate(&dataset, self.policy.category())? {
            Readiness::Unknown => return Ok(Outcome::Unregistered),
            Readiness::NotReady { observed, expected } => {
                return Ok(Outcome::NotReady { observed, expected })
            }
            Readiness::Ready(set) => set,
        };

        let bytes = self.aggregator.aggregate(self.store.as_ref(), &set)?;
        let output_key = dataset.aggregate_key(self.aggregator.kind());
        self.store.put(&output_key, &bytes)?;

        tracing::info!(
            target: "emviz_gate",
            event = "aggregate_written",
            owner = %dataset.owner,
            dataset = %dataset.dataset,
            category = %set.category(),
            artifacts = set.len(),
            output_key = %output_key,
            output_bytes = bytes.len(),
            output_sha256 = %sha256_hex(&bytes),
            "aggregate written"
        );
        Ok(Outcome::Aggregated {
            output_key,
            artifacts: set.len(),
            bytes: bytes.len(),
        })
    }
}

impl NotificationHandler for AggregationHandler {
    fn stage(&self) -> Stage {
        match self.aggregator.kind() {
            AggregateKind::Spritesheet => Stage::Spritesheet,
            AggregateKind::Projection => Stage::Projection,
        }
    }

    fn handle(&self, notification: &Notification) -> Result<Outcome, HandlerError> {
        self.metrics.notifications.inc();
        let result = {
            let _timer = ScopedTimer::new(&self.metrics.work_time);
            self.run(notification)
        };
        if let Err(e) = &result {
            tracing::error!(
                target: "emviz_gate",
                event = "aggregate_failed",
                bucket = %notification.bucket,
                key = %notification.key,
                error = %e,
                "aggregation failed; left to redelivery"
            );
        }
        record_outcome(&self.metrics, &result);
        result
    }

    fn metrics(&self) -> Arc<StageMetrics> {
        self.metrics.clone()
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spritesheet::SpritesheetBuilder;
    use crate::SkipReason;
    use emviz_core::exclusion::RejectReason;
    use emviz_store::memory::{MemoryBlobStore, MemoryMetadataStore};

    fn handler() -> (Arc<MemoryBlobStore>, Arc<MemoryMetadataStore>, AggregationHandler) {
        let blobs = Arc::new(MemoryBlobStore::new());
        let meta = Arc::new(MemoryMetadataStore::new());
        let h = AggregationHandler::new(blobs.clone(), meta.clone(), Arc::new(SpritesheetBuilder));
        (blobs, meta, h)
    }

    #[test]
    fn aggregate_outputs_never_reach_a_store() -> anyhow::Result<()> {
        let (blobs, meta, h) = handler();
        for key in [
            "alice/trip/spritesheet.png",
            "alice/trip/thumbnails/spritesheet.png",
            "alice/trip/coordinates.json",
            "alice/trip/thumbnails/a.png.npy",
            "alice/trip/thumbnails/",
        ] {
            let out = h.handle(&Notification::new("out", key))?;
            assert!(matches!(out, Outcome::Skipped(SkipReason::Rejected(_))), "{key}: {out:?}");
        }
        assert_eq!(blobs.ops().total(), 0);
        assert_eq!(meta.lookups(), 0);
        assert_eq!(h.metrics().snapshot().skipped, 5);
        Ok(())
    }

    #[test]
    fn foreign_category_and_bad_keys_are_skipped() -> anyhow::Result<()> {
        let (blobs, meta, h) = handler();
        assert_eq!(
            h.handle(&Notification::new("out", "alice/trip/embeddings/a.png"))?,
            Outcome::Skipped(SkipReason::Rejected(RejectReason::ForeignCategory))
        );
        assert_eq!(
            h.handle(&Notification::new("out", "a.png"))?,
            Outcome::Skipped(SkipReason::InvalidKey)
        );
        assert_eq!(blobs.ops().total(), 0);
        assert_eq!(meta.lookups(), 0);
        Ok(())
    }

    #[test]
    fn unregistered_dataset_is_a_quiet_no_op() -> anyhow::Result<()> {
        let (blobs, meta, h) = handler();
        blobs.insert("alice/trip/thumbnails/a.png", b"a".to_vec());
        let out = h.handle(&Notification::new("out", "alice/trip/thumbnails/a.png"))?;
        assert_eq!(out, Outcome::Unregistered);
        assert_eq!(meta.lookups(), 1);
        assert_eq!(blobs.ops().puts, 0);
        Ok(())
    }

    #[test]
    fn digest_is_lower_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
