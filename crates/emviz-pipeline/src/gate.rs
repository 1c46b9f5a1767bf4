use std::sync::Arc;

use emviz_core::types::{Category, DatasetRef};
use emviz_store::{MetadataStore, StoreError};

use crate::catalog::{ArtifactCatalog, ArtifactSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Unknown,
    NotReady { observed: usize, expected: u32 },
    Ready(ArtifactSet),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }
}

/// `observed >= expected`; never fires below the registered count.
pub fn is_ready(observed: usize, expected: u32) -> bool {
    observed as u64 >= u64::from(expected)
}

/// Decides from a fresh listing whether a dataset category is complete.
///
/// Evaluation only reads. Any number of callers may evaluate the same dataset
/// at once and several of them may see `Ready`.
#[derive(Clone)]
pub struct ReadinessGate {
    metadata: Arc<dyn MetadataStore>,
    catalog: ArtifactCatalog,
}

impl ReadinessGate {
    pub fn new(metadata: Arc<dyn MetadataStore>, catalog: ArtifactCatalog) -> Self {
        Self { metadata, catalog }
    }

    pub fn evaluate(
        &self,
        dataset: &DatasetRef,
        category: Category,
    ) -> Result<Readiness, StoreError> {
        let Some(meta) = self.metadata.lookup(&dataset.owner, &dataset.dataset)? else {
            tracing::info!(
                target: "emviz_gate",
                event = "metadata_unknown",
                owner = %dataset.owner,
                dataset = %dataset.dataset,
                category = %category,
                "dataset not registered; waiting for a later notification"
            );
            return Ok(Readiness::Unknown);
        };

        let set = self.catalog.list(dataset, category)?;
        let observed = set.len();
        let expected = meta.expected_count;
        if is_ready(observed, expected) {
            tracing::info!(
                target: "emviz_gate",
                event = "ready",
                owner = %dataset.owner,
                dataset = %dataset.dataset,
                category = %category,
                observed,
                expected,
                "dataset category complete"
            );
            Ok(Readiness::Ready(set))
        } else {
            tracing::debug!(
                target: "emviz_gate",
                event = "not_ready",
                owner = %dataset.owner,
                dataset = %dataset.dataset,
                category = %category,
                observed,
                expected,
                "dataset category incomplete"
            );
            Ok(Readiness::NotReady { observed, expected })
        }
    }
}
