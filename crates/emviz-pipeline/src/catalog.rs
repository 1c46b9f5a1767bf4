use std::sync::Arc;

use emviz_core::object_key::{leaf_extension, leaf_of};
use emviz_core::types::{Category, DatasetRef};
use emviz_store::{BlobStore, StoreError};

/// Every artifact of one category of one dataset, in ascending key order.
///
/// The position of a key here is its position in the aggregate (spritesheet
/// column, coordinate row), so the order must not depend on listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    dataset: DatasetRef,
    category: Category,
    keys: Vec<String>,
}

impl ArtifactSet {
    pub fn new(dataset: DatasetRef, category: Category, mut keys: Vec<String>) -> Self {
        keys.sort();
        keys.dedup();
        Self {
            dataset,
            category,
            keys,
        }
    }

    pub fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Read-only view over the artifacts in a blob store.
#[derive(Clone)]
pub struct ArtifactCatalog {
    store: Arc<dyn BlobStore>,
}

impl ArtifactCatalog {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub fn list(&self, dataset: &DatasetRef, category: Category) -> Result<ArtifactSet, StoreError> {
        let prefix = dataset.category_prefix(category);
        let keys = self
            .store
            .list(&prefix)?
            .into_iter()
            .filter(|key| is_artifact_key(&prefix, key))
            .collect();
        Ok(ArtifactSet::new(dataset.clone(), category, keys))
    }
}

// Folder placeholders and extension-less leaves are not artifacts.
fn is_artifact_key(prefix: &str, key: &str) -> bool {
    let Some(rest) = key.strip_prefix(prefix) else {
        return false;
    };
    if rest.is_empty() || rest.ends_with('/') {
        return false;
    }
    leaf_extension(leaf_of(rest)).is_some()
}
