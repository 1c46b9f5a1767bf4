//! In-memory backends for tests and local dry runs.
//!
//! Both stores count every call so tests can assert that a code path never
//! reached storage at all.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use emviz_core::types::DatasetMetadata;

use crate::{validate_registration, BlobStore, MetadataStore, StoreError};

fn poisoned() -> StoreError {
    StoreError::Runtime("lock poisoned".to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobOps {
    pub lists: u64,
    pub gets: u64,
    pub puts: u64,
}

impl BlobOps {
    pub fn total(&self) -> u64 {
        self.lists + self.gets + self.puts
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_put_markers: Mutex<Vec<String>>,
    lists: AtomicU64,
    gets: AtomicU64,
    puts: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object without counting it as a `put`.
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(key.into(), bytes.into());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .read()
            .map(|o| o.contains_key(key))
            .unwrap_or(false)
    }

    /// Raw bytes without counting a `get`.
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().ok()?.get(key).cloned()
    }

    /// Every later `put` whose key contains `marker` fails.
    pub fn fail_puts_containing(&self, marker: impl Into<String>) {
        if let Ok(mut markers) = self.fail_put_markers.lock() {
            markers.push(marker.into());
        }
    }

    pub fn ops(&self) -> BlobOps {
        BlobOps {
            lists: self.lists.load(Ordering::SeqCst),
            gets: self.gets.load(Ordering::SeqCst),
            puts: self.puts.load(Ordering::SeqCst),
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.read().map_err(|_| poisoned())?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        {
            let markers = self.fail_put_markers.lock().map_err(|_| poisoned())?;
            if markers.iter().any(|m| key.contains(m.as_str())) {
                return Err(StoreError::Runtime(format!("injected put failure: {key}")));
            }
        }
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    records: RwLock<BTreeMap<(String, String), DatasetMetadata>>,
    lookups: AtomicU64,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn lookup(&self, owner: &str, dataset: &str) -> Result<Option<DatasetMetadata>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .get(&(owner.to_string(), dataset.to_string()))
            .cloned())
    }

    fn register(&self, metadata: &DatasetMetadata) -> Result<(), StoreError> {
        validate_registration(metadata)?;
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let id = (metadata.owner.clone(), metadata.dataset.clone());
        match records.get(&id) {
            Some(existing) if existing == metadata => Ok(()),
            Some(_) => Err(StoreError::AlreadyExists(metadata.dataset_ref().to_string())),
            None => {
                records.insert(id, metadata.clone());
                Ok(())
            }
        }
    }

    fn datasets_for_owner(&self, owner: &str) -> Result<Vec<String>, StoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .keys()
            .filter(|(o, _)| o == owner)
            .map(|(_, d)| d.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_counts_calls_and_respects_prefix() -> anyhow::Result<()> {
        let store = MemoryBlobStore::new();
        store.insert("alice/trip/thumbnails/b.png", b"b".to_vec());
        store.insert("alice/trip/thumbnails/a.png", b"a".to_vec());
        store.insert("alice/trip2/thumbnails/a.png", b"x".to_vec());

        assert_eq!(
            store.list("alice/trip/")?,
            vec!["alice/trip/thumbnails/a.png", "alice/trip/thumbnails/b.png"]
        );
        assert_eq!(
            store.ops(),
            BlobOps {
                lists: 1,
                gets: 0,
                puts: 0
            }
        );
        Ok(())
    }

    #[test]
    fn injected_put_failure_surfaces() {
        let store = MemoryBlobStore::new();
        store.fail_puts_containing("spritesheet");
        assert!(matches!(
            store.put("alice/trip/spritesheet.png", b"x"),
            Err(StoreError::Runtime(_))
        ));
        assert!(!store.contains("alice/trip/spritesheet.png"));
        assert!(store.put("alice/trip/thumbnails/a.png", b"x").is_ok());
    }
}
