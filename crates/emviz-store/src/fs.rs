use std::path::{Path, PathBuf};

use emviz_core::types::DatasetMetadata;

use crate::{
    validate_key_component, validate_object_key, validate_registration, write_atomic,
    write_staged, BlobStore, MetadataStore, StoreError,
};

const STAGING_DIR: &str = ".emviz-staging";

// Key `a/b/c.png` lives at `<root>/a/b/c.png`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_object_key(key)?;
        let mut path = self.root.clone();
        for seg in key.split('/') {
            path.push(seg);
        }
        Ok(path)
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    // Deepest existing directory implied by `prefix`, and its key form.
    fn walk_start(&self, prefix: &str) -> (PathBuf, String) {
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let mut dir = self.root.clone();
        let mut key = String::new();
        for seg in dir_part.split('/').filter(|s| !s.is_empty()) {
            dir.push(seg);
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(seg);
        }
        (dir, key)
    }
}

impl BlobStore for FsBlobStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let (start_dir, start_key) = self.walk_start(prefix);
        let mut out = Vec::new();
        let mut stack = vec![(start_dir, start_key)];

        while let Some((dir, dir_key)) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StoreError::Io(err)),
            };
            for entry in entries {
                let entry = entry?;
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if dir_key.is_empty() && name == STAGING_DIR {
                    continue;
                }
                let key = if dir_key.is_empty() {
                    name
                } else {
                    format!("{dir_key}/{name}")
                };
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    stack.push((entry.path(), key));
                } else if file_type.is_file() && key.starts_with(prefix) {
                    out.push(key);
                }
            }
        }

        out.sort();
        Ok(out)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        write_atomic(&self.staging_dir(), &path, bytes)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FsMetadataStore {
    root: PathBuf,
}

impl FsMetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, owner: &str, dataset: &str) -> PathBuf {
        self.root.join(owner).join(format!("{dataset}.json"))
    }
}

impl MetadataStore for FsMetadataStore {
    fn lookup(&self, owner: &str, dataset: &str) -> Result<Option<DatasetMetadata>, StoreError> {
        // Nothing unsafe to name on disk can have been registered.
        if !validate_key_component(owner) || !validate_key_component(dataset) {
            return Ok(None);
        }
        let path = self.record_path(owner, dataset);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn register(&self, metadata: &DatasetMetadata) -> Result<(), StoreError> {
        validate_registration(metadata)?;
        let path = self.record_path(&metadata.owner, &metadata.dataset);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(metadata)?;
        let staged = write_staged(&self.root.join(STAGING_DIR), &bytes)?;
        // hard_link refuses to replace, which makes the publish create-only.
        let linked = std::fs::hard_link(&staged, &path);
        let _ = std::fs::remove_file(&staged);

        match linked {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = std::fs::read(&path)?;
                let existing: DatasetMetadata = serde_json::from_slice(&existing)?;
                if &existing == metadata {
                    Ok(())
                } else {
                    Err(StoreError::AlreadyExists(metadata.dataset_ref().to_string()))
                }
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn datasets_for_owner(&self, owner: &str) -> Result<Vec<String>, StoreError> {
        if !validate_key_component(owner) {
            return Ok(Vec::new());
        }
        let entries = match std::fs::read_dir(self.root.join(owner)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::Io(err)),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(dataset) = name.strip_suffix(".json") {
                out.push(dataset.to_string());
            }
        }
        out.sort();
        Ok(out)
    }
}
