use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reported as the dataset name when a key has nothing after the owner.
pub const NO_DATASET_SENTINEL: &str = "No dataset found";

pub const SPRITESHEET_NAME: &str = "spritesheet.png";
pub const COORDINATES_NAME: &str = "coordinates.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    OriginalImages,
    Thumbnails,
    Embeddings,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::OriginalImages,
        Category::Thumbnails,
        Category::Embeddings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::OriginalImages => "original_images",
            Category::Thumbnails => "thumbnails",
            Category::Embeddings => "embeddings",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == segment)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two whole-dataset derivations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Spritesheet,
    Projection,
}

impl AggregateKind {
    pub const ALL: [AggregateKind; 2] = [AggregateKind::Spritesheet, AggregateKind::Projection];

    /// Fixed object name written directly under `owner/dataset/`.
    pub fn output_name(&self) -> &'static str {
        match self {
            AggregateKind::Spritesheet => SPRITESHEET_NAME,
            AggregateKind::Projection => COORDINATES_NAME,
        }
    }

    /// Category whose artifacts feed this aggregate.
    pub fn source_category(&self) -> Category {
        match self {
            AggregateKind::Spritesheet => Category::Thumbnails,
            AggregateKind::Projection => Category::Embeddings,
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateKind::Spritesheet => f.write_str("spritesheet"),
            AggregateKind::Projection => f.write_str("projection"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef {
    pub owner: String,
    pub dataset: String,
}

impl DatasetRef {
    pub fn new(owner: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            dataset: dataset.into(),
        }
    }

    /// `owner/dataset/category/`, the listing prefix of one category.
    pub fn category_prefix(&self, category: Category) -> String {
        format!("{}/{}/{}/", self.owner, self.dataset, category)
    }

    pub fn artifact_key(&self, category: Category, leaf: &str) -> String {
        format!("{}{}", self.category_prefix(category), leaf)
    }

    /// `owner/dataset/<fixed-name>`. Sits beside the category folders, never
    /// inside one, so no category listing can enumerate it.
    pub fn aggregate_key(&self, kind: AggregateKind) -> String {
        format!("{}/{}/{}", self.owner, self.dataset, kind.output_name())
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.dataset)
    }
}

/// Registration record written upstream before any photo arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub owner: String,
    pub dataset: String,
    /// Number of photos in the batch; every category expects this many artifacts.
    pub expected_count: u32,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub visualization: Option<String>,
    pub created_unix_time_ms: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatasetMetadataError {
    #[error("owner must be non-empty")]
    EmptyOwner,
    #[error("dataset must be non-empty")]
    EmptyDataset,
    #[error("expected_count must be > 0")]
    NonPositiveCount,
}

impl DatasetMetadata {
    pub fn dataset_ref(&self) -> DatasetRef {
        DatasetRef::new(self.owner.clone(), self.dataset.clone())
    }

    pub fn validate(&self) -> Result<(), DatasetMetadataError> {
        if self.owner.trim().is_empty() {
            return Err(DatasetMetadataError::EmptyOwner);
        }
        if self.dataset.trim().is_empty() {
            return Err(DatasetMetadataError::EmptyDataset);
        }
        if self.expected_count == 0 {
            return Err(DatasetMetadataError::NonPositiveCount);
        }
        Ok(())
    }
}
