use std::fmt;

use thiserror::Error;

use crate::types::{Category, DatasetRef, NO_DATASET_SENTINEL};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObjectKeyError {
    #[error("invalid object key {0:?}: expected at least owner/<name>")]
    TooFewSegments(String),
}

/// A storage key decomposed into the parts every stage keys off.
///
/// Clients occasionally upload with doubled or trailing separators
/// (`alice//trip/thumbnails/a.png`, `alice/trip/thumbnails/a.png/`), so the
/// decomposition tolerates empty segments instead of indexing positionally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPath {
    pub owner: String,
    /// First non-empty segment after the owner, or [`NO_DATASET_SENTINEL`].
    pub dataset: String,
    /// First non-empty segment strictly between the dataset and the leaf, when it
    /// names a known category.
    pub category: Option<Category>,
    pub leaf: String,
}

impl ObjectPath {
    pub fn parse(key: &str) -> Result<Self, ObjectKeyError> {
        let parts: Vec<&str> = key.split('/').collect();
        if parts.len() < 2 {
            return Err(ObjectKeyError::TooFewSegments(key.to_string()));
        }

        let owner = parts[0].to_string();

        let mut i = 1;
        while parts[i].is_empty() && i < parts.len() - 1 {
            i += 1;
        }
        let dataset_idx = i;
        let dataset = if parts[dataset_idx].is_empty() {
            NO_DATASET_SENTINEL.to_string()
        } else {
            parts[dataset_idx].to_string()
        };

        let leaf_idx = leaf_index(&parts);
        let leaf = parts[leaf_idx].to_string();

        let category = parts
            .get(dataset_idx + 1..leaf_idx)
            .unwrap_or_default()
            .iter()
            .find(|s| !s.is_empty())
            .and_then(|s| Category::from_segment(s));

        Ok(Self {
            owner,
            dataset,
            category,
            leaf,
        })
    }

    pub fn has_dataset(&self) -> bool {
        self.dataset != NO_DATASET_SENTINEL
    }

    pub fn dataset_ref(&self) -> DatasetRef {
        DatasetRef::new(self.owner.clone(), self.dataset.clone())
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            Some(c) => write!(f, "{}/{}/{}/{}", self.owner, self.dataset, c, self.leaf),
            None => write!(f, "{}/{}/{}", self.owner, self.dataset, self.leaf),
        }
    }
}

// Last segment, or the one before it when the key ends with a separator.
fn leaf_index(parts: &[&str]) -> usize {
    let last = parts.len() - 1;
    if parts[last].is_empty() && last > 0 {
        last - 1
    } else {
        last
    }
}

/// Leaf of a key without a full decomposition. Single-segment keys are their
/// own leaf.
pub fn leaf_of(key: &str) -> &str {
    let parts: Vec<&str> = key.split('/').collect();
    parts[leaf_index(&parts)]
}

/// Extension of a leaf name, if it has a non-empty one.
pub fn leaf_extension(leaf: &str) -> Option<&str> {
    let (_stem, ext) = leaf.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_key() {
        let p = ObjectPath::parse("alice/trip/thumbnails/a.png").unwrap();
        assert_eq!(p.owner, "alice");
        assert_eq!(p.dataset, "trip");
        assert_eq!(p.category, Some(Category::Thumbnails));
        assert_eq!(p.leaf, "a.png");
        assert_eq!(p.to_string(), "alice/trip/thumbnails/a.png");
    }

    #[test]
    fn parse_skips_repeated_separators() {
        let p = ObjectPath::parse("aj@example.com//coolest/original_images/my.jpg").unwrap();
        assert_eq!(p.owner, "aj@example.com");
        assert_eq!(p.dataset, "coolest");
        assert_eq!(p.category, Some(Category::OriginalImages));
        assert_eq!(p.leaf, "my.jpg");
    }

    #[test]
    fn parse_all_empty_tail_reports_sentinel() {
        let p = ObjectPath::parse("owner///").unwrap();
        assert_eq!(p.owner, "owner");
        assert_eq!(p.dataset, NO_DATASET_SENTINEL);
        assert!(!p.has_dataset());
        assert_eq!(p.category, None);
    }

    #[test]
    fn parse_trailing_separator_takes_previous_leaf() {
        let p = ObjectPath::parse("bob/coolest/original_images/myles.jpg/").unwrap();
        assert_eq!(p.leaf, "myles.jpg");
        assert_eq!(p.category, Some(Category::OriginalImages));
    }

    #[test]
    fn parse_rejects_single_segment() {
        assert_eq!(
            ObjectPath::parse("lonely"),
            Err(ObjectKeyError::TooFewSegments("lonely".to_string()))
        );
        assert!(ObjectPath::parse("").is_err());
    }

    #[test]
    fn unknown_category_segment_is_none() {
        let p = ObjectPath::parse("alice/trip/misc/a.png").unwrap();
        assert_eq!(p.category, None);
        let p = ObjectPath::parse("alice/trip/spritesheet.png").unwrap();
        assert_eq!(p.category, None);
        assert_eq!(p.leaf, "spritesheet.png");
    }

    #[test]
    fn extension_requires_non_empty_suffix() {
        assert_eq!(leaf_extension("a.png"), Some("png"));
        assert_eq!(leaf_extension("a.jpg.npy"), Some("npy"));
        assert_eq!(leaf_extension("thumbnails"), None);
        assert_eq!(leaf_extension("weird."), None);
        assert_eq!(leaf_of("alice/trip/thumbnails/"), "thumbnails");
        assert_eq!(leaf_of("x"), "x");
    }
}
