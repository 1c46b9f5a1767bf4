//! Which storage notifications a stage may act on.
//!
//! Aggregates are written back into the bucket that triggers the aggregators,
//! so every stage screens keys against one shared table before touching any
//! store. The table is keyed on the category a stage watches:
//!
//! | watched category   | rejected suffixes  |
//! |--------------------|--------------------|
//! | `original_images`  | `.npy`, `.json`    |
//! | `thumbnails`       | `.npy`, `.json`    |
//! | `embeddings`       | `.json`            |
//!
//! Independently of the table, a key is rejected when it names an aggregate
//! output anywhere in it, when its leaf has no extension (folder markers), or
//! when it decomposes into a category other than the watched one.

use crate::object_key::{leaf_extension, leaf_of, ObjectPath};
use crate::types::{AggregateKind, Category};

/// Substrings that mark a key as an aggregate output.
const RESERVED_OUTPUT_MARKERS: &[&str] = &["spritesheet", "coordinates.json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionRule {
    pub category: Category,
    pub denied_suffixes: &'static [&'static str],
}

pub const RULES: &[ExclusionRule] = &[
    ExclusionRule {
        category: Category::OriginalImages,
        denied_suffixes: &[".npy", ".json"],
    },
    ExclusionRule {
        category: Category::Thumbnails,
        denied_suffixes: &[".npy", ".json"],
    },
    ExclusionRule {
        category: Category::Embeddings,
        denied_suffixes: &[".json"],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AggregateOutput,
    ReservedSuffix,
    NoExtension,
    ForeignCategory,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::AggregateOutput => "aggregate_output",
            RejectReason::ReservedSuffix => "reserved_suffix",
            RejectReason::NoExtension => "no_extension",
            RejectReason::ForeignCategory => "foreign_category",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_admit(&self) -> bool {
        matches!(self, Verdict::Admit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionPolicy {
    rule: ExclusionRule,
}

impl ExclusionPolicy {
    pub fn for_category(category: Category) -> Self {
        let rule = RULES
            .iter()
            .copied()
            .find(|r| r.category == category)
            .unwrap_or(ExclusionRule {
                category,
                denied_suffixes: &[],
            });
        Self { rule }
    }

    pub fn for_aggregate(kind: AggregateKind) -> Self {
        Self::for_category(kind.source_category())
    }

    pub fn category(&self) -> Category {
        self.rule.category
    }

    /// String-only checks on the raw key. Never touches a store.
    pub fn screen(&self, key: &str) -> Verdict {
        if is_aggregate_output(key) {
            return Verdict::Reject(RejectReason::AggregateOutput);
        }
        let leaf = leaf_of(key);
        if self
            .rule
            .denied_suffixes
            .iter()
            .any(|suffix| leaf.ends_with(suffix))
        {
            return Verdict::Reject(RejectReason::ReservedSuffix);
        }
        if leaf_extension(leaf).is_none() {
            return Verdict::Reject(RejectReason::NoExtension);
        }
        Verdict::Admit
    }

    pub fn admit_path(&self, path: &ObjectPath) -> Verdict {
        if path.category != Some(self.rule.category) {
            return Verdict::Reject(RejectReason::ForeignCategory);
        }
        Verdict::Admit
    }
}

pub fn is_aggregate_output(key: &str) -> bool {
    RESERVED_OUTPUT_MARKERS.iter().any(|m| key.contains(m))
        || AggregateKind::ALL
            .iter()
            .any(|kind| key.ends_with(kind.output_name()))
}
