//! Discovery types
//!
//! Results produced by discovery engines and the filter applied to them.
//! Filtering itself lives in the engine (`FilterMatcher`) so that regex
//! patterns are compiled once per request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ordering applied to aggregated discovery results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Keep the caller-supplied source order
    #[default]
    Source,
    /// Name ascending
    Name,
    /// Rating descending
    Rating,
    /// Size ascending
    Size,
    /// Version descending
    Version,
}

/// Criteria a discovery result must satisfy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryFilter {
    /// Regex matched against the plugin name (case-insensitive)
    pub name_pattern: Option<String>,

    /// Regex matched against the author (case-insensitive)
    pub author_pattern: Option<String>,

    /// Exact category match
    pub category: Option<String>,

    pub required_tags: BTreeSet<String>,

    pub excluded_tags: BTreeSet<String>,

    pub min_rating: Option<f32>,

    /// Maximum package size in bytes
    pub max_size: Option<u64>,

    /// Only verified plugins
    pub verified_only: bool,

    /// Only free plugins
    pub free_only: bool,

    /// Zero-based page index
    pub page: usize,

    /// Results per page; zero means unlimited
    pub page_size: usize,

    pub sort: SortOrder,
}

impl DiscoveryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }

    pub fn with_author_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.author_pattern = Some(pattern.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn require_tag(mut self, tag: impl Into<String>) -> Self {
        self.required_tags.insert(tag.into());
        self
    }

    pub fn exclude_tag(mut self, tag: impl Into<String>) -> Self {
        self.excluded_tags.insert(tag.into());
        self
    }

    pub fn with_min_rating(mut self, rating: f32) -> Self {
        self.min_rating = Some(rating);
        self
    }

    pub fn with_max_size(mut self, size: u64) -> Self {
        self.max_size = Some(size);
        self
    }

    pub fn verified_only(mut self) -> Self {
        self.verified_only = true;
        self
    }

    pub fn free_only(mut self) -> Self {
        self.free_only = true;
        self
    }

    pub fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn sorted_by(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }
}

/// A candidate plugin reported by a discovery engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub plugin_id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub download_url: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    /// Package size in bytes; zero when unknown
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub rating: f32,
    #[serde(default)]
    pub verified: bool,
    #[serde(default = "default_free")]
    pub free: bool,
    /// Id of the source that reported this result
    pub source_id: String,
}

fn default_free() -> bool {
    true
}

impl DiscoveryResult {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Loader-agnostic plugin record handed to callers of the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub download_url: String,
    pub checksum: Option<String>,
    pub signature: Option<String>,
    pub size: u64,
    pub rating: f32,
    pub verified: bool,
    pub source_id: String,
}

impl From<DiscoveryResult> for PluginRecord {
    fn from(r: DiscoveryResult) -> Self {
        Self {
            id: r.plugin_id,
            name: r.name,
            version: r.version,
            description: r.description,
            author: r.author,
            tags: r.tags,
            download_url: r.download_url,
            checksum: r.checksum,
            signature: r.signature,
            size: r.size,
            rating: r.rating,
            verified: r.verified,
            source_id: r.source_id,
        }
    }
}
