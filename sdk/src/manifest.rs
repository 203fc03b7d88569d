//! Plugin index document served by HTTP and registry sources

use crate::discovery::DiscoveryResult;
use serde::{Deserialize, Serialize};

/// Index document listing the plugins a source offers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginIndex {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub plugins: Vec<IndexEntry>,
}

impl PluginIndex {
    /// Get a plugin entry by id
    pub fn get_plugin(&self, id: &str) -> Option<&IndexEntry> {
        self.plugins.iter().find(|plugin| plugin.id == id)
    }

    /// Parse index from JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serialize index to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Convert every entry into a discovery result owned by `source_id`.
    ///
    /// Relative download URLs are resolved against `base_url`.
    pub fn into_results(self, source_id: &str, base_url: &str) -> Vec<DiscoveryResult> {
        self.plugins
            .into_iter()
            .map(|entry| entry.into_result(source_id, base_url))
            .collect()
    }
}

/// Plugin entry in an index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
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
    pub hash: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub rating: f32,
    #[serde(default)]
    pub verified: bool,
    #[serde(default = "default_free")]
    pub free: bool,
}

fn default_free() -> bool {
    true
}

impl IndexEntry {
    fn into_result(self, source_id: &str, base_url: &str) -> DiscoveryResult {
        let download_url = resolve_url(base_url, &self.download_url);
        DiscoveryResult {
            plugin_id: self.id,
            name: self.name,
            version: self.version,
            description: self.description,
            author: self.author,
            category: self.category,
            tags: self.tags,
            download_url,
            checksum: self.hash,
            signature: self.signature,
            size: self.size,
            rating: self.rating,
            verified: self.verified,
            free: self.free,
            source_id: source_id.to_string(),
        }
    }
}

fn resolve_url(base: &str, candidate: &str) -> String {
    if url::Url::parse(candidate).is_ok() {
        return candidate.to_string();
    }
    match url::Url::parse(base).and_then(|b| b.join(candidate)) {
        Ok(joined) => joined.to_string(),
        Err(_) => candidate.to_string(),
    }
}
