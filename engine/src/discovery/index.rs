//! Static index discovery for HTTP sources
//!
//! An HTTP source publishes a JSON [`PluginIndex`]. The index lives at the
//! source URL itself when that ends in `.json`, otherwise at
//! `<url>/index.json`.

use async_trait::async_trait;
use sdk::discovery::{DiscoveryFilter, DiscoveryResult};
use sdk::errors::Result;
use sdk::interfaces::{Transport, TransportRequest};
use sdk::manifest::PluginIndex;
use sdk::source::{RemoteSource, SourceType};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::DiscoveryEngine;
use crate::downloader::classify_status;

/// Largest index document accepted
pub const MAX_INDEX_BYTES: u64 = 16 * 1024 * 1024;

/// GET `url` on behalf of `source` and parse a plugin index
pub(crate) async fn fetch_index(
    transport: &dyn Transport,
    source: &RemoteSource,
    url: &str,
    extra_headers: &HashMap<String, String>,
) -> Result<PluginIndex> {
    let request = TransportRequest::get(url)
        .with_header("Accept", "application/json")
        .with_headers(extra_headers.clone())
        .with_headers(source.request_headers())
        .with_timeout(source.timeout);

    let response = transport.request(request).await?;
    classify_status(response.status, url, false)?;
    let body = response.collect(MAX_INDEX_BYTES).await?;

    let index = PluginIndex::from_slice(&body)?;
    debug!("Index {} lists {} plugins", url, index.plugins.len());
    Ok(index)
}

/// Discovery engine for [`SourceType::Http`] sources
pub struct IndexEngine {
    transport: Arc<dyn Transport>,
    headers: HashMap<String, String>,
}

impl IndexEngine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            headers: HashMap::new(),
        }
    }

    /// Headers added to every index request
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Location of the index document for `source`
    pub fn index_url(source: &RemoteSource) -> String {
        let url = source.url.trim();
        if url.to_ascii_lowercase().ends_with(".json") {
            url.to_string()
        } else {
            format!("{}/index.json", url.trim_end_matches('/'))
        }
    }
}

#[async_trait]
impl DiscoveryEngine for IndexEngine {
    fn name(&self) -> &str {
        "index"
    }

    fn supported_types(&self) -> &[SourceType] {
        &[SourceType::Http]
    }

    async fn discover(
        &self,
        source: &RemoteSource,
        _filter: &DiscoveryFilter,
    ) -> Result<Vec<DiscoveryResult>> {
        let url = Self::index_url(source);
        let index = fetch_index(self.transport.as_ref(), source, &url, &self.headers).await?;
        Ok(index.into_results(&source.id, &url))
    }
}
