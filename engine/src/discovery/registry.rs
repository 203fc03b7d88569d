//! Registry API discovery
//!
//! Registry sources expose `GET <url>/api/v1/plugins` for listing and
//! `GET <url>/api/v1/plugins?q=<query>` for server-side search. Both answer
//! with the plugin index document shape.

use async_trait::async_trait;
use sdk::discovery::{DiscoveryFilter, DiscoveryResult};
use sdk::errors::{AcquireError, Result};
use sdk::interfaces::Transport;
use sdk::source::{RemoteSource, SourceType};
use std::collections::HashMap;
use std::sync::Arc;

use super::index::fetch_index;
use super::DiscoveryEngine;

const PLUGINS_PATH: &str = "api/v1/plugins";

/// Discovery engine for [`SourceType::Registry`] sources
pub struct RegistryEngine {
    transport: Arc<dyn Transport>,
    headers: HashMap<String, String>,
}

impl RegistryEngine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            headers: HashMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Listing endpoint for `source`, with an optional search query
    pub fn endpoint(source: &RemoteSource, query: Option<&str>) -> Result<String> {
        let base = format!("{}/", source.url.trim().trim_end_matches('/'));
        let mut url = url::Url::parse(&base)
            .and_then(|b| b.join(PLUGINS_PATH))
            .map_err(|e| AcquireError::InvalidSource(format!("Malformed registry URL: {}", e)))?;
        if let Some(query) = query {
            url.query_pairs_mut().append_pair("q", query);
        }
        Ok(url.to_string())
    }

    async fn list(&self, source: &RemoteSource, query: Option<&str>) -> Result<Vec<DiscoveryResult>> {
        let url = Self::endpoint(source, query)?;
        let index = fetch_index(self.transport.as_ref(), source, &url, &self.headers).await?;
        Ok(index.into_results(&source.id, &url))
    }
}

#[async_trait]
impl DiscoveryEngine for RegistryEngine {
    fn name(&self) -> &str {
        "registry"
    }

    fn supported_types(&self) -> &[SourceType] {
        &[SourceType::Registry]
    }

    async fn discover(
        &self,
        source: &RemoteSource,
        _filter: &DiscoveryFilter,
    ) -> Result<Vec<DiscoveryResult>> {
        self.list(source, None).await
    }

    async fn search(
        &self,
        source: &RemoteSource,
        query: &str,
        _filter: &DiscoveryFilter,
    ) -> Result<Vec<DiscoveryResult>> {
        self.list(source, Some(query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let source = RemoteSource::new("https://registry.example.com/", SourceType::Registry);
        assert_eq!(
            RegistryEngine::endpoint(&source, None).unwrap(),
            "https://registry.example.com/api/v1/plugins"
        );
        assert_eq!(
            RegistryEngine::endpoint(&source, Some("log tool")).unwrap(),
            "https://registry.example.com/api/v1/plugins?q=log+tool"
        );

        let nested = RemoteSource::new("https://example.com/registry", SourceType::Registry);
        assert_eq!(
            RegistryEngine::endpoint(&nested, None).unwrap(),
            "https://example.com/registry/api/v1/plugins"
        );
    }
}
