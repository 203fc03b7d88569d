//! reqwest-backed transport
//!
//! Status codes are passed through untouched; only connection-level failures
//! become errors. Elapsed request timeouts map to `AcquireError::Timeout`,
//! everything else to a retryable `AcquireError::Network`.

use async_trait::async_trait;
use futures::StreamExt;
use sdk::errors::{AcquireError, Result};
use sdk::interfaces::{Method, Transport, TransportRequest, TransportResponse};
use std::collections::HashMap;
use tracing::debug;

use crate::config::NetworkConfig;

/// Default [`Transport`] using a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport honoring the proxy and user agent of `network`
    ///
    /// # Errors
    ///
    /// Returns `AcquireError::Config` for an invalid proxy URL or when the
    /// TLS backend cannot be initialized.
    pub fn new(network: &NetworkConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(network.user_agent.clone())
            .timeout(network.timeout());

        if let Some(proxy) = &network.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| AcquireError::Config(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| AcquireError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(error: reqwest::Error) -> AcquireError {
    if error.is_timeout() {
        AcquireError::Timeout(error.to_string())
    } else {
        AcquireError::network(error.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
        };
        debug!("{} {}", method, request.url);

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error))
            .boxed();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_with_defaults() {
        assert!(HttpTransport::new(&NetworkConfig::default()).is_ok());
    }

    #[test]
    fn test_builds_with_proxy() {
        let network = NetworkConfig {
            proxy: Some("http://proxy.example.com:3128".to_string()),
            ..NetworkConfig::default()
        };
        assert!(HttpTransport::new(&network).is_ok());
    }
}
