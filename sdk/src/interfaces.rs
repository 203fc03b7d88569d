//! Collaborator interfaces
//!
//! The acquisition pipeline never depends on a concrete HTTP stack, a
//! concrete signature scheme, or a concrete plugin runtime. It talks to them
//! through the three narrow traits defined here:
//!
//! - [`Transport`]: issue a request, receive a streamed response
//! - [`SigningBackend`]: verify a detached signature over artifact bytes
//! - [`PluginLoader`]: turn a validated file into a running plugin

use crate::errors::{AcquireError, Result};
use crate::source::RemoteSource;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP-like request method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

/// Request handed to a [`Transport`]
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Streamed response produced by a [`Transport`]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Value of the `Content-Length` header
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Collect the whole body, refusing to buffer more than `limit` bytes
    pub async fn collect(mut self, limit: u64) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.body.next().await {
            let chunk = chunk?;
            if (buffer.len() + chunk.len()) as u64 > limit {
                return Err(AcquireError::SizeExceeded {
                    size: (buffer.len() + chunk.len()) as u64,
                    limit,
                });
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer)
    }
}

/// Network transport used for discovery and downloads
///
/// Implementations map connection failures to [`AcquireError::Network`] and
/// elapsed request timeouts to [`AcquireError::Timeout`]. Non-2xx statuses
/// are returned as responses, not errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Result of a signature check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureVerdict {
    pub valid: bool,
    pub signer: Option<String>,
    pub algorithm: String,
}

/// Signature verification backend
pub trait SigningBackend: Send + Sync {
    /// Verify a detached `signature` over `data`
    fn verify(&self, data: &[u8], signature: &[u8]) -> SignatureVerdict;
}

/// Handle to a plugin produced by the external loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginHandle {
    pub id: String,
    pub path: PathBuf,
    pub metadata: HashMap<String, String>,
}

/// External loader turning a validated artifact into a plugin instance
///
/// Failures are reported as [`AcquireError::LoadFailed`].
#[async_trait]
pub trait PluginLoader: Send + Sync {
    async fn load(&self, artifact: &Path, source: &RemoteSource) -> Result<PluginHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, chunks: Vec<&'static [u8]>) -> TransportResponse {
        let mut headers = HashMap::new();
        headers.insert("content-length".to_string(), "6".to_string());
        TransportResponse {
            status,
            headers,
            body: futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
                .boxed(),
        }
    }

    #[tokio::test]
    async fn test_collect_body() {
        let resp = response(200, vec![b"abc", b"def"]);
        assert!(resp.is_success());
        assert_eq!(resp.content_length(), Some(6));
        assert_eq!(resp.header("Content-Length"), Some("6"));
        assert_eq!(resp.collect(1024).await.unwrap(), b"abcdef".to_vec());
    }

    #[tokio::test]
    async fn test_collect_respects_limit() {
        let resp = response(200, vec![b"abc", b"def"]);
        let err = resp.collect(4).await.unwrap_err();
        assert!(matches!(err, AcquireError::SizeExceeded { limit: 4, .. }));
    }
}
