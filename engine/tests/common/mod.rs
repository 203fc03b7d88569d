//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use sdk::errors::{AcquireError, Result};
use sdk::interfaces::{Transport, TransportRequest, TransportResponse};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use warden_engine::config::AcquisitionConfig;

/// Canned answer for one URL
#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub body: Vec<u8>,
    pub chunk_size: usize,
    /// Pause before each body chunk
    pub chunk_delay: Duration,
    /// Fail this many requests with a network error before answering
    pub fail_times: usize,
    /// Break the first answered body after this many bytes
    pub break_after: Option<usize>,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            chunk_size: 1024,
            chunk_delay: Duration::ZERO,
            fail_times: 0,
            break_after: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::ok(Vec::new())
        }
    }

    pub fn slow(mut self, chunk_size: usize, chunk_delay: Duration) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.chunk_delay = chunk_delay;
        self
    }

    pub fn failing(mut self, times: usize) -> Self {
        self.fail_times = times;
        self
    }

    pub fn breaking_after(mut self, bytes: usize) -> Self {
        self.break_after = Some(bytes);
        self
    }
}

/// In-memory [`Transport`] with per-URL routes and request recording
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, url: &str, route: Route) {
        self.routes.lock().insert(url.to_string(), route);
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.route(url, Route::ok(body));
    }

    /// Requests made for `url`
    pub fn hits(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.url == url).count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests_for(&self, url: &str) -> Vec<TransportRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }
}

fn range_start(request: &TransportRequest) -> Option<usize> {
    request
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("range"))
        .and_then(|(_, v)| v.strip_prefix("bytes="))
        .and_then(|v| v.trim_end_matches('-').parse().ok())
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.requests.lock().push(request.clone());

        let route = {
            let mut routes = self.routes.lock();
            match routes.get_mut(&request.url) {
                None => None,
                Some(route) if route.fail_times > 0 => {
                    route.fail_times -= 1;
                    return Err(AcquireError::network("connection reset by peer"));
                }
                Some(route) => {
                    let answer = route.clone();
                    route.break_after = None;
                    Some(answer)
                }
            }
        };
        let Some(route) = route else {
            return Ok(TransportResponse {
                status: 404,
                headers: HashMap::new(),
                body: futures::stream::empty().boxed(),
            });
        };

        let (status, mut body) = match range_start(&request) {
            Some(start) if route.status == 200 && start < route.body.len() => {
                (206, route.body[start..].to_vec())
            }
            Some(start) if route.status == 200 && start >= route.body.len() => (416, Vec::new()),
            _ => (route.status, route.body.clone()),
        };

        let mut headers = HashMap::new();
        headers.insert("content-length".to_string(), body.len().to_string());

        let broken = route.break_after.filter(|n| *n < body.len());
        if let Some(n) = broken {
            body.truncate(n);
        }

        let chunks: Vec<Bytes> = body
            .chunks(route.chunk_size)
            .map(Bytes::copy_from_slice)
            .collect();
        let delay = route.chunk_delay;
        let stream = futures::stream::iter(chunks)
            .then(move |chunk| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(chunk)
            })
            .chain(futures::stream::iter(broken.map(|_| {
                Err(AcquireError::network("connection closed mid-body"))
            })));

        Ok(TransportResponse {
            status,
            headers,
            body: stream.boxed(),
        })
    }
}

/// Configuration rooted in a fresh temp dir with fast retries
pub fn test_config() -> (TempDir, AcquisitionConfig) {
    let dir = TempDir::new().expect("temp dir");
    let mut config = AcquisitionConfig::rooted_at(dir.path());
    config.network.backoff_base_ms = 1;
    config.network.backoff_max_ms = 5;
    (dir, config)
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256(data: &[u8]) -> String {
    warden_engine::hashing::sha256_hex(data)
}
