//! Discovery coordination
//!
//! The [`DiscoveryCoordinator`] fans a listing or search query out to one
//! [`DiscoveryEngine`] per source and aggregates the answers. A failing source
//! (timeout, network error, no engine for its type) is recorded in the
//! response and never aborts the others; partial success is the normal case.
//!
//! Per-source calls run with bounded parallelism. Completion order is
//! arbitrary, but the aggregated results keep the caller-supplied source order.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use warden_engine::config::DiscoveryConfig;
//! use warden_engine::discovery::{DiscoveryCoordinator, IndexEngine};
//! use warden_engine::events::EventBus;
//! use warden_engine::transport::HttpTransport;
//! use warden_engine::sdk::{DiscoveryFilter, RemoteSource, SourceType};
//!
//! # async fn example() -> warden_engine::sdk::Result<()> {
//! let transport = Arc::new(HttpTransport::new(&Default::default())?);
//! let coordinator = DiscoveryCoordinator::new(DiscoveryConfig::default(), Arc::new(EventBus::new()));
//! coordinator.register_engine(Arc::new(IndexEngine::new(transport)));
//!
//! let sources = vec![RemoteSource::new("https://good.example.com", SourceType::Http)];
//! let response = coordinator.discover(&sources, &DiscoveryFilter::new()).await?;
//! println!("{} plugins, success rate {:.0}%", response.results.len(), response.success_rate * 100.0);
//! # Ok(())
//! # }
//! ```

pub mod filter;
pub mod index;
pub mod registry;

pub use filter::FilterMatcher;
pub use index::IndexEngine;
pub use registry::RegistryEngine;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use sdk::discovery::{DiscoveryFilter, DiscoveryResult};
use sdk::errors::{AcquireError, Result};
use sdk::source::{RemoteSource, SourceType};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DiscoveryConfig;
use crate::events::{Event, EventBus};

/// A pluggable component able to list candidate plugins for one source type
#[async_trait]
pub trait DiscoveryEngine: Send + Sync {
    fn name(&self) -> &str;

    fn supported_types(&self) -> &[SourceType];

    fn supports(&self, source: &RemoteSource) -> bool {
        self.supported_types().contains(&source.source_type)
    }

    async fn discover(
        &self,
        source: &RemoteSource,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<DiscoveryResult>>;

    /// Free-text search; by default a case-insensitive substring match on
    /// name, description and tags over the `discover` output
    async fn search(
        &self,
        source: &RemoteSource,
        query: &str,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<DiscoveryResult>> {
        let needle = query.to_lowercase();
        let results = self.discover(source, filter).await?;
        Ok(results
            .into_iter()
            .filter(|r| {
                r.name.to_lowercase().contains(&needle)
                    || r.description.to_lowercase().contains(&needle)
                    || r.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryStatus {
    Completed,
    Cancelled,
}

/// Aggregated answer of a discovery or search
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResponse {
    pub results: Vec<DiscoveryResult>,
    /// Matches before pagination
    pub total_count: usize,
    pub queried_sources: usize,
    /// Ids of failed sources, in caller order
    pub failed_sources: Vec<String>,
    /// Source id -> failure message
    pub error_messages: BTreeMap<String, String>,
    /// `(queried - failed) / queried`
    pub success_rate: f64,
    pub duration: Duration,
    pub status: DiscoveryStatus,
}

/// Per-source progress of an async discovery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryProgress {
    pub operation_id: String,
    pub source_id: String,
    pub succeeded: bool,
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
}

/// Handle to an async discovery
pub struct DiscoveryOperation {
    pub id: String,
    /// One message per finished source
    pub progress: mpsc::UnboundedReceiver<DiscoveryProgress>,
    result: oneshot::Receiver<Result<DiscoveryResponse>>,
}

impl DiscoveryOperation {
    /// Wait for the single terminal result
    pub async fn wait(self) -> Result<DiscoveryResponse> {
        self.result.await.unwrap_or_else(|_| {
            Err(AcquireError::Io(
                "discovery task ended without a result".to_string(),
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    pub operations: u64,
    pub sources_queried: u64,
    pub sources_failed: u64,
    pub results_returned: u64,
}

#[derive(Debug, Clone)]
enum Query {
    Discover,
    Search(String),
}

#[derive(Default)]
struct Counters {
    operations: AtomicU64,
    sources_queried: AtomicU64,
    sources_failed: AtomicU64,
    results_returned: AtomicU64,
}

struct Inner {
    config: DiscoveryConfig,
    events: Arc<EventBus>,
    engines: RwLock<HashMap<SourceType, Vec<Arc<dyn DiscoveryEngine>>>>,
    operations: Mutex<HashMap<String, CancellationToken>>,
    counters: Counters,
}

/// Fans discovery queries out to per-type engines
#[derive(Clone)]
pub struct DiscoveryCoordinator {
    inner: Arc<Inner>,
}

impl DiscoveryCoordinator {
    pub fn new(config: DiscoveryConfig, events: Arc<EventBus>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                events,
                engines: RwLock::new(HashMap::new()),
                operations: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Register an engine for every type it supports.
    ///
    /// Engines registered earlier win when several support a source.
    pub fn register_engine(&self, engine: Arc<dyn DiscoveryEngine>) {
        let mut engines = self.inner.engines.write();
        for source_type in engine.supported_types() {
            engines
                .entry(*source_type)
                .or_default()
                .push(Arc::clone(&engine));
        }
        info!("Registered discovery engine '{}'", engine.name());
    }

    pub fn engine_count(&self) -> usize {
        self.inner.engines.read().values().map(Vec::len).sum()
    }

    /// List plugins across `sources`
    ///
    /// # Errors
    ///
    /// Only configuration errors fail the call: an empty source list or an
    /// invalid filter (`InvalidArgument`), or no engines at all
    /// (`NotSupported`). Source failures are reported in the response.
    pub async fn discover(
        &self,
        sources: &[RemoteSource],
        filter: &DiscoveryFilter,
    ) -> Result<DiscoveryResponse> {
        let id = Uuid::new_v4().to_string();
        execute(
            &self.inner,
            &id,
            Query::Discover,
            sources.to_vec(),
            filter,
            CancellationToken::new(),
            None,
        )
        .await
    }

    /// Free-text search across `sources`
    pub async fn search(
        &self,
        sources: &[RemoteSource],
        query: &str,
        filter: &DiscoveryFilter,
    ) -> Result<DiscoveryResponse> {
        let id = Uuid::new_v4().to_string();
        execute(
            &self.inner,
            &id,
            Query::Search(query.to_string()),
            sources.to_vec(),
            filter,
            CancellationToken::new(),
            None,
        )
        .await
    }

    /// Start a discovery in the background
    pub fn discover_async(
        &self,
        sources: Vec<RemoteSource>,
        filter: DiscoveryFilter,
    ) -> DiscoveryOperation {
        self.spawn(Query::Discover, sources, filter)
    }

    /// Start a search in the background
    pub fn search_async(
        &self,
        sources: Vec<RemoteSource>,
        query: &str,
        filter: DiscoveryFilter,
    ) -> DiscoveryOperation {
        self.spawn(Query::Search(query.to_string()), sources, filter)
    }

    fn spawn(
        &self,
        query: Query,
        sources: Vec<RemoteSource>,
        filter: DiscoveryFilter,
    ) -> DiscoveryOperation {
        let id = Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();

        self.inner
            .operations
            .lock()
            .insert(id.clone(), token.clone());

        let inner = Arc::clone(&self.inner);
        let op_id = id.clone();
        tokio::spawn(async move {
            let result = execute(
                &inner,
                &op_id,
                query,
                sources,
                &filter,
                token,
                Some(progress_tx),
            )
            .await;
            inner.operations.lock().remove(&op_id);
            let _ = result_tx.send(result);
        });

        DiscoveryOperation {
            id,
            progress: progress_rx,
            result: result_rx,
        }
    }

    /// Cancel an async discovery; finished per-source results are kept
    pub fn cancel(&self, id: &str) -> Result<()> {
        let token = self
            .inner
            .operations
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| AcquireError::NotFound(format!("discovery operation {}", id)))?;
        token.cancel();
        info!("Cancelled discovery {}", id);
        Ok(())
    }

    pub fn active_operations(&self) -> usize {
        self.inner.operations.lock().len()
    }

    pub fn stats(&self) -> DiscoveryStats {
        let c = &self.inner.counters;
        DiscoveryStats {
            operations: c.operations.load(Ordering::Relaxed),
            sources_queried: c.sources_queried.load(Ordering::Relaxed),
            sources_failed: c.sources_failed.load(Ordering::Relaxed),
            results_returned: c.results_returned.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    fn engine_for(&self, source: &RemoteSource) -> Option<Arc<dyn DiscoveryEngine>> {
        self.engines
            .read()
            .get(&source.source_type)
            .and_then(|engines| engines.iter().find(|e| e.supports(source)).cloned())
    }
}

async fn query_source(
    engine: Option<Arc<dyn DiscoveryEngine>>,
    source: &RemoteSource,
    query: &Query,
    filter: &DiscoveryFilter,
    timeout: Duration,
) -> Result<Vec<DiscoveryResult>> {
    let engine = engine.ok_or_else(|| {
        AcquireError::NotSupported(format!(
            "no discovery engine for type {}",
            source.source_type
        ))
    })?;

    let call = async {
        match query {
            Query::Discover => engine.discover(source, filter).await,
            Query::Search(text) => engine.search(source, text, filter).await,
        }
    };
    tokio::time::timeout(timeout, call).await.unwrap_or_else(|_| {
        Err(AcquireError::Timeout(format!(
            "discovery of {} exceeded {:?}",
            source.id, timeout
        )))
    })
}

async fn execute(
    inner: &Inner,
    op_id: &str,
    query: Query,
    sources: Vec<RemoteSource>,
    filter: &DiscoveryFilter,
    cancel: CancellationToken,
    progress: Option<mpsc::UnboundedSender<DiscoveryProgress>>,
) -> Result<DiscoveryResponse> {
    if sources.is_empty() {
        return Err(AcquireError::InvalidArgument(
            "no sources to query".to_string(),
        ));
    }
    if inner.engines.read().is_empty() {
        return Err(AcquireError::NotSupported(
            "no discovery engines registered".to_string(),
        ));
    }
    let matcher = FilterMatcher::new(filter)?;

    let started = Instant::now();
    let total = sources.len();
    inner.counters.operations.fetch_add(1, Ordering::Relaxed);
    debug!("Discovery {} querying {} sources", op_id, total);

    // Boxed so the stream stays `Send` when the whole call runs under `tokio::spawn`.
    let query = &query;
    let calls: Vec<BoxFuture<'_, (usize, Result<Vec<DiscoveryResult>>)>> = sources
        .iter()
        .enumerate()
        .map(|(idx, source)| {
            let engine = inner.engine_for(source);
            let timeout = source.timeout.min(inner.config.request_timeout());
            async move { (idx, query_source(engine, source, query, filter, timeout).await) }
                .boxed()
        })
        .collect();
    let mut pending =
        futures::stream::iter(calls).buffer_unordered(inner.config.max_concurrent_requests.max(1));

    let mut outcomes: Vec<Option<Result<Vec<DiscoveryResult>>>> = vec![None; total];
    let mut completed = 0usize;
    let mut status = DiscoveryStatus::Completed;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                status = DiscoveryStatus::Cancelled;
                break;
            }
            next = pending.next() => next,
        };
        let Some((idx, outcome)) = next else {
            break;
        };
        completed += 1;
        let source_id = sources[idx].id.clone();
        let succeeded = outcome.is_ok();
        if let Err(e) = &outcome {
            warn!("Discovery on source {} failed: {}", source_id, e);
        }
        outcomes[idx] = Some(outcome);

        let percentage = completed as f64 / total as f64 * 100.0;
        if let Some(tx) = &progress {
            let _ = tx.send(DiscoveryProgress {
                operation_id: op_id.to_string(),
                source_id: source_id.clone(),
                succeeded,
                completed,
                total,
                percentage,
            });
        }
        inner.events.publish(Event::DiscoveryProgress {
            operation_id: op_id.to_string(),
            source_id,
            completed,
            total,
            percentage,
        });
    }
    // Dropping the stream abandons every call still outstanding
    drop(pending);

    let mut aggregated = Vec::new();
    let mut failed_sources = Vec::new();
    let mut error_messages = BTreeMap::new();
    for (source, outcome) in sources.iter().zip(outcomes) {
        match outcome {
            Some(Ok(results)) => aggregated.extend(results),
            Some(Err(e)) => {
                failed_sources.push(source.id.clone());
                error_messages.insert(source.id.clone(), e.to_string());
            }
            None => {
                failed_sources.push(source.id.clone());
                error_messages.insert(source.id.clone(), AcquireError::Cancelled.to_string());
            }
        }
    }

    let (results, total_count) = matcher.apply(aggregated);
    let failed = failed_sources.len();
    let success_rate = (total - failed) as f64 / total as f64;
    let duration = started.elapsed();

    inner
        .counters
        .sources_queried
        .fetch_add(total as u64, Ordering::Relaxed);
    inner
        .counters
        .sources_failed
        .fetch_add(failed as u64, Ordering::Relaxed);
    inner
        .counters
        .results_returned
        .fetch_add(results.len() as u64, Ordering::Relaxed);

    info!(
        "Discovery {} finished: {} results, {}/{} sources failed, {:?}",
        op_id, total_count, failed, total, status
    );
    inner.events.publish(Event::DiscoveryCompleted {
        operation_id: op_id.to_string(),
        results: total_count,
        failed_sources: failed,
        duration,
    });

    Ok(DiscoveryResponse {
        results,
        total_count,
        queried_sources: total,
        failed_sources,
        error_messages,
        success_rate,
        duration,
        status,
    })
}
