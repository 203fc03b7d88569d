//! Acquisition Orchestrator
//!
//! Public entry point of the pipeline. A load request moves through:
//!
//! ```text
//! Created -> SourceValidated -> Downloading -> ArtifactValidated -> Ready
//!                                                               \-> Failed | Cancelled
//! ```
//!
//! 1. Validate the source (skippable with `validate_source = false`)
//! 2. Gate the source on reputation
//! 3. Serve from the cache or download, joining any in-flight transfer
//! 4. Validate the artifact (skippable with `validate_plugin = false`)
//! 5. Hand the path to the loader collaborator, when one is configured
//!
//! Reputation moves only after a network transfer finished and its artifact
//! was judged. Cache hits leave it unchanged.
//!
//! Every request, sync or async, is tracked under an operation id until it
//! reaches a terminal state and emits exactly one `LoadCompleted` event.

mod builder;

pub use builder::OrchestratorBuilder;

use parking_lot::Mutex;
use sdk::discovery::{DiscoveryFilter, PluginRecord};
use sdk::errors::{AcquireError, Result};
use sdk::interfaces::{PluginHandle, PluginLoader};
use sdk::source::RemoteSource;
use sdk::validation::{ReputationLevel, ValidationCode, ValidationResult};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::config::AcquisitionConfig;
use crate::discovery::{DiscoveryCoordinator, DiscoveryResponse, DiscoveryStats, DiscoveryStatus};
use crate::downloader::{DownloadStats, Downloader, FetchOptions};
use crate::events::{Event, EventBus};
use crate::sources::SourceRegistry;
use crate::validator::{ValidationStats, Validator};

/// Lifecycle of a load request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Created,
    SourceValidated,
    Downloading,
    ArtifactValidated,
    Ready,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Created => "created",
            RequestState::SourceValidated => "source_validated",
            RequestState::Downloading => "downloading",
            RequestState::ArtifactValidated => "artifact_validated",
            RequestState::Ready => "ready",
            RequestState::Failed => "failed",
            RequestState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Ready | RequestState::Failed | RequestState::Cancelled
        )
    }
}

/// Per-request options
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Artifact to fetch; defaults to the source URL
    pub artifact_url: Option<String>,
    pub expected_checksum: Option<String>,
    pub signature: Option<String>,
    pub validate_source: bool,
    pub validate_plugin: bool,
    pub use_cache: bool,
    pub force_refresh: bool,
    pub resume_partial: bool,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    /// Overrides the configured minimum reputation
    pub min_reputation: Option<ReputationLevel>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            artifact_url: None,
            expected_checksum: None,
            signature: None,
            validate_source: true,
            validate_plugin: true,
            use_cache: true,
            force_refresh: false,
            resume_partial: false,
            timeout: None,
            max_retries: None,
            min_reputation: None,
        }
    }
}

impl LoadOptions {
    pub fn with_artifact_url(mut self, url: impl Into<String>) -> Self {
        self.artifact_url = Some(url.into());
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.expected_checksum = Some(checksum.into());
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

/// A finished load
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub operation_id: String,
    pub state: RequestState,
    /// Validated artifact inside the cache
    pub path: PathBuf,
    pub source_id: String,
    pub from_cache: bool,
    pub bytes_transferred: u64,
    /// Source and artifact verdicts merged
    pub validation: ValidationResult,
    /// `None` when no loader is configured
    pub handle: Option<PluginHandle>,
}

/// A load running on the worker pool
#[derive(Debug)]
pub struct LoadOperation {
    pub id: String,
    result: oneshot::Receiver<Result<LoadOutcome>>,
}

impl LoadOperation {
    pub async fn wait(self) -> Result<LoadOutcome> {
        self.result.await.unwrap_or(Err(AcquireError::Cancelled))
    }
}

/// Discovery answer in loader-agnostic form
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub records: Vec<PluginRecord>,
    pub total_count: usize,
    pub queried_sources: usize,
    pub failed_sources: Vec<String>,
    pub error_messages: BTreeMap<String, String>,
    pub success_rate: f64,
    pub duration: Duration,
    pub status: DiscoveryStatus,
}

impl From<DiscoveryResponse> for DiscoveryReport {
    fn from(response: DiscoveryResponse) -> Self {
        Self {
            records: response.results.into_iter().map(PluginRecord::from).collect(),
            total_count: response.total_count,
            queried_sources: response.queried_sources,
            failed_sources: response.failed_sources,
            error_messages: response.error_messages,
            success_rate: response.success_rate,
            duration: response.duration,
            status: response.status,
        }
    }
}

/// Point-in-time statistics across the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub cache: CacheStats,
    pub downloads: DownloadStats,
    pub validation: ValidationStats,
    pub discovery: DiscoveryStats,
    pub sources: usize,
    pub active_operations: usize,
}

struct Tracked {
    state: RequestState,
    cancel: CancellationToken,
}

struct Inner {
    config: Arc<AcquisitionConfig>,
    registry: SourceRegistry,
    downloader: Downloader,
    discovery: DiscoveryCoordinator,
    validator: Validator,
    loader: Option<Arc<dyn PluginLoader>>,
    events: Arc<EventBus>,
    workers: Arc<Semaphore>,
    operations: Mutex<HashMap<String, Tracked>>,
}

/// Plugin acquisition pipeline
///
/// # Example
///
/// ```no_run
/// use warden_engine::sdk::source::{RemoteSource, SourceType};
/// use warden_engine::config::AcquisitionConfig;
/// use warden_engine::orchestrator::{LoadOptions, OrchestratorBuilder};
///
/// # async fn example() -> warden_engine::sdk::errors::Result<()> {
/// let orchestrator = OrchestratorBuilder::new(AcquisitionConfig::default())
///     .build()
///     .await?;
///
/// let source = RemoteSource::new("https://good.example.com", SourceType::Http);
/// orchestrator.registry().add(source.clone())?;
///
/// let outcome = orchestrator
///     .load(
///         &source,
///         LoadOptions::default().with_artifact_url("https://good.example.com/logger.wasm"),
///     )
///     .await?;
/// println!("ready at {}", outcome.path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AcquisitionOrchestrator {
    inner: Arc<Inner>,
}

impl AcquisitionOrchestrator {
    pub fn config(&self) -> &AcquisitionConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.inner.registry
    }

    pub fn validator(&self) -> &Validator {
        &self.inner.validator
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Run a load request to completion
    pub async fn load(&self, source: &RemoteSource, options: LoadOptions) -> Result<LoadOutcome> {
        let id = Uuid::new_v4().to_string();
        let cancel = self.inner.track(&id);
        self.inner.run(&id, source, &options, &cancel).await
    }

    /// Load a discovered plugin from its owning (registered) source.
    ///
    /// URL, checksum and signature come from the record unless `options`
    /// already sets them.
    pub async fn load_discovered(
        &self,
        record: &PluginRecord,
        mut options: LoadOptions,
    ) -> Result<LoadOutcome> {
        let source = self.inner.registry.get(&record.source_id).ok_or_else(|| {
            AcquireError::NotFound(format!("source {} is not registered", record.source_id))
        })?;

        options
            .artifact_url
            .get_or_insert_with(|| record.download_url.clone());
        if options.expected_checksum.is_none() {
            options.expected_checksum = record.checksum.clone();
        }
        if options.signature.is_none() {
            options.signature = record.signature.clone();
        }
        self.load(&source, options).await
    }

    /// Start a load on the worker pool and return immediately
    pub fn load_async(&self, source: RemoteSource, options: LoadOptions) -> LoadOperation {
        let id = Uuid::new_v4().to_string();
        let cancel = self.inner.track(&id);
        let (tx, rx) = oneshot::channel();

        let inner = Arc::clone(&self.inner);
        let op_id = id.clone();
        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&inner.workers).acquire_owned() => permit.ok(),
            };
            let result = match permit {
                Some(_permit) => inner.run(&op_id, &source, &options, &cancel).await,
                None => inner.conclude(&op_id, &source.id, Err(AcquireError::Cancelled)),
            };
            let _ = tx.send(result);
        });

        LoadOperation { id, result: rx }
    }

    /// Cancel a running load.
    ///
    /// A transfer in progress is aborted at once. A validation in progress
    /// finishes, its verdict is discarded, and the load reports `Cancelled`.
    pub fn cancel(&self, id: &str) -> Result<()> {
        let operations = self.inner.operations.lock();
        match operations.get(id) {
            Some(op) if !op.state.is_terminal() => {
                op.cancel.cancel();
                info!("Cancelling load {} in state {}", id, op.state.as_str());
                Ok(())
            }
            _ => Err(AcquireError::NotFound(format!("load operation {}", id))),
        }
    }

    /// Current state of a load that has not finished yet
    pub fn state(&self, id: &str) -> Option<RequestState> {
        self.inner.operations.lock().get(id).map(|op| op.state)
    }

    /// List plugins across all enabled registered sources
    pub async fn discover(&self, filter: &DiscoveryFilter) -> Result<DiscoveryReport> {
        let sources = self.inner.registry.list_enabled();
        self.discover_sources(&sources, filter).await
    }

    /// Search all enabled registered sources
    pub async fn search(&self, query: &str, filter: &DiscoveryFilter) -> Result<DiscoveryReport> {
        let sources = self.inner.registry.list_enabled();
        let response = self.inner.discovery.search(&sources, query, filter).await?;
        Ok(response.into())
    }

    /// List plugins across an explicit set of sources
    pub async fn discover_sources(
        &self,
        sources: &[RemoteSource],
        filter: &DiscoveryFilter,
    ) -> Result<DiscoveryReport> {
        let response = self.inner.discovery.discover(sources, filter).await?;
        Ok(response.into())
    }

    /// Remove expired cache entries; returns the number removed
    pub async fn cleanup_expired(&self) -> Result<usize> {
        self.inner.downloader.cache().cleanup_expired().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache: self.inner.downloader.cache().stats(),
            downloads: self.inner.downloader.stats(),
            validation: self.inner.validator.stats(),
            discovery: self.inner.discovery.stats(),
            sources: self.inner.registry.len(),
            active_operations: self.inner.operations.lock().len(),
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(AcquireError::Cancelled)
    } else {
        Ok(())
    }
}

impl Inner {
    fn track(&self, id: &str) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.operations.lock().insert(
            id.to_string(),
            Tracked {
                state: RequestState::Created,
                cancel: cancel.clone(),
            },
        );
        self.events.publish(Event::LoadStateChanged {
            operation_id: id.to_string(),
            state: RequestState::Created,
        });
        cancel
    }

    fn set_state(&self, id: &str, state: RequestState) {
        if let Some(op) = self.operations.lock().get_mut(id) {
            op.state = state;
        }
        debug!("Load {} -> {}", id, state.as_str());
        self.events.publish(Event::LoadStateChanged {
            operation_id: id.to_string(),
            state,
        });
    }

    async fn run(
        &self,
        id: &str,
        source: &RemoteSource,
        options: &LoadOptions,
        cancel: &CancellationToken,
    ) -> Result<LoadOutcome> {
        let result = self.pipeline(id, source, options, cancel).await;
        self.conclude(id, &source.id, result)
    }

    /// Record the terminal state, emit the completion event and stop tracking
    fn conclude(
        &self,
        id: &str,
        source_id: &str,
        result: Result<LoadOutcome>,
    ) -> Result<LoadOutcome> {
        let state = match &result {
            Ok(_) => RequestState::Ready,
            Err(AcquireError::Cancelled) => RequestState::Cancelled,
            Err(_) => RequestState::Failed,
        };
        self.set_state(id, state);
        self.operations.lock().remove(id);

        match &result {
            Ok(outcome) => info!(
                "Load {} ready at {} ({} bytes transferred, cached: {})",
                id,
                outcome.path.display(),
                outcome.bytes_transferred,
                outcome.from_cache
            ),
            Err(e) => warn!("Load {} from {} ended {}: {}", id, source_id, state.as_str(), e),
        }
        self.events.publish(Event::LoadCompleted {
            operation_id: id.to_string(),
            source_id: source_id.to_string(),
            state,
            error: result.as_ref().err().map(ToString::to_string),
        });

        result.map(|mut outcome| {
            outcome.state = state;
            outcome
        })
    }

    async fn pipeline(
        &self,
        id: &str,
        source: &RemoteSource,
        options: &LoadOptions,
        cancel: &CancellationToken,
    ) -> Result<LoadOutcome> {
        ensure_live(cancel)?;

        let mut validation = if options.validate_source {
            let verdict = self.validator.validate_source(source);
            if let Some(err) = verdict.to_error() {
                return Err(err);
            }
            verdict
        } else {
            debug!("Source validation skipped for {}", source.id);
            ValidationResult::passed("Source validation skipped")
        };

        if !self.validator.is_acceptable(source, options.min_reputation) {
            return Err(AcquireError::UntrustedSource(format!(
                "Reputation of source {} is below the required level",
                source.id
            )));
        }
        self.set_state(id, RequestState::SourceValidated);
        ensure_live(cancel)?;

        self.set_state(id, RequestState::Downloading);
        let url = options
            .artifact_url
            .clone()
            .unwrap_or_else(|| source.url.clone());
        let fetch_options = FetchOptions {
            use_cache: options.use_cache,
            force_refresh: options.force_refresh,
            expected_checksum: options.expected_checksum.clone(),
            resume_partial: options.resume_partial,
            timeout: options.timeout,
            max_retries: options.max_retries,
            max_file_size: None,
        };
        let handle = self.downloader.start(source, &url, fetch_options).await?;
        // Reputation counts transfers, so only the caller that started one records it.
        let owns_transfer = !handle.is_cached() && !handle.joined_existing();

        // Dropping the handle detaches this caller from the transfer.
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
            outcome = handle.wait() => outcome,
        };
        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(AcquireError::Cancelled) => return Err(AcquireError::Cancelled),
            Err(e) => {
                if owns_transfer {
                    self.record(&source.id, false).await;
                }
                return Err(e);
            }
        };
        ensure_live(cancel)?;
        let owns_transfer = owns_transfer && !fetched.from_cache;

        if options.validate_plugin {
            let verdict = self
                .validator
                .validate_plugin_file(
                    &fetched.entry.path,
                    source,
                    options.expected_checksum.as_deref(),
                    options.signature.as_deref(),
                )
                .await;
            ensure_live(cancel)?;

            if let Some(err) = verdict.to_error() {
                if owns_transfer {
                    self.record(&source.id, false).await;
                }
                // Caller-specific expectations never evict the shared entry
                if is_artifact_defect(&verdict) {
                    if let Err(e) = self.downloader.cache().remove_entry(&fetched.entry).await {
                        warn!("Failed to evict rejected artifact {}: {}", fetched.entry.key, e);
                    }
                }
                return Err(err);
            }
            validation = validation.merge(verdict);
        }
        self.set_state(id, RequestState::ArtifactValidated);

        if owns_transfer {
            self.record(&source.id, true).await;
        }

        let handle = match &self.loader {
            Some(loader) => Some(
                loader
                    .load(&fetched.entry.path, source)
                    .await
                    .map_err(|e| match e {
                        AcquireError::LoadFailed(_) => e,
                        other => AcquireError::LoadFailed(other.to_string()),
                    })?,
            ),
            None => None,
        };

        Ok(LoadOutcome {
            operation_id: id.to_string(),
            state: RequestState::ArtifactValidated,
            path: fetched.entry.path,
            source_id: source.id.clone(),
            from_cache: fetched.from_cache,
            bytes_transferred: fetched.bytes_transferred,
            validation,
            handle,
        })
    }

    async fn record(&self, source_id: &str, success: bool) {
        if let Err(e) = self.validator.record_outcome(source_id, success).await {
            warn!("Failed to record reputation for {}: {}", source_id, e);
        }
    }
}

/// Rejections that hold for every caller, not just the one validating
fn is_artifact_defect(verdict: &ValidationResult) -> bool {
    matches!(
        verdict.code,
        Some(ValidationCode::SizeExceeded | ValidationCode::FileMissing)
    )
}
