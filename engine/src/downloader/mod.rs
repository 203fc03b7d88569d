//! Downloader
//!
//! Performs network transfers against the [`DownloadCache`].
//!
//! # Transfer dedup
//!
//! At most one transfer runs per cache key. A request for a key that already
//! has a transfer in flight attaches to it as another subscriber instead of
//! starting a second one. The terminal result is published once on a `watch`
//! channel and every subscriber reads the same value, so N concurrent callers
//! observe the identical success or the identical failure.
//!
//! # Cancellation
//!
//! Cancellation is per subscriber: [`DownloadHandle::cancel`] detaches one
//! caller, which then observes `Cancelled`. The shared transfer itself is
//! aborted only when its last subscriber has gone (cancelled or dropped).
//!
//! # Retry
//!
//! Retryable failures (see [`AcquireErrorExt::is_retryable`]) are retried with
//! capped exponential backoff up to the effective `max_retries`. The final
//! failure carries the number of retries spent.

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use sdk::errors::{AcquireError, AcquireErrorExt, Result};
use sdk::interfaces::{Transport, TransportRequest};
use sdk::source::{CachePolicy, RemoteSource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{cache_key, CacheEntry, CacheLookup, CommitMeta, DownloadCache};
use crate::config::AcquisitionConfig;
use crate::events::{Event, EventBus};
use crate::hashing::{self, Checksum};

/// Per-request download options
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Allow a cache read (ignored by `CacheFirst` and `CacheOnly` sources)
    pub use_cache: bool,
    /// Skip the cache read and transfer again
    pub force_refresh: bool,
    /// Expected checksum (`sha256:`, `blake3:` or bare SHA-256 hex)
    pub expected_checksum: Option<String>,
    /// Keep partial data across failures and resume with a range request
    pub resume_partial: bool,
    /// Bound for the whole transfer including retries
    pub timeout: Option<Duration>,
    /// Overrides the source's `max_retries`
    pub max_retries: Option<u32>,
    /// Overrides the configured maximum artifact size
    pub max_file_size: Option<u64>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            force_refresh: false,
            expected_checksum: None,
            resume_partial: false,
            timeout: None,
            max_retries: None,
            max_file_size: None,
        }
    }
}

/// Transfer progress snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub bytes_received: u64,
    pub total_bytes: Option<u64>,
    pub bytes_per_second: f64,
    pub estimated_time_remaining: Option<Duration>,
}

impl DownloadProgress {
    pub fn percentage(&self) -> Option<f64> {
        self.total_bytes
            .filter(|total| *total > 0)
            .map(|total| self.bytes_received as f64 / total as f64 * 100.0)
    }
}

/// Result of a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub entry: CacheEntry,
    pub from_cache: bool,
    /// Bytes moved over the network for this artifact; zero for cache hits
    pub bytes_transferred: u64,
    /// The caller attached to a transfer started by someone else
    pub joined_existing: bool,
    pub retries: u32,
}

/// Downloader counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStats {
    pub started: u64,
    pub joined: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub bytes_downloaded: u64,
    pub retries: u64,
    pub active: usize,
}

#[derive(Debug, Clone)]
struct TransferResult {
    entry: CacheEntry,
    bytes_transferred: u64,
    retries: u32,
}

type Terminal = Option<Result<TransferResult>>;

/// One shared transfer
struct InFlight {
    id: String,
    key: String,
    subscribers: AtomicUsize,
    cancel: CancellationToken,
    progress: watch::Sender<DownloadProgress>,
    done: watch::Sender<Terminal>,
}

impl InFlight {
    fn new(key: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key: key.to_string(),
            subscribers: AtomicUsize::new(1),
            cancel: CancellationToken::new(),
            progress: watch::Sender::new(DownloadProgress::default()),
            done: watch::Sender::new(None),
        }
    }

    fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }
}

/// What `start` does with the in-flight map for a key
enum Attach {
    Join(Arc<InFlight>),
    Spawn(Arc<InFlight>, Option<watch::Receiver<Terminal>>),
    Recheck,
}

/// Fully resolved parameters of one transfer
struct TransferPlan {
    key: String,
    url: String,
    source: RemoteSource,
    expected: Option<Checksum>,
    resume_partial: bool,
    timeout: Duration,
    max_retries: u32,
    max_file_size: u64,
}

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    joined: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    bytes_downloaded: AtomicU64,
    retries: AtomicU64,
}

struct Inner {
    config: Arc<AcquisitionConfig>,
    cache: Arc<DownloadCache>,
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    permits: Arc<Semaphore>,
    in_flight: Mutex<HashMap<String, Arc<InFlight>>>,
    counters: Counters,
}

/// Cache-aware, deduplicating downloader
#[derive(Clone)]
pub struct Downloader {
    inner: Arc<Inner>,
}

impl Downloader {
    pub fn new(
        config: Arc<AcquisitionConfig>,
        cache: Arc<DownloadCache>,
        transport: Arc<dyn Transport>,
        events: Arc<EventBus>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.cache.max_concurrent_downloads.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                cache,
                transport,
                events,
                permits,
                in_flight: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<DownloadCache> {
        &self.inner.cache
    }

    /// Start or join a transfer for `url` on behalf of `source`.
    ///
    /// Returns immediately with a handle that is either already resolved from
    /// the cache or attached to an in-flight transfer.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an unparseable expected checksum
    /// - `NotFound` for a `CacheOnly` source without a cached entry
    /// - `ChecksumMismatch` for a `CacheOnly` entry that fails the expected checksum
    pub async fn start(
        &self,
        source: &RemoteSource,
        url: &str,
        options: FetchOptions,
    ) -> Result<DownloadHandle> {
        let expected = options
            .expected_checksum
            .as_deref()
            .map(Checksum::parse)
            .transpose()?;
        let key = cache_key(url, &source.id);
        let policy = source.cache_policy;
        let read_cache = should_read_cache(policy, &options);

        if read_cache {
            if let Some(handle) = self.try_cache(&key, policy, expected.as_ref()).await? {
                return Ok(handle);
            }
        }
        if policy == CachePolicy::CacheOnly {
            return Err(AcquireError::NotFound(format!(
                "{} is not cached and the source is cache-only",
                url
            )));
        }

        let plan = TransferPlan {
            key: key.clone(),
            url: url.to_string(),
            source: source.clone(),
            expected,
            resume_partial: options.resume_partial,
            timeout: options
                .timeout
                .unwrap_or_else(|| self.inner.config.network.timeout()),
            max_retries: options.max_retries.unwrap_or(source.max_retries),
            max_file_size: options
                .max_file_size
                .unwrap_or(self.inner.config.security.max_file_size),
        };

        // A transfer may have committed between the lookup above and taking
        // the lock; in that case go through the cache again instead of
        // starting a redundant transfer.
        let mut rechecked = false;
        let (task, previous) = loop {
            let decision = {
                let mut in_flight = self.inner.in_flight.lock();
                match in_flight.get(&key) {
                    Some(task) if !task.cancel.is_cancelled() => {
                        task.subscribers.fetch_add(1, Ordering::SeqCst);
                        Attach::Join(Arc::clone(task))
                    }
                    Some(task) => {
                        let previous = task.done.subscribe();
                        let task = Arc::new(InFlight::new(&key));
                        in_flight.insert(key.clone(), Arc::clone(&task));
                        Attach::Spawn(task, Some(previous))
                    }
                    None if read_cache && !rechecked && self.inner.cache.get(&key).is_some() => {
                        Attach::Recheck
                    }
                    None => {
                        let task = Arc::new(InFlight::new(&key));
                        in_flight.insert(key.clone(), Arc::clone(&task));
                        Attach::Spawn(task, None)
                    }
                }
            };

            match decision {
                Attach::Join(task) => {
                    self.inner.counters.joined.fetch_add(1, Ordering::Relaxed);
                    debug!("Joining in-flight transfer {} for {}", task.id, url);
                    return Ok(DownloadHandle::attached(
                        Arc::clone(&self.inner),
                        task,
                        true,
                    ));
                }
                Attach::Recheck => {
                    rechecked = true;
                    if let Some(handle) = self
                        .try_cache(&key, policy, plan.expected.as_ref())
                        .await?
                    {
                        return Ok(handle);
                    }
                }
                Attach::Spawn(task, previous) => break (task, previous),
            }
        };

        self.inner.counters.started.fetch_add(1, Ordering::Relaxed);
        let handle = DownloadHandle::attached(Arc::clone(&self.inner), Arc::clone(&task), false);
        tokio::spawn(run_transfer(Arc::clone(&self.inner), task, plan, previous));
        Ok(handle)
    }

    /// `start` followed by `wait`
    pub async fn fetch(
        &self,
        source: &RemoteSource,
        url: &str,
        options: FetchOptions,
    ) -> Result<FetchOutcome> {
        self.start(source, url, options).await?.wait().await
    }

    async fn try_cache(
        &self,
        key: &str,
        policy: CachePolicy,
        expected: Option<&Checksum>,
    ) -> Result<Option<DownloadHandle>> {
        let (entry, stale) = match self.inner.cache.lookup(key, policy).await? {
            CacheLookup::Hit(entry) => (entry, false),
            CacheLookup::Stale(entry) => (entry, true),
            CacheLookup::Miss => return Ok(None),
        };

        if let Some(expected) = expected {
            if let Some(actual) = verify_checksum(expected, &entry).await? {
                if policy == CachePolicy::CacheOnly {
                    return Err(AcquireError::ChecksumMismatch {
                        expected: expected.to_string(),
                        actual,
                    });
                }
                info!(
                    "Cached artifact {} does not match the expected checksum, refetching",
                    key
                );
                self.inner.cache.remove(key).await?;
                return Ok(None);
            }
        }

        if stale {
            warn!("Serving expired artifact {} for cache-only source", key);
        }
        Ok(Some(DownloadHandle::resolved(FetchOutcome {
            entry,
            from_cache: true,
            bytes_transferred: 0,
            joined_existing: false,
            retries: 0,
        })))
    }

    /// Number of transfers currently in flight
    pub fn active_transfers(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    pub fn stats(&self) -> DownloadStats {
        let c = &self.inner.counters;
        DownloadStats {
            started: c.started.load(Ordering::Relaxed),
            joined: c.joined.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            bytes_downloaded: c.bytes_downloaded.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            active: self.active_transfers(),
        }
    }
}

/// Whether a request may be answered from the cache
pub fn should_read_cache(policy: CachePolicy, options: &FetchOptions) -> bool {
    match policy {
        CachePolicy::NoCache => false,
        CachePolicy::CacheOnly => true,
        CachePolicy::CacheFirst => !options.force_refresh,
        CachePolicy::PreferCache => options.use_cache && !options.force_refresh,
    }
}

/// Map a response status to the error taxonomy.
///
/// `Ok(true)` means the body continues a range request, `Ok(false)` means it
/// starts from byte zero.
pub fn classify_status(status: u16, url: &str, ranged: bool) -> Result<bool> {
    match status {
        206 if ranged => Ok(true),
        200..=299 => Ok(false),
        404 | 410 => Err(AcquireError::NotFound(url.to_string())),
        408 | 429 | 500..=599 => Err(AcquireError::network(format!("HTTP {}", status))),
        other => Err(AcquireError::HttpStatus(other)),
    }
}

async fn verify_checksum(expected: &Checksum, entry: &CacheEntry) -> Result<Option<String>> {
    let expected = expected.clone();
    let path = entry.path.clone();
    let known = entry.checksum.clone();
    tokio::task::spawn_blocking(move || expected.verify_file(&path, Some(&known)))
        .await
        .map_err(|e| AcquireError::Io(format!("Checksum task failed: {}", e)))?
}

async fn run_transfer(
    inner: Arc<Inner>,
    task: Arc<InFlight>,
    plan: TransferPlan,
    previous: Option<watch::Receiver<Terminal>>,
) {
    // A cancelled transfer for the same key may still be cleaning up its
    // partial file; never overlap with it.
    if let Some(mut previous) = previous {
        let _ = previous.wait_for(Option::is_some).await;
    }

    let result = tokio::select! {
        biased;
        _ = task.cancel.cancelled() => Err(AcquireError::Cancelled),
        outcome = tokio::time::timeout(plan.timeout, transfer_with_retries(&inner, &task, &plan)) => {
            outcome.unwrap_or_else(|_| {
                Err(AcquireError::Timeout(format!(
                    "download of {} exceeded {:?}",
                    plan.url, plan.timeout
                )))
            })
        }
    };

    match &result {
        Ok(done) => {
            inner.counters.completed.fetch_add(1, Ordering::Relaxed);
            inner.events.publish(Event::DownloadCompleted {
                key: plan.key.clone(),
                bytes: done.entry.size,
            });
        }
        Err(error) => {
            let keep_partial = plan.resume_partial
                && matches!(
                    error,
                    AcquireError::Cancelled
                        | AcquireError::Timeout(_)
                        | AcquireError::Network { .. }
                );
            if !keep_partial {
                inner.cache.remove_partial(&plan.key).await;
            }
            if *error == AcquireError::Cancelled {
                inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                info!("Transfer {} for {} cancelled", task.id, plan.url);
            } else {
                inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Transfer {} for {} failed: {}", task.id, plan.url, error);
            }
            inner.events.publish(Event::DownloadFailed {
                key: plan.key.clone(),
                error: error.to_string(),
            });
        }
    }

    {
        let mut in_flight = inner.in_flight.lock();
        if in_flight
            .get(&task.key)
            .is_some_and(|current| current.id == task.id)
        {
            in_flight.remove(&task.key);
        }
    }
    task.done.send_replace(Some(result));
}

async fn transfer_with_retries(
    inner: &Inner,
    task: &InFlight,
    plan: &TransferPlan,
) -> Result<TransferResult> {
    let _permit = Arc::clone(&inner.permits)
        .acquire_owned()
        .await
        .map_err(|_| AcquireError::Cancelled)?;

    info!("Downloading {} (transfer {})", plan.url, task.id);
    inner.events.publish(Event::DownloadStarted {
        key: plan.key.clone(),
        url: plan.url.clone(),
    });

    let mut attempt: u32 = 0;
    let mut transferred: u64 = 0;
    loop {
        match transfer_once(inner, task, plan, &mut transferred).await {
            Ok(()) => break,
            Err(error) if error.is_retryable() && attempt < plan.max_retries => {
                let delay = inner.config.network.backoff(attempt);
                attempt += 1;
                inner.counters.retries.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Transfer of {} failed ({}), retry {}/{} in {:?}",
                    plan.url, error, attempt, plan.max_retries, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error.with_retries(attempt)),
        }
    }

    let partial = inner.cache.partial_path(&plan.key);
    let size = tokio::fs::metadata(&partial).await?.len();
    if size > plan.max_file_size {
        return Err(AcquireError::SizeExceeded {
            size,
            limit: plan.max_file_size,
        });
    }

    let checksum = hashing::sha256_file_async(partial.clone()).await?;
    if let Some(expected) = &plan.expected {
        let expected = expected.clone();
        let path = partial.clone();
        let known = checksum.clone();
        let mismatch = tokio::task::spawn_blocking(move || {
            expected
                .verify_file(&path, Some(&known))
                .map(|m| m.map(|actual| (expected.to_string(), actual)))
        })
        .await
        .map_err(|e| AcquireError::Io(format!("Checksum task failed: {}", e)))??;
        if let Some((expected, actual)) = mismatch {
            warn!("Checksum mismatch for {}", plan.url);
            return Err(AcquireError::ChecksumMismatch { expected, actual });
        }
    }

    let entry = inner
        .cache
        .commit(
            &plan.key,
            &partial,
            CommitMeta {
                url: plan.url.clone(),
                source_id: plan.source.id.clone(),
                checksum,
                ttl: plan.source.ttl,
            },
        )
        .await?;

    Ok(TransferResult {
        entry,
        bytes_transferred: transferred,
        retries: attempt,
    })
}

async fn transfer_once(
    inner: &Inner,
    task: &InFlight,
    plan: &TransferPlan,
    transferred: &mut u64,
) -> Result<()> {
    let partial: PathBuf = inner.cache.partial_path(&plan.key);
    let offset = if plan.resume_partial {
        inner.cache.partial_len(&plan.key).await.unwrap_or(0)
    } else {
        0
    };

    let mut request = TransportRequest::get(plan.url.clone())
        .with_headers(inner.config.network.custom_headers.clone())
        .with_headers(plan.source.request_headers())
        .with_timeout(plan.source.timeout);
    if offset > 0 {
        debug!("Resuming {} from byte {}", plan.url, offset);
        request = request.with_header("Range", format!("bytes={}-", offset));
    }

    let response = inner.transport.request(request).await?;
    if response.status == 416 && offset > 0 {
        inner.cache.remove_partial(&plan.key).await;
        return Err(AcquireError::network("range not satisfiable, restarting"));
    }
    let appending = classify_status(response.status, &plan.url, offset > 0)?;
    let start_at = if appending { offset } else { 0 };

    let total = response.content_length().map(|len| len + start_at);
    if let Some(total) = total {
        if total > plan.max_file_size {
            return Err(AcquireError::SizeExceeded {
                size: total,
                limit: plan.max_file_size,
            });
        }
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(appending)
        .truncate(!appending)
        .open(&partial)
        .await?;

    let started = Instant::now();
    let mut received: u64 = 0;
    let mut body = response.body;
    let streamed: Result<()> = async {
        loop {
            let chunk: Option<Result<Bytes>> = tokio::select! {
                biased;
                _ = task.cancel.cancelled() => return Err(AcquireError::Cancelled),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else {
                return Ok(());
            };
            let chunk = chunk?;

            let done = start_at + received + chunk.len() as u64;
            if done > plan.max_file_size {
                return Err(AcquireError::SizeExceeded {
                    size: done,
                    limit: plan.max_file_size,
                });
            }
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            *transferred += chunk.len() as u64;
            inner
                .counters
                .bytes_downloaded
                .fetch_add(chunk.len() as u64, Ordering::Relaxed);

            let progress = measure(start_at + received, received, total, started.elapsed());
            task.progress.send_replace(progress);
            inner.events.publish(Event::DownloadProgress {
                key: plan.key.clone(),
                progress,
            });
        }
    }
    .await;

    // Partial data must be on disk before a retry measures it.
    file.flush().await?;
    streamed?;
    file.sync_all().await?;
    Ok(())
}

fn measure(
    bytes_received: u64,
    received_now: u64,
    total_bytes: Option<u64>,
    elapsed: Duration,
) -> DownloadProgress {
    let secs = elapsed.as_secs_f64();
    let bytes_per_second = if secs > 0.0 {
        received_now as f64 / secs
    } else {
        0.0
    };
    let estimated_time_remaining = match total_bytes {
        Some(total) if bytes_per_second > 0.0 => Some(Duration::from_secs_f64(
            total.saturating_sub(bytes_received) as f64 / bytes_per_second,
        )),
        _ => None,
    };
    DownloadProgress {
        bytes_received,
        total_bytes,
        bytes_per_second,
        estimated_time_remaining,
    }
}

enum HandleKind {
    Ready(Box<FetchOutcome>),
    Attached(Attachment),
}

struct Attachment {
    inner: Arc<Inner>,
    task: Arc<InFlight>,
    done: watch::Receiver<Terminal>,
    joined: bool,
    detached: AtomicBool,
}

impl Attachment {
    /// Drop this subscriber; the last one out aborts the transfer
    fn detach(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        let _guard = self.inner.in_flight.lock();
        let remaining = self.task.subscribers.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && !self.task.is_finished() {
            debug!("Last subscriber left transfer {}, aborting", self.task.id);
            self.task.cancel.cancel();
        }
    }
}

/// A caller's view of a download
pub struct DownloadHandle {
    id: String,
    cancel: CancellationToken,
    kind: HandleKind,
}

impl DownloadHandle {
    fn resolved(outcome: FetchOutcome) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
            kind: HandleKind::Ready(Box::new(outcome)),
        }
    }

    fn attached(inner: Arc<Inner>, task: Arc<InFlight>, joined: bool) -> Self {
        let done = task.done.subscribe();
        Self {
            id: task.id.clone(),
            cancel: CancellationToken::new(),
            kind: HandleKind::Attached(Attachment {
                inner,
                task,
                done,
                joined,
                detached: AtomicBool::new(false),
            }),
        }
    }

    /// Id of the underlying transfer (shared by every joined caller)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when the handle was answered from the cache
    pub fn is_cached(&self) -> bool {
        matches!(self.kind, HandleKind::Ready(_))
    }

    pub fn joined_existing(&self) -> bool {
        match &self.kind {
            HandleKind::Ready(_) => false,
            HandleKind::Attached(a) => a.joined,
        }
    }

    /// Live progress of the underlying transfer; `None` for cache hits
    pub fn progress(&self) -> Option<watch::Receiver<DownloadProgress>> {
        match &self.kind {
            HandleKind::Ready(_) => None,
            HandleKind::Attached(a) => Some(a.task.progress.subscribe()),
        }
    }

    /// Token that fires when this caller cancels
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Detach this caller; `wait` then returns `Cancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
        if let HandleKind::Attached(a) = &self.kind {
            a.detach();
        }
    }

    /// Wait for the terminal outcome
    pub async fn wait(mut self) -> Result<FetchOutcome> {
        let cancel = self.cancel.clone();
        match &mut self.kind {
            HandleKind::Ready(outcome) => {
                if cancel.is_cancelled() {
                    return Err(AcquireError::Cancelled);
                }
                Ok((**outcome).clone())
            }
            HandleKind::Attached(attachment) => {
                let terminal = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                    terminal = attachment.done.wait_for(Option::is_some) => {
                        terminal.map(|value| value.clone())
                    }
                };
                let result = match terminal {
                    Ok(Some(result)) => result,
                    Ok(None) | Err(_) => Err(AcquireError::Io(
                        "transfer task ended without a result".to_string(),
                    )),
                };
                let joined = attachment.joined;
                result.map(|done| FetchOutcome {
                    entry: done.entry,
                    from_cache: false,
                    bytes_transferred: done.bytes_transferred,
                    joined_existing: joined,
                    retries: done.retries,
                })
            }
        }
    }
}

impl Drop for DownloadHandle {
    fn drop(&mut self) {
        if let HandleKind::Attached(a) = &self.kind {
            a.detach();
        }
    }
}

impl std::fmt::Debug for DownloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadHandle")
            .field("id", &self.id)
            .field("cached", &self.is_cached())
            .field("joined", &self.joined_existing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_read_policy() {
        let default = FetchOptions::default();
        let no_cache = FetchOptions {
            use_cache: false,
            ..FetchOptions::default()
        };
        let refresh = FetchOptions {
            force_refresh: true,
            ..FetchOptions::default()
        };

        assert!(should_read_cache(CachePolicy::PreferCache, &default));
        assert!(!should_read_cache(CachePolicy::PreferCache, &no_cache));
        assert!(should_read_cache(CachePolicy::CacheFirst, &no_cache));
        assert!(!should_read_cache(CachePolicy::CacheFirst, &refresh));
        assert!(!should_read_cache(CachePolicy::NoCache, &default));
        assert!(should_read_cache(CachePolicy::CacheOnly, &refresh));
    }

    #[test]
    fn test_status_classification() {
        let url = "https://good.example.com/a.bin";
        assert_eq!(classify_status(200, url, false), Ok(false));
        assert_eq!(classify_status(200, url, true), Ok(false));
        assert_eq!(classify_status(206, url, true), Ok(true));
        assert!(matches!(
            classify_status(404, url, false),
            Err(AcquireError::NotFound(_))
        ));
        assert!(classify_status(503, url, false)
            .unwrap_err()
            .is_retryable());
        assert!(classify_status(429, url, false)
            .unwrap_err()
            .is_retryable());
        assert_eq!(
            classify_status(403, url, false),
            Err(AcquireError::HttpStatus(403))
        );
    }

    #[test]
    fn test_progress_estimates() {
        let progress = measure(50, 50, Some(100), Duration::from_secs(1));
        assert_eq!(progress.bytes_per_second, 50.0);
        assert_eq!(progress.estimated_time_remaining, Some(Duration::from_secs(1)));
        assert_eq!(progress.percentage(), Some(50.0));

        let unknown = measure(10, 10, None, Duration::ZERO);
        assert_eq!(unknown.estimated_time_remaining, None);
        assert_eq!(unknown.percentage(), None);
    }
}
