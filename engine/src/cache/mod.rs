//! Download cache
//!
//! Disk-backed, content-keyed store of fetched artifacts.
//!
//! # Layout
//!
//! ```text
//! <dir>/artifacts/<key>.bin    committed artifact
//! <dir>/artifacts/<key>.json   sidecar (url, checksum, cached_at, ttl, size)
//! <dir>/partial/<key>.part     transfer in progress or kept for resume
//! ```
//!
//! Artifacts and sidecars are written under temporary names and renamed into
//! place. An artifact only becomes visible once its sidecar exists, and
//! [`DownloadCache::open`] deletes artifacts without a sidecar (and sidecars
//! without an artifact), so an interrupted commit never surfaces as an entry.
//!
//! The cache is the only component that deletes files under `artifacts/`.
//! Commits and evictions are serialized, and evictions that act on an
//! earlier lookup only remove the entry if it is still the one looked up.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sdk::errors::Result;
use sdk::source::{normalize_url, CachePolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::hashing;

const ARTIFACT_EXT: &str = "bin";
const SIDECAR_EXT: &str = "json";
const PARTIAL_EXT: &str = "part";
const TMP_EXT: &str = "tmp";

/// Derive the cache key for an artifact URL within a policy scope.
///
/// The scope is the owning source id, so the same URL fetched under two
/// different credential sets never shares an entry.
pub fn cache_key(url: &str, scope: &str) -> String {
    let mut material = normalize_url(url);
    material.push('|');
    material.push_str(scope);
    hashing::sha256_hex(material.as_bytes())[..32].to_string()
}

/// Metadata of a committed artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub url: String,
    #[serde(default)]
    pub source_id: String,
    /// Artifact location; derived from the cache directory, not persisted
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    /// Lowercase SHA-256 hex of the artifact
    pub checksum: String,
    pub cached_at: DateTime<Utc>,
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// True once `now - cached_at >= ttl`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now) >= self.ttl
    }
}

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Intact and within TTL
    Hit(CacheEntry),
    /// Intact but expired; only produced under `CachePolicy::CacheOnly`
    Stale(CacheEntry),
    Miss,
}

/// Facts about a finished download handed to [`DownloadCache::commit`]
#[derive(Debug, Clone)]
pub struct CommitMeta {
    pub url: String,
    pub source_id: String,
    /// SHA-256 hex of the temporary file
    pub checksum: String,
    pub ttl: Duration,
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub total_bytes: u64,
    pub max_size_bytes: u64,
}

struct Slot {
    entry: CacheEntry,
    last_access: AtomicU64,
}

/// Content-keyed artifact store
pub struct DownloadCache {
    artifacts_dir: PathBuf,
    partial_dir: PathBuf,
    max_size_bytes: u64,
    verify_on_hit: bool,
    index: RwLock<HashMap<String, Slot>>,
    /// Held across the file operations of commits and evictions
    writes: Mutex<()>,
    total_bytes: AtomicU64,
    access_clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl DownloadCache {
    /// Open (or create) the cache described by `config` and load its index
    pub async fn open(config: &CacheConfig) -> Result<Self> {
        Self::open_at(
            &config.directory,
            config.max_size_bytes,
            config.verify_on_hit,
        )
        .await
    }

    /// Open a cache rooted at `dir`
    pub async fn open_at(dir: &Path, max_size_bytes: u64, verify_on_hit: bool) -> Result<Self> {
        let artifacts_dir = dir.join("artifacts");
        let partial_dir = dir.join("partial");
        tokio::fs::create_dir_all(&artifacts_dir).await?;
        tokio::fs::create_dir_all(&partial_dir).await?;

        let cache = Self {
            artifacts_dir,
            partial_dir,
            max_size_bytes,
            verify_on_hit,
            index: RwLock::new(HashMap::new()),
            writes: Mutex::new(()),
            total_bytes: AtomicU64::new(0),
            access_clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        };
        cache.load_index().await?;
        Ok(cache)
    }

    async fn load_index(&self) -> Result<()> {
        let mut sidecars = Vec::new();
        let mut artifacts = Vec::new();

        let mut dir = tokio::fs::read_dir(&self.artifacts_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()).map(str::to_string),
                path.extension().and_then(|s| s.to_str()),
            ) else {
                continue;
            };
            match ext {
                SIDECAR_EXT => sidecars.push(stem),
                ARTIFACT_EXT => artifacts.push(stem),
                _ => {
                    debug!("Removing leftover cache file {}", path.display());
                    remove_quietly(&path).await;
                }
            }
        }

        let mut loaded = HashMap::new();
        let mut total = 0u64;
        for key in &sidecars {
            let sidecar = self.sidecar_path(key);
            let artifact = self.artifact_path(key);
            if !artifacts.contains(key) {
                warn!("Cache sidecar {} has no artifact, removing", key);
                remove_quietly(&sidecar).await;
                continue;
            }
            let parsed = tokio::fs::read(&sidecar)
                .await
                .ok()
                .and_then(|bytes| serde_json::from_slice::<CacheEntry>(&bytes).ok());
            let on_disk = tokio::fs::metadata(&artifact).await.ok().map(|m| m.len());
            match (parsed, on_disk) {
                (Some(mut entry), Some(size)) if entry.key == *key && entry.size == size => {
                    entry.path = artifact;
                    total += entry.size;
                    loaded.insert(key.clone(), entry);
                }
                _ => {
                    warn!("Cache entry {} is unreadable or truncated, removing", key);
                    remove_quietly(&sidecar).await;
                    remove_quietly(&artifact).await;
                }
            }
        }

        for key in artifacts.iter().filter(|k| !sidecars.contains(*k)) {
            warn!("Cache artifact {} has no sidecar, removing", key);
            remove_quietly(&self.artifact_path(key)).await;
        }

        let count = loaded.len();
        {
            let mut index = self.index.write();
            for (key, entry) in loaded {
                index.insert(
                    key,
                    Slot {
                        entry,
                        last_access: AtomicU64::new(0),
                    },
                );
            }
        }
        self.total_bytes.store(total, Ordering::SeqCst);
        info!("Cache opened with {} entries ({} bytes)", count, total);
        Ok(())
    }

    pub fn artifact_path(&self, key: &str) -> PathBuf {
        self.artifacts_dir.join(format!("{}.{}", key, ARTIFACT_EXT))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.artifacts_dir.join(format!("{}.{}", key, SIDECAR_EXT))
    }

    /// Location of the in-progress (or resumable) download for `key`
    pub fn partial_path(&self, key: &str) -> PathBuf {
        self.partial_dir.join(format!("{}.{}", key, PARTIAL_EXT))
    }

    /// Size of a resumable partial download, if one exists
    pub async fn partial_len(&self, key: &str) -> Option<u64> {
        tokio::fs::metadata(self.partial_path(key))
            .await
            .ok()
            .map(|m| m.len())
            .filter(|len| *len > 0)
    }

    pub async fn remove_partial(&self, key: &str) {
        remove_quietly(&self.partial_path(key)).await;
    }

    /// Entry metadata without integrity checks or counter updates
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.index.read().get(key).map(|slot| slot.entry.clone())
    }

    /// Look up `key` under `policy`.
    ///
    /// Corrupt entries (missing file, size or checksum mismatch) are evicted
    /// and reported as a miss. Expired entries are evicted unless the policy
    /// is `CacheOnly`, in which case they are returned as `Stale`. An entry
    /// replaced by a concurrent commit while it was being checked is left alone.
    pub async fn lookup(&self, key: &str, policy: CachePolicy) -> Result<CacheLookup> {
        let Some(entry) = self.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Cache miss for {}", key);
            return Ok(CacheLookup::Miss);
        };

        if !self.is_intact(&entry).await {
            warn!("Cache entry {} failed integrity check, evicting", key);
            self.evict_matching(key, Some(&entry)).await?;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(CacheLookup::Miss);
        }

        if entry.is_expired(Utc::now()) {
            if policy == CachePolicy::CacheOnly {
                self.touch(key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Serving stale cache entry {}", key);
                return Ok(CacheLookup::Stale(entry));
            }
            debug!("Cache entry {} expired, evicting", key);
            self.evict_matching(key, Some(&entry)).await?;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(CacheLookup::Miss);
        }

        self.touch(key);
        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!("Cache hit for {}", key);
        Ok(CacheLookup::Hit(entry))
    }

    /// Size check always; content hash when `verify_on_hit` is set or the
    /// artifact was modified after it was committed.
    async fn is_intact(&self, entry: &CacheEntry) -> bool {
        let modified = match tokio::fs::metadata(&entry.path).await {
            Ok(meta) if meta.len() == entry.size => meta.modified().ok(),
            _ => return false,
        };
        let touched_since_commit = modified
            .map(DateTime::<Utc>::from)
            .map_or(true, |at| at > entry.cached_at);
        if !self.verify_on_hit && !touched_since_commit {
            return true;
        }
        match hashing::sha256_file_async(entry.path.clone()).await {
            Ok(actual) => actual == entry.checksum,
            Err(_) => false,
        }
    }

    fn touch(&self, key: &str) {
        let tick = self.access_clock.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(slot) = self.index.read().get(key) {
            slot.last_access.store(tick, Ordering::Relaxed);
        }
    }

    /// Move a finished download into the store.
    ///
    /// `temp_file` must live on the same filesystem as the cache (the
    /// downloader writes into [`DownloadCache::partial_path`]). After the
    /// commit the total size is brought back under `max_size_bytes` by evicting
    /// the least recently accessed entries, never the one just committed.
    pub async fn commit(&self, key: &str, temp_file: &Path, meta: CommitMeta) -> Result<CacheEntry> {
        let _writes = self.writes.lock().await;
        let size = tokio::fs::metadata(temp_file).await?.len();
        let artifact = self.artifact_path(key);
        let sidecar = self.sidecar_path(key);

        // Drop the old sidecar first so a crash mid-commit leaves an orphan
        // artifact (removed at startup) instead of a mismatched pair.
        remove_quietly(&sidecar).await;
        tokio::fs::rename(temp_file, &artifact).await?;

        let entry = CacheEntry {
            key: key.to_string(),
            url: meta.url,
            source_id: meta.source_id,
            path: artifact,
            size,
            checksum: meta.checksum.to_ascii_lowercase(),
            cached_at: Utc::now(),
            ttl: meta.ttl,
        };

        let sidecar_tmp = self
            .artifacts_dir
            .join(format!("{}.{}.{}", key, SIDECAR_EXT, TMP_EXT));
        tokio::fs::write(&sidecar_tmp, serde_json::to_vec_pretty(&entry)?).await?;
        tokio::fs::rename(&sidecar_tmp, &sidecar).await?;

        let tick = self.access_clock.fetch_add(1, Ordering::Relaxed) + 1;
        let replaced = self.index.write().insert(
            key.to_string(),
            Slot {
                entry: entry.clone(),
                last_access: AtomicU64::new(tick),
            },
        );
        if let Some(old) = replaced {
            self.total_bytes.fetch_sub(old.entry.size, Ordering::SeqCst);
        }
        self.total_bytes.fetch_add(size, Ordering::SeqCst);
        info!("Cached {} ({} bytes) as {}", entry.url, size, key);

        self.enforce_size_limit(key).await?;
        Ok(entry)
    }

    async fn enforce_size_limit(&self, keep: &str) -> Result<()> {
        while self.total_bytes.load(Ordering::SeqCst) > self.max_size_bytes {
            let victim = {
                let index = self.index.read();
                index
                    .iter()
                    .filter(|(key, _)| key.as_str() != keep)
                    .min_by_key(|(_, slot)| slot.last_access.load(Ordering::Relaxed))
                    .map(|(key, _)| key.clone())
            };
            let Some(victim) = victim else {
                break;
            };
            debug!("Evicting {} to respect cache size limit", victim);
            self.evict_locked(&victim, None).await?;
        }
        Ok(())
    }

    /// Remove `key` if it is still `expected` (or unconditionally for `None`)
    async fn evict_matching(&self, key: &str, expected: Option<&CacheEntry>) -> Result<bool> {
        let _writes = self.writes.lock().await;
        self.evict_locked(key, expected).await
    }

    async fn evict_locked(&self, key: &str, expected: Option<&CacheEntry>) -> Result<bool> {
        let removed = {
            let mut index = self.index.write();
            let current = match (index.get(key), expected) {
                (None, _) => false,
                (Some(slot), Some(expected)) => slot.entry == *expected,
                (Some(_), None) => true,
            };
            if current {
                index.remove(key)
            } else {
                None
            }
        };
        let Some(slot) = removed else {
            debug!("Cache entry {} changed or vanished, not evicting", key);
            return Ok(false);
        };
        self.total_bytes.fetch_sub(slot.entry.size, Ordering::SeqCst);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        remove_quietly(&self.sidecar_path(key)).await;
        remove_quietly(&slot.entry.path).await;
        Ok(true)
    }

    /// Remove an entry; returns whether it existed
    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.evict_matching(key, None).await
    }

    /// Remove `entry` only if it is still the committed entry for its key.
    ///
    /// Returns false when the key was recommitted or removed in the meantime.
    pub async fn remove_entry(&self, entry: &CacheEntry) -> Result<bool> {
        self.evict_matching(&entry.key, Some(entry)).await
    }

    /// Remove every entry and partial download; returns the entry count removed
    pub async fn clear(&self) -> Result<usize> {
        let keys: Vec<String> = self.index.read().keys().cloned().collect();
        let mut removed = 0;
        for key in keys {
            if self.evict_matching(&key, None).await? {
                removed += 1;
            }
        }
        let mut partials = tokio::fs::read_dir(&self.partial_dir).await?;
        while let Some(item) = partials.next_entry().await? {
            remove_quietly(&item.path()).await;
        }
        info!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    /// Delete every entry whose TTL has elapsed
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let expired: Vec<CacheEntry> = self
            .index
            .read()
            .values()
            .filter(|slot| slot.entry.is_expired(now))
            .map(|slot| slot.entry.clone())
            .collect();

        let mut removed = 0;
        for entry in expired {
            if self.evict_matching(&entry.key, Some(&entry)).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Removed {} expired cache entries", removed);
        }
        Ok(removed)
    }

    /// Total bytes of committed artifacts
    pub fn size(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub fn entry_count(&self) -> usize {
        self.index.read().len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entry_count(),
            total_bytes: self.size(),
            max_size_bytes: self.max_size_bytes,
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Serde helper storing a `Duration` as milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
