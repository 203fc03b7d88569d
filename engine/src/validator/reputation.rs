//! Source reputation store
//!
//! Reputation is a running score in `[0, 1]` per source, moved only by
//! completed download+validation outcomes:
//!
//! ```text
//! score = 0.8 * score + 0.2 * outcome      (outcome = 1 on success, 0 on failure)
//! ```
//!
//! The store is a JSON document keyed by source id, loaded at startup and
//! rewritten (temp file + rename) after every mutation. Scores never change
//! with elapsed time.

use chrono::Utc;
use parking_lot::RwLock;
use sdk::errors::Result;
use sdk::validation::{ReputationLevel, SourceReputation};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const INITIAL_SCORE: f64 = 0.5;
const DECAY: f64 = 0.8;

/// Map a score to its band; sources without history are `Unknown`
pub fn level_for(score: f64, download_count: u64) -> ReputationLevel {
    if download_count == 0 {
        ReputationLevel::Unknown
    } else if score < 0.2 {
        ReputationLevel::Untrusted
    } else if score < 0.4 {
        ReputationLevel::Low
    } else if score < 0.6 {
        ReputationLevel::Medium
    } else if score < 0.8 {
        ReputationLevel::High
    } else {
        ReputationLevel::Trusted
    }
}

fn fresh(source_id: &str) -> SourceReputation {
    SourceReputation {
        source_id: source_id.to_string(),
        level: ReputationLevel::Unknown,
        score: INITIAL_SCORE,
        download_count: 0,
        success_count: 0,
        failure_count: 0,
        success_rate: 0.0,
        last_verified: None,
    }
}

/// Persistent reputation records
pub struct ReputationStore {
    path: Option<PathBuf>,
    records: RwLock<BTreeMap<String, SourceReputation>>,
    save_lock: tokio::sync::Mutex<()>,
}

impl ReputationStore {
    /// Store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(BTreeMap::new()),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the store at `path`; a missing file yields an empty store.
    ///
    /// An unreadable document is logged and replaced on the next save.
    pub fn load(path: &Path) -> Result<Self> {
        let records = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Ignoring corrupt reputation store {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Loaded {} reputation records", records.len());
        Ok(Self {
            path: Some(path.to_path_buf()),
            records: RwLock::new(records),
            save_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn get(&self, source_id: &str) -> Option<SourceReputation> {
        self.records.read().get(source_id).cloned()
    }

    /// Current level; `Unknown` without history
    pub fn level(&self, source_id: &str) -> ReputationLevel {
        self.get(source_id)
            .map(|r| r.level)
            .unwrap_or(ReputationLevel::Unknown)
    }

    pub fn all(&self) -> Vec<SourceReputation> {
        self.records.read().values().cloned().collect()
    }

    /// Apply one outcome and persist; returns the previous level and the
    /// updated record
    pub async fn record(
        &self,
        source_id: &str,
        success: bool,
    ) -> Result<(ReputationLevel, SourceReputation)> {
        let _save = self.save_lock.lock().await;

        let (previous, updated, snapshot) = {
            let mut records = self.records.write();
            let record = records
                .entry(source_id.to_string())
                .or_insert_with(|| fresh(source_id));
            let previous = record.level;

            let outcome = if success { 1.0 } else { 0.0 };
            record.score = (DECAY * record.score + (1.0 - DECAY) * outcome).clamp(0.0, 1.0);
            record.download_count += 1;
            if success {
                record.success_count += 1;
                record.last_verified = Some(Utc::now());
            } else {
                record.failure_count += 1;
            }
            record.success_rate = record.success_count as f64 / record.download_count as f64;
            record.level = level_for(record.score, record.download_count);

            let updated = record.clone();
            let snapshot = match &self.path {
                Some(_) => Some(serde_json::to_vec_pretty(&*records)?),
                None => None,
            };
            (previous, updated, snapshot)
        };

        if let (Some(path), Some(bytes)) = (&self.path, snapshot) {
            write_atomic(path, &bytes).await?;
        }
        Ok((previous, updated))
    }

    /// Forget a source's history
    pub async fn reset(&self, source_id: &str) -> Result<bool> {
        let _save = self.save_lock.lock().await;
        let (removed, snapshot) = {
            let mut records = self.records.write();
            let removed = records.remove(source_id).is_some();
            let snapshot = match &self.path {
                Some(_) if removed => Some(serde_json::to_vec_pretty(&*records)?),
                _ => None,
            };
            (removed, snapshot)
        };
        if let (Some(path), Some(bytes)) = (&self.path, snapshot) {
            write_atomic(path, &bytes).await?;
        }
        Ok(removed)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
