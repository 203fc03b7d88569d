//! Source registry
//!
//! Stores the configured remote origins and their per-origin policy. Sources
//! are keyed by their derived id, so adding the same origin twice updates the
//! existing entry in place instead of creating a duplicate.
//!
//! The registry is read far more often than it is written (every discovery and
//! every load resolves sources), so it sits behind a read-write lock. It never
//! touches the network.

use parking_lot::RwLock;
use sdk::errors::{AcquireError, Result};
use sdk::source::{normalize_url, RemoteSource, SecurityLevel};
use std::collections::HashMap;
use tracing::{debug, info};

/// Upper bound accepted for `RemoteSource::max_retries`
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Schemes that carry no transport security
const PLAINTEXT_SCHEMES: &[&str] = &["http", "ftp"];

#[derive(Default)]
struct Inner {
    /// Ids in insertion order
    order: Vec<String>,
    by_id: HashMap<String, RemoteSource>,
}

/// Registry of configured remote sources
#[derive(Default)]
pub struct SourceRegistry {
    inner: RwLock<Inner>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with `sources`
    ///
    /// # Errors
    ///
    /// Fails on the first source that does not validate.
    pub fn with_sources(sources: impl IntoIterator<Item = RemoteSource>) -> Result<Self> {
        let registry = Self::new();
        for source in sources {
            registry.add(source)?;
        }
        Ok(registry)
    }

    /// Check a source for structural and policy consistency
    ///
    /// # Errors
    ///
    /// Returns `AcquireError::InvalidSource` when:
    /// - the URL is empty or malformed
    /// - the scheme is not supported by the source type
    /// - a plain-text scheme is used at `Standard` security or above
    /// - `max_retries` exceeds the limit or the timeout is zero
    pub fn validate(&self, source: &RemoteSource) -> Result<()> {
        let url = source.parsed_url()?;
        let scheme = url.scheme();

        let supported = source.source_type.supported_schemes();
        if !supported.is_empty() && !supported.contains(&scheme) {
            return Err(AcquireError::InvalidSource(format!(
                "Scheme '{}' is not supported for {} sources",
                scheme, source.source_type
            )));
        }

        if source.security_level >= SecurityLevel::Standard && PLAINTEXT_SCHEMES.contains(&scheme)
        {
            return Err(AcquireError::InvalidSource(format!(
                "Scheme '{}' is not allowed at {:?} security",
                scheme, source.security_level
            )));
        }

        if source.max_retries > MAX_RETRIES_LIMIT {
            return Err(AcquireError::InvalidSource(format!(
                "max_retries {} exceeds the limit of {}",
                source.max_retries, MAX_RETRIES_LIMIT
            )));
        }

        if source.timeout.is_zero() {
            return Err(AcquireError::InvalidSource(
                "Timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Insert or update a source, returning its id
    ///
    /// The id is always re-derived from the URL and type. Re-adding an
    /// existing origin replaces the stored value and keeps its position.
    pub fn add(&self, mut source: RemoteSource) -> Result<String> {
        source.refresh_id();
        self.validate(&source)?;

        let id = source.id.clone();
        let mut inner = self.inner.write();
        if inner.by_id.insert(id.clone(), source).is_some() {
            debug!("Updated source {}", id);
        } else {
            inner.order.push(id.clone());
            info!("Registered source {}", id);
        }
        Ok(id)
    }

    /// Remove a source by id
    pub fn remove(&self, id: &str) -> Result<RemoteSource> {
        let mut inner = self.inner.write();
        let removed = inner
            .by_id
            .remove(id)
            .ok_or_else(|| AcquireError::NotFound(format!("source {}", id)))?;
        inner.order.retain(|existing| existing != id);
        info!("Removed source {}", id);
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<RemoteSource> {
        self.inner.read().by_id.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().by_id.contains_key(id)
    }

    /// All sources in insertion order
    pub fn list(&self) -> Vec<RemoteSource> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    /// Enabled sources in insertion order
    pub fn list_enabled(&self) -> Vec<RemoteSource> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|source| source.enabled)
            .cloned()
            .collect()
    }

    /// Mutate a stored source in place.
    ///
    /// The result is re-validated before it replaces the stored value; the id
    /// is kept even if the URL changed.
    pub fn update<F>(&self, id: &str, f: F) -> Result<RemoteSource>
    where
        F: FnOnce(&mut RemoteSource),
    {
        let mut inner = self.inner.write();
        let current = inner
            .by_id
            .get(id)
            .ok_or_else(|| AcquireError::NotFound(format!("source {}", id)))?;

        let mut updated = current.clone();
        f(&mut updated);
        updated.id = id.to_string();
        self.validate(&updated)?;

        inner.by_id.insert(id.to_string(), updated.clone());
        debug!("Updated source {}", id);
        Ok(updated)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.update(id, |source| source.enabled = enabled)
            .map(|_| ())
    }

    /// Find a source whose URL normalizes to the same value as `url`
    pub fn find_by_url(&self, url: &str) -> Option<RemoteSource> {
        let wanted = normalize_url(url);
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .find(|source| normalize_url(&source.url) == wanted)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
