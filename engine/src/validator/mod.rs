//! Security validation
//!
//! The [`Validator`] evaluates trust at three points of the pipeline:
//!
//! - **source**: URL shape, scheme, blocklist, allowlist and trust checks
//!   before anything is fetched
//! - **certificate**: chain facts supplied by the transport layer
//! - **artifact**: existence, size, checksum and signature of a downloaded
//!   file
//!
//! Each check produces a [`ValidationResult`]; combined checks keep the worst
//! level. Source and certificate verdicts are cached for
//! `validation_cache_ttl_secs`, and a cached `Blocked` or `Failed` verdict
//! is returned as-is until it expires.
//!
//! The validator also owns the [`ReputationStore`], which tracks per-source
//! reliability from completed load outcomes.

pub mod certificate;
pub mod reputation;
pub mod signing;

use chrono::Utc;
use parking_lot::RwLock;
use sdk::errors::Result;
use sdk::interfaces::SigningBackend;
use sdk::source::{RemoteSource, SecurityLevel};
use sdk::validation::{
    CertificateInfo, ReputationLevel, SourceReputation, ValidationCode, ValidationLevel,
    ValidationResult,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{AcquisitionConfig, ReputationConfig, SecurityConfig};
use crate::events::{Event, EventBus};
use crate::hashing::Checksum;

pub use certificate::{check_chain, fingerprint, hostname_matches};
pub use reputation::ReputationStore;
pub use signing::{decode_signature, Ed25519Backend};

/// True when `host` equals `domain` or is a subdomain of it
pub fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

struct CachedVerdict {
    result: ValidationResult,
    expires_at: Instant,
}

/// Validation counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationStats {
    pub performed: u64,
    pub passed: u64,
    pub warnings: u64,
    pub failed: u64,
    pub blocked: u64,
    pub cache_hits: u64,
}

#[derive(Default)]
struct Counters {
    performed: AtomicU64,
    passed: AtomicU64,
    warnings: AtomicU64,
    failed: AtomicU64,
    blocked: AtomicU64,
    cache_hits: AtomicU64,
}

impl Counters {
    fn record(&self, level: ValidationLevel) {
        self.performed.fetch_add(1, Ordering::Relaxed);
        let counter = match level {
            ValidationLevel::Passed => &self.passed,
            ValidationLevel::Warning => &self.warnings,
            ValidationLevel::Failed => &self.failed,
            ValidationLevel::Blocked => &self.blocked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Trust checks and reputation tracking
pub struct Validator {
    security: SecurityConfig,
    reputation_policy: ReputationConfig,
    cache_ttl: Duration,
    signer: Option<Arc<dyn SigningBackend>>,
    reputation: ReputationStore,
    events: Arc<EventBus>,
    source_verdicts: RwLock<HashMap<String, CachedVerdict>>,
    certificate_verdicts: RwLock<HashMap<String, CachedVerdict>>,
    counters: Counters,
}

impl Validator {
    /// Build a validator, loading the reputation store from
    /// `config.reputation.store_path`
    pub fn new(
        config: &AcquisitionConfig,
        signer: Option<Arc<dyn SigningBackend>>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let reputation = ReputationStore::load(&config.reputation.store_path)?;
        Ok(Self::with_store(config, reputation, signer, events))
    }

    /// Build a validator around an existing reputation store
    pub fn with_store(
        config: &AcquisitionConfig,
        reputation: ReputationStore,
        signer: Option<Arc<dyn SigningBackend>>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            security: config.security.clone(),
            reputation_policy: config.reputation.clone(),
            cache_ttl: config.security.validation_cache_ttl(),
            signer,
            reputation,
            events,
            source_verdicts: RwLock::new(HashMap::new()),
            certificate_verdicts: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    fn cached(&self, cache: &RwLock<HashMap<String, CachedVerdict>>, key: &str) -> Option<ValidationResult> {
        let verdicts = cache.read();
        let hit = verdicts
            .get(key)
            .filter(|v| v.expires_at > Instant::now())
            .map(|v| v.result.clone());
        if hit.is_some() {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    fn remember(&self, cache: &RwLock<HashMap<String, CachedVerdict>>, key: String, result: &ValidationResult) {
        let now = Instant::now();
        let mut verdicts = cache.write();
        verdicts.retain(|_, v| v.expires_at > now);
        verdicts.insert(
            key,
            CachedVerdict {
                result: result.clone(),
                expires_at: now + self.cache_ttl,
            },
        );
    }

    fn is_blocked_host(&self, host: &str) -> bool {
        self.security
            .blocked_domains
            .iter()
            .any(|d| domain_matches(host, d))
    }

    fn is_trusted_host(&self, host: &str) -> bool {
        self.security
            .trusted_domains
            .iter()
            .any(|d| domain_matches(host, d))
    }

    /// Evaluate `source` against the security policy.
    ///
    /// The blocklist applies at every security level, `Minimal` included.
    /// Verdicts are cached per source and policy-relevant settings, so the
    /// same source presented at another level or enabled state is re-evaluated.
    pub fn validate_source(&self, source: &RemoteSource) -> ValidationResult {
        let key = source_verdict_key(source);
        if let Some(cached) = self.cached(&self.source_verdicts, &key) {
            debug!("Using cached verdict for source {}", source.id);
            return cached;
        }

        let result = self.evaluate_source(source);
        self.counters.record(result.level);
        self.remember(&self.source_verdicts, key, &result);

        match result.level {
            ValidationLevel::Passed | ValidationLevel::Warning => {
                debug!("Source {} validated: {:?}", source.id, result.level)
            }
            _ => warn!("Source {} rejected: {}", source.id, result.message),
        }
        self.events.publish(Event::SourceValidated {
            source_id: source.id.clone(),
            level: result.level,
        });
        result
    }

    fn evaluate_source(&self, source: &RemoteSource) -> ValidationResult {
        let url = match source.parsed_url() {
            Ok(url) => url,
            Err(e) => return ValidationResult::failed(ValidationCode::InvalidUrl, e.to_string()),
        };
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let level = source.security_level;

        let mut result = ValidationResult::passed(format!("Source {} accepted", source.url))
            .with_metadata("host", host.clone())
            .with_metadata("security_level", format!("{:?}", level).to_lowercase());

        if self.is_blocked_host(&host) {
            return result.merge(ValidationResult::blocked(
                ValidationCode::DomainBlocked,
                format!("Domain {} is blocked", host),
            ));
        }

        if !source.enabled {
            result = result.merge(ValidationResult::failed(
                ValidationCode::SourceDisabled,
                format!("Source {} is disabled", source.id),
            ));
        }

        let insecure = matches!(url.scheme(), "http" | "ftp");
        if insecure && (self.security.require_https || level >= SecurityLevel::Standard) {
            result = result.merge(ValidationResult::failed(
                ValidationCode::InsecureScheme,
                format!("Scheme {} is not allowed at {:?} level", url.scheme(), level),
            ));
        }

        if !self.is_trusted_host(&host) {
            if self.security.enforce_allowlist || level == SecurityLevel::Paranoid {
                result = result.merge(ValidationResult::failed(
                    ValidationCode::NotAllowlisted,
                    format!("Domain {} is not on the trusted list", host),
                ));
            } else if level >= SecurityLevel::High {
                result = result.merge(ValidationResult::warning(
                    ValidationCode::NotTrusted,
                    format!("Domain {} is not trusted", host),
                ));
            }
        }

        result
    }

    /// Evaluate a leaf-first certificate chain presented by `hostname`
    pub fn validate_certificate(&self, chain: &[CertificateInfo], hostname: &str) -> ValidationResult {
        let key = format!(
            "{}|{}",
            hostname.to_ascii_lowercase(),
            chain.first().map(fingerprint).unwrap_or_default()
        );
        if let Some(cached) = self.cached(&self.certificate_verdicts, &key) {
            return cached;
        }

        let result = check_chain(chain, hostname, &self.security, Utc::now());
        self.counters.record(result.level);
        self.remember(&self.certificate_verdicts, key, &result);
        if !result.is_acceptable() {
            warn!("Certificate for {} rejected: {}", hostname, result.message);
        }
        result
    }

    /// Evaluate a downloaded artifact.
    ///
    /// A checksum mismatch fails at every security level. Missing checksums
    /// and signatures are tolerated at low levels and rejected at high ones.
    pub async fn validate_plugin_file(
        &self,
        path: &Path,
        source: &RemoteSource,
        expected_checksum: Option<&str>,
        signature: Option<&str>,
    ) -> ValidationResult {
        let result = self
            .evaluate_file(path, source, expected_checksum, signature)
            .await;
        self.counters.record(result.level);

        if result.is_acceptable() {
            debug!("Artifact {} validated: {:?}", path.display(), result.level);
        } else {
            warn!("Artifact {} rejected: {}", path.display(), result.message);
        }
        result
    }

    async fn evaluate_file(
        &self,
        path: &Path,
        source: &RemoteSource,
        expected_checksum: Option<&str>,
        signature: Option<&str>,
    ) -> ValidationResult {
        let level = source.security_level;

        let size = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                return ValidationResult::failed(
                    ValidationCode::FileMissing,
                    format!("Artifact {} does not exist", path.display()),
                )
            }
        };

        let mut result = ValidationResult::passed(format!("Artifact {} accepted", path.display()))
            .with_metadata("size", size.to_string());

        if size > self.security.max_file_size {
            return result.merge(
                ValidationResult::failed(
                    ValidationCode::SizeExceeded,
                    format!("Artifact is {} bytes, limit is {}", size, self.security.max_file_size),
                )
                .with_metadata("size", size.to_string())
                .with_metadata("limit", self.security.max_file_size.to_string()),
            );
        }

        result = result.merge(self.check_checksum(path, level, expected_checksum).await);
        result = result.merge(self.check_signature(path, level, signature).await);
        result
    }

    async fn check_checksum(
        &self,
        path: &Path,
        level: SecurityLevel,
        expected: Option<&str>,
    ) -> ValidationResult {
        let Some(raw) = expected else {
            return match level {
                SecurityLevel::Minimal | SecurityLevel::Standard => {
                    ValidationResult::passed("No checksum supplied")
                }
                SecurityLevel::High => {
                    ValidationResult::warning(ValidationCode::ChecksumMissing, "No checksum supplied")
                }
                SecurityLevel::Paranoid => ValidationResult::failed(
                    ValidationCode::ChecksumMissing,
                    "A checksum is required at paranoid level",
                ),
            };
        };

        let checksum = match Checksum::parse(raw) {
            Ok(checksum) => checksum,
            Err(e) => {
                return ValidationResult::failed(ValidationCode::ChecksumMismatch, e.to_string())
                    .with_metadata("expected", raw.to_string())
            }
        };

        let owned = path.to_path_buf();
        let expected = checksum.to_string();
        let verdict = tokio::task::spawn_blocking(move || checksum.verify_file(&owned, None)).await;

        match verdict {
            Ok(Ok(None)) => {
                ValidationResult::passed("Checksum verified").with_metadata("checksum", expected)
            }
            Ok(Ok(Some(actual))) => ValidationResult::failed(
                ValidationCode::ChecksumMismatch,
                format!("Checksum mismatch for {}", path.display()),
            )
            .with_metadata("expected", expected)
            .with_metadata("actual", actual),
            Ok(Err(e)) => ValidationResult::failed(ValidationCode::FileMissing, e.to_string()),
            Err(e) => ValidationResult::failed(
                ValidationCode::ChecksumMismatch,
                format!("Checksum task failed: {}", e),
            ),
        }
    }

    async fn check_signature(
        &self,
        path: &Path,
        level: SecurityLevel,
        signature: Option<&str>,
    ) -> ValidationResult {
        let Some(signature) = signature else {
            let required = self.security.require_signature || level >= SecurityLevel::High;
            return if required {
                ValidationResult::failed(
                    ValidationCode::SignatureMissing,
                    format!("A signature is required at {:?} level", level),
                )
            } else if level == SecurityLevel::Minimal {
                ValidationResult::passed("No signature supplied")
            } else {
                ValidationResult::warning(ValidationCode::SignatureMissing, "Artifact is unsigned")
            };
        };

        let Some(signer) = &self.signer else {
            return ValidationResult::failed(
                ValidationCode::SignatureInvalid,
                "No signing backend configured",
            );
        };

        let bytes = match decode_signature(signature) {
            Ok(bytes) => bytes,
            Err(e) => return ValidationResult::failed(ValidationCode::SignatureInvalid, e.to_string()),
        };
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => return ValidationResult::failed(ValidationCode::FileMissing, e.to_string()),
        };

        let verdict = signer.verify(&data, &bytes);
        if verdict.valid {
            let mut result = ValidationResult::passed("Signature verified")
                .with_metadata("algorithm", verdict.algorithm);
            if let Some(name) = verdict.signer {
                result = result.with_metadata("signer", name);
            }
            result
        } else {
            ValidationResult::failed(
                ValidationCode::SignatureInvalid,
                format!("Signature verification failed for {}", path.display()),
            )
            .with_metadata("algorithm", verdict.algorithm)
        }
    }

    /// Whether `source` meets `minimum` (or the configured minimum).
    ///
    /// Blocked domains never qualify. Sources without history qualify only
    /// when `allow_unknown` is set.
    pub fn is_acceptable(&self, source: &RemoteSource, minimum: Option<ReputationLevel>) -> bool {
        if let Some(host) = source.host() {
            if self.is_blocked_host(&host) {
                return false;
            }
        }
        let minimum = minimum.unwrap_or(self.reputation_policy.minimum_level);
        match self.reputation.level(&source.id) {
            ReputationLevel::Unknown => self.reputation_policy.allow_unknown,
            level => level >= minimum,
        }
    }

    pub fn reputation(&self, source_id: &str) -> Option<SourceReputation> {
        self.reputation.get(source_id)
    }

    pub fn reputations(&self) -> Vec<SourceReputation> {
        self.reputation.all()
    }

    /// Fold a completed load outcome into the source's reputation
    pub async fn record_outcome(&self, source_id: &str, success: bool) -> Result<SourceReputation> {
        let (previous, updated) = self.reputation.record(source_id, success).await?;
        if previous != updated.level {
            info!(
                "Reputation of {} changed: {:?} -> {:?}",
                source_id, previous, updated.level
            );
            self.events.publish(Event::ReputationChanged {
                source_id: source_id.to_string(),
                old_level: previous,
                new_level: updated.level,
            });
        }
        Ok(updated)
    }

    /// Drop all cached source and certificate verdicts
    pub fn clear_cache(&self) {
        self.source_verdicts.write().clear();
        self.certificate_verdicts.write().clear();
    }

    pub fn stats(&self) -> ValidationStats {
        ValidationStats {
            performed: self.counters.performed.load(Ordering::Relaxed),
            passed: self.counters.passed.load(Ordering::Relaxed),
            warnings: self.counters.warnings.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            blocked: self.counters.blocked.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
        }
    }
}

fn source_verdict_key(source: &RemoteSource) -> String {
    format!(
        "{}|{}|{:?}|{}",
        source.id, source.url, source.security_level, source.enabled
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::hashing::sha256_hex;
    use sdk::source::SourceType;
    use tempfile::TempDir;

    fn validator(dir: &TempDir, tweak: impl FnOnce(&mut AcquisitionConfig)) -> Validator {
        let mut config = AcquisitionConfig::rooted_at(dir.path());
        tweak(&mut config);
        Validator::new(&config, None, Arc::new(EventBus::new())).unwrap()
    }

    fn source(url: &str, level: SecurityLevel) -> RemoteSource {
        RemoteSource::new(url, SourceType::Http).with_security_level(level)
    }

    #[test]
    fn test_domain_matches() {
        assert!(domain_matches("example.com", "example.com"));
        assert!(domain_matches("cdn.Example.com", "example.com"));
        assert!(!domain_matches("badexample.com", "example.com"));
    }

    #[test]
    fn test_blocklist_applies_at_minimal() {
        let dir = TempDir::new().unwrap();
        let validator = validator(&dir, |c| c.security.blocked_domains = vec!["evil.com".into()]);

        let result = validator.validate_source(&source("http://cdn.evil.com/x", SecurityLevel::Minimal));
        assert_eq!(result.level, ValidationLevel::Blocked);
        assert_eq!(result.code, Some(ValidationCode::DomainBlocked));
    }

    #[test]
    fn test_scheme_policy() {
        let dir = TempDir::new().unwrap();
        let validator = validator(&dir, |_| {});

        let minimal = validator.validate_source(&source("http://plain.example.com", SecurityLevel::Minimal));
        assert_eq!(minimal.level, ValidationLevel::Passed);

        let standard = validator.validate_source(&source("http://plain.example.com", SecurityLevel::Standard));
        assert_eq!(standard.code, Some(ValidationCode::InsecureScheme));
    }

    #[test]
    fn test_trust_policy_by_level() {
        let dir = TempDir::new().unwrap();
        let validator = validator(&dir, |c| c.security.trusted_domains = vec!["good.com".into()]);

        let high = validator.validate_source(&source("https://other.com", SecurityLevel::High));
        assert_eq!(high.level, ValidationLevel::Warning);
        assert_eq!(high.code, Some(ValidationCode::NotTrusted));

        let paranoid = validator.validate_source(&source("https://other.com", SecurityLevel::Paranoid));
        assert_eq!(paranoid.code, Some(ValidationCode::NotAllowlisted));

        let trusted = validator.validate_source(&source("https://pkg.good.com", SecurityLevel::Paranoid));
        assert_eq!(trusted.level, ValidationLevel::Passed);
    }

    #[test]
    fn test_source_verdicts_are_cached() {
        let dir = TempDir::new().unwrap();
        let validator = validator(&dir, |_| {});
        let mut validated = validator.events.subscribe(EventType::SourceValidated);

        let src = source("https://good.example.com", SecurityLevel::Standard);
        validator.validate_source(&src);
        validator.validate_source(&src);

        let stats = validator.stats();
        assert_eq!(stats.performed, 1);
        assert_eq!(stats.cache_hits, 1);
        assert!(validated.try_recv().is_ok());
        assert!(validated.try_recv().is_err());

        validator.clear_cache();
        validator.validate_source(&src);
        assert_eq!(validator.stats().performed, 2);
    }

    #[test]
    fn test_cached_verdict_follows_source_settings() {
        let dir = TempDir::new().unwrap();
        let validator = validator(&dir, |_| {});

        let mut src = source("http://plain.example.com", SecurityLevel::Minimal);
        assert_eq!(validator.validate_source(&src).level, ValidationLevel::Passed);

        src.security_level = SecurityLevel::Standard;
        let standard = validator.validate_source(&src);
        assert_eq!(standard.level, ValidationLevel::Failed);
        assert_eq!(standard.code, Some(ValidationCode::InsecureScheme));

        src.security_level = SecurityLevel::Minimal;
        src.enabled = false;
        let disabled = validator.validate_source(&src);
        assert_eq!(disabled.code, Some(ValidationCode::SourceDisabled));

        assert_eq!(validator.stats().performed, 3);
        assert_eq!(validator.stats().cache_hits, 0);
    }

    #[tokio::test]
    async fn test_plugin_file_checks() {
        let dir = TempDir::new().unwrap();
        let validator = validator(&dir, |c| c.security.max_file_size = 8);
        let src = source("https://good.example.com", SecurityLevel::Standard);

        let missing = validator
            .validate_plugin_file(&dir.path().join("missing.bin"), &src, None, None)
            .await;
        assert_eq!(missing.code, Some(ValidationCode::FileMissing));

        let big = dir.path().join("big.bin");
        std::fs::write(&big, b"0123456789").unwrap();
        let result = validator.validate_plugin_file(&big, &src, None, None).await;
        assert_eq!(result.code, Some(ValidationCode::SizeExceeded));
        assert_eq!(result.metadata.get("limit").map(String::as_str), Some("8"));

        let small = dir.path().join("small.bin");
        std::fs::write(&small, b"plugin").unwrap();
        let good = format!("sha256:{}", sha256_hex(b"plugin"));
        let result = validator
            .validate_plugin_file(&small, &src, Some(&good), None)
            .await;
        assert_eq!(result.level, ValidationLevel::Warning);
        assert_eq!(result.code, Some(ValidationCode::SignatureMissing));

        let result = validator
            .validate_plugin_file(&small, &src, Some(&sha256_hex(b"other")), None)
            .await;
        assert_eq!(result.code, Some(ValidationCode::ChecksumMismatch));
        assert_eq!(result.metadata.get("actual"), Some(&sha256_hex(b"plugin")));
    }

    #[tokio::test]
    async fn test_missing_checksum_by_level() {
        let dir = TempDir::new().unwrap();
        let validator = validator(&dir, |_| {});
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"plugin").unwrap();

        let minimal = validator
            .validate_plugin_file(&path, &source("https://x.com", SecurityLevel::Minimal), None, None)
            .await;
        assert_eq!(minimal.level, ValidationLevel::Passed);

        let paranoid = validator
            .validate_plugin_file(&path, &source("https://x.com", SecurityLevel::Paranoid), None, None)
            .await;
        assert_eq!(paranoid.level, ValidationLevel::Failed);
        assert_eq!(paranoid.code, Some(ValidationCode::ChecksumMissing));
    }

    #[tokio::test]
    async fn test_reputation_gate() {
        let dir = TempDir::new().unwrap();
        let validator = validator(&dir, |c| c.reputation.minimum_level = ReputationLevel::Low);
        let src = source("https://flaky.example.com", SecurityLevel::Standard);
        let mut changes = validator.events.subscribe(EventType::ReputationChanged);

        assert!(validator.is_acceptable(&src, None));
        for _ in 0..5 {
            validator.record_outcome(&src.id, false).await.unwrap();
        }
        assert_eq!(
            validator.reputation(&src.id).map(|r| r.level),
            Some(ReputationLevel::Untrusted)
        );
        assert!(!validator.is_acceptable(&src, None));
        assert!(validator.is_acceptable(&src, Some(ReputationLevel::Untrusted)));
        assert!(changes.try_recv().is_ok());
    }
}
