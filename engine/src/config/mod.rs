//! Configuration management
//!
//! This module holds the configuration consumed by the acquisition pipeline.
//! The configuration is an explicit value: callers build one (usually via
//! [`AcquisitionConfig::default`] or [`AcquisitionConfig::load_from_path`])
//! and inject it into the orchestrator. Nothing reads global state.
//!
//! # Configuration Sections
//!
//! - **core**: data directory, log level
//! - **security**: trusted/blocked domains, HTTPS and signature requirements,
//!   certificate pinning, file size limit
//! - **cache**: cache directory, TTL, size limit, concurrent downloads
//! - **network**: timeout, retries, backoff, proxy, custom headers
//! - **discovery**: parallelism and per-source timeout
//! - **reputation**: minimum accepted level and store location
//! - **orchestrator**: worker pool size for async loads
//!
//! # Path Expansion
//!
//! `~` in any configured path is expanded to the user's home directory.
//!
//! # Examples
//!
//! ```no_run
//! use warden_engine::config::AcquisitionConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AcquisitionConfig::load_from_path(std::path::Path::new("warden.toml"))?;
//! println!("Cache: {:?}", config.cache.directory);
//! # Ok(())
//! # }
//! ```

use sdk::errors::AcquireError;
use sdk::source::SecurityLevel;
use sdk::validation::ReputationLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub reputation: ReputationConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Core settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Security policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Level applied to sources that do not set one
    #[serde(default)]
    pub default_level: SecurityLevel,

    /// Domains considered trusted (subdomains included)
    #[serde(default)]
    pub trusted_domains: Vec<String>,

    /// Domains rejected at every security level (subdomains included)
    #[serde(default)]
    pub blocked_domains: Vec<String>,

    /// Reject sources whose host is not on the trusted list
    #[serde(default)]
    pub enforce_allowlist: bool,

    /// Reject plain-text schemes regardless of source level
    #[serde(default)]
    pub require_https: bool,

    /// Reject unsigned artifacts regardless of source level
    #[serde(default)]
    pub require_signature: bool,

    /// Accept self-signed certificates with a warning instead of failing
    #[serde(default)]
    pub allow_self_signed: bool,

    /// Host -> accepted SHA-256 certificate fingerprints (hex)
    #[serde(default)]
    pub pinned_fingerprints: HashMap<String, Vec<String>>,

    /// Lifetime of cached source/certificate verdicts
    #[serde(default = "default_validation_cache_ttl")]
    pub validation_cache_ttl_secs: u64,

    /// Maximum artifact size in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Warn when a certificate expires within this many days
    #[serde(default = "default_cert_expiry_warning_days")]
    pub certificate_expiry_warning_days: i64,
}

/// Download cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory (supports ~ expansion)
    #[serde(default = "default_cache_dir")]
    pub directory: PathBuf,

    /// TTL used when a source does not define one
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,

    /// Total size budget; least recently used entries are evicted beyond it
    #[serde(default = "default_cache_max_size")]
    pub max_size_bytes: u64,

    /// Upper bound on simultaneous transfers
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Re-hash artifacts on every cache hit. When off, only artifacts whose
    /// size changed or that were modified after their commit are re-hashed.
    #[serde(default = "default_true")]
    pub verify_on_hit: bool,
}

/// Network policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_network_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Proxy URL for all requests
    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Headers added to every request
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

/// Discovery fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Upper bound for a single source query
    #[serde(default = "default_discovery_timeout")]
    pub request_timeout_secs: u64,
}

/// Reputation gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Sources below this level are refused
    #[serde(default = "default_min_reputation")]
    pub minimum_level: ReputationLevel,

    /// Accept sources with no recorded history
    #[serde(default = "default_true")]
    pub allow_unknown: bool,

    /// Reputation store location (supports ~ expansion)
    #[serde(default = "default_reputation_store")]
    pub store_path: PathBuf,
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Bounded worker pool size for async loads
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.warden")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("~/.warden/cache")
}

fn default_reputation_store() -> PathBuf {
    PathBuf::from("~/.warden/reputation.json")
}

fn default_validation_cache_ttl() -> u64 {
    86_400
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

fn default_cert_expiry_warning_days() -> i64 {
    30
}

fn default_cache_ttl() -> u64 {
    86_400
}

fn default_cache_max_size() -> u64 {
    1024 * 1024 * 1024
}

fn default_max_concurrent_downloads() -> usize {
    4
}

fn default_network_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    250
}

fn default_backoff_max() -> u64 {
    10_000
}

fn default_user_agent() -> String {
    format!("warden/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_concurrent_requests() -> usize {
    8
}

fn default_discovery_timeout() -> u64 {
    30
}

fn default_min_reputation() -> ReputationLevel {
    ReputationLevel::Low
}

fn default_max_concurrent_operations() -> usize {
    8
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            default_level: SecurityLevel::default(),
            trusted_domains: Vec::new(),
            blocked_domains: Vec::new(),
            enforce_allowlist: false,
            require_https: false,
            require_signature: false,
            allow_self_signed: false,
            pinned_fingerprints: HashMap::new(),
            validation_cache_ttl_secs: default_validation_cache_ttl(),
            max_file_size: default_max_file_size(),
            certificate_expiry_warning_days: default_cert_expiry_warning_days(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
            default_ttl_secs: default_cache_ttl(),
            max_size_bytes: default_cache_max_size(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            verify_on_hit: true,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_network_timeout(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            proxy: None,
            user_agent: default_user_agent(),
            custom_headers: HashMap::new(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_secs: default_discovery_timeout(),
        }
    }
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            minimum_level: default_min_reputation(),
            allow_unknown: true,
            store_path: default_reputation_store(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: default_max_concurrent_operations(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            security: SecurityConfig::default(),
            cache: CacheConfig::default(),
            network: NetworkConfig::default(),
            discovery: DiscoveryConfig::default(),
            reputation: ReputationConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Capped exponential backoff for the given zero-based attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay = self.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

impl SecurityConfig {
    pub fn validation_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.validation_cache_ttl_secs)
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl DiscoveryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AcquisitionConfig {
    /// Configuration rooted at `root`: cache, data and reputation store live
    /// underneath it. Used by tests and embedded hosts.
    pub fn rooted_at(root: &Path) -> Self {
        let mut config = Self::default();
        config.core.data_dir = root.to_path_buf();
        config.cache.directory = root.join("cache");
        config.reputation.store_path = root.join("reputation.json");
        config
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_from_path(path: &Path) -> Result<Self, AcquireError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| AcquireError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, AcquireError> {
        let mut config: AcquisitionConfig = toml::from_str(contents)
            .map_err(|e| AcquireError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String, AcquireError> {
        toml::to_string_pretty(self)
            .map_err(|e| AcquireError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates the log level and numeric ranges
    /// - Lowercases domain lists and fingerprints
    /// - Expands ~ in paths
    ///
    /// # Errors
    ///
    /// Returns `AcquireError::Config` if any value is out of range.
    pub fn validate_and_process(&mut self) -> Result<(), AcquireError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(AcquireError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.cache.max_concurrent_downloads == 0 {
            return Err(AcquireError::Config(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        if self.discovery.max_concurrent_requests == 0 {
            return Err(AcquireError::Config(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.max_concurrent_operations == 0 {
            return Err(AcquireError::Config(
                "max_concurrent_operations must be at least 1".to_string(),
            ));
        }
        if self.network.max_retries > 10 {
            return Err(AcquireError::Config(
                "max_retries must be between 0 and 10".to_string(),
            ));
        }
        if self.network.timeout_secs == 0 {
            return Err(AcquireError::Config(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.security.max_file_size == 0 {
            return Err(AcquireError::Config(
                "max_file_size must be greater than 0".to_string(),
            ));
        }
        if self.network.backoff_base_ms > self.network.backoff_max_ms {
            return Err(AcquireError::Config(
                "backoff_base_ms must not exceed backoff_max_ms".to_string(),
            ));
        }

        normalize_domains(&mut self.security.trusted_domains);
        normalize_domains(&mut self.security.blocked_domains);
        self.security.pinned_fingerprints = self
            .security
            .pinned_fingerprints
            .drain()
            .map(|(host, pins)| {
                let pins = pins
                    .into_iter()
                    .map(|p| p.replace(':', "").to_ascii_lowercase())
                    .collect();
                (host.to_ascii_lowercase(), pins)
            })
            .collect();

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        self.cache.directory = expand_path(&self.cache.directory)?;
        self.reputation.store_path = expand_path(&self.reputation.store_path)?;

        Ok(())
    }
}

fn normalize_domains(domains: &mut Vec<String>) {
    for d in domains.iter_mut() {
        *d = d.trim().trim_start_matches("*.").to_ascii_lowercase();
    }
    domains.retain(|d| !d.is_empty());
}

/// Expand ~ in path to user's home directory
///
/// # Examples
///
/// ```ignore
/// let path = PathBuf::from("~/.warden");
/// let expanded = expand_path(&path)?;
/// // expanded is now /home/user/.warden (on Unix)
/// ```
pub fn expand_path(path: &Path) -> Result<PathBuf, AcquireError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| AcquireError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| AcquireError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| AcquireError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = AcquisitionConfig::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.security.default_level, SecurityLevel::Standard);
        assert_eq!(config.cache.max_concurrent_downloads, 4);
        assert_eq!(config.network.max_retries, 3);
        assert_eq!(config.reputation.minimum_level, ReputationLevel::Low);
        assert!(config.cache.verify_on_hit);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_backoff_is_capped() {
        let network = NetworkConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            ..NetworkConfig::default()
        };
        assert_eq!(network.backoff(0), Duration::from_millis(100));
        assert_eq!(network.backoff(1), Duration::from_millis(200));
        assert_eq!(network.backoff(3), Duration::from_millis(800));
        assert_eq!(network.backoff(4), Duration::from_millis(1_000));
        assert_eq!(network.backoff(40), Duration::from_millis(1_000));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let mut config = AcquisitionConfig::default();
        config.core.log_level = "loud".to_string();
        assert!(config.validate_and_process().is_err());

        let mut config = AcquisitionConfig::default();
        config.cache.max_concurrent_downloads = 0;
        assert!(config.validate_and_process().is_err());

        let mut config = AcquisitionConfig::default();
        config.network.max_retries = 11;
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_domains_are_normalized() {
        let mut config = AcquisitionConfig::default();
        config.security.blocked_domains = vec!["*.Evil.Example.com ".to_string(), "".to_string()];
        config
            .security
            .pinned_fingerprints
            .insert("Good.Example.com".to_string(), vec!["AB:CD".to_string()]);
        config.validate_and_process().unwrap();

        assert_eq!(config.security.blocked_domains, vec!["evil.example.com"]);
        assert_eq!(
            config.security.pinned_fingerprints.get("good.example.com"),
            Some(&vec!["abcd".to_string()])
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = AcquisitionConfig::default();
        let toml_string = config.to_toml_string().unwrap();

        let deserialized: AcquisitionConfig = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(
            config.cache.max_size_bytes,
            deserialized.cache.max_size_bytes
        );
    }
}
