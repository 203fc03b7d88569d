//! Integration tests for configuration management
//!
//! These tests load full TOML documents from disk and check defaults,
//! normalization and rejection of invalid values.

use sdk::errors::AcquireError;
use sdk::source::SecurityLevel;
use sdk::validation::ReputationLevel;
use std::time::Duration;
use tempfile::TempDir;
use warden_engine::config::AcquisitionConfig;

#[test]
fn test_config_toml_parsing() {
    let toml_content = r#"
[core]
log_level = "debug"
data_dir = "/var/lib/warden"

[security]
default_level = "high"
trusted_domains = ["*.Example.com", "plugins.warden.dev"]
blocked_domains = ["evil.com"]
require_https = true

[security.pinned_fingerprints]
"Plugins.Warden.Dev" = ["AB:CD:EF"]

[cache]
directory = "/var/cache/warden"
default_ttl_secs = 3600
max_concurrent_downloads = 2

[network]
timeout_secs = 60
max_retries = 5
proxy = "http://proxy.internal:3128"

[network.custom_headers]
X-Client = "warden"

[discovery]
max_concurrent_requests = 16

[reputation]
minimum_level = "medium"
allow_unknown = false
store_path = "/var/lib/warden/reputation.json"
"#;

    let config = AcquisitionConfig::from_toml_str(toml_content).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.security.default_level, SecurityLevel::High);
    assert_eq!(
        config.security.trusted_domains,
        vec!["example.com".to_string(), "plugins.warden.dev".to_string()]
    );
    assert!(config.security.require_https);
    assert_eq!(
        config.security.pinned_fingerprints["plugins.warden.dev"],
        vec!["abcdef".to_string()]
    );
    assert_eq!(config.cache.default_ttl(), Duration::from_secs(3600));
    assert_eq!(config.cache.max_concurrent_downloads, 2);
    assert_eq!(config.network.max_retries, 5);
    assert_eq!(config.network.custom_headers["X-Client"], "warden");
    assert_eq!(config.discovery.max_concurrent_requests, 16);
    assert_eq!(config.reputation.minimum_level, ReputationLevel::Medium);
    assert!(!config.reputation.allow_unknown);

    // Sections left out keep their defaults
    assert_eq!(config.orchestrator.max_concurrent_operations, 8);
    assert_eq!(config.discovery.request_timeout(), Duration::from_secs(30));
}

#[test]
fn test_empty_file_uses_defaults() {
    let config = AcquisitionConfig::from_toml_str("").unwrap();
    assert_eq!(config.core.log_level, "info");
    assert_eq!(config.network.max_retries, 3);
    assert!(config.cache.verify_on_hit);
    assert!(config.reputation.allow_unknown);
    assert!(!config.cache.directory.starts_with("~"));
}

#[test]
fn test_load_from_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("warden.toml");
    std::fs::write(
        &path,
        "[cache]\ndirectory = \"~/warden-cache\"\nmax_size_bytes = 1048576\n",
    )
    .unwrap();

    let config = AcquisitionConfig::load_from_path(&path).unwrap();
    assert_eq!(config.cache.max_size_bytes, 1_048_576);
    assert!(config.cache.directory.is_absolute());
    assert!(config.cache.directory.ends_with("warden-cache"));
}

#[test]
fn test_invalid_documents_are_rejected() {
    let cases = [
        "[core]\nlog_level = \"verbose\"\n",
        "[network]\nmax_retries = 11\n",
        "[network]\ntimeout_secs = 0\n",
        "[network]\nbackoff_base_ms = 500\nbackoff_max_ms = 100\n",
        "[cache]\nmax_concurrent_downloads = 0\n",
        "[security]\ndefault_level = \"extreme\"\n",
        "not toml at all = = =",
    ];
    for case in cases {
        let err = AcquisitionConfig::from_toml_str(case).unwrap_err();
        assert!(matches!(err, AcquireError::Config(_)), "{}: {}", case, err);
    }

    let missing = AcquisitionConfig::load_from_path(std::path::Path::new("/no/such/warden.toml"));
    assert!(matches!(missing, Err(AcquireError::Config(_))));
}

#[test]
fn test_serialized_config_reloads() {
    let dir = TempDir::new().unwrap();
    let mut config = AcquisitionConfig::rooted_at(dir.path());
    config.security.blocked_domains = vec!["evil.com".into()];
    config.network.max_retries = 1;

    let text = config.to_toml_string().unwrap();
    let reloaded = AcquisitionConfig::from_toml_str(&text).unwrap();
    assert_eq!(reloaded.security.blocked_domains, config.security.blocked_domains);
    assert_eq!(reloaded.network.max_retries, 1);
    assert_eq!(reloaded.cache.directory, config.cache.directory);
}
