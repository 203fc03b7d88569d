//! Remote source types
//!
//! A [`RemoteSource`] is a configured origin from which plugin packages are
//! discovered and downloaded, together with the per-origin policy (security
//! level, cache policy, timeouts, credentials).
//!
//! Source ids are derived, never chosen: the id is a stable hash of the
//! normalized URL and the source type, so registering the same origin twice
//! always lands on the same key.

use crate::errors::{AcquireError, Result};
use crate::secret::SecretString;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Number of hex characters kept from the id digest
const SOURCE_ID_LEN: usize = 16;

/// Kind of remote origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Http,
    Git,
    Registry,
    Ftp,
    Custom,
}

impl SourceType {
    /// Stable tag used in id derivation and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Http => "http",
            SourceType::Git => "git",
            SourceType::Registry => "registry",
            SourceType::Ftp => "ftp",
            SourceType::Custom => "custom",
        }
    }

    /// URL schemes accepted for this source type.
    ///
    /// An empty slice means any parseable scheme is accepted.
    pub fn supported_schemes(&self) -> &'static [&'static str] {
        match self {
            SourceType::Http => &["http", "https"],
            SourceType::Git => &["https", "http", "ssh", "git"],
            SourceType::Registry => &["https", "http"],
            SourceType::Ftp => &["ftp", "ftps", "sftp"],
            SourceType::Custom => &[],
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum bar a source or artifact must clear before use
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Minimal,
    #[default]
    Standard,
    High,
    Paranoid,
}

/// How the download cache is consulted for a source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Never read from the cache
    NoCache,
    /// Read from the cache when the request allows it
    #[default]
    PreferCache,
    /// Never touch the network; serve stale entries rather than fail
    CacheOnly,
    /// Always read from the cache first; only an explicit refresh bypasses it
    CacheFirst,
}

/// Credentials attached to every request made against a source
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthCredentials {
    Bearer {
        token: SecretString,
    },
    Basic {
        username: String,
        password: SecretString,
    },
    ApiKey {
        header: String,
        value: SecretString,
    },
}

impl AuthCredentials {
    /// Render the credentials as request headers
    pub fn headers(&self) -> Vec<(String, String)> {
        match self {
            AuthCredentials::Bearer { token } => vec![(
                "Authorization".to_string(),
                format!("Bearer {}", token.expose()),
            )],
            AuthCredentials::Basic { username, password } => {
                let raw = format!("{}:{}", username, password.expose());
                let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
                vec![("Authorization".to_string(), format!("Basic {}", encoded))]
            }
            AuthCredentials::ApiKey { header, value } => {
                vec![(header.clone(), value.expose().to_string())]
            }
        }
    }
}

/// A configured remote origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSource {
    /// Derived id; recomputed on registration
    #[serde(default)]
    pub id: String,

    pub url: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type")]
    pub source_type: SourceType,

    /// Never serialized
    #[serde(default, skip_serializing)]
    pub auth: Option<AuthCredentials>,

    #[serde(default)]
    pub security_level: SecurityLevel,

    #[serde(default)]
    pub cache_policy: CachePolicy,

    /// Lifetime of cached artifacts from this source
    #[serde(default = "default_ttl", with = "duration_secs")]
    pub ttl: Duration,

    /// Per-request timeout
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_ttl() -> Duration {
    Duration::from_secs(86_400)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl RemoteSource {
    /// Create a source with default policy and a derived id
    ///
    /// # Examples
    ///
    /// ```
    /// use warden_sdk::source::{RemoteSource, SourceType};
    ///
    /// let a = RemoteSource::new("https://Plugins.Example.com/", SourceType::Http);
    /// let b = RemoteSource::new("https://plugins.example.com", SourceType::Http);
    /// assert_eq!(a.id, b.id);
    /// ```
    pub fn new(url: impl Into<String>, source_type: SourceType) -> Self {
        let url = url.into();
        let id = derive_source_id(&url, source_type);
        Self {
            id,
            url,
            name: None,
            source_type,
            auth: None,
            security_level: SecurityLevel::default(),
            cache_policy: CachePolicy::default(),
            ttl: default_ttl(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            enabled: true,
            headers: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_auth(mut self, auth: AuthCredentials) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Recompute the id from the current URL and type
    pub fn refresh_id(&mut self) {
        self.id = derive_source_id(&self.url, self.source_type);
    }

    /// Parse the source URL
    pub fn parsed_url(&self) -> Result<url::Url> {
        if self.url.trim().is_empty() {
            return Err(AcquireError::InvalidSource("URL is empty".to_string()));
        }
        url::Url::parse(self.url.trim())
            .map_err(|e| AcquireError::InvalidSource(format!("Malformed URL: {}", e)))
    }

    /// Lowercased host of the source URL, if it has one
    pub fn host(&self) -> Option<String> {
        self.parsed_url()
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }

    /// Display name, falling back to the URL
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }

    /// All headers for a request: custom headers first, then credentials
    pub fn request_headers(&self) -> HashMap<String, String> {
        let mut headers = self.headers.clone();
        if let Some(auth) = &self.auth {
            headers.extend(auth.headers());
        }
        headers
    }
}

/// Normalize a URL for identity purposes.
///
/// Lowercases scheme and host, drops default ports and trailing slashes.
/// Unparseable input is trimmed and lowercased so that ids stay
/// deterministic even for sources that later fail validation.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(parsed) => {
            // Url already lowercases scheme/host and strips default ports
            let mut s = parsed.to_string();
            while s.ends_with('/') {
                s.pop();
            }
            s
        }
        Err(_) => trimmed.trim_end_matches('/').to_ascii_lowercase(),
    }
}

/// Derive the stable id for a URL/type pair
pub fn derive_source_id(url: &str, source_type: SourceType) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_url(url).as_bytes());
    hasher.update(b"|");
    hasher.update(source_type.as_str().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..SOURCE_ID_LEN].to_string()
}

/// Serde helper storing a `Duration` as whole seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_deterministic_and_normalized() {
        let a = derive_source_id("HTTPS://Good.Example.com:443/plugins/", SourceType::Http);
        let b = derive_source_id("https://good.example.com/plugins", SourceType::Http);
        assert_eq!(a, b);
        assert_eq!(a.len(), SOURCE_ID_LEN);
    }

    #[test]
    fn test_id_depends_on_type() {
        let http = derive_source_id("https://good.example.com", SourceType::Http);
        let registry = derive_source_id("https://good.example.com", SourceType::Registry);
        assert_ne!(http, registry);
    }

    #[test]
    fn test_bearer_headers() {
        let auth = AuthCredentials::Bearer {
            token: SecretString::new("t0k"),
        };
        assert_eq!(
            auth.headers(),
            vec![("Authorization".to_string(), "Bearer t0k".to_string())]
        );
    }

    #[test]
    fn test_basic_headers_are_base64() {
        let auth = AuthCredentials::Basic {
            username: "alice".into(),
            password: SecretString::new("secret"),
        };
        let headers = auth.headers();
        assert_eq!(headers[0].1, "Basic YWxpY2U6c2VjcmV0");
    }

    #[test]
    fn test_source_toml_like_defaults() {
        let source: RemoteSource =
            serde_json::from_str(r#"{"url": "https://a.example.com", "type": "registry"}"#)
                .unwrap();
        assert_eq!(source.source_type, SourceType::Registry);
        assert_eq!(source.security_level, SecurityLevel::Standard);
        assert_eq!(source.cache_policy, CachePolicy::PreferCache);
        assert_eq!(source.ttl, Duration::from_secs(86_400));
        assert!(source.enabled);
        assert!(source.id.is_empty());
    }

    #[test]
    fn test_auth_is_never_serialized() {
        let source = RemoteSource::new("https://a.example.com", SourceType::Http).with_auth(
            AuthCredentials::Bearer {
                token: SecretString::new("t0k"),
            },
        );
        let json = serde_json::to_string(&source).unwrap();
        assert!(!json.contains("t0k"));
    }
}
