//! Validation and reputation types
//!
//! A [`ValidationResult`] is the verdict of one or more trust checks. When
//! several checks are combined the aggregate takes the *worst* level:
//! `Blocked` > `Failed` > `Warning` > `Passed`.

use crate::errors::AcquireError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome severity, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    Passed,
    Warning,
    Failed,
    Blocked,
}

/// Machine-readable reason attached to a non-passing result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    InvalidUrl,
    InsecureScheme,
    SourceDisabled,
    DomainBlocked,
    NotAllowlisted,
    NotTrusted,
    FileMissing,
    SizeExceeded,
    ChecksumMismatch,
    ChecksumMissing,
    SignatureInvalid,
    SignatureMissing,
    CertificateExpired,
    CertificateNotYetValid,
    CertificateExpiring,
    SelfSigned,
    HostnameMismatch,
    PinMismatch,
    EmptyChain,
}

/// Verdict of a trust check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub level: ValidationLevel,
    pub message: String,
    pub code: Option<ValidationCode>,
    pub metadata: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl ValidationResult {
    fn with_level(
        level: ValidationLevel,
        code: Option<ValidationCode>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            message: message.into(),
            code,
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn passed(message: impl Into<String>) -> Self {
        Self::with_level(ValidationLevel::Passed, None, message)
    }

    pub fn warning(code: ValidationCode, message: impl Into<String>) -> Self {
        Self::with_level(ValidationLevel::Warning, Some(code), message)
    }

    pub fn failed(code: ValidationCode, message: impl Into<String>) -> Self {
        Self::with_level(ValidationLevel::Failed, Some(code), message)
    }

    pub fn blocked(code: ValidationCode, message: impl Into<String>) -> Self {
        Self::with_level(ValidationLevel::Blocked, Some(code), message)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True for `Passed` and `Warning`
    pub fn is_acceptable(&self) -> bool {
        self.level <= ValidationLevel::Warning
    }

    /// Combine two verdicts, keeping the worse one.
    ///
    /// Metadata from both sides is kept; on key collisions the worse side wins.
    /// Ties keep `self`.
    pub fn merge(self, other: ValidationResult) -> ValidationResult {
        let (mut worst, better) = if other.level > self.level {
            (other, self)
        } else {
            (self, other)
        };
        for (k, v) in better.metadata {
            worst.metadata.entry(k).or_insert(v);
        }
        worst
    }

    /// Map a non-acceptable verdict to the matching error.
    ///
    /// Returns `None` for `Passed` and `Warning`.
    pub fn to_error(&self) -> Option<AcquireError> {
        if self.is_acceptable() {
            return None;
        }
        let msg = self.message.clone();
        let error = match self.code {
            Some(ValidationCode::DomainBlocked) => AcquireError::Blocked(msg),
            Some(ValidationCode::InvalidUrl)
            | Some(ValidationCode::InsecureScheme)
            | Some(ValidationCode::SourceDisabled) => AcquireError::InvalidSource(msg),
            Some(ValidationCode::FileMissing) => AcquireError::NotFound(msg),
            Some(ValidationCode::SizeExceeded) => AcquireError::SizeExceeded {
                size: self.meta_u64("size"),
                limit: self.meta_u64("limit"),
            },
            Some(ValidationCode::ChecksumMismatch) => AcquireError::ChecksumMismatch {
                expected: self.metadata.get("expected").cloned().unwrap_or_default(),
                actual: self.metadata.get("actual").cloned().unwrap_or_default(),
            },
            Some(ValidationCode::SignatureInvalid) | Some(ValidationCode::SignatureMissing) => {
                AcquireError::SignatureInvalid(msg)
            }
            _ if self.level == ValidationLevel::Blocked => AcquireError::Blocked(msg),
            _ => AcquireError::UntrustedSource(msg),
        };
        Some(error)
    }

    fn meta_u64(&self, key: &str) -> u64 {
        self.metadata
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

/// Reputation bands, ordered from least to most trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReputationLevel {
    Unknown,
    Untrusted,
    Low,
    Medium,
    High,
    Trusted,
}

/// Event-updated reliability record for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReputation {
    pub source_id: String,
    pub level: ReputationLevel,
    /// Running score in `[0, 1]`
    pub score: f64,
    pub download_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub last_verified: Option<DateTime<Utc>>,
}

/// Certificate facts supplied by the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Lowercase hex SHA-256 fingerprint; derived from `der` when that is present
    #[serde(default)]
    pub fingerprint_sha256: String,
    #[serde(default)]
    pub subject_alt_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub der: Option<Vec<u8>>,
}

impl CertificateInfo {
    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }
}
