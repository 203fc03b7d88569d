//! Warden SDK
//!
//! Shared vocabulary for the plugin acquisition pipeline: the error
//! taxonomy, the data model, and the collaborator interfaces the engine is
//! written against. This crate performs no I/O.

/// Error types and handling
pub mod errors;

/// Remote source types
pub mod source;

/// Discovery filter and result types
pub mod discovery;

/// Validation and reputation types
pub mod validation;

/// Plugin index document format
pub mod manifest;

/// Collaborator traits (transport, signing, loader)
pub mod interfaces;

/// Redacted credential storage
pub mod secret;

// Re-export commonly used types
pub use discovery::{DiscoveryFilter, DiscoveryResult, PluginRecord, SortOrder};
pub use errors::{AcquireError, AcquireErrorExt, Result};
pub use interfaces::{
    Method, PluginHandle, PluginLoader, SignatureVerdict, SigningBackend, Transport,
    TransportRequest, TransportResponse,
};
pub use manifest::{IndexEntry, PluginIndex};
pub use secret::SecretString;
pub use source::{AuthCredentials, CachePolicy, RemoteSource, SecurityLevel, SourceType};
pub use validation::{
    CertificateInfo, ReputationLevel, SourceReputation, ValidationCode, ValidationLevel,
    ValidationResult,
};
