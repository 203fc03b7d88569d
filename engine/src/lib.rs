//! Warden Engine Library
//!
//! Remote plugin acquisition pipeline: source registry, multi-engine
//! discovery, deduplicated cached downloads and the trust gate, sequenced by
//! the [`AcquisitionOrchestrator`].
//!
//! The shared vocabulary (errors, data model, collaborator interfaces) lives
//! in the `warden-sdk` crate, re-exported here as [`sdk`].

pub use sdk;

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Event bus for pipeline notifications
pub mod events;

/// Configured remote origins
pub mod sources;

/// Checksum helpers
pub mod hashing;

/// Disk-backed artifact cache
pub mod cache;

/// Network transfers with dedup, retry and resume
pub mod downloader;

/// reqwest transport implementation
pub mod transport;

/// Plugin discovery across sources
pub mod discovery;

/// Source, certificate, artifact and reputation checks
pub mod validator;

/// Request lifecycle and public entry point
pub mod orchestrator;

pub use config::AcquisitionConfig;
pub use orchestrator::{AcquisitionOrchestrator, LoadOptions, LoadOutcome, OrchestratorBuilder};
