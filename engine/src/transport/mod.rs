//! Network transport implementations
//!
//! The pipeline only knows the [`sdk::interfaces::Transport`] trait. This
//! module provides the default implementation on top of `reqwest`.

pub mod http;

pub use http::HttpTransport;
