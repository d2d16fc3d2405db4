//! bw-core: Configuration and shared types for brokerwire
//!
//! This crate provides the client configuration, connection state and
//! timing helpers shared by the client runtime.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use config::{BackoffConfig, BackoffPolicy, ClientConfig};
pub use error::ConfigError;
pub use types::ConnectionState;
