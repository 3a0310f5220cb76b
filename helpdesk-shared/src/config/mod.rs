//! # Configuration
//!
//! Client-side settings: where the ticket API and the push broker live, how
//! large a ticket page is, how long to wait between broker reconnects and how
//! to log.

/// Layered client configuration.
pub mod client;

pub use client::{ClientConfig, ConfigError, ConfigOverrides, LogFormat, LoggingConfig};
