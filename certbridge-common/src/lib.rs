//! Certbridge Common
//!
//! Shared utilities for the Certbridge provisioning stack:
//! - Component-based structured logging with exchange/device context
//! - Logging configuration backed by `env_logger`

pub mod logging;

pub use logging::{Component, LogLevel, Logger, LoggingConfig};
