// Logging utilities for the Certbridge provisioning stack
//
// This module provides:
// - Component-based structured logging
// - Exchange and device context carried through logger inheritance
// - Allocation-free `fmt::Arguments` entry points used by the log macros

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Arguments, Display, Formatter};

/// Predefined components for logging categorization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Component {
    Authority,
    Exchange,
    Delivery,
    Identity,
    Upload,
    Toolkit,
    Custom(&'static str),
}

impl Component {
    /// Get the string representation of the component
    pub fn as_str(&self) -> &str {
        match self {
            Component::Authority => "Authority",
            Component::Exchange => "Exchange",
            Component::Delivery => "Delivery",
            Component::Identity => "Identity",
            Component::Upload => "Upload",
            Component::Toolkit => "Toolkit",
            Component::Custom(name) => name,
        }
    }
}

struct ComponentPrefixDisplay {
    parent: Option<Component>,
    component: Component,
}

impl Display for ComponentPrefixDisplay {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.parent {
            Some(parent) if parent != Component::Exchange => {
                write!(f, "{}.{}", parent.as_str(), self.component.as_str())
            }
            _ => write!(f, "{}", self.component.as_str()),
        }
    }
}

struct MaybeContextDisplay<'a>(&'static str, Option<&'a str>);

impl Display for MaybeContextDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.1 {
            Some(value) => write!(f, "|{}={value}", self.0),
            None => Ok(()),
        }
    }
}

/// A component-specific logger that carries exchange and device context
#[derive(Clone, Debug)]
pub struct Logger {
    component: Component,
    parent_component: Option<Component>,
    /// Identifier of the certificate exchange being serviced, if any
    exchange_id: Option<String>,
    /// Device the current operation targets, once known
    device_id: Option<String>,
}

impl Logger {
    /// Create a new root logger for a component
    pub fn new_root(component: Component) -> Self {
        Self {
            component,
            parent_component: None,
            exchange_id: None,
            device_id: None,
        }
    }

    /// Create a child logger for a different component, keeping context
    pub fn with_component(&self, component: Component) -> Self {
        Self {
            component,
            parent_component: Some(self.component),
            exchange_id: self.exchange_id.clone(),
            device_id: self.device_id.clone(),
        }
    }

    /// Create a logger tagged with an exchange identifier
    pub fn with_exchange(&self, exchange_id: impl Into<String>) -> Self {
        Self {
            exchange_id: Some(exchange_id.into()),
            ..self.clone()
        }
    }

    /// Create a logger tagged with the device being addressed
    pub fn with_device(&self, device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..self.clone()
        }
    }

    pub fn exchange_id(&self) -> Option<&str> {
        self.exchange_id.as_deref()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn prefix(&self) -> impl Display + '_ {
        PrefixDisplay(self)
    }

    /// Log a debug message using fmt::Arguments (avoids allocating message String)
    pub fn debug_args(&self, args: Arguments) {
        if log::log_enabled!(log::Level::Debug) {
            debug!("[{}] {}", self.prefix(), args);
        }
    }

    /// Log an info message using fmt::Arguments (avoids allocating message String)
    pub fn info_args(&self, args: Arguments) {
        if log::log_enabled!(log::Level::Info) {
            info!("[{}] {}", self.prefix(), args);
        }
    }

    /// Log a warning using fmt::Arguments
    pub fn warn_args(&self, args: Arguments) {
        if log::log_enabled!(log::Level::Warn) {
            warn!("[{}] {}", self.prefix(), args);
        }
    }

    /// Log an error using fmt::Arguments
    pub fn error_args(&self, args: Arguments) {
        if log::log_enabled!(log::Level::Error) {
            error!("[{}] {}", self.prefix(), args);
        }
    }
}

struct PrefixDisplay<'a>(&'a Logger);

impl Display for PrefixDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let logger = self.0;
        write!(
            f,
            "{}{}{}",
            ComponentPrefixDisplay {
                parent: logger.parent_component,
                component: logger.component,
            },
            MaybeContextDisplay("exchange", logger.exchange_id()),
            MaybeContextDisplay("device", logger.device_id()),
        )
    }
}

/// Log level selectable from configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Process-wide logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

impl LoggingConfig {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    /// Install `env_logger` at the configured level. `RUST_LOG` still wins when set.
    /// Calling this more than once is harmless; later calls are ignored.
    pub fn init(&self) {
        let _ = env_logger::Builder::new()
            .filter_level(self.level.into())
            .parse_default_env()
            .try_init();
    }
}
