//! Target platforms, exchange media and the delivery route they select.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProvisionError;

/// Operating system of the client application requesting a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetOs {
    Android,
    Ios,
    MacOs,
    Windows,
    Linux,
}

impl TargetOs {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOs::Android => "Android",
            TargetOs::Ios => "iOS",
            TargetOs::MacOs => "MacOS",
            TargetOs::Windows => "Windows",
            TargetOs::Linux => "Linux",
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetOs {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "android" => Ok(TargetOs::Android),
            "ios" => Ok(TargetOs::Ios),
            "macos" => Ok(TargetOs::MacOs),
            "windows" => Ok(TargetOs::Windows),
            "linux" => Ok(TargetOs::Linux),
            _ => Err(ProvisionError::UnsupportedPlatform(s.to_string())),
        }
    }
}

/// Channel class used to hand certificates to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExchangeMedium {
    #[default]
    FilesystemAccess,
    NetworkUpload,
    None,
}

impl ExchangeMedium {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeMedium::FilesystemAccess => "FS_ACCESS",
            ExchangeMedium::NetworkUpload => "WWW",
            ExchangeMedium::None => "NONE",
        }
    }
}

impl fmt::Display for ExchangeMedium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeMedium {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FS_ACCESS" => Ok(ExchangeMedium::FilesystemAccess),
            "WWW" => Ok(ExchangeMedium::NetworkUpload),
            "NONE" => Ok(ExchangeMedium::None),
            other => Err(ProvisionError::Config(format!(
                "Unknown exchange medium '{other}'"
            ))),
        }
    }
}

/// How artifacts reach the device for a given (os, medium) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryRoute {
    /// Written into the per-exchange staging folder for later upload
    NetworkStaging,
    /// Pushed through the Android device bridge
    BridgePush,
    /// Written straight into the app container. With `physical_fallback`, a
    /// failed write is retried as a push to a physical iOS device.
    DirectWrite { physical_fallback: bool },
}

impl DeliveryRoute {
    pub fn select(os: TargetOs, medium: ExchangeMedium) -> Self {
        match (medium, os) {
            (ExchangeMedium::NetworkUpload, _) => DeliveryRoute::NetworkStaging,
            (ExchangeMedium::FilesystemAccess | ExchangeMedium::None, TargetOs::Android) => {
                DeliveryRoute::BridgePush
            }
            (ExchangeMedium::FilesystemAccess | ExchangeMedium::None, TargetOs::Ios) => {
                DeliveryRoute::DirectWrite {
                    physical_fallback: true,
                }
            }
            (
                ExchangeMedium::FilesystemAccess | ExchangeMedium::None,
                TargetOs::MacOs | TargetOs::Windows | TargetOs::Linux,
            ) => DeliveryRoute::DirectWrite {
                physical_fallback: false,
            },
        }
    }
}

/// Join a device-side directory and file name without touching host path rules
pub fn device_path(directory: &str, file: &str) -> String {
    if directory.is_empty() {
        file.to_string()
    } else if directory.ends_with('/') {
        format!("{directory}{file}")
    } else {
        format!("{directory}/{file}")
    }
}
