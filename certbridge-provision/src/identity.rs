//! Device identity resolution
//!
//! A device proves it originated a CSR by still holding the same CSR in its
//! app container. Every candidate device is checked concurrently and each
//! outcome is kept, so a failing device never hides a matching one.

use futures_util::future::join_all;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use certbridge_common::logging::{Component, Logger};

use crate::bridge::{AndroidBridge, DeviceKind, IosBridge, LazyBridge};
use crate::csr::{sanitize, DEVICE_CSR_FILE};
use crate::error::{ProvisionError, Result};
use crate::platform::{device_path, ExchangeMedium, TargetOs};
use crate::{log_debug, log_info, log_warn};

/// Device id reported for clients that cannot be tied to a device
pub const UNKNOWN_DEVICE_ID: &str = "unknown";

/// Result of checking one candidate device
#[derive(Debug)]
pub enum DeviceOutcome {
    Match,
    NoMatch,
    Error(ProvisionError),
}

#[derive(Debug)]
pub struct DeviceCheck {
    pub device_id: String,
    pub outcome: DeviceOutcome,
}

impl DeviceCheck {
    fn from_result(device_id: String, result: Result<bool>) -> Self {
        let outcome = match result {
            Ok(true) => DeviceOutcome::Match,
            Ok(false) => DeviceOutcome::NoMatch,
            Err(e) => DeviceOutcome::Error(e),
        };
        Self { device_id, outcome }
    }
}

fn simulator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/Devices/([^/]+)/").expect("simulator pattern is valid"))
}

fn container_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/Application/[^/]+/(.+)$").expect("container pattern is valid")
    })
}

/// Simulator UDID encoded in a simulator container path, if any
pub fn simulator_id(path: &str) -> Option<&str> {
    simulator_pattern()
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Path of `path` relative to its `.../Application/<id>/` container root
pub fn container_relative_path(path: &str) -> Result<&str> {
    container_pattern()
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| ProvisionError::UnexpectedContainerPath(path.to_string()))
}

/// Pick the single device whose CSR matched.
///
/// Zero matches surface the first per-device error, if any. Several matches
/// are logged and resolved to the first one in enumeration order.
pub fn decide(os: TargetOs, app_name: &str, checks: Vec<DeviceCheck>, logger: &Logger) -> Result<String> {
    let mut matches = Vec::new();
    let mut first_error = None;
    for check in checks {
        match check.outcome {
            DeviceOutcome::Match => matches.push(check.device_id),
            DeviceOutcome::NoMatch => {}
            DeviceOutcome::Error(e) => {
                log_debug!(logger, "CSR check failed on {}: {e}", check.device_id);
                first_error.get_or_insert(e);
            }
        }
    }

    if matches.len() > 1 {
        let ambiguity = ProvisionError::AmbiguousMatch {
            os: os.to_string(),
            app: app_name.to_string(),
            devices: matches.join(", "),
        };
        log_warn!(logger, "{ambiguity}; using {}", matches[0]);
    }

    match matches.into_iter().next() {
        Some(device_id) => Ok(device_id),
        None => Err(first_error.unwrap_or_else(|| ProvisionError::NoMatchingDevice {
            os: os.to_string(),
            app: app_name.to_string(),
        })),
    }
}

fn csr_matches(pulled: &[u8], csr: &str) -> bool {
    sanitize(&String::from_utf8_lossy(pulled)) == csr
}

/// Works out which connected device originated a CSR
pub struct DeviceIdentityResolver {
    android: Arc<LazyBridge<dyn AndroidBridge>>,
    ios: Arc<LazyBridge<dyn IosBridge>>,
    ios_bridge_path: PathBuf,
    logger: Arc<Logger>,
}

impl DeviceIdentityResolver {
    pub fn new(
        android: Arc<LazyBridge<dyn AndroidBridge>>,
        ios: Arc<LazyBridge<dyn IosBridge>>,
        ios_bridge_path: PathBuf,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            android,
            ios,
            ios_bridge_path,
            logger: Arc::new(logger.with_component(Component::Identity)),
        }
    }

    /// Device id for an exchange. `csr` must already be sanitized.
    pub async fn resolve(
        &self,
        os: TargetOs,
        medium: ExchangeMedium,
        app_directory: &str,
        app_name: &str,
        csr: &str,
    ) -> Result<String> {
        if medium == ExchangeMedium::NetworkUpload {
            // Nothing to enumerate for a network-mediated exchange.
            return Ok(uuid::Uuid::new_v4().to_string());
        }
        match os {
            TargetOs::Android => self.android_device_id(app_directory, app_name, csr).await,
            TargetOs::Ios => self.ios_device_id(app_directory, app_name, csr).await,
            TargetOs::MacOs | TargetOs::Windows | TargetOs::Linux => {
                Ok(UNKNOWN_DEVICE_ID.to_string())
            }
        }
    }

    pub async fn android_device_id(
        &self,
        app_directory: &str,
        app_name: &str,
        csr: &str,
    ) -> Result<String> {
        let bridge = self.android.get().await?;
        let devices = bridge.list_devices().await?;
        if devices.is_empty() {
            return Err(ProvisionError::NoDevicesFound {
                os: TargetOs::Android.to_string(),
            });
        }

        let csr_path = device_path(app_directory, DEVICE_CSR_FILE);
        let checks = join_all(devices.into_iter().map(|device| {
            let bridge = bridge.clone();
            let csr_path = csr_path.as_str();
            async move {
                let result = bridge
                    .pull(&device.id, app_name, csr_path)
                    .await
                    .map(|pulled| csr_matches(&pulled, csr));
                DeviceCheck::from_result(device.id, result)
            }
        }))
        .await;

        let device_id = decide(TargetOs::Android, app_name, checks, &self.logger)?;
        log_info!(self.logger.with_device(&device_id), "CSR for {app_name} originated from this Android device");
        Ok(device_id)
    }

    pub async fn ios_device_id(
        &self,
        app_directory: &str,
        app_name: &str,
        csr: &str,
    ) -> Result<String> {
        if let Some(udid) = simulator_id(app_directory) {
            log_debug!(self.logger, "Simulator {udid} identified from container path");
            return Ok(udid.to_string());
        }

        let bridge = self.ios.get().await?;
        let targets: Vec<_> = bridge
            .targets(&self.ios_bridge_path, true)
            .await?
            .into_iter()
            .filter(|target| target.kind == DeviceKind::Physical)
            .collect();
        if targets.is_empty() {
            return Err(ProvisionError::NoDevicesFound {
                os: TargetOs::Ios.to_string(),
            });
        }

        let full_path = device_path(app_directory, DEVICE_CSR_FILE);
        let relative_path = container_relative_path(&full_path)?;
        let checks = join_all(targets.into_iter().map(|target| {
            let bridge = bridge.clone();
            async move {
                let result = self
                    .check_ios_device(bridge.as_ref(), &target.id, relative_path, app_name, csr)
                    .await;
                DeviceCheck::from_result(target.id, result)
            }
        }))
        .await;

        let device_id = decide(TargetOs::Ios, app_name, checks, &self.logger)?;
        log_info!(self.logger.with_device(&device_id), "CSR for {app_name} originated from this iOS device");
        Ok(device_id)
    }

    async fn check_ios_device(
        &self,
        bridge: &dyn IosBridge,
        udid: &str,
        relative_path: &str,
        app_name: &str,
        csr: &str,
    ) -> Result<bool> {
        let staging = tempfile::tempdir()?;
        bridge
            .pull(udid, relative_path, app_name, staging.path(), &self.ios_bridge_path)
            .await?;

        let pulled = single_staged_file(staging.path(), udid).await?;
        Ok(csr_matches(&tokio::fs::read(pulled).await?, csr))
    }
}

async fn single_staged_file(dir: &Path, udid: &str) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    match files.len() {
        0 => Err(ProvisionError::NoCsrRetrieved {
            device: udid.to_string(),
        }),
        1 => Ok(files.remove(0)),
        count => Err(ProvisionError::ConflictInStaging {
            device: udid.to_string(),
            count,
        }),
    }
}
