//! Delivery of certificate artifacts to client devices

use std::path::{Path, PathBuf};
use std::sync::Arc;

use certbridge_common::logging::{Component, Logger};

use crate::bridge::{AndroidBridge, IosBridge, LazyBridge};
use crate::error::{ProvisionError, Result};
use crate::identity::{container_relative_path, DeviceIdentityResolver};
use crate::platform::{device_path, DeliveryRoute, ExchangeMedium, TargetOs};
use crate::{log_debug, log_info};

/// File name of the CA trust anchor on the device
pub const DEVICE_CA_CERT_FILE: &str = "sonarCA.crt";
/// File name of the signed client identity on the device
pub const DEVICE_CLIENT_CERT_FILE: &str = "device.crt";

/// Where and for whom an exchange's artifacts are delivered
#[derive(Debug, Clone, Copy)]
pub struct DeliveryTarget<'a> {
    pub os: TargetOs,
    pub medium: ExchangeMedium,
    /// App container directory as reported by the client
    pub app_directory: &'a str,
    pub app_name: &'a str,
    /// Sanitized CSR, used to tell devices apart
    pub csr: &'a str,
    /// Per-exchange staging folder; required for network delivery
    pub staging_dir: Option<&'a Path>,
}

impl DeliveryTarget<'_> {
    fn failed(&self, file: &str, reason: impl ToString) -> ProvisionError {
        ProvisionError::DeliveryFailed {
            os: self.os.to_string(),
            app: self.app_name.to_string(),
            file: file.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Places files where the target device (or the upload staging area) can read them
pub struct DeviceDelivery {
    identity: Arc<DeviceIdentityResolver>,
    android: Arc<LazyBridge<dyn AndroidBridge>>,
    ios: Arc<LazyBridge<dyn IosBridge>>,
    ios_bridge_path: PathBuf,
    logger: Arc<Logger>,
}

impl DeviceDelivery {
    pub fn new(
        identity: Arc<DeviceIdentityResolver>,
        android: Arc<LazyBridge<dyn AndroidBridge>>,
        ios: Arc<LazyBridge<dyn IosBridge>>,
        ios_bridge_path: PathBuf,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            identity,
            android,
            ios,
            ios_bridge_path,
            logger: Arc::new(logger.with_component(Component::Delivery)),
        }
    }

    pub async fn deliver(&self, target: &DeliveryTarget<'_>, file: &str, contents: &[u8]) -> Result<()> {
        match DeliveryRoute::select(target.os, target.medium) {
            DeliveryRoute::NetworkStaging => {
                let staging_dir = target.staging_dir.ok_or_else(|| {
                    target.failed(file, "no staging folder for network exchange")
                })?;
                stage_file(staging_dir, file, contents).await
            }
            DeliveryRoute::BridgePush => self.push_android(target, file, contents).await,
            DeliveryRoute::DirectWrite { physical_fallback } => {
                self.write_direct(target, file, contents, physical_fallback)
                    .await
            }
        }
    }

    async fn push_android(&self, target: &DeliveryTarget<'_>, file: &str, contents: &[u8]) -> Result<()> {
        let device_id = self
            .identity
            .android_device_id(target.app_directory, target.app_name, target.csr)
            .await?;
        let bridge = self.android.get().await?;
        let destination = device_path(target.app_directory, file);
        bridge
            .push(&device_id, target.app_name, &destination, contents)
            .await
            .map_err(|e| target.failed(file, e))?;
        log_info!(self.logger.with_device(&device_id), "Pushed {file} to Android device");
        Ok(())
    }

    async fn write_direct(
        &self,
        target: &DeliveryTarget<'_>,
        file: &str,
        contents: &[u8],
        physical_fallback: bool,
    ) -> Result<()> {
        let destination = Path::new(target.app_directory).join(file);
        match tokio::fs::write(&destination, contents).await {
            Ok(()) => {
                log_debug!(self.logger, "Wrote {}", destination.display());
                Ok(())
            }
            Err(e) if physical_fallback => {
                log_info!(
                    self.logger,
                    "Direct write of {} failed ({e}); treating {} as a physical device",
                    destination.display(),
                    target.app_name
                );
                self.push_ios_physical(target, file, contents).await
            }
            Err(e) => Err(target.failed(file, e)),
        }
    }

    async fn push_ios_physical(&self, target: &DeliveryTarget<'_>, file: &str, contents: &[u8]) -> Result<()> {
        let destination = device_path(target.app_directory, file);
        let relative = container_relative_path(&destination)?;
        let relative_dir = relative.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");

        let udid = self
            .identity
            .ios_device_id(target.app_directory, target.app_name, target.csr)
            .await?;
        let bridge = self.ios.get().await?;

        let staging = tempfile::tempdir()?;
        let local = staging.path().join(file);
        tokio::fs::write(&local, contents).await?;
        bridge
            .push(&udid, &local, target.app_name, relative_dir, &self.ios_bridge_path)
            .await
            .map_err(|e| target.failed(file, e))?;
        log_info!(self.logger.with_device(&udid), "Pushed {file} to iOS device");
        Ok(())
    }
}

/// Write `contents` into the staging folder, creating it when needed
pub async fn stage_file(staging_dir: &Path, file: &str, contents: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(staging_dir).await?;
    tokio::fs::write(staging_dir.join(file), contents).await?;
    Ok(())
}
