//! Certificate exchange orchestration
//!
//! Entry point for a client device presenting a CSR: make sure the authority
//! is ready, hand the device the CA certificate and its signed identity, work
//! out which device asked, and for network exchanges upload the bundle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use certbridge_common::logging::{Component, Logger};

use crate::authority::AuthorityManager;
use crate::bridge::{AndroidBridge, IosBridge, LazyBridge};
use crate::config::ProvisioningConfig;
use crate::csr::{extract_app_name, sanitize, DEVICE_CSR_FILE};
use crate::delivery::{
    stage_file, DeliveryTarget, DeviceDelivery, DEVICE_CA_CERT_FILE, DEVICE_CLIENT_CERT_FILE,
};
use crate::error::{ProvisionError, Result};
use crate::identity::DeviceIdentityResolver;
use crate::platform::{ExchangeMedium, TargetOs};
use crate::store::CertificateStore;
use crate::tls::SecureServerConfig;
use crate::toolkit::{CaToolkit, OpensslToolkit};
use crate::upload::{package_staging_dir, upload_with_timeout, CertificateUploader, HttpUploader};
use crate::{log_error, log_info, log_warn};

/// Surfaces actionable problems to the person running the host
pub trait UserNotifier: Send + Sync {
    fn notify(&self, problem: &ProvisionError);
}

/// Notifier that only writes to the log
pub struct LogNotifier {
    logger: Arc<Logger>,
}

impl LogNotifier {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

impl UserNotifier for LogNotifier {
    fn notify(&self, problem: &ProvisionError) {
        log_warn!(self.logger, "{problem}");
    }
}

/// Runs certificate exchanges for client devices
pub struct ExchangeOrchestrator {
    authority: Arc<AuthorityManager>,
    identity: Arc<DeviceIdentityResolver>,
    delivery: DeviceDelivery,
    uploader: Option<Arc<dyn CertificateUploader>>,
    notifier: Arc<dyn UserNotifier>,
    staging_root: PathBuf,
    upload_timeout: Duration,
    logger: Arc<Logger>,
}

impl ExchangeOrchestrator {
    pub fn new(
        config: &ProvisioningConfig,
        toolkit: Arc<dyn CaToolkit>,
        android: LazyBridge<dyn AndroidBridge>,
        ios: LazyBridge<dyn IosBridge>,
        logger: Arc<Logger>,
    ) -> Self {
        let logger = Arc::new(logger.with_component(Component::Exchange));
        let android = Arc::new(android);
        let ios = Arc::new(ios);

        let authority = Arc::new(
            AuthorityManager::new(
                toolkit,
                CertificateStore::new(&config.provisioning_dir),
                logger.clone(),
            )
            .with_key_bits(config.key_bits)
            .with_expiry_guard(config.expiry_guard_secs),
        );
        let identity = Arc::new(DeviceIdentityResolver::new(
            android.clone(),
            ios.clone(),
            config.idb_path.clone(),
            logger.clone(),
        ));
        let delivery = DeviceDelivery::new(
            identity.clone(),
            android,
            ios,
            config.idb_path.clone(),
            logger.clone(),
        );
        let uploader = config.upload_endpoint.as_ref().map(|endpoint| {
            Arc::new(HttpUploader::new(
                endpoint.clone(),
                Arc::new(logger.with_component(Component::Upload)),
            )) as Arc<dyn CertificateUploader>
        });

        Self {
            authority,
            identity,
            delivery,
            uploader,
            notifier: Arc::new(LogNotifier::new(logger.clone())),
            staging_root: config.staging_root.clone(),
            upload_timeout: config.upload_timeout(),
            logger,
        }
    }

    /// Orchestrator backed by the in-process OpenSSL toolkit
    pub fn with_openssl(
        config: &ProvisioningConfig,
        android: LazyBridge<dyn AndroidBridge>,
        ios: LazyBridge<dyn IosBridge>,
        logger: Arc<Logger>,
    ) -> Self {
        let toolkit = OpensslToolkit::with_validity_days(
            config.validity_days,
            Arc::new(logger.with_component(Component::Toolkit)),
        );
        Self::new(config, Arc::new(toolkit), android, ios, logger)
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn CertificateUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn UserNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn authority(&self) -> &Arc<AuthorityManager> {
        &self.authority
    }

    pub async fn load_secure_server_config(&self) -> Result<SecureServerConfig> {
        self.authority.load_secure_server_config().await
    }

    /// Sign `raw_csr` for the requesting app, deliver the CA and client
    /// certificates to it and return the id of the device that asked.
    ///
    /// Upload failures for network exchanges are reported as
    /// [`ProvisionError::UploadFailed`] or [`ProvisionError::UploadTimeout`]
    /// carrying the device id; the device already holds its certificates then.
    /// Toolkit, IO and bridge availability errors come back wrapped in
    /// [`ProvisionError::Exchange`] naming the OS and app directory.
    pub async fn process_signing_request(
        &self,
        raw_csr: &str,
        os: TargetOs,
        app_directory: &str,
        medium: ExchangeMedium,
    ) -> Result<String> {
        let exchange_id = uuid::Uuid::new_v4().simple().to_string();
        let logger = self.logger.with_exchange(&exchange_id[..8]);

        let result = self
            .run_exchange(&logger, raw_csr, os, app_directory, medium)
            .await
            .map_err(|e| e.in_exchange(os.as_str(), app_directory));
        match &result {
            Ok(device_id) => log_info!(logger.with_device(device_id), "Certificate exchange completed"),
            Err(e) if e.is_upload_failure() => {
                log_error!(logger, "Certificates delivered but upload failed: {e}")
            }
            Err(e) => log_error!(
                logger,
                "Certificate exchange failed for {os} app in {app_directory} over {medium}: {e}"
            ),
        }
        result
    }

    async fn run_exchange(
        &self,
        logger: &Logger,
        raw_csr: &str,
        os: TargetOs,
        app_directory: &str,
        medium: ExchangeMedium,
    ) -> Result<String> {
        let csr = sanitize(raw_csr);
        if csr.is_empty() {
            return Err(ProvisionError::EmptyRequest);
        }

        let toolkit = self.authority.toolkit();
        if !toolkit.is_available().await {
            // Not fatal here; later toolkit calls fail if it really is missing.
            self.notifier.notify(&ProvisionError::ToolkitUnavailable(
                "install OpenSSL to enable secure connections with client apps".to_string(),
            ));
        }

        self.authority.ensure_server_certificate_exists().await?;

        let app_name = extract_app_name(toolkit.as_ref(), &csr).await?;
        log_info!(logger, "Processing {os} CSR for {app_name} over {medium}");

        let staging = match medium {
            ExchangeMedium::NetworkUpload => {
                tokio::fs::create_dir_all(&self.staging_root).await?;
                let staging = tempfile::Builder::new()
                    .prefix("certbridge-exchange-")
                    .tempdir_in(&self.staging_root)?;
                stage_file(staging.path(), DEVICE_CSR_FILE, csr.as_bytes()).await?;
                Some(staging)
            }
            ExchangeMedium::FilesystemAccess | ExchangeMedium::None => None,
        };

        let target = DeliveryTarget {
            os,
            medium,
            app_directory,
            app_name: &app_name,
            csr: &csr,
            staging_dir: staging.as_ref().map(|dir| dir.path()),
        };

        let ca_cert = self.authority.ca_certificate().await?;
        self.delivery
            .deliver(&target, DEVICE_CA_CERT_FILE, &ca_cert)
            .await?;

        let client_cert = self.generate_client_certificate(&csr).await?;
        self.delivery
            .deliver(&target, DEVICE_CLIENT_CERT_FILE, &client_cert)
            .await?;

        let device_id = self
            .identity
            .resolve(os, medium, app_directory, &app_name, &csr)
            .await?;

        if let Some(staging) = &staging {
            self.upload_staged(logger, staging.path(), &device_id, &app_name)
                .await?;
        }
        Ok(device_id)
    }

    async fn generate_client_certificate(&self, csr: &str) -> Result<Vec<u8>> {
        let workdir = tempfile::tempdir()?;
        let csr_path = workdir.path().join(DEVICE_CSR_FILE);
        let cert_path = workdir.path().join(DEVICE_CLIENT_CERT_FILE);
        tokio::fs::write(&csr_path, csr).await?;
        self.authority
            .sign_client_certificate(&csr_path, &cert_path)
            .await?;
        Ok(tokio::fs::read(&cert_path).await?)
    }

    async fn upload_staged(
        &self,
        logger: &Logger,
        staging_dir: &Path,
        device_id: &str,
        app_name: &str,
    ) -> Result<()> {
        let uploader = self
            .uploader
            .as_ref()
            .ok_or_else(|| ProvisionError::UploadFailed {
                device_id: device_id.to_string(),
                reason: "no upload endpoint configured".to_string(),
            })?;
        let archive = package_staging_dir(staging_dir)
            .await
            .map_err(|e| ProvisionError::UploadFailed {
                device_id: device_id.to_string(),
                reason: format!("packaging failed: {e}"),
            })?;
        log_info!(logger, "Uploading {} byte bundle for device {device_id}", archive.len());
        upload_with_timeout(
            uploader.as_ref(),
            archive,
            device_id,
            app_name,
            self.upload_timeout,
        )
        .await
    }
}
