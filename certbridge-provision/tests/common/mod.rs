//! Shared fakes for the provisioning integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use certbridge_common::logging::{Component, LogLevel, Logger, LoggingConfig};
use certbridge_provision::{
    AndroidBridge, CaToolkit, CertificateUploader, DeviceTarget, IosBridge, OpensslToolkit,
    ProvisionError, Result, UserNotifier,
};

pub fn test_logger() -> Arc<Logger> {
    LoggingConfig::new(LogLevel::Debug).init();
    Arc::new(Logger::new_root(Component::Custom("Test")))
}

/// PEM CSR whose subject ends with `CN=<common_name>`
pub fn csr_for(common_name: &str) -> String {
    let mut params = rcgen::CertificateParams::new(vec![]);
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CountryName, "US");
    params
        .distinguished_name
        .push(rcgen::DnType::OrganizationName, "Example Apps");
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);
    let request = rcgen::Certificate::from_params(params).expect("CSR params");
    request.serialize_request_pem().expect("CSR encoding")
}

/// What devices send over the wire: CRLF line endings and stray whitespace
pub fn as_transmitted(csr: &str) -> String {
    format!("\r\n{}\r\n  ", csr.replace('\n', "\r\n"))
}

/// Toolkit that forwards to OpenSSL with knobs for availability and an
/// overly conservative quick expiry check.
pub struct TunableToolkit {
    inner: OpensslToolkit,
    pub available: bool,
    pub conservative: bool,
}

impl TunableToolkit {
    pub fn new(validity_days: u32) -> Self {
        Self {
            inner: OpensslToolkit::with_validity_days(validity_days, test_logger()),
            available: true,
            conservative: false,
        }
    }
}

#[async_trait]
impl CaToolkit for TunableToolkit {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn generate_rsa_key(&self, bits: u32, out: &Path) -> Result<()> {
        self.inner.generate_rsa_key(bits, out).await
    }

    async fn generate_self_signed_cert(&self, subject: &str, key: &Path, out: &Path) -> Result<()> {
        self.inner.generate_self_signed_cert(subject, key, out).await
    }

    async fn generate_csr(&self, subject: &str, key: &Path, out: &Path) -> Result<()> {
        self.inner.generate_csr(subject, key, out).await
    }

    async fn sign_csr(
        &self,
        csr: &Path,
        ca_cert: &Path,
        ca_key: &Path,
        serial: &Path,
        out: &Path,
    ) -> Result<()> {
        self.inner.sign_csr(csr, ca_cert, ca_key, serial, out).await
    }

    async fn is_expiring_within(&self, seconds: u64, cert: &Path) -> Result<bool> {
        if self.conservative {
            return Ok(true);
        }
        self.inner.is_expiring_within(seconds, cert).await
    }

    async fn read_end_date(&self, cert: &Path) -> Result<i64> {
        self.inner.read_end_date(cert).await
    }

    async fn verify_chain(&self, ca_file: &Path, cert: &Path) -> Result<bool> {
        self.inner.verify_chain(ca_file, cert).await
    }

    async fn csr_subject(&self, csr: &Path) -> Result<String> {
        self.inner.csr_subject(csr).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Push {
    pub device_id: String,
    pub app_id: String,
    pub destination: String,
    pub file: String,
    pub contents: Vec<u8>,
}

/// In-memory Android bridge. Each device may hold a CSR copy or fail pulls.
#[derive(Default)]
pub struct FakeAndroid {
    devices: Vec<DeviceTarget>,
    stored_csrs: HashMap<String, std::result::Result<String, String>>,
    pub calls: Mutex<usize>,
    pub pushes: Mutex<Vec<Push>>,
}

impl FakeAndroid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, id: &str, stored_csr: &str) -> Self {
        self.devices.push(DeviceTarget::emulator(id));
        self.stored_csrs
            .insert(id.to_string(), Ok(stored_csr.to_string()));
        self
    }

    pub fn with_broken_device(mut self, id: &str, reason: &str) -> Self {
        self.devices.push(DeviceTarget::physical(id));
        self.stored_csrs
            .insert(id.to_string(), Err(reason.to_string()));
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn pushes(&self) -> Vec<Push> {
        self.pushes.lock().unwrap().clone()
    }

    fn record_call(&self) {
        *self.calls.lock().unwrap() += 1;
    }
}

#[async_trait]
impl AndroidBridge for FakeAndroid {
    async fn list_devices(&self) -> Result<Vec<DeviceTarget>> {
        self.record_call();
        Ok(self.devices.clone())
    }

    async fn push(
        &self,
        device_id: &str,
        app_id: &str,
        destination: &str,
        contents: &[u8],
    ) -> Result<()> {
        self.record_call();
        let file = destination.rsplit('/').next().unwrap_or_default().to_string();
        self.pushes.lock().unwrap().push(Push {
            device_id: device_id.to_string(),
            app_id: app_id.to_string(),
            destination: destination.to_string(),
            file,
            contents: contents.to_vec(),
        });
        Ok(())
    }

    async fn pull(&self, device_id: &str, _app_id: &str, source: &str) -> Result<Vec<u8>> {
        self.record_call();
        assert!(source.ends_with("/app.csr"), "unexpected pull of {source}");
        match self.stored_csrs.get(device_id) {
            Some(Ok(csr)) => Ok(csr.clone().into_bytes()),
            Some(Err(reason)) => Err(ProvisionError::Bridge {
                device: device_id.to_string(),
                reason: reason.clone(),
            }),
            None => Err(ProvisionError::Bridge {
                device: device_id.to_string(),
                reason: "device disconnected".to_string(),
            }),
        }
    }
}

/// What a fake iOS device drops into the pull directory
#[derive(Clone)]
pub enum IosStoredFiles {
    Csr(String),
    Nothing,
    Several(Vec<String>),
}

#[derive(Default)]
pub struct FakeIos {
    targets: Vec<DeviceTarget>,
    files: HashMap<String, IosStoredFiles>,
    pub pushes: Mutex<Vec<Push>>,
    pub pulls: Mutex<Vec<(String, String)>>,
}

impl FakeIos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_physical(mut self, udid: &str, files: IosStoredFiles) -> Self {
        self.targets.push(DeviceTarget::physical(udid));
        self.files.insert(udid.to_string(), files);
        self
    }

    pub fn with_simulator(mut self, udid: &str) -> Self {
        self.targets.push(DeviceTarget::emulator(udid));
        self
    }

    pub fn pushes(&self) -> Vec<Push> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn pulled_devices(&self) -> Vec<String> {
        let mut devices: Vec<_> = self
            .pulls
            .lock()
            .unwrap()
            .iter()
            .map(|(udid, _)| udid.clone())
            .collect();
        devices.sort();
        devices
    }
}

#[async_trait]
impl IosBridge for FakeIos {
    async fn targets(&self, _bridge_path: &Path, include_physical: bool) -> Result<Vec<DeviceTarget>> {
        assert!(include_physical);
        Ok(self.targets.clone())
    }

    async fn push(
        &self,
        udid: &str,
        local_path: &Path,
        app_id: &str,
        destination: &str,
        _bridge_path: &Path,
    ) -> Result<()> {
        let contents = tokio::fs::read(local_path).await?;
        let file = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.pushes.lock().unwrap().push(Push {
            device_id: udid.to_string(),
            app_id: app_id.to_string(),
            destination: destination.to_string(),
            file,
            contents,
        });
        Ok(())
    }

    async fn pull(
        &self,
        udid: &str,
        remote_path: &str,
        _app_id: &str,
        local_dir: &Path,
        _bridge_path: &Path,
    ) -> Result<()> {
        self.pulls
            .lock()
            .unwrap()
            .push((udid.to_string(), remote_path.to_string()));
        match self.files.get(udid) {
            Some(IosStoredFiles::Csr(csr)) => {
                tokio::fs::write(local_dir.join("app.csr"), csr).await?;
            }
            Some(IosStoredFiles::Several(names)) => {
                for name in names {
                    tokio::fs::write(local_dir.join(name), "x").await?;
                }
            }
            Some(IosStoredFiles::Nothing) | None => {}
        }
        Ok(())
    }
}

/// Uploader that keeps every archive it receives
#[derive(Default)]
pub struct RecordingUploader {
    pub uploads: Mutex<Vec<(String, String, Vec<u8>)>>,
    pub fail_with: Option<String>,
}

#[async_trait]
impl CertificateUploader for RecordingUploader {
    async fn upload(&self, archive: Vec<u8>, device_id: &str, app_name: &str) -> Result<()> {
        if let Some(reason) = &self.fail_with {
            return Err(ProvisionError::UploadFailed {
                device_id: device_id.to_string(),
                reason: reason.clone(),
            });
        }
        self.uploads
            .lock()
            .unwrap()
            .push((device_id.to_string(), app_name.to_string(), archive));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl UserNotifier for RecordingNotifier {
    fn notify(&self, problem: &ProvisionError) {
        self.messages.lock().unwrap().push(problem.to_string());
    }
}

/// Names of the files in a gzip-compressed tar archive
pub fn archive_file_names(archive: &[u8]) -> Vec<String> {
    let mut reader = tar::Archive::new(flate2::read::GzDecoder::new(archive));
    let mut names: Vec<String> = reader
        .entries()
        .expect("archive entries")
        .map(|entry| {
            entry
                .expect("archive entry")
                .path()
                .expect("entry path")
                .display()
                .to_string()
        })
        .collect();
    names.sort();
    names
}

pub fn provisioning_dir(root: &Path) -> PathBuf {
    root.join("certs")
}
