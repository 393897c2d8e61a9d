//! Packaging and upload of staged artifacts for network-mediated exchanges

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use certbridge_common::logging::Logger;

use crate::error::{ProvisionError, Result};
use crate::log_info;

/// Hard limit for one upload
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Remote certificate intake for devices that cannot be reached directly
#[async_trait]
pub trait CertificateUploader: Send + Sync {
    /// Hand `archive` (a gzip-compressed tar) to the intake service
    async fn upload(&self, archive: Vec<u8>, device_id: &str, app_name: &str) -> Result<()>;
}

/// Pack every regular file in `dir` into a gzip-compressed tar archive
pub async fn package_staging_dir(dir: &Path) -> Result<Vec<u8>> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let mut entries: Vec<_> = std::fs::read_dir(&dir)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .filter(|entry| entry.path().is_file())
            .collect();
        entries.sort_by_key(|entry| entry.file_name());

        let mut archive = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for entry in entries {
            archive.append_path_with_name(entry.path(), entry.file_name())?;
        }
        Ok(archive.into_inner()?.finish()?)
    })
    .await?
}

/// Upload under a hard timeout, mapping failures to upload-specific errors
pub async fn upload_with_timeout(
    uploader: &dyn CertificateUploader,
    archive: Vec<u8>,
    device_id: &str,
    app_name: &str,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, uploader.upload(archive, device_id, app_name)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e @ ProvisionError::UploadFailed { .. })) => Err(e),
        Ok(Err(e)) => Err(ProvisionError::UploadFailed {
            device_id: device_id.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ProvisionError::UploadTimeout {
            device_id: device_id.to_string(),
            timeout_secs: timeout.as_secs(),
        }),
    }
}

/// Uploads archives to an HTTP intake endpoint
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
    logger: Arc<Logger>,
}

impl HttpUploader {
    pub fn new(endpoint: impl Into<String>, logger: Arc<Logger>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            logger,
        }
    }
}

#[async_trait]
impl CertificateUploader for HttpUploader {
    async fn upload(&self, archive: Vec<u8>, device_id: &str, app_name: &str) -> Result<()> {
        let failed = |reason: String| ProvisionError::UploadFailed {
            device_id: device_id.to_string(),
            reason,
        };
        let size = archive.len();
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("device_id", device_id), ("app", app_name)])
            .header(reqwest::header::CONTENT_TYPE, "application/gzip")
            .body(archive)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("intake responded {status}: {body}")));
        }
        log_info!(self.logger, "Uploaded {size} byte certificate bundle for {app_name}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    struct Stalled;

    #[async_trait]
    impl CertificateUploader for Stalled {
        async fn upload(&self, _: Vec<u8>, _: &str, _: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    struct Refused;

    #[async_trait]
    impl CertificateUploader for Refused {
        async fn upload(&self, _: Vec<u8>, _: &str, _: &str) -> Result<()> {
            Err(ProvisionError::Config("endpoint not configured".to_string()))
        }
    }

    #[tokio::test]
    async fn packages_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sonarCA.crt"), b"ca").unwrap();
        std::fs::write(dir.path().join("device.crt"), b"client").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let bytes = package_staging_dir(dir.path()).await.unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
        let mut found = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let mut contents = String::new();
            entry.read_to_string(&mut contents).unwrap();
            found.push((entry.path().unwrap().display().to_string(), contents));
        }
        assert_eq!(
            found,
            vec![
                ("device.crt".to_string(), "client".to_string()),
                ("sonarCA.crt".to_string(), "ca".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_upload_times_out() {
        let err = upload_with_timeout(&Stalled, vec![1], "dev-1", "app", DEFAULT_UPLOAD_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::UploadTimeout { ref device_id, timeout_secs: 300 } if device_id == "dev-1"
        ));
        assert!(err.is_upload_failure());
    }

    #[tokio::test]
    async fn other_errors_become_upload_failures() {
        let err = upload_with_timeout(&Refused, vec![1], "dev-2", "app", DEFAULT_UPLOAD_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::UploadFailed { .. }));
        assert_eq!(err.device_id(), Some("dev-2"));
    }
}
