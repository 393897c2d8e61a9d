//! On-disk layout of the certificate authority and server artifacts.

use crate::error::Result;
use std::path::{Path, PathBuf};

pub const CA_KEY_FILE: &str = "ca.key";
pub const CA_CERT_FILE: &str = "ca.crt";
pub const SERVER_KEY_FILE: &str = "server.key";
pub const SERVER_CSR_FILE: &str = "server.csr";
pub const SERVER_SERIAL_FILE: &str = "server.srl";
pub const SERVER_CERT_FILE: &str = "server.crt";

/// Provisioning directory holding the CA and server certificate material.
///
/// Artifacts are overwritten in place on regeneration; nothing here is versioned.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    base_dir: PathBuf,
}

impl CertificateStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the provisioning directory if it does not exist yet
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    pub fn ca_key(&self) -> PathBuf {
        self.base_dir.join(CA_KEY_FILE)
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.base_dir.join(CA_CERT_FILE)
    }

    pub fn server_key(&self) -> PathBuf {
        self.base_dir.join(SERVER_KEY_FILE)
    }

    pub fn server_csr(&self) -> PathBuf {
        self.base_dir.join(SERVER_CSR_FILE)
    }

    pub fn server_serial(&self) -> PathBuf {
        self.base_dir.join(SERVER_SERIAL_FILE)
    }

    pub fn server_cert(&self) -> PathBuf {
        self.base_dir.join(SERVER_CERT_FILE)
    }
}

pub(crate) async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
