//! Certificate authority and server certificate lifecycle
//!
//! Each artifact is either absent, present and valid, or present and invalid.
//! Absent and invalid artifacts are regenerated in place. A server certificate
//! is only valid while it both stays outside the expiry guard window and
//! chains to the CA currently on disk, so a rotated CA forces a new server
//! certificate even when the old one has not expired.

use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use certbridge_common::logging::{Component, Logger};

use crate::error::{ProvisionError, Result};
use crate::store::{file_exists, CertificateStore};
use crate::tls::SecureServerConfig;
use crate::toolkit::{unix_now, CaToolkit};
use crate::{log_debug, log_info, log_warn};

pub const CA_SUBJECT: &str = "/C=US/ST=CA/L=Menlo Park/O=Certbridge/CN=CertbridgeCA";
pub const SERVER_SUBJECT: &str = "/C=US/ST=CA/L=Menlo Park/O=Certbridge/CN=localhost";

/// Certificates with less remaining validity than this are regenerated
pub const EXPIRY_GUARD_SECS: u64 = 24 * 60 * 60;
pub const KEY_BITS: u32 = 2048;

/// Owns the provisioning directory and keeps its CA and server certificate usable
pub struct AuthorityManager {
    toolkit: Arc<dyn CaToolkit>,
    store: CertificateStore,
    key_bits: u32,
    guard_secs: u64,
    /// Serializes every write into the store, including serial-file updates.
    write_lock: Mutex<()>,
    logger: Arc<Logger>,
}

impl AuthorityManager {
    pub fn new(toolkit: Arc<dyn CaToolkit>, store: CertificateStore, logger: Arc<Logger>) -> Self {
        Self {
            toolkit,
            store,
            key_bits: KEY_BITS,
            guard_secs: EXPIRY_GUARD_SECS,
            write_lock: Mutex::new(()),
            logger: Arc::new(logger.with_component(Component::Authority)),
        }
    }

    pub fn with_key_bits(mut self, key_bits: u32) -> Self {
        self.key_bits = key_bits;
        self
    }

    pub fn with_expiry_guard(mut self, guard_secs: u64) -> Self {
        self.guard_secs = guard_secs;
        self
    }

    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    pub fn toolkit(&self) -> &Arc<dyn CaToolkit> {
        &self.toolkit
    }

    /// Make sure a valid CA exists, generating a new one when it is missing or invalid
    pub async fn ensure_authority_exists(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_authority_locked().await
    }

    /// Make sure a valid, CA-issued server certificate exists
    pub async fn ensure_server_certificate_exists(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_authority_locked().await?;

        let store = &self.store;
        let missing = !file_exists(&store.server_key()).await
            || !file_exists(&store.server_cert()).await
            || !file_exists(&store.ca_cert()).await;
        if missing {
            log_info!(self.logger, "Server certificate missing, generating one");
            return self.generate_server_certificate().await;
        }

        if let Err(e) = self.check_validity(&store.server_cert()).await {
            log_warn!(self.logger, "Server certificate invalid ({e}), regenerating");
            return self.generate_server_certificate().await;
        }
        if let Err(e) = self.verify_issued_by_authority(&store.server_cert()).await {
            log_warn!(self.logger, "{e}, regenerating server certificate");
            return self.generate_server_certificate().await;
        }
        Ok(())
    }

    /// Fails with `CertificateNotFound` or `CertificateExpiring` unless the
    /// certificate at `path` stays valid beyond the guard window.
    pub async fn check_validity(&self, path: &Path) -> Result<()> {
        if !file_exists(path).await {
            return Err(ProvisionError::CertificateNotFound(path.display().to_string()));
        }

        // The quick check may flag certificates that are still fine; only the
        // end date decides.
        match self.toolkit.is_expiring_within(self.guard_secs, path).await {
            Ok(false) => return Ok(()),
            Ok(true) => {}
            Err(e) => log_debug!(self.logger, "Quick expiry check failed for {}: {e}", path.display()),
        }

        let end = self.toolkit.read_end_date(path).await?;
        let guard = i64::try_from(self.guard_secs).unwrap_or(i64::MAX);
        if end <= unix_now().saturating_add(guard) {
            return Err(ProvisionError::CertificateExpiring {
                path: path.display().to_string(),
                guard_secs: self.guard_secs,
            });
        }
        log_debug!(
            self.logger,
            "{} ends at {end}, outside the guard window despite the quick check",
            path.display()
        );
        Ok(())
    }

    /// Sign a client CSR with the current CA into `out`
    pub async fn sign_client_certificate(&self, csr: &Path, out: &Path) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let store = &self.store;
        self.toolkit
            .sign_csr(csr, &store.ca_cert(), &store.ca_key(), &store.server_serial(), out)
            .await
    }

    /// PEM bytes of the CA certificate
    pub async fn ca_certificate(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.store.ca_cert()).await?)
    }

    /// Material for the TLS listener that accepts provisioned clients
    pub async fn load_secure_server_config(&self) -> Result<SecureServerConfig> {
        self.ensure_server_certificate_exists().await?;
        let store = &self.store;
        Ok(SecureServerConfig {
            server_key: tokio::fs::read(store.server_key()).await?,
            server_cert: tokio::fs::read(store.server_cert()).await?,
            ca_cert: tokio::fs::read(store.ca_cert()).await?,
            request_cert: true,
            reject_unauthorized: true,
        })
    }

    async fn ensure_authority_locked(&self) -> Result<()> {
        self.store.ensure_dir().await?;
        if !file_exists(&self.store.ca_key()).await {
            log_info!(self.logger, "No certificate authority found, generating one");
            return self.generate_authority().await;
        }
        if let Err(e) = self.check_validity(&self.store.ca_cert()).await {
            log_warn!(self.logger, "Certificate authority invalid ({e}), regenerating");
            return self.generate_authority().await;
        }
        Ok(())
    }

    async fn generate_authority(&self) -> Result<()> {
        let store = &self.store;
        let generated = async {
            self.toolkit
                .generate_rsa_key(self.key_bits, &store.ca_key())
                .await?;
            self.toolkit
                .generate_self_signed_cert(CA_SUBJECT, &store.ca_key(), &store.ca_cert())
                .await
        }
        .await;
        generated.map_err(|e| {
            ProvisionError::AuthorityInvalid(format!("Failed to generate certificate authority: {e}"))
        })?;

        let digest = Sha256::digest(tokio::fs::read(store.ca_cert()).await?);
        log_info!(
            self.logger,
            "Generated certificate authority (sha256 {})",
            hex::encode(&digest[..8])
        );
        Ok(())
    }

    async fn generate_server_certificate(&self) -> Result<()> {
        let store = &self.store;
        self.toolkit
            .generate_rsa_key(self.key_bits, &store.server_key())
            .await?;
        self.toolkit
            .generate_csr(SERVER_SUBJECT, &store.server_key(), &store.server_csr())
            .await?;
        self.toolkit
            .sign_csr(
                &store.server_csr(),
                &store.ca_cert(),
                &store.ca_key(),
                &store.server_serial(),
                &store.server_cert(),
            )
            .await?;
        log_info!(self.logger, "Generated server certificate");
        Ok(())
    }

    async fn verify_issued_by_authority(&self, cert: &Path) -> Result<()> {
        if self.toolkit.verify_chain(&self.store.ca_cert(), cert).await? {
            Ok(())
        } else {
            Err(ProvisionError::ChainVerificationFailed(cert.display().to_string()))
        }
    }
}
