//! Provisioning configuration
//!
//! Loaded from and saved to `config.json` in a host-chosen directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{from_str, to_string_pretty};
use std::path::{Path, PathBuf};
use std::time::Duration;

use certbridge_common::logging::LoggingConfig;

use crate::authority::{EXPIRY_GUARD_SECS, KEY_BITS};
use crate::toolkit::DEFAULT_VALIDITY_DAYS;
use crate::upload::DEFAULT_UPLOAD_TIMEOUT;

const CONFIG_FILE: &str = "config.json";

/// Settings for the provisioning subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Home of the CA and server certificate material
    pub provisioning_dir: PathBuf,

    /// Parent of the per-exchange staging folders used for network exchanges
    pub staging_root: PathBuf,

    /// Location of the iOS device bridge tooling
    pub idb_path: PathBuf,

    /// Certificate intake endpoint for network exchanges
    pub upload_endpoint: Option<String>,

    pub upload_timeout_secs: u64,

    /// Remaining validity below which certificates are regenerated
    pub expiry_guard_secs: u64,

    pub key_bits: u32,

    pub validity_days: u32,

    pub logging: LoggingConfig,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        Self {
            provisioning_dir: home.join(".certbridge").join("certs"),
            staging_root: std::env::temp_dir(),
            idb_path: PathBuf::from("/usr/local/bin/idb"),
            upload_endpoint: None,
            upload_timeout_secs: DEFAULT_UPLOAD_TIMEOUT.as_secs(),
            expiry_guard_secs: EXPIRY_GUARD_SECS,
            key_bits: KEY_BITS,
            validity_days: DEFAULT_VALIDITY_DAYS,
            logging: LoggingConfig::default(),
        }
    }
}

impl ProvisioningConfig {
    /// Configuration rooted at a specific provisioning directory
    pub fn with_provisioning_dir(provisioning_dir: impl Into<PathBuf>) -> Self {
        Self {
            provisioning_dir: provisioning_dir.into(),
            ..Self::default()
        }
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    /// Load configuration from file
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_file = config_dir.join(CONFIG_FILE);

        if !config_file.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file not found: {:?}",
                config_file
            ));
        }

        let config_content = std::fs::read_to_string(&config_file)
            .with_context(|| format!("Failed to read config file: {config_file:?}"))?;

        let config: ProvisioningConfig = from_str(&config_content)
            .with_context(|| format!("Failed to parse config file: {config_file:?}"))?;

        if config.key_bits < 2048 {
            return Err(anyhow::anyhow!(
                "key_bits must be at least 2048, got {}",
                config.key_bits
            ));
        }

        if i64::try_from(config.expiry_guard_secs).is_err() {
            return Err(anyhow::anyhow!(
                "expiry_guard_secs is out of range: {}",
                config.expiry_guard_secs
            ));
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config dir: {config_dir:?}"))?;
        let config_file = config_dir.join(CONFIG_FILE);

        let config_content = to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_file, config_content)
            .with_context(|| format!("Failed to write config file: {config_file:?}"))?;

        Ok(())
    }

    /// Check if configuration exists
    pub fn exists(config_dir: &Path) -> bool {
        config_dir.join(CONFIG_FILE).exists()
    }
}
