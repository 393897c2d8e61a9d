use thiserror::Error;

/// Error types for the certbridge-provision crate
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Certificate signing request is empty")]
    EmptyRequest,

    #[error("Certificate toolkit is not available: {0}")]
    ToolkitUnavailable(String),

    #[error("Certificate toolkit error: {0}")]
    Toolkit(String),

    #[error("No common name found in subject '{0}'")]
    MalformedSubject(String),

    #[error("Disallowed app name '{0}': only letters, digits, '.', '-' and '_' are permitted")]
    DisallowedAppName(String),

    #[error("No {os} devices found")]
    NoDevicesFound { os: String },

    #[error("No {os} device holds a CSR matching the request for app {app}")]
    NoMatchingDevice { os: String, app: String },

    #[error("Multiple {os} devices ({devices}) hold an identical CSR for app {app}")]
    AmbiguousMatch {
        os: String,
        app: String,
        devices: String,
    },

    #[error("Expected exactly one CSR pulled from device {device}, found {count} files")]
    ConflictInStaging { device: String, count: usize },

    #[error("No CSR could be retrieved from device {device}")]
    NoCsrRetrieved { device: String },

    #[error("Path '{0}' is not inside an application container")]
    UnexpectedContainerPath(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Certificate not found: {0}")]
    CertificateNotFound(String),

    #[error("Certificate {path} expires within {guard_secs} seconds")]
    CertificateExpiring { path: String, guard_secs: u64 },

    #[error("Certificate authority is invalid: {0}")]
    AuthorityInvalid(String),

    #[error("Certificate {0} was not issued by the current certificate authority")]
    ChainVerificationFailed(String),

    #[error("Device bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("Device bridge error on {device}: {reason}")]
    Bridge { device: String, reason: String },

    #[error("Failed to deliver {file} to {os} app {app}: {reason}")]
    DeliveryFailed {
        os: String,
        app: String,
        file: String,
        reason: String,
    },

    #[error("Certificate upload for device {device_id} timed out after {timeout_secs} seconds")]
    UploadTimeout { device_id: String, timeout_secs: u64 },

    #[error("Certificate upload for device {device_id} failed: {reason}")]
    UploadFailed { device_id: String, reason: String },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{os} certificate exchange for app in {app_directory} failed: {source}")]
    Exchange {
        os: String,
        app_directory: String,
        #[source]
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    /// True when the device already holds its artifacts and only the
    /// record keeping with the intake service failed.
    pub fn is_upload_failure(&self) -> bool {
        matches!(
            self,
            ProvisionError::UploadTimeout { .. } | ProvisionError::UploadFailed { .. }
        )
    }

    /// Device id carried by an upload failure, if any
    pub fn device_id(&self) -> Option<&str> {
        match self {
            ProvisionError::UploadTimeout { device_id, .. }
            | ProvisionError::UploadFailed { device_id, .. } => Some(device_id),
            _ => None,
        }
    }

    /// Attach the exchange's OS and app directory to errors that do not
    /// already name what they were working on.
    pub(crate) fn in_exchange(self, os: &str, app_directory: &str) -> Self {
        match self {
            ProvisionError::Toolkit(_)
            | ProvisionError::Io(_)
            | ProvisionError::BridgeUnavailable(_)
            | ProvisionError::Tls(_)
            | ProvisionError::Config(_) => ProvisionError::Exchange {
                os: os.to_string(),
                app_directory: app_directory.to_string(),
                source: Box::new(self),
            },
            other => other,
        }
    }

    /// The innermost error, skipping exchange context
    pub fn root_cause(&self) -> &ProvisionError {
        match self {
            ProvisionError::Exchange { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<openssl::error::ErrorStack> for ProvisionError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        ProvisionError::Toolkit(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ProvisionError {
    fn from(err: tokio::task::JoinError) -> Self {
        ProvisionError::Toolkit(format!("Toolkit task failed: {err}"))
    }
}

/// Result type for certbridge-provision operations
pub type Result<T> = std::result::Result<T, ProvisionError>;
