//! Certbridge Provision – mutual-TLS certificate provisioning
//!
//! Keeps a local certificate authority and server certificate healthy, signs
//! client CSRs and delivers the resulting artifacts to emulators, simulators,
//! physical devices and desktop apps.

pub mod macros;

pub mod authority;
pub mod bridge;
pub mod config;
pub mod csr;
pub mod delivery;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod platform;
pub mod store;
pub mod tls;
pub mod toolkit;
pub mod upload;

pub use error::{ProvisionError, Result};

pub use authority::{AuthorityManager, CA_SUBJECT, EXPIRY_GUARD_SECS, SERVER_SUBJECT};
pub use bridge::{AndroidBridge, DeviceKind, DeviceTarget, IosBridge, LazyBridge};
pub use config::ProvisioningConfig;
pub use csr::{extract_app_name, sanitize};
pub use delivery::{DeliveryTarget, DeviceDelivery, DEVICE_CA_CERT_FILE, DEVICE_CLIENT_CERT_FILE};
pub use exchange::{ExchangeOrchestrator, LogNotifier, UserNotifier};
pub use identity::{DeviceIdentityResolver, UNKNOWN_DEVICE_ID};
pub use platform::{DeliveryRoute, ExchangeMedium, TargetOs};
pub use store::CertificateStore;
pub use tls::SecureServerConfig;
pub use toolkit::{CaToolkit, OpensslToolkit};
pub use upload::{CertificateUploader, HttpUploader};
