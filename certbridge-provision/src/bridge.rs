//! Device bridge collaborators
//!
//! Bridges are owned by the hosting application. The provisioning core only
//! needs push/pull/enumerate, expressed here as traits.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::{ProvisionError, Result};

/// Whether a target is real hardware or an emulator/simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Physical,
    Emulator,
}

/// A device reported by a bridge's enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub id: String,
    pub kind: DeviceKind,
}

impl DeviceTarget {
    pub fn physical(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DeviceKind::Physical,
        }
    }

    pub fn emulator(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DeviceKind::Emulator,
        }
    }
}

/// Android debug bridge surface. Paths are device-side and scoped to the app
/// identified by `app_id`.
#[async_trait]
pub trait AndroidBridge: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DeviceTarget>>;

    async fn push(&self, device_id: &str, app_id: &str, destination: &str, contents: &[u8])
        -> Result<()>;

    async fn pull(&self, device_id: &str, app_id: &str, source: &str) -> Result<Vec<u8>>;
}

/// Bridge for iOS hardware that is not reachable through the host filesystem
#[async_trait]
pub trait IosBridge: Send + Sync {
    async fn targets(&self, bridge_path: &Path, include_physical: bool)
        -> Result<Vec<DeviceTarget>>;

    /// Copy `local_path` into `destination` inside the app container
    async fn push(
        &self,
        udid: &str,
        local_path: &Path,
        app_id: &str,
        destination: &str,
        bridge_path: &Path,
    ) -> Result<()>;

    /// Copy `remote_path` from the app container into `local_dir`
    async fn pull(
        &self,
        udid: &str,
        remote_path: &str,
        app_id: &str,
        local_dir: &Path,
        bridge_path: &Path,
    ) -> Result<()>;
}

type BridgeInit<B> = Box<dyn Fn() -> BoxFuture<'static, Result<Arc<B>>> + Send + Sync>;

/// Bridge handle initialised on first use.
///
/// The outcome of the first initialisation is kept: a failed start is reported
/// as [`ProvisionError::BridgeUnavailable`] to every later caller instead of
/// being retried.
pub struct LazyBridge<B: ?Sized> {
    cell: OnceCell<std::result::Result<Arc<B>, String>>,
    init: BridgeInit<B>,
}

impl<B: ?Sized + Send + Sync + 'static> LazyBridge<B> {
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<Arc<B>>> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            init: Box::new(init),
        }
    }

    /// A handle that is already initialised
    pub fn ready(bridge: Arc<B>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(Ok(bridge))),
            init: Box::new(|| {
                Box::pin(async {
                    Err(ProvisionError::BridgeUnavailable(
                        "bridge was provided pre-initialised".to_string(),
                    ))
                })
            }),
        }
    }

    /// A handle whose initialisation is known to have failed
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(Err(reason.into()))),
            init: Box::new(|| {
                Box::pin(async {
                    Err(ProvisionError::BridgeUnavailable(
                        "bridge initialisation already failed".to_string(),
                    ))
                })
            }),
        }
    }

    pub async fn get(&self) -> Result<Arc<B>> {
        let outcome = self
            .cell
            .get_or_init(|| async { (self.init)().await.map_err(|e| e.to_string()) })
            .await;
        match outcome {
            Ok(bridge) => Ok(bridge.clone()),
            Err(reason) => Err(ProvisionError::BridgeUnavailable(reason.clone())),
        }
    }
}
