use std::time::Duration;

use migrator_core::{CoreError, NamespacedName, StorageKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("cluster request failed")]
    Kube(#[from] kube::Error),

    #[error("volume watch failed")]
    Watch(#[from] kube::runtime::watcher::Error),

    #[error("volume '{0}' not found")]
    VolumeNotFound(String),

    #[error("volume '{volume}' is no longer a host path volume (found {kind})")]
    NotLegacy { volume: String, kind: StorageKind },

    #[error("no captured copy of volume '{0}' to publish from")]
    CapturedVolumeMissing(String),

    #[error("timed out after {waited:?} waiting for {what}")]
    WaitTimedOut { what: String, waited: Duration },

    #[error("transform job '{0}' failed")]
    JobPodFailed(NamespacedName),
}

impl OperationError {
    /// The cluster rejected a create because the object exists.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(response)) if response.code == 409)
    }
}

pub type Result<T> = std::result::Result<T, OperationError>;
