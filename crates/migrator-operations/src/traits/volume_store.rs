use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolume;

use crate::Result;

/// Cluster-scoped persistent volume objects.
#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the cluster cannot be reached.
    async fn get(&self, name: &str) -> Result<Option<PersistentVolume>>;

    /// # Errors
    ///
    /// Returns an error if the object already exists or is rejected.
    async fn create(&self, volume: &PersistentVolume) -> Result<PersistentVolume>;

    /// Write the whole object back.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist or is rejected.
    async fn update(&self, volume: &PersistentVolume) -> Result<PersistentVolume>;

    /// Delete the object and wait until it is gone. Deleting a missing
    /// object succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete is rejected or the object lingers.
    async fn delete(&self, name: &str) -> Result<()>;
}
