use std::time::Duration;

use async_trait::async_trait;
use migrator_core::NamespacedName;

use crate::Result;

/// Pods that must restart to pick up a migrated volume.
#[async_trait]
pub trait DependentWorkloads: Send + Sync {
    /// Pods mounting `claim`.
    ///
    /// # Errors
    ///
    /// Returns an error if pods cannot be listed.
    async fn dependents_of(&self, claim: &NamespacedName) -> Result<Vec<NamespacedName>>;

    /// # Errors
    ///
    /// Returns an error if the pod cannot be deleted.
    async fn restart(&self, pod: &NamespacedName, grace: Duration) -> Result<()>;
}
