use async_trait::async_trait;
use migrator_core::NamespacedName;

use crate::Result;

/// One short-lived pod switching the quota accounting of a node's host
/// directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformJob {
    pub volume: String,
    pub node: String,
    pub host_paths: Vec<String>,
    pub image: String,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
    /// The pod no longer exists.
    Missing,
}

impl JobStatus {
    #[must_use]
    pub fn is_finished(self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[async_trait]
pub trait JobSpawner: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the pod cannot be created.
    async fn spawn(&self, job: &TransformJob) -> Result<NamespacedName>;

    /// # Errors
    ///
    /// Returns an error if the cluster cannot be reached.
    async fn status(&self, job: &NamespacedName) -> Result<JobStatus>;

    /// Delete the pods and wait until they are gone.
    ///
    /// # Errors
    ///
    /// Returns an error if a delete is rejected or a pod lingers.
    async fn reap(&self, jobs: &[NamespacedName]) -> Result<()>;
}
