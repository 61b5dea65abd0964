use std::sync::Arc;
use std::time::Duration;

use migrator_core::{Clock, MigrationSettings};

use crate::traits::{DependentWorkloads, JobSpawner, VolumeStore};

/// Dependencies shared by every step of a migration.
pub struct MigrationContext<V, J, W> {
    volumes: Arc<V>,
    jobs: Arc<J>,
    workloads: Arc<W>,
    clock: Arc<dyn Clock>,
    identity: String,
    settings: MigrationSettings,
}

impl<V, J, W> Clone for MigrationContext<V, J, W> {
    fn clone(&self) -> Self {
        Self {
            volumes: Arc::clone(&self.volumes),
            jobs: Arc::clone(&self.jobs),
            workloads: Arc::clone(&self.workloads),
            clock: Arc::clone(&self.clock),
            identity: self.identity.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<V, J, W> MigrationContext<V, J, W>
where
    V: VolumeStore,
    J: JobSpawner,
    W: DependentWorkloads,
{
    pub fn new(
        volumes: Arc<V>,
        jobs: Arc<J>,
        workloads: Arc<W>,
        clock: Arc<dyn Clock>,
        identity: impl Into<String>,
        settings: MigrationSettings,
    ) -> Self {
        Self {
            volumes,
            jobs,
            workloads,
            clock,
            identity: identity.into(),
            settings,
        }
    }

    #[must_use]
    pub fn volumes(&self) -> &V {
        &self.volumes
    }

    #[must_use]
    pub fn jobs(&self) -> &J {
        &self.jobs
    }

    #[must_use]
    pub fn workloads(&self) -> &W {
        &self.workloads
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Name written as lease holder by this replica.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    /// Cumulative timeout of one migration.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.settings.timeouts.total()
    }
}
