use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolume;
use migrator_core::{Lease, NamespacedName, volume};
use migrator_saga::Compensation;
use tracing::{debug, info};

use super::context::MigrationContext;
use crate::OperationError;
use crate::traits::{DependentWorkloads, JobSpawner, VolumeStore};

/// Undo records registered by the migration steps.
#[derive(Debug, Clone)]
pub enum MigrationCompensation {
    /// Remove this replica's lease unless the migration succeeded.
    ReleaseLease { volume: String },
    /// Delete the transform job pods.
    ReapJobs { jobs: Vec<NamespacedName> },
    /// Delete the placeholder volume.
    DeleteTemporary { name: String },
    /// Re-create the captured legacy volume unless the migration succeeded.
    RestoreLegacy { captured: Box<PersistentVolume> },
    /// Delete the published replacement unless the migration succeeded.
    UnpublishReplacement { name: String },
}

#[async_trait]
impl<V, J, W> Compensation<MigrationContext<V, J, W>> for MigrationCompensation
where
    V: VolumeStore,
    J: JobSpawner,
    W: DependentWorkloads,
{
    type Error = OperationError;

    fn kind(&self) -> &'static str {
        match self {
            Self::ReleaseLease { .. } => "release_lease",
            Self::ReapJobs { .. } => "reap_jobs",
            Self::DeleteTemporary { .. } => "delete_temporary",
            Self::RestoreLegacy { .. } => "restore_legacy",
            Self::UnpublishReplacement { .. } => "unpublish_replacement",
        }
    }

    fn description(&self) -> String {
        match self {
            Self::ReleaseLease { volume } => format!("clear migration lease on '{volume}'"),
            Self::ReapJobs { jobs } => format!("delete {} transform job pod(s)", jobs.len()),
            Self::DeleteTemporary { name } => format!("delete temporary volume '{name}'"),
            Self::RestoreLegacy { captured } => {
                format!("re-create legacy volume '{}'", volume::volume_name(captured))
            }
            Self::UnpublishReplacement { name } => format!("delete replacement volume '{name}'"),
        }
    }

    async fn undo(
        &self,
        ctx: &MigrationContext<V, J, W>,
        saga_succeeded: bool,
    ) -> Result<(), OperationError> {
        match self {
            Self::ReleaseLease { volume } => {
                if saga_succeeded {
                    return Ok(());
                }
                let Some(mut current) = ctx.volumes().get(volume).await? else {
                    debug!(volume = %volume, "volume gone, no lease to clear");
                    return Ok(());
                };
                Lease::clear_from(&mut current.metadata);
                ctx.volumes().update(&current).await?;
                info!(volume = %volume, "cleared migration lease");
                Ok(())
            }
            Self::ReapJobs { jobs } => {
                if jobs.is_empty() {
                    return Ok(());
                }
                ctx.jobs().reap(jobs).await?;
                debug!(count = jobs.len(), "reaped transform jobs");
                Ok(())
            }
            Self::DeleteTemporary { name } => {
                ctx.volumes().delete(name).await?;
                debug!(volume = %name, "deleted temporary volume");
                Ok(())
            }
            Self::RestoreLegacy { captured } => {
                if saga_succeeded {
                    return Ok(());
                }
                let name = volume::volume_name(captured);
                match ctx.volumes().create(&volume::for_recreate(captured)).await {
                    Ok(_) => info!(volume = %name, "re-created legacy volume"),
                    Err(e) if e.is_already_exists() => {
                        debug!(volume = %name, "legacy volume still present");
                    }
                    Err(e) => return Err(e),
                }
                Ok(())
            }
            Self::UnpublishReplacement { name } => {
                if saga_succeeded {
                    return Ok(());
                }
                ctx.volumes().delete(name).await?;
                info!(volume = %name, "deleted replacement volume");
                Ok(())
            }
        }
    }
}
