//! Migration of one legacy host path volume to a CSI volume.
//!
//! The migration is a saga of seven steps:
//!
//! 1. `lease_check` takes the advisory lease
//! 2. `transform_content` switches quota accounting on every node
//! 3. `provision_replacement` creates a placeholder CSI volume
//! 4. `retire_legacy` captures and deletes the legacy volume
//! 5. `publish_replacement` creates the CSI volume under the original name
//! 6. `await_binding` waits for the claim to bind again
//! 7. `restart_dependents` deletes the pods using the claim
//!
//! The placeholder and the job pods are always cleaned up. Everything else
//! is only rolled back when the migration fails.

mod compensation;
mod context;
mod data;
mod steps;

pub use compensation::MigrationCompensation;
pub use context::MigrationContext;
pub use data::MigrationData;
use migrator_core::StepTimeouts;
use migrator_saga::{Saga, SagaBuilder, SagaReport};
pub use steps::{
    AwaitBindingStep, LeaseCheckStep, ProvisionReplacementStep, PublishReplacementStep,
    RestartDependentsStep, RetireLegacyStep, TransformContentStep,
};
use tokio_util::sync::CancellationToken;

use crate::OperationError;
use crate::traits::{DependentWorkloads, JobSpawner, VolumeStore};

pub type MigrationSaga<V, J, W> =
    Saga<MigrationContext<V, J, W>, MigrationData, MigrationCompensation, OperationError>;

/// Build the migration saga for `volume` with the declared step timeouts.
#[must_use]
pub fn migration_saga<V, J, W>(volume: &str, timeouts: &StepTimeouts) -> MigrationSaga<V, J, W>
where
    V: VolumeStore + 'static,
    J: JobSpawner + 'static,
    W: DependentWorkloads + 'static,
{
    SagaBuilder::new(format!("migrate/{volume}"))
        .first_step(LeaseCheckStep::new(), timeouts.lease_check)
        .then(TransformContentStep::new(), timeouts.transform_content)
        .then(ProvisionReplacementStep::new(), timeouts.provision_replacement)
        .then(RetireLegacyStep::new(), timeouts.retire_legacy)
        .then(PublishReplacementStep::new(), timeouts.publish_replacement)
        .then(AwaitBindingStep::new(), timeouts.await_binding)
        .then(RestartDependentsStep::new(), timeouts.restart_dependents)
        .build()
}

/// Run one migration to completion on the current task.
pub async fn migrate<V, J, W>(
    ctx: &MigrationContext<V, J, W>,
    data: &mut MigrationData,
    stop: &CancellationToken,
) -> SagaReport<OperationError>
where
    V: VolumeStore + 'static,
    J: JobSpawner + 'static,
    W: DependentWorkloads + 'static,
{
    let saga = migration_saga(&data.volume_name, &ctx.settings().timeouts);
    saga.run(ctx, data, stop).await
}
