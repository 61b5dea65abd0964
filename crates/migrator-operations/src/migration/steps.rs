use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolume;
use migrator_core::volume::{self, ReplacementKind};
use migrator_core::{Lease, LeaseClaim, StorageKind};
use migrator_saga::{SagaStep, StepOutcome};
use tracing::{debug, info, warn};

use super::compensation::MigrationCompensation;
use super::context::MigrationContext;
use super::data::MigrationData;
use crate::traits::{DependentWorkloads, JobSpawner, JobStatus, TransformJob, VolumeStore};
use crate::wait::poll_until;
use crate::{OperationError, Result};

type Outcome = StepOutcome<MigrationCompensation, OperationError>;

macro_rules! migration_step {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name<V, J, W> {
            _marker: PhantomData<(V, J, W)>,
        }

        impl<V, J, W> $name<V, J, W> {
            #[must_use]
            pub fn new() -> Self {
                Self {
                    _marker: PhantomData,
                }
            }
        }

        impl<V, J, W> Default for $name<V, J, W> {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

migration_step!(
    /// Takes the migration lease on a legacy volume.
    LeaseCheckStep
);
migration_step!(
    /// Runs the per-node jobs that switch quota accounting.
    TransformContentStep
);
migration_step!(
    /// Creates the placeholder CSI volume.
    ProvisionReplacementStep
);
migration_step!(
    /// Captures and deletes the legacy volume.
    RetireLegacyStep
);
migration_step!(
    /// Creates the CSI volume under the legacy volume's name.
    PublishReplacementStep
);
migration_step!(
    /// Waits for the replacement to bind when the legacy volume was bound.
    AwaitBindingStep
);
migration_step!(
    /// Deletes pods using the volume so they remount it.
    RestartDependentsStep
);

/// Re-read the volume and make sure it still needs migrating.
async fn fetch_legacy<V: VolumeStore>(volumes: &V, name: &str) -> Result<PersistentVolume> {
    let pv = volumes
        .get(name)
        .await?
        .ok_or_else(|| OperationError::VolumeNotFound(name.to_string()))?;
    match volume::storage_kind(&pv) {
        StorageKind::LegacyHostPath => Ok(pv),
        kind => Err(OperationError::NotLegacy {
            volume: name.to_string(),
            kind,
        }),
    }
}

#[async_trait]
impl<V, J, W> SagaStep for LeaseCheckStep<V, J, W>
where
    V: VolumeStore,
    J: JobSpawner,
    W: DependentWorkloads,
{
    type Context = MigrationContext<V, J, W>;
    type Data = MigrationData;
    type Undo = MigrationCompensation;
    type Error = OperationError;

    fn name(&self) -> &'static str {
        "lease_check"
    }

    async fn execute(&self, ctx: &Self::Context, data: &mut MigrationData) -> Outcome {
        let mut pv = match fetch_legacy(ctx.volumes(), &data.volume_name).await {
            Ok(pv) => pv,
            Err(e) => return StepOutcome::fail(e),
        };
        let current = match Lease::from_meta(&pv.metadata) {
            Ok(current) => current,
            Err(e) => return StepOutcome::fail(e.into()),
        };

        let now = ctx.clock().now();
        match Lease::evaluate(current.as_ref(), ctx.identity(), now, ctx.budget()) {
            LeaseClaim::Contended { holder, age } => {
                info!(
                    volume = %data.volume_name,
                    holder = %holder,
                    age_secs = age.num_seconds(),
                    "volume is being migrated by another replica"
                );
                return StepOutcome::halt();
            }
            LeaseClaim::Stale { holder, age } => {
                warn!(
                    volume = %data.volume_name,
                    holder = %holder,
                    age_secs = age.num_seconds(),
                    "taking over stale migration lease"
                );
            }
            LeaseClaim::HeldBySelf | LeaseClaim::Vacant => {}
        }

        Lease::new(ctx.identity(), now).apply_to(&mut pv.metadata);
        if let Err(e) = ctx.volumes().update(&pv).await {
            return StepOutcome::fail(e);
        }
        debug!(volume = %data.volume_name, holder = ctx.identity(), "lease written");

        StepOutcome::proceed().with_compensation(MigrationCompensation::ReleaseLease {
            volume: data.volume_name.clone(),
        })
    }
}

#[async_trait]
impl<V, J, W> SagaStep for TransformContentStep<V, J, W>
where
    V: VolumeStore,
    J: JobSpawner,
    W: DependentWorkloads,
{
    type Context = MigrationContext<V, J, W>;
    type Data = MigrationData;
    type Undo = MigrationCompensation;
    type Error = OperationError;

    fn name(&self) -> &'static str {
        "transform_content"
    }

    async fn execute(&self, ctx: &Self::Context, data: &mut MigrationData) -> Outcome {
        let pv = match fetch_legacy(ctx.volumes(), &data.volume_name).await {
            Ok(pv) => pv,
            Err(e) => return StepOutcome::fail(e),
        };
        let mounts = match volume::node_mounts(&pv) {
            Ok(mounts) => mounts,
            Err(e) => return StepOutcome::fail(e.into()),
        };

        let settings = ctx.settings();
        for mount in mounts {
            let job = TransformJob {
                volume: data.volume_name.clone(),
                node: mount.node,
                host_paths: mount.host_paths,
                image: settings.transform_image.clone(),
                command: settings.transform_command.clone(),
            };
            match ctx.jobs().spawn(&job).await {
                Ok(spawned) => {
                    debug!(volume = %data.volume_name, node = %job.node, job = %spawned, "spawned transform job");
                    data.jobs.push(spawned);
                }
                Err(e) => {
                    return StepOutcome::fail(e).with_compensation(MigrationCompensation::ReapJobs {
                        jobs: data.jobs.clone(),
                    });
                }
            }
        }

        let undo = MigrationCompensation::ReapJobs {
            jobs: data.jobs.clone(),
        };
        let jobs = ctx.jobs();
        let pending = &data.jobs;
        let waited = poll_until(
            format!("transform jobs of volume '{}'", data.volume_name),
            settings.job_completion_wait,
            settings.poll_interval,
            || async move {
                for job in pending {
                    match jobs.status(job).await? {
                        JobStatus::Failed => return Err(OperationError::JobPodFailed(job.clone())),
                        status if !status.is_finished() => return Ok(false),
                        _ => {}
                    }
                }
                Ok(true)
            },
        )
        .await;

        match waited {
            Ok(()) => StepOutcome::proceed().with_compensation(undo),
            Err(e) => StepOutcome::fail(e).with_compensation(undo),
        }
    }
}

#[async_trait]
impl<V, J, W> SagaStep for ProvisionReplacementStep<V, J, W>
where
    V: VolumeStore,
    J: JobSpawner,
    W: DependentWorkloads,
{
    type Context = MigrationContext<V, J, W>;
    type Data = MigrationData;
    type Undo = MigrationCompensation;
    type Error = OperationError;

    fn name(&self) -> &'static str {
        "provision_replacement"
    }

    async fn execute(&self, ctx: &Self::Context, data: &mut MigrationData) -> Outcome {
        let pv = match fetch_legacy(ctx.volumes(), &data.volume_name).await {
            Ok(pv) => pv,
            Err(e) => return StepOutcome::fail(e),
        };

        let name = volume::temporary_volume_name(&data.volume_name);
        let temporary = match volume::build_replacement(
            &pv,
            &name,
            &ctx.settings().csi_driver,
            ReplacementKind::Temporary,
        ) {
            Ok(temporary) => temporary,
            Err(e) => return StepOutcome::fail(e.into()),
        };
        if let Err(e) = ctx.volumes().create(&temporary).await {
            return StepOutcome::fail(e);
        }
        debug!(volume = %data.volume_name, temporary = %name, "created temporary volume");

        data.temporary_name = Some(name.clone());
        StepOutcome::proceed().with_compensation(MigrationCompensation::DeleteTemporary { name })
    }
}

#[async_trait]
impl<V, J, W> SagaStep for RetireLegacyStep<V, J, W>
where
    V: VolumeStore,
    J: JobSpawner,
    W: DependentWorkloads,
{
    type Context = MigrationContext<V, J, W>;
    type Data = MigrationData;
    type Undo = MigrationCompensation;
    type Error = OperationError;

    fn name(&self) -> &'static str {
        "retire_legacy"
    }

    async fn execute(&self, ctx: &Self::Context, data: &mut MigrationData) -> Outcome {
        let pv = match fetch_legacy(ctx.volumes(), &data.volume_name).await {
            Ok(pv) => pv,
            Err(e) => return StepOutcome::fail(e),
        };
        data.captured = Some(pv.clone());
        let restore = MigrationCompensation::RestoreLegacy {
            captured: Box::new(pv),
        };

        // A failed delete may still have removed the object.
        if let Err(e) = ctx.volumes().delete(&data.volume_name).await {
            return StepOutcome::fail(e).with_compensation(restore);
        }
        info!(volume = %data.volume_name, "deleted legacy volume");

        StepOutcome::proceed().with_compensation(restore)
    }
}

#[async_trait]
impl<V, J, W> SagaStep for PublishReplacementStep<V, J, W>
where
    V: VolumeStore,
    J: JobSpawner,
    W: DependentWorkloads,
{
    type Context = MigrationContext<V, J, W>;
    type Data = MigrationData;
    type Undo = MigrationCompensation;
    type Error = OperationError;

    fn name(&self) -> &'static str {
        "publish_replacement"
    }

    async fn execute(&self, ctx: &Self::Context, data: &mut MigrationData) -> Outcome {
        let Some(captured) = data.captured.as_ref() else {
            return StepOutcome::fail(OperationError::CapturedVolumeMissing(
                data.volume_name.clone(),
            ));
        };
        let replacement = match volume::build_replacement(
            captured,
            &data.volume_name,
            &ctx.settings().csi_driver,
            ReplacementKind::Final,
        ) {
            Ok(replacement) => replacement,
            Err(e) => return StepOutcome::fail(e.into()),
        };
        if let Err(e) = ctx.volumes().create(&replacement).await {
            return StepOutcome::fail(e);
        }
        info!(volume = %data.volume_name, driver = %ctx.settings().csi_driver, "published replacement volume");

        StepOutcome::proceed().with_compensation(MigrationCompensation::UnpublishReplacement {
            name: data.volume_name.clone(),
        })
    }
}

#[async_trait]
impl<V, J, W> SagaStep for AwaitBindingStep<V, J, W>
where
    V: VolumeStore,
    J: JobSpawner,
    W: DependentWorkloads,
{
    type Context = MigrationContext<V, J, W>;
    type Data = MigrationData;
    type Undo = MigrationCompensation;
    type Error = OperationError;

    fn name(&self) -> &'static str {
        "await_binding"
    }

    async fn execute(&self, ctx: &Self::Context, data: &mut MigrationData) -> Outcome {
        if !data.wait_for_binding {
            return StepOutcome::proceed();
        }

        let volumes = ctx.volumes();
        let name = data.volume_name.as_str();
        let waited = poll_until(
            format!("volume '{name}' to bind"),
            ctx.settings().binding_wait,
            ctx.settings().poll_interval,
            || async move {
                Ok(volumes
                    .get(name)
                    .await?
                    .is_some_and(|pv| volume::is_bound(&pv)))
            },
        )
        .await;

        match waited {
            Ok(()) => {
                debug!(volume = %name, "replacement volume bound");
                StepOutcome::proceed()
            }
            Err(e) => StepOutcome::fail(e),
        }
    }
}

#[async_trait]
impl<V, J, W> SagaStep for RestartDependentsStep<V, J, W>
where
    V: VolumeStore,
    J: JobSpawner,
    W: DependentWorkloads,
{
    type Context = MigrationContext<V, J, W>;
    type Data = MigrationData;
    type Undo = MigrationCompensation;
    type Error = OperationError;

    fn name(&self) -> &'static str {
        "restart_dependents"
    }

    async fn execute(&self, ctx: &Self::Context, data: &mut MigrationData) -> Outcome {
        let Some(claim) = data.captured.as_ref().and_then(volume::bound_claim) else {
            debug!(volume = %data.volume_name, "volume has no claim, nothing to restart");
            return StepOutcome::proceed();
        };

        let pods = match ctx.workloads().dependents_of(&claim).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(volume = %data.volume_name, claim = %claim, error = %e, "failed to list dependent pods");
                return StepOutcome::proceed();
            }
        };
        info!(volume = %data.volume_name, count = pods.len(), "restarting dependent pods");

        for pod in pods {
            match ctx
                .workloads()
                .restart(&pod, ctx.settings().dependent_grace)
                .await
            {
                Ok(()) => data.restarted.push(pod),
                Err(e) => warn!(volume = %data.volume_name, pod = %pod, error = %e, "failed to restart dependent pod"),
            }
        }

        StepOutcome::proceed()
    }
}
