use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, PersistentVolume, Pod, PodSpec, SecurityContext, Toleration,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::{WatchStreamExt, watcher};
use kube::Client;
use migrator_core::volume::{self, PV_PROTECTION_FINALIZER};
use migrator_core::{MigrationSettings, NamespacedName};
use serde_json::json;
use tracing::{debug, warn};

use crate::traits::{
    DependentWorkloads, JobSpawner, JobStatus, TransformJob, VolumeStore, VolumeWatch,
};
use crate::wait::poll_until;
use crate::{OperationError, Result};

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY: &str = "hostpath-migrator";
const VOLUME_ANNOTATION: &str = "hostpath-migrator/volume";
const JOB_CONTAINER: &str = "change-quota-type";
const JOB_MOUNT_ROOT: &str = "/mnt/hostpath";

/// Cluster settings used by [`KubeCluster`].
#[derive(Debug, Clone)]
pub struct KubeClusterSettings {
    pub job_namespace: String,
    pub poll_interval: Duration,
    pub delete_wait: Duration,
}

impl From<&MigrationSettings> for KubeClusterSettings {
    fn from(settings: &MigrationSettings) -> Self {
        Self {
            job_namespace: settings.job_namespace.clone(),
            poll_interval: settings.poll_interval,
            delete_wait: settings.delete_wait,
        }
    }
}

/// Collaborators backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    settings: KubeClusterSettings,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client, settings: KubeClusterSettings) -> Self {
        Self { client, settings }
    }

    fn volumes(&self) -> Api<PersistentVolume> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn strip_protection(&self, pv: &PersistentVolume) -> Result<()> {
        let Some(finalizers) = pv.metadata.finalizers.as_ref() else {
            return Ok(());
        };
        if !finalizers.iter().any(|f| f == PV_PROTECTION_FINALIZER) {
            return Ok(());
        }
        let remaining: Vec<&String> = finalizers
            .iter()
            .filter(|f| *f != PV_PROTECTION_FINALIZER)
            .collect();
        let patch = json!({ "metadata": { "finalizers": remaining } });
        self.volumes()
            .patch(
                volume::volume_name(pv),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        debug!(volume = %volume::volume_name(pv), "removed pv-protection finalizer");
        Ok(())
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

fn transform_pod(job: &TransformJob, namespace: &str) -> Pod {
    let mut volumes = Vec::with_capacity(job.host_paths.len());
    let mut mounts = Vec::with_capacity(job.host_paths.len());
    let mut args = Vec::with_capacity(job.host_paths.len());
    for (index, host_path) in job.host_paths.iter().enumerate() {
        let name = format!("quota-{index}");
        let mount_path = format!("{JOB_MOUNT_ROOT}/{index}");
        volumes.push(Volume {
            name: name.clone(),
            host_path: Some(HostPathVolumeSource {
                path: host_path.clone(),
                type_: Some("Directory".to_string()),
            }),
            ..Volume::default()
        });
        mounts.push(VolumeMount {
            name,
            mount_path: mount_path.clone(),
            ..VolumeMount::default()
        });
        args.push(mount_path);
    }

    Pod {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-quota-", job.volume)),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGED_BY.to_string(),
            )])),
            annotations: Some(BTreeMap::from([(
                VOLUME_ANNOTATION.to_string(),
                job.volume.clone(),
            )])),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            node_name: Some(job.node.clone()),
            restart_policy: Some("Never".to_string()),
            tolerations: Some(vec![Toleration {
                operator: Some("Exists".to_string()),
                ..Toleration::default()
            }]),
            containers: vec![Container {
                name: JOB_CONTAINER.to_string(),
                image: Some(job.image.clone()),
                command: Some(job.command.clone()),
                args: Some(args),
                volume_mounts: Some(mounts),
                security_context: Some(SecurityContext {
                    privileged: Some(true),
                    ..SecurityContext::default()
                }),
                ..Container::default()
            }],
            volumes: Some(volumes),
            ..PodSpec::default()
        }),
        status: None,
    }
}

fn mounts_claim(pod: &Pod, claim_name: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .is_some_and(|volumes| {
            volumes.iter().any(|v| {
                v.persistent_volume_claim
                    .as_ref()
                    .is_some_and(|pvc| pvc.claim_name == claim_name)
            })
        })
}

#[async_trait]
impl VolumeStore for KubeCluster {
    async fn get(&self, name: &str) -> Result<Option<PersistentVolume>> {
        Ok(self.volumes().get_opt(name).await?)
    }

    async fn create(&self, pv: &PersistentVolume) -> Result<PersistentVolume> {
        Ok(self.volumes().create(&PostParams::default(), pv).await?)
    }

    async fn update(&self, pv: &PersistentVolume) -> Result<PersistentVolume> {
        Ok(self
            .volumes()
            .replace(volume::volume_name(pv), &PostParams::default(), pv)
            .await?)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let api = self.volumes();
        let Some(pv) = api.get_opt(name).await? else {
            return Ok(());
        };
        self.strip_protection(&pv).await?;

        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(e) if is_not_found(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        poll_until(
            format!("volume '{name}' to be deleted"),
            self.settings.delete_wait,
            self.settings.poll_interval,
            || {
                let api = api.clone();
                async move { Ok(api.get_opt(name).await?.is_none()) }
            },
        )
        .await
    }
}

#[async_trait]
impl JobSpawner for KubeCluster {
    async fn spawn(&self, job: &TransformJob) -> Result<NamespacedName> {
        let namespace = &self.settings.job_namespace;
        let created = self
            .pods(namespace)
            .create(&PostParams::default(), &transform_pod(job, namespace))
            .await?;
        Ok(NamespacedName::new(
            namespace.clone(),
            created.metadata.name.unwrap_or_default(),
        ))
    }

    async fn status(&self, job: &NamespacedName) -> Result<JobStatus> {
        let pod = self.pods(&job.namespace).get_opt(&job.name).await?;
        let phase = pod
            .as_ref()
            .and_then(|pod| pod.status.as_ref())
            .and_then(|status| status.phase.as_deref());
        Ok(match (pod.is_some(), phase) {
            (false, _) => JobStatus::Missing,
            (true, Some("Succeeded")) => JobStatus::Succeeded,
            (true, Some("Failed")) => JobStatus::Failed,
            (true, _) => JobStatus::Running,
        })
    }

    async fn reap(&self, jobs: &[NamespacedName]) -> Result<()> {
        for job in jobs {
            match self
                .pods(&job.namespace)
                .delete(&job.name, &DeleteParams::default())
                .await
            {
                Ok(_) => debug!(job = %job, "deleting transform job"),
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }

        poll_until(
            format!("{} transform job pod(s) to be deleted", jobs.len()),
            self.settings.delete_wait,
            self.settings.poll_interval,
            || async move {
                for job in jobs {
                    if self.pods(&job.namespace).get_opt(&job.name).await?.is_some() {
                        return Ok(false);
                    }
                }
                Ok(true)
            },
        )
        .await
    }
}

#[async_trait]
impl DependentWorkloads for KubeCluster {
    async fn dependents_of(&self, claim: &NamespacedName) -> Result<Vec<NamespacedName>> {
        let pods = self.pods(&claim.namespace).list(&ListParams::default()).await?;
        Ok(pods
            .items
            .iter()
            .filter(|pod| mounts_claim(pod, &claim.name))
            .filter_map(|pod| {
                Some(NamespacedName::new(
                    claim.namespace.clone(),
                    pod.metadata.name.clone()?,
                ))
            })
            .collect())
    }

    async fn restart(&self, pod: &NamespacedName, grace: Duration) -> Result<()> {
        let params = DeleteParams {
            grace_period_seconds: Some(u32::try_from(grace.as_secs()).unwrap_or(u32::MAX)),
            ..DeleteParams::default()
        };
        match self.pods(&pod.namespace).delete(&pod.name, &params).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                warn!(pod = %pod, "dependent pod already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl VolumeWatch for KubeCluster {
    fn watch(&self) -> BoxStream<'static, Result<PersistentVolume>> {
        watcher(self.volumes(), watcher::Config::default())
            .default_backoff()
            .applied_objects()
            .map_err(OperationError::from)
            .boxed()
    }
}
