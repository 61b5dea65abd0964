use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, HostPathVolumeSource, ObjectReference, PersistentVolume,
    PersistentVolumeSpec, PersistentVolumeStatus,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::ErrorResponse;
use migrator_core::{NamespacedName, volume};
use tokio::sync::mpsc;

use crate::traits::{
    DependentWorkloads, JobSpawner, JobStatus, TransformJob, VolumeStore, VolumeWatch,
};
use crate::{OperationError, Result};

/// Cluster operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterAction {
    GetVolume,
    CreateVolume,
    UpdateVolume,
    DeleteVolume,
    SpawnJob,
    ReapJobs,
    ListDependents,
    RestartPod,
}

/// What newly spawned transform jobs report until changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobGate {
    Succeed,
    Hold,
    Fail,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn rejected(action: ClusterAction, target: &str) -> OperationError {
    OperationError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected {action:?} failure for '{target}'"),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

fn conflict(name: &str) -> OperationError {
    OperationError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("persistentvolumes \"{name}\" already exists"),
        reason: "AlreadyExists".to_string(),
        code: 409,
    }))
}

/// In-memory stand-in for the cluster implementing every collaborator
/// trait.
///
/// Volumes created with a claim reference are bound immediately unless
/// auto-binding is turned off. Every mutating call is appended to an
/// action log such as `create pv-data` or `restart apps/web-0`.
pub struct InMemoryCluster {
    volumes: Mutex<BTreeMap<String, PersistentVolume>>,
    jobs: Mutex<BTreeMap<NamespacedName, (TransformJob, JobStatus)>>,
    pods: Mutex<BTreeMap<NamespacedName, NamespacedName>>,
    failures: Mutex<HashMap<(ClusterAction, String), u32>>,
    actions: Mutex<Vec<String>>,
    job_gate: Mutex<JobGate>,
    auto_bind: AtomicBool,
    next_id: AtomicU64,
    feed: Mutex<WatchFeed>,
}

/// Open watch streams, plus notifications sent while none was open.
#[derive(Default)]
struct WatchFeed {
    watchers: Vec<mpsc::UnboundedSender<Result<PersistentVolume>>>,
    backlog: Vec<Result<PersistentVolume>>,
    closed: bool,
}

impl WatchFeed {
    fn deliver(&mut self, item: Result<PersistentVolume>) {
        self.watchers.retain(|watcher| !watcher.is_closed());
        match self.watchers.last() {
            Some(watcher) => {
                watcher.send(item).ok();
            }
            None => self.backlog.push(item),
        }
    }
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self {
            volumes: Mutex::new(BTreeMap::new()),
            jobs: Mutex::new(BTreeMap::new()),
            pods: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(HashMap::new()),
            actions: Mutex::new(Vec::new()),
            job_gate: Mutex::new(JobGate::Succeed),
            auto_bind: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            feed: Mutex::new(WatchFeed::default()),
        }
    }

    #[must_use]
    pub fn with_volume(self, pv: PersistentVolume) -> Self {
        self.insert_volume(pv);
        self
    }

    /// Store `pv` directly without logging an action.
    pub fn insert_volume(&self, pv: PersistentVolume) {
        let name = volume::volume_name(&pv).to_string();
        lock(&self.volumes).insert(name, pv);
    }

    /// Register a pod in `pod.namespace` mounting claim `claim_name`.
    pub fn add_pod(&self, pod: NamespacedName, claim_name: &str) {
        let claim = NamespacedName::new(pod.namespace.clone(), claim_name);
        lock(&self.pods).insert(pod, claim);
    }

    /// Make every `action` on `target` fail.
    pub fn fail_on(&self, action: ClusterAction, target: &str) {
        self.fail_times(action, target, u32::MAX);
    }

    /// Make the next `times` calls of `action` on `target` fail.
    pub fn fail_times(&self, action: ClusterAction, target: &str, times: u32) {
        lock(&self.failures).insert((action, target.to_string()), times);
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    pub fn set_job_gate(&self, gate: JobGate) {
        *lock(&self.job_gate) = gate;
    }

    /// Let every held job finish successfully.
    pub fn finish_jobs(&self) {
        for (_, status) in lock(&self.jobs).values_mut() {
            if *status == JobStatus::Running {
                *status = JobStatus::Succeeded;
            }
        }
    }

    pub fn set_auto_bind(&self, enabled: bool) {
        self.auto_bind.store(enabled, Ordering::SeqCst);
    }

    /// Deliver a change notification for `pv` to the newest open watch
    /// stream, or to the next one opened.
    pub fn notify(&self, pv: &PersistentVolume) {
        lock(&self.feed).deliver(Ok(pv.clone()));
    }

    pub fn notify_error(&self, error: OperationError) {
        lock(&self.feed).deliver(Err(error));
    }

    /// End every open watch stream; later watches end immediately.
    pub fn close_watch(&self) {
        let mut feed = lock(&self.feed);
        feed.closed = true;
        feed.watchers.clear();
    }

    #[must_use]
    pub fn volume(&self, name: &str) -> Option<PersistentVolume> {
        lock(&self.volumes).get(name).cloned()
    }

    #[must_use]
    pub fn volume_names(&self) -> Vec<String> {
        lock(&self.volumes).keys().cloned().collect()
    }

    #[must_use]
    pub fn live_jobs(&self) -> Vec<TransformJob> {
        lock(&self.jobs).values().map(|(job, _)| job.clone()).collect()
    }

    #[must_use]
    pub fn pods(&self) -> Vec<NamespacedName> {
        lock(&self.pods).keys().cloned().collect()
    }

    #[must_use]
    pub fn actions(&self) -> Vec<String> {
        lock(&self.actions).clone()
    }

    /// Number of logged actions starting with `prefix`.
    #[must_use]
    pub fn count_actions(&self, prefix: &str) -> usize {
        lock(&self.actions)
            .iter()
            .filter(|action| action.starts_with(prefix))
            .count()
    }

    fn check(&self, action: ClusterAction, target: &str) -> Result<()> {
        let mut failures = lock(&self.failures);
        let Some(remaining) = failures.get_mut(&(action, target.to_string())) else {
            return Ok(());
        };
        if *remaining == 0 {
            return Ok(());
        }
        if *remaining != u32::MAX {
            *remaining -= 1;
        }
        Err(rejected(action, target))
    }

    fn record(&self, action: String) {
        lock(&self.actions).push(action);
    }

    fn stamp(&self, pv: &mut PersistentVolume) {
        let version = self.next_id.fetch_add(1, Ordering::SeqCst);
        pv.metadata.resource_version = Some(version.to_string());
    }
}

#[async_trait]
impl VolumeStore for InMemoryCluster {
    async fn get(&self, name: &str) -> Result<Option<PersistentVolume>> {
        self.check(ClusterAction::GetVolume, name)?;
        Ok(self.volume(name))
    }

    async fn create(&self, pv: &PersistentVolume) -> Result<PersistentVolume> {
        let name = volume::volume_name(pv).to_string();
        self.check(ClusterAction::CreateVolume, &name)?;

        let mut stored = pv.clone();
        self.stamp(&mut stored);
        let has_claim = stored
            .spec
            .as_ref()
            .is_some_and(|spec| spec.claim_ref.is_some());
        if has_claim && self.auto_bind.load(Ordering::SeqCst) {
            stored.status = Some(PersistentVolumeStatus {
                phase: Some("Bound".to_string()),
                ..PersistentVolumeStatus::default()
            });
        }

        {
            let mut volumes = lock(&self.volumes);
            if volumes.contains_key(&name) {
                return Err(conflict(&name));
            }
            volumes.insert(name.clone(), stored.clone());
        }
        self.record(format!("create {name}"));
        Ok(stored)
    }

    async fn update(&self, pv: &PersistentVolume) -> Result<PersistentVolume> {
        let name = volume::volume_name(pv).to_string();
        self.check(ClusterAction::UpdateVolume, &name)?;

        let mut stored = pv.clone();
        self.stamp(&mut stored);
        {
            let mut volumes = lock(&self.volumes);
            let Some(slot) = volumes.get_mut(&name) else {
                return Err(OperationError::VolumeNotFound(name));
            };
            *slot = stored.clone();
        }
        self.record(format!("update {name}"));
        Ok(stored)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.check(ClusterAction::DeleteVolume, name)?;
        if lock(&self.volumes).remove(name).is_some() {
            self.record(format!("delete {name}"));
        }
        Ok(())
    }
}

#[async_trait]
impl JobSpawner for InMemoryCluster {
    async fn spawn(&self, job: &TransformJob) -> Result<NamespacedName> {
        self.check(ClusterAction::SpawnJob, &job.node)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let name = NamespacedName::new("kube-system", format!("{}-quota-{id}", job.volume));
        let status = match *lock(&self.job_gate) {
            JobGate::Succeed => JobStatus::Succeeded,
            JobGate::Hold => JobStatus::Running,
            JobGate::Fail => JobStatus::Failed,
        };
        lock(&self.jobs).insert(name.clone(), (job.clone(), status));
        self.record(format!("spawn {}", job.node));
        Ok(name)
    }

    async fn status(&self, job: &NamespacedName) -> Result<JobStatus> {
        Ok(lock(&self.jobs)
            .get(job)
            .map_or(JobStatus::Missing, |(_, status)| *status))
    }

    async fn reap(&self, jobs: &[NamespacedName]) -> Result<()> {
        let target = jobs
            .first()
            .map(|job| job.namespace.clone())
            .unwrap_or_default();
        self.check(ClusterAction::ReapJobs, &target)?;

        let mut live = lock(&self.jobs);
        for job in jobs {
            live.remove(job);
        }
        drop(live);
        self.record(format!("reap {}", jobs.len()));
        Ok(())
    }
}

#[async_trait]
impl DependentWorkloads for InMemoryCluster {
    async fn dependents_of(&self, claim: &NamespacedName) -> Result<Vec<NamespacedName>> {
        self.check(ClusterAction::ListDependents, &claim.to_string())?;
        Ok(lock(&self.pods)
            .iter()
            .filter(|(_, mounted)| *mounted == claim)
            .map(|(pod, _)| pod.clone())
            .collect())
    }

    async fn restart(&self, pod: &NamespacedName, _grace: Duration) -> Result<()> {
        self.check(ClusterAction::RestartPod, &pod.to_string())?;
        lock(&self.pods).remove(pod);
        self.record(format!("restart {pod}"));
        Ok(())
    }
}

impl VolumeWatch for InMemoryCluster {
    fn watch(&self) -> BoxStream<'static, Result<PersistentVolume>> {
        let mut feed = lock(&self.feed);
        if feed.closed {
            return stream::empty().boxed();
        }
        let (watcher, rx) = mpsc::unbounded_channel();
        for item in feed.backlog.drain(..) {
            watcher.send(item).ok();
        }
        feed.watchers.push(watcher);
        drop(feed);
        stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }
}

/// Claim every fixture volume is bound to.
pub const FIXTURE_CLAIM: (&str, &str) = ("apps", "data");

/// A bound legacy volume mounted on `nodes`, each with one host directory.
#[must_use]
pub fn legacy_volume(name: &str, nodes: &[&str]) -> PersistentVolume {
    let mounts: Vec<serde_json::Value> = nodes
        .iter()
        .map(|node| {
            serde_json::json!({
                "nodename": node,
                "mountinfos": [{ "hostpath": format!("/xfs/{node}/{name}") }],
            })
        })
        .collect();
    let mut annotations = BTreeMap::new();
    if !nodes.is_empty() {
        annotations.insert(
            volume::MOUNT_INFO_ANNOTATION.to_string(),
            serde_json::Value::Array(mounts).to_string(),
        );
    }

    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            resource_version: Some("1".to_string()),
            annotations: Some(annotations),
            finalizers: Some(vec![volume::PV_PROTECTION_FINALIZER.to_string()]),
            ..ObjectMeta::default()
        },
        spec: Some(PersistentVolumeSpec {
            host_path: Some(HostPathVolumeSource {
                path: format!("/xfs/{name}"),
                type_: None,
            }),
            capacity: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity("10Gi".to_string()),
            )])),
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            persistent_volume_reclaim_policy: Some("Retain".to_string()),
            claim_ref: Some(ObjectReference {
                kind: Some("PersistentVolumeClaim".to_string()),
                namespace: Some(FIXTURE_CLAIM.0.to_string()),
                name: Some(FIXTURE_CLAIM.1.to_string()),
                uid: Some("claim-uid".to_string()),
                resource_version: Some("3".to_string()),
                ..ObjectReference::default()
            }),
            ..PersistentVolumeSpec::default()
        }),
        status: Some(PersistentVolumeStatus {
            phase: Some("Bound".to_string()),
            ..PersistentVolumeStatus::default()
        }),
    }
}

/// A volume that is already CSI backed.
#[must_use]
pub fn csi_volume(name: &str) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(PersistentVolumeSpec {
            csi: Some(CSIPersistentVolumeSource {
                driver: "xfshostpathplugin".to_string(),
                volume_handle: name.to_string(),
                ..CSIPersistentVolumeSource::default()
            }),
            ..PersistentVolumeSpec::default()
        }),
        status: None,
    }
}
