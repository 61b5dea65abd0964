use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Set to `"true"` on a volume to keep it out of migration.
pub const IGNORE_ANNOTATION: &str = "enndata.cn/hostpathpv-to-csi-ignored";

/// Per-node host directories backing a legacy volume, written by the kubelet.
pub const MOUNT_INFO_ANNOTATION: &str = "io.enndata.kubelet/alpha-pvhostpathmountinfolist";

pub const PV_PROTECTION_FINALIZER: &str = "kubernetes.io/pv-protection";

/// Volume attribute carrying the host directory on CSI replacements.
pub const HOST_PATH_ATTRIBUTE: &str = "hostPath";

const TEMPORARY_SUFFIX: &str = "-csihostpathpv-tmp";
const TEMPORARY_HASH_LEN: usize = 10;
const BOUND_PHASE: &str = "Bound";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    LegacyHostPath,
    Pluggable,
    Other,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LegacyHostPath => write!(f, "hostPath"),
            Self::Pluggable => write!(f, "csi"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Which of the two replacement objects to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementKind {
    /// Short-lived placeholder created before the legacy object is removed.
    Temporary,
    /// The object that takes over the legacy volume's name.
    Final,
}

/// A `namespace/name` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Host directories used by a legacy volume on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMount {
    pub node: String,
    pub host_paths: Vec<String>,
}

#[derive(Deserialize)]
struct RawNodeMount {
    #[serde(rename = "nodename")]
    node_name: String,
    #[serde(rename = "mountinfos", default)]
    mount_infos: Option<Vec<RawMountInfo>>,
}

#[derive(Deserialize)]
struct RawMountInfo {
    #[serde(rename = "hostpath")]
    host_path: String,
}

#[must_use]
pub fn volume_name(pv: &PersistentVolume) -> &str {
    pv.metadata.name.as_deref().unwrap_or_default()
}

#[must_use]
pub fn storage_kind(pv: &PersistentVolume) -> StorageKind {
    match pv.spec.as_ref() {
        Some(spec) if spec.host_path.is_some() => StorageKind::LegacyHostPath,
        Some(spec) if spec.csi.is_some() => StorageKind::Pluggable,
        _ => StorageKind::Other,
    }
}

#[must_use]
pub fn is_legacy(pv: &PersistentVolume) -> bool {
    storage_kind(pv) == StorageKind::LegacyHostPath
}

#[must_use]
pub fn is_bound(pv: &PersistentVolume) -> bool {
    pv.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some(BOUND_PHASE)
}

#[must_use]
pub fn is_migration_ignored(pv: &PersistentVolume) -> bool {
    pv.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(IGNORE_ANNOTATION))
        .is_some_and(|value| value == "true")
}

/// The claim a volume is bound to, when its reference is complete.
#[must_use]
pub fn bound_claim(pv: &PersistentVolume) -> Option<NamespacedName> {
    let claim = pv.spec.as_ref()?.claim_ref.as_ref()?;
    Some(NamespacedName::new(
        claim.namespace.clone()?,
        claim.name.clone()?,
    ))
}

/// Name of the placeholder volume created while `name` is migrated.
#[must_use]
pub fn temporary_volume_name(name: &str) -> String {
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    format!("{}{TEMPORARY_SUFFIX}", &digest[..TEMPORARY_HASH_LEN])
}

/// Parse the per-node mount list of a legacy volume.
///
/// A volume without the annotation has never been mounted and needs no
/// per-node work. Nodes without any host path are skipped.
///
/// # Errors
///
/// Returns an error if the annotation is present but not valid JSON.
pub fn node_mounts(pv: &PersistentVolume) -> Result<Vec<NodeMount>> {
    let Some(raw) = pv
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(MOUNT_INFO_ANNOTATION))
        .filter(|raw| !raw.trim().is_empty())
    else {
        return Ok(Vec::new());
    };

    let parsed: Vec<RawNodeMount> =
        serde_json::from_str(raw).map_err(|source| CoreError::MalformedMountInfo {
            volume: volume_name(pv).to_string(),
            source,
        })?;

    Ok(parsed
        .into_iter()
        .filter_map(|node| {
            let host_paths: Vec<String> = node
                .mount_infos
                .unwrap_or_default()
                .into_iter()
                .map(|info| info.host_path)
                .filter(|path| !path.is_empty())
                .collect();
            (!host_paths.is_empty()).then_some(NodeMount {
                node: node.node_name,
                host_paths,
            })
        })
        .collect())
}

/// Copy of a captured volume that the API server will accept on create.
#[must_use]
pub fn for_recreate(pv: &PersistentVolume) -> PersistentVolume {
    let mut copy = pv.clone();
    let meta = &mut copy.metadata;
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
    meta.generation = None;
    meta.managed_fields = None;
    copy.status = None;
    copy
}

/// Build a CSI volume standing in for `legacy` under `name`.
///
/// Both kinds mirror reclaim policy, capacity, access modes and storage
/// class, and use their own name as the CSI volume handle. The final
/// replacement also carries over labels, annotations, mount options, node
/// affinity and the claim reference (stripped of its resource version and
/// uid) so the original claim binds to it again.
///
/// # Errors
///
/// Returns an error if `legacy` is not backed by a host path.
pub fn build_replacement(
    legacy: &PersistentVolume,
    name: &str,
    driver: &str,
    kind: ReplacementKind,
) -> Result<PersistentVolume> {
    let not_host_path = || CoreError::NotHostPath(volume_name(legacy).to_string());
    let spec = legacy.spec.as_ref().ok_or_else(not_host_path)?;
    let host_path = spec.host_path.as_ref().ok_or_else(not_host_path)?;

    let csi = CSIPersistentVolumeSource {
        driver: driver.to_string(),
        volume_handle: name.to_string(),
        volume_attributes: Some(BTreeMap::from([(
            HOST_PATH_ATTRIBUTE.to_string(),
            host_path.path.clone(),
        )])),
        ..CSIPersistentVolumeSource::default()
    };

    let mut replacement = PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(PersistentVolumeSpec {
            csi: Some(csi),
            capacity: spec.capacity.clone(),
            access_modes: spec.access_modes.clone(),
            persistent_volume_reclaim_policy: spec.persistent_volume_reclaim_policy.clone(),
            storage_class_name: spec.storage_class_name.clone(),
            ..PersistentVolumeSpec::default()
        }),
        status: None,
    };

    if kind == ReplacementKind::Final {
        replacement.metadata.labels.clone_from(&legacy.metadata.labels);
        replacement
            .metadata
            .annotations
            .clone_from(&legacy.metadata.annotations);
        if let Some(new_spec) = replacement.spec.as_mut() {
            new_spec.mount_options.clone_from(&spec.mount_options);
            new_spec.node_affinity.clone_from(&spec.node_affinity);
            new_spec.volume_mode.clone_from(&spec.volume_mode);
            new_spec.claim_ref = spec.claim_ref.as_ref().map(|claim| ObjectReference {
                resource_version: None,
                uid: None,
                ..claim.clone()
            });
        }
    }

    Ok(replacement)
}
