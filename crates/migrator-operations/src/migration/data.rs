use k8s_openapi::api::core::v1::PersistentVolume;
use migrator_core::{NamespacedName, volume};

/// State threaded through the steps of one volume's migration.
#[derive(Debug, Clone, Default)]
pub struct MigrationData {
    pub volume_name: String,
    /// Whether the legacy volume was bound when the migration was queued.
    pub wait_for_binding: bool,
    pub jobs: Vec<NamespacedName>,
    pub temporary_name: Option<String>,
    /// The legacy object as it was right before deletion.
    pub captured: Option<PersistentVolume>,
    pub restarted: Vec<NamespacedName>,
}

impl MigrationData {
    #[must_use]
    pub fn new(volume_name: impl Into<String>, wait_for_binding: bool) -> Self {
        Self {
            volume_name: volume_name.into(),
            wait_for_binding,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_volume(pv: &PersistentVolume) -> Self {
        Self::new(volume::volume_name(pv), volume::is_bound(pv))
    }
}
