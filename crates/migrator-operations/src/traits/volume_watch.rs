use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::PersistentVolume;

use crate::Result;

/// Source of volume add/update notifications.
pub trait VolumeWatch: Send + Sync {
    /// Stream of volumes as they are added or changed. The stream keeps
    /// going across transient errors, which are yielded as items.
    fn watch(&self) -> BoxStream<'static, Result<PersistentVolume>>;
}
