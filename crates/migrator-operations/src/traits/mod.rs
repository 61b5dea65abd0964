mod dependent_workloads;
mod job_spawner;
mod volume_store;
mod volume_watch;

pub use dependent_workloads::DependentWorkloads;
pub use job_spawner::{JobSpawner, JobStatus, TransformJob};
pub use volume_store::VolumeStore;
pub use volume_watch::VolumeWatch;
