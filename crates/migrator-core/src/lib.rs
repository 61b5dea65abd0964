pub mod clock;
pub mod error;
pub mod lease;
pub mod settings;
pub mod volume;

pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "testing"))]
pub use clock::ManualClock;
pub use error::{CoreError, Result};
pub use lease::{LEASE_HOLDER_ANNOTATION, LEASE_START_ANNOTATION, Lease, LeaseClaim};
pub use settings::{MigrationSettings, StepTimeouts};
pub use volume::{NamespacedName, NodeMount, ReplacementKind, StorageKind};
