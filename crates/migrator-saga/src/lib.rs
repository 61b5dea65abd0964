//! Compensating step pipeline with a cumulative soft timeout.
//!
//! A saga runs an ordered list of steps against shared per-run data. Each
//! step may register a compensation record; when the run terminates, for any
//! reason, the records are invoked in reverse order and told whether the
//! saga succeeded. Cancellation (timeout or external stop) is only observed
//! between steps.

mod audit;
mod builder;
mod error;
mod saga;
mod step;

pub use audit::{SagaAuditLog, StepRecord, StepStatus};
pub use builder::{Empty, HasSteps, SagaBuilder};
pub use error::{CompensationError, SagaError};
pub use saga::{Saga, SagaCompletion, SagaReport};
pub use step::{Compensation, SagaStep, StepOutcome};
pub use tokio_util::sync::CancellationToken;
