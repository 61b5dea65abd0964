use std::fmt::Debug;
use std::time::Duration;

use thiserror::Error;

/// Error from a failed compensation operation.
#[derive(Debug, thiserror::Error)]
#[error("compensation '{kind}' registered by step '{step}' failed: {description}")]
pub struct CompensationError<E> {
    /// Name of the step that registered the compensation.
    pub step: String,
    /// Kind tag of the compensation record.
    pub kind: String,
    /// Description of what the compensation was trying to do.
    pub description: String,
    /// The underlying error.
    #[source]
    pub error: E,
}

/// Reason a saga terminated unsuccessfully.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SagaError<E: Debug> {
    /// A step returned an error.
    #[error("step '{step}' failed")]
    StepFailed {
        /// Name of the step that failed.
        step: String,
        /// The error that caused the step to fail.
        #[source]
        source: E,
    },

    /// The cumulative timeout elapsed before `step` could start.
    #[error("timed out after {budget:?} before step '{step}'")]
    TimedOut {
        /// Name of the step that was not started.
        step: String,
        /// Sum of the declared per-step timeouts.
        budget: Duration,
    },

    /// The external stop signal fired before `step` could start.
    #[error("stopped before step '{step}'")]
    Stopped {
        /// Name of the step that was not started.
        step: String,
    },
}

impl<E: Debug> SagaError<E> {
    /// Name of the step at which the saga terminated.
    #[must_use]
    pub fn step(&self) -> &str {
        match self {
            Self::StepFailed { step, .. } | Self::TimedOut { step, .. } | Self::Stopped { step } => {
                step
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn timed_out_error_mentions_budget_and_step() {
        let err: SagaError<Boom> = SagaError::TimedOut {
            step: "publish".to_string(),
            budget: Duration::from_secs(9),
        };

        let msg = err.to_string();

        assert!(msg.contains("9s"));
        assert!(msg.contains("publish"));
    }

    #[test]
    fn step_failed_exposes_source() {
        let err: SagaError<Boom> = SagaError::StepFailed {
            step: "check".to_string(),
            source: Boom,
        };

        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.step(), "check");
    }

    #[test]
    fn compensation_error_names_step_and_kind() {
        let err = CompensationError {
            step: "retire".to_string(),
            kind: "restore".to_string(),
            description: "re-create the volume".to_string(),
            error: Boom,
        };

        let msg = err.to_string();

        assert!(msg.contains("retire"));
        assert!(msg.contains("restore"));
    }
}
