use async_trait::async_trait;

/// What a step reports back to the saga runner.
///
/// The three parts are independent: a step may register a compensation and
/// still fail, or succeed without registering anything.
#[derive(Debug)]
pub struct StepOutcome<K, E> {
    /// Whether the saga should continue with the next step.
    pub proceed: bool,
    /// Undo record to push onto the compensation stack.
    pub compensation: Option<K>,
    /// Failure that terminates the saga.
    pub error: Option<E>,
}

impl<K, E> StepOutcome<K, E> {
    /// Continue with the next step.
    #[must_use]
    pub fn proceed() -> Self {
        Self {
            proceed: true,
            compensation: None,
            error: None,
        }
    }

    /// Stop the saga early without marking it failed.
    #[must_use]
    pub fn halt() -> Self {
        Self {
            proceed: false,
            compensation: None,
            error: None,
        }
    }

    /// Terminate the saga with `error`.
    #[must_use]
    pub fn fail(error: E) -> Self {
        Self {
            proceed: false,
            compensation: None,
            error: Some(error),
        }
    }

    /// Attach an undo record to this outcome.
    #[must_use]
    pub fn with_compensation(mut self, compensation: K) -> Self {
        self.compensation = Some(compensation);
        self
    }
}

/// A step in a saga.
///
/// Steps share a mutable `Data` value owned by the saga instance and a
/// read-only `Context` holding injected dependencies. Undo work is not a
/// method of the step: the step hands back a [`Compensation`] record
/// describing exactly what it changed.
///
/// # Type Parameters
///
/// - `Context`: Shared dependencies (injected, not passed between steps)
/// - `Data`: Per-saga state threaded through every step
/// - `Undo`: Compensation record type registered by this step
/// - `Error`: The error type for step failures
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Shared context providing dependencies.
    type Context: Send + Sync;

    /// Per-saga state written and read by steps.
    type Data: Send;

    /// Undo record registered by this step.
    type Undo: Compensation<Self::Context, Error = Self::Error>;

    /// Error type for step failures.
    type Error: Send;

    /// Human-readable name for logging and error messages.
    fn name(&self) -> &'static str;

    /// Execute the step.
    async fn execute(
        &self,
        ctx: &Self::Context,
        data: &mut Self::Data,
    ) -> StepOutcome<Self::Undo, Self::Error>;
}

/// A reversible action registered by a step.
///
/// Every registered compensation is invoked exactly once when the saga
/// terminates, with `saga_succeeded` telling it whether to finalize or to
/// roll back.
#[async_trait]
pub trait Compensation<Ctx: Sync + ?Sized>: Send + Sync {
    /// Error type for failed compensations.
    type Error;

    /// Short tag identifying the kind of undo action.
    fn kind(&self) -> &'static str;

    /// Human-readable description of what the compensation does.
    fn description(&self) -> String {
        format!("undo {}", self.kind())
    }

    /// Run the compensation.
    ///
    /// # Errors
    ///
    /// Returns an error if the external state could not be restored.
    async fn undo(&self, ctx: &Ctx, saga_succeeded: bool) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proceed_outcome_continues_without_compensation() {
        let outcome: StepOutcome<(), String> = StepOutcome::proceed();

        assert!(outcome.proceed);
        assert!(outcome.compensation.is_none());
        assert!(outcome.error.is_none());
    }

    #[test]
    fn halt_outcome_stops_without_error() {
        let outcome: StepOutcome<(), String> = StepOutcome::halt();

        assert!(!outcome.proceed);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn failed_outcome_keeps_attached_compensation() {
        let outcome: StepOutcome<&str, String> =
            StepOutcome::fail("boom".to_string()).with_compensation("cleanup");

        assert!(!outcome.proceed);
        assert_eq!(outcome.compensation, Some("cleanup"));
        assert_eq!(outcome.error.as_deref(), Some("boom"));
    }
}
