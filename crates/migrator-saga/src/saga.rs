use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::{SagaAuditLog, StepStatus};
use crate::error::{CompensationError, SagaError};
use crate::step::{Compensation, SagaStep};

pub(crate) type BoxedStep<Ctx, Data, Undo, Err> =
    Box<dyn SagaStep<Context = Ctx, Data = Data, Undo = Undo, Error = Err>>;

pub(crate) struct PlannedStep<Ctx, Data, Undo, Err> {
    step: BoxedStep<Ctx, Data, Undo, Err>,
    timeout: Duration,
}

impl<Ctx, Data, Undo, Err> PlannedStep<Ctx, Data, Undo, Err> {
    pub(crate) fn new(step: BoxedStep<Ctx, Data, Undo, Err>, timeout: Duration) -> Self {
        Self { step, timeout }
    }
}

/// How a saga that did not fail came to an end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaCompletion {
    /// Every step ran and asked to proceed.
    Completed,
    /// `step` asked the saga to stop early without an error.
    Halted {
        /// Name of the step that halted the saga.
        step: String,
    },
}

/// Everything known about one finished saga run.
#[derive(Debug)]
pub struct SagaReport<E: Debug> {
    /// Name of the saga.
    pub saga: String,
    /// The saga's own outcome. Compensation failures never change it.
    pub result: Result<SagaCompletion, SagaError<E>>,
    /// Failures collected while unwinding the compensation stack.
    pub compensation_errors: Vec<CompensationError<E>>,
    /// Step-by-step record of the run.
    pub audit: SagaAuditLog,
}

impl<E: Debug> SagaReport<E> {
    /// Whether the saga finished without an error.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// A compiled saga ready for execution.
///
/// Steps run strictly in declaration order. Before each step the runner
/// checks the cumulative timeout (the sum of all declared step timeouts,
/// armed when the run starts) and the external stop token. A step that is
/// already running is never interrupted. When the run terminates for any
/// reason, every registered compensation is invoked once in reverse order.
pub struct Saga<Ctx, Data, Undo, Err> {
    name: String,
    steps: Vec<PlannedStep<Ctx, Data, Undo, Err>>,
}

impl<Ctx, Data, Undo, Err> Saga<Ctx, Data, Undo, Err> {
    pub(crate) fn from_steps(name: String, steps: Vec<PlannedStep<Ctx, Data, Undo, Err>>) -> Self {
        Self { name, steps }
    }

    /// Name given to the saga at build time.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sum of the declared per-step timeouts.
    #[must_use]
    pub fn total_timeout(&self) -> Duration {
        self.steps.iter().map(|planned| planned.timeout).sum()
    }
}

impl<Ctx, Data, Undo, Err> Saga<Ctx, Data, Undo, Err>
where
    Ctx: Send + Sync,
    Data: Send,
    Undo: Compensation<Ctx, Error = Err>,
    Err: Debug + Send,
{
    /// Names of the steps in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|planned| planned.step.name()).collect()
    }

    /// Execute the saga to termination.
    ///
    /// The returned report always carries the saga's own outcome; errors
    /// raised by compensations are listed separately.
    pub async fn run(&self, ctx: &Ctx, data: &mut Data, stop: &CancellationToken) -> SagaReport<Err> {
        let budget = self.total_timeout();
        let expired = CancellationToken::new();
        let timer = tokio::spawn({
            let expired = expired.clone();
            async move {
                tokio::time::sleep(budget).await;
                expired.cancel();
            }
        });

        info!(saga = %self.name, ?budget, "saga started");

        let mut audit = SagaAuditLog::new();
        let mut stack: Vec<(&'static str, Undo)> = Vec::with_capacity(self.steps.len());
        let mut result = Ok(SagaCompletion::Completed);

        for (index, planned) in self.steps.iter().enumerate() {
            let step_name = planned.step.name();

            if expired.is_cancelled() {
                result = Err(SagaError::TimedOut {
                    step: step_name.to_string(),
                    budget,
                });
                break;
            }
            if stop.is_cancelled() {
                result = Err(SagaError::Stopped {
                    step: step_name.to_string(),
                });
                break;
            }

            debug!(saga = %self.name, step = step_name, index, "step started");
            audit.begin(step_name);

            let outcome = planned.step.execute(ctx, data).await;
            let description = outcome.compensation.as_ref().map(|undo| undo.description());
            if let Some(compensation) = outcome.compensation {
                stack.push((step_name, compensation));
            }

            if let Some(error) = outcome.error {
                warn!(saga = %self.name, step = step_name, ?error, "step failed");
                audit.finish(StepStatus::Failed, description);
                result = Err(SagaError::StepFailed {
                    step: step_name.to_string(),
                    source: error,
                });
                break;
            }

            if !outcome.proceed {
                info!(saga = %self.name, step = step_name, "step halted the saga");
                audit.finish(StepStatus::Halted, description);
                result = Ok(SagaCompletion::Halted {
                    step: step_name.to_string(),
                });
                break;
            }

            debug!(saga = %self.name, step = step_name, "step succeeded");
            audit.finish(StepStatus::Executed, description);
        }

        timer.abort();

        let succeeded = result.is_ok();
        let compensation_errors = self.unwind(ctx, stack, succeeded, &mut audit).await;

        info!(
            saga = %self.name,
            succeeded,
            compensation_failures = compensation_errors.len(),
            "saga finished"
        );

        SagaReport {
            saga: self.name.clone(),
            result,
            compensation_errors,
            audit,
        }
    }

    async fn unwind(
        &self,
        ctx: &Ctx,
        stack: Vec<(&'static str, Undo)>,
        succeeded: bool,
        audit: &mut SagaAuditLog,
    ) -> Vec<CompensationError<Err>> {
        let mut compensation_errors = Vec::new();
        let done_status = if succeeded {
            StepStatus::Finalized
        } else {
            StepStatus::Compensated
        };

        for (step_name, compensation) in stack.into_iter().rev() {
            debug!(
                saga = %self.name,
                step = step_name,
                kind = compensation.kind(),
                succeeded,
                "running compensation"
            );
            match compensation.undo(ctx, succeeded).await {
                Ok(()) => audit.settle(step_name, done_status),
                Err(error) => {
                    warn!(
                        saga = %self.name,
                        step = step_name,
                        kind = compensation.kind(),
                        ?error,
                        "compensation failed"
                    );
                    audit.settle(step_name, StepStatus::CompensationFailed);
                    compensation_errors.push(CompensationError {
                        step: step_name.to_string(),
                        kind: compensation.kind().to_string(),
                        description: compensation.description(),
                        error,
                    });
                }
            }
        }

        compensation_errors
    }
}

impl<Ctx, Data, Undo, Err> Saga<Ctx, Data, Undo, Err>
where
    Ctx: Send + Sync + 'static,
    Data: Send + 'static,
    Undo: Compensation<Ctx, Error = Err> + 'static,
    Err: Debug + Send + 'static,
{
    /// Run the saga on its own task.
    ///
    /// The report is delivered exactly once on the returned channel.
    pub fn spawn(
        self,
        ctx: Arc<Ctx>,
        mut data: Data,
        stop: CancellationToken,
    ) -> oneshot::Receiver<SagaReport<Err>> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let report = self.run(&ctx, &mut data, &stop).await;
            if tx.send(report).is_err() {
                debug!(saga = %self.name, "saga result receiver dropped");
            }
        });
        rx
    }
}
