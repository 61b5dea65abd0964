use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::Duration;

use crate::saga::{BoxedStep, PlannedStep, Saga};
use crate::step::SagaStep;

/// Marker type for a builder with no steps.
pub struct Empty;

/// Marker type for a builder with at least one step.
pub struct HasSteps;

/// Type-state builder for constructing sagas.
///
/// Every step is registered together with its declared timeout. The sum of
/// the declared timeouts becomes the saga's cumulative budget.
///
/// An empty saga (without calling `first_step()`) cannot be built:
///
/// ```compile_fail
/// use migrator_saga::SagaBuilder;
///
/// // Cannot build an empty saga - `build()` is only available after `first_step()`
/// let saga = SagaBuilder::<(), (), (), (), _>::new("empty").build();
/// ```
pub struct SagaBuilder<Ctx, Data, Undo, Err, State> {
    name: String,
    steps: Vec<PlannedStep<Ctx, Data, Undo, Err>>,
    _phantom: PhantomData<State>,
}

impl<Ctx, Data, Undo, Err> SagaBuilder<Ctx, Data, Undo, Err, Empty> {
    /// Create a new saga builder in the empty state.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            _phantom: PhantomData,
        }
    }

    /// Add the first step to the saga.
    #[must_use]
    pub fn first_step<S>(self, step: S, timeout: Duration) -> SagaBuilder<Ctx, Data, Undo, Err, HasSteps>
    where
        S: SagaStep<Context = Ctx, Data = Data, Undo = Undo, Error = Err> + 'static,
    {
        let mut steps = self.steps;
        steps.push(PlannedStep::new(Box::new(step) as BoxedStep<Ctx, Data, Undo, Err>, timeout));
        SagaBuilder {
            name: self.name,
            steps,
            _phantom: PhantomData,
        }
    }
}

impl<Ctx, Data, Undo, Err> SagaBuilder<Ctx, Data, Undo, Err, HasSteps> {
    /// Add another step to the saga.
    #[must_use]
    pub fn then<S>(mut self, step: S, timeout: Duration) -> Self
    where
        S: SagaStep<Context = Ctx, Data = Data, Undo = Undo, Error = Err> + 'static,
    {
        self.steps
            .push(PlannedStep::new(Box::new(step) as BoxedStep<Ctx, Data, Undo, Err>, timeout));
        self
    }

    /// Build the saga from the accumulated steps.
    #[must_use]
    pub fn build(self) -> Saga<Ctx, Data, Undo, Err>
    where
        Err: Debug,
    {
        Saga::from_steps(self.name, self.steps)
    }
}
