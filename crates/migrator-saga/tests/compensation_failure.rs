//! Integration tests for compensation failure scenarios.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use migrator_saga::{
    CancellationToken, Compensation, SagaBuilder, SagaError, SagaStep, StepOutcome, StepStatus,
};

#[derive(Default)]
struct TestContext {
    compensation_log: Mutex<Vec<String>>,
}

impl TestContext {
    fn push(&self, entry: String) {
        self.compensation_log.lock().expect("lock poisoned").push(entry);
    }

    fn log(&self) -> Vec<String> {
        self.compensation_log.lock().expect("lock poisoned").clone()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct TestError(String);

enum Undo {
    Succeeds { step: &'static str },
    Fails { step: &'static str, message: &'static str },
    Described,
}

#[async_trait]
impl Compensation<TestContext> for Undo {
    type Error = TestError;

    fn kind(&self) -> &'static str {
        match self {
            Self::Succeeds { .. } => "succeeds",
            Self::Fails { .. } => "fails",
            Self::Described => "described",
        }
    }

    fn description(&self) -> String {
        match self {
            Self::Described => "rollback custom operation".to_string(),
            _ => format!("undo {}", self.kind()),
        }
    }

    async fn undo(&self, ctx: &TestContext, _saga_succeeded: bool) -> Result<(), TestError> {
        match self {
            Self::Succeeds { step } => {
                ctx.push(format!("compensated {step}"));
                Ok(())
            }
            Self::Fails { step, message } => {
                ctx.push(format!("failed to compensate {step}"));
                Err(TestError((*message).to_string()))
            }
            Self::Described => Err(TestError("compensation failed".to_string())),
        }
    }
}

struct RegisteringStep {
    name: &'static str,
    undo: fn(&'static str) -> Undo,
}

#[async_trait]
impl SagaStep for RegisteringStep {
    type Context = TestContext;
    type Data = ();
    type Undo = Undo;
    type Error = TestError;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(&self, _ctx: &TestContext, _data: &mut ()) -> StepOutcome<Undo, TestError> {
        StepOutcome::proceed().with_compensation((self.undo)(self.name))
    }
}

struct TriggerFailureStep;

#[async_trait]
impl SagaStep for TriggerFailureStep {
    type Context = TestContext;
    type Data = ();
    type Undo = Undo;
    type Error = TestError;

    fn name(&self) -> &'static str {
        "trigger"
    }

    async fn execute(&self, _ctx: &TestContext, _data: &mut ()) -> StepOutcome<Undo, TestError> {
        StepOutcome::fail(TestError("triggered failure".to_string()))
    }
}

fn succeeding(name: &'static str) -> RegisteringStep {
    RegisteringStep {
        name,
        undo: |step| Undo::Succeeds { step },
    }
}

fn failing_undo(name: &'static str) -> RegisteringStep {
    RegisteringStep {
        name,
        undo: |step| Undo::Fails {
            step,
            message: "undo broke",
        },
    }
}

const STEP_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::test]
async fn compensation_failure_still_runs_other_compensations() {
    let ctx = TestContext::default();
    let saga = SagaBuilder::new("partial")
        .first_step(succeeding("step_a"), STEP_TIMEOUT)
        .then(failing_undo("step_b"), STEP_TIMEOUT)
        .then(succeeding("step_c"), STEP_TIMEOUT)
        .then(TriggerFailureStep, STEP_TIMEOUT)
        .build();

    let report = saga.run(&ctx, &mut (), &CancellationToken::new()).await;

    assert_eq!(
        ctx.log(),
        vec![
            "compensated step_c",
            "failed to compensate step_b",
            "compensated step_a",
        ]
    );
    assert_eq!(report.compensation_errors.len(), 1);
    assert_eq!(report.compensation_errors[0].step, "step_b");
    assert_eq!(report.compensation_errors[0].error.to_string(), "undo broke");
}

#[tokio::test]
async fn compensation_failures_do_not_replace_the_step_error() {
    let ctx = TestContext::default();
    let saga = SagaBuilder::new("step_error_wins")
        .first_step(failing_undo("step_a"), STEP_TIMEOUT)
        .then(TriggerFailureStep, STEP_TIMEOUT)
        .build();

    let report = saga.run(&ctx, &mut (), &CancellationToken::new()).await;

    match report.result {
        Err(SagaError::StepFailed { step, source }) => {
            assert_eq!(step, "trigger");
            assert_eq!(source.to_string(), "triggered failure");
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }
    assert_eq!(report.compensation_errors.len(), 1);
}

#[tokio::test]
async fn failing_finalizer_leaves_successful_saga_successful() {
    let ctx = TestContext::default();
    let saga = SagaBuilder::new("finalize")
        .first_step(failing_undo("step_a"), STEP_TIMEOUT)
        .then(succeeding("step_b"), STEP_TIMEOUT)
        .build();

    let report = saga.run(&ctx, &mut (), &CancellationToken::new()).await;

    assert!(report.succeeded());
    assert_eq!(report.compensation_errors.len(), 1);
    assert_eq!(report.audit.records()[0].status, StepStatus::CompensationFailed);
    assert_eq!(report.audit.records()[1].status, StepStatus::Finalized);
}

#[tokio::test]
async fn multiple_compensation_failures_are_all_reported() {
    let ctx = TestContext::default();
    let saga = SagaBuilder::new("many")
        .first_step(failing_undo("fail_comp_a"), STEP_TIMEOUT)
        .then(succeeding("success_b"), STEP_TIMEOUT)
        .then(failing_undo("fail_comp_c"), STEP_TIMEOUT)
        .then(succeeding("success_d"), STEP_TIMEOUT)
        .then(failing_undo("fail_comp_e"), STEP_TIMEOUT)
        .then(TriggerFailureStep, STEP_TIMEOUT)
        .build();

    let report = saga.run(&ctx, &mut (), &CancellationToken::new()).await;

    let error_steps: Vec<&str> = report
        .compensation_errors
        .iter()
        .map(|e| e.step.as_str())
        .collect();
    assert_eq!(error_steps, vec!["fail_comp_e", "fail_comp_c", "fail_comp_a"]);
    assert_eq!(ctx.log().len(), 5);
}

#[tokio::test]
async fn compensation_error_description_is_populated() {
    let ctx = TestContext::default();
    let saga = SagaBuilder::new("described")
        .first_step(
            RegisteringStep {
                name: "custom_step",
                undo: |_| Undo::Described,
            },
            STEP_TIMEOUT,
        )
        .then(TriggerFailureStep, STEP_TIMEOUT)
        .build();

    let report = saga.run(&ctx, &mut (), &CancellationToken::new()).await;

    assert_eq!(report.compensation_errors.len(), 1);
    assert_eq!(
        report.compensation_errors[0].description,
        "rollback custom operation"
    );
    assert_eq!(report.compensation_errors[0].kind, "described");
}
