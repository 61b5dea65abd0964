//! Integration tests for steps that end the saga early without failing.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use migrator_saga::{
    CancellationToken, Compensation, SagaBuilder, SagaCompletion, SagaStep, StepOutcome,
};

#[derive(Default)]
struct TestContext {
    operations_log: Mutex<Vec<String>>,
}

impl TestContext {
    fn push(&self, entry: impl Into<String>) {
        self.operations_log
            .lock()
            .expect("lock poisoned")
            .push(entry.into());
    }

    fn log(&self) -> Vec<String> {
        self.operations_log.lock().expect("lock poisoned").clone()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct TestError(String);

struct WriteRequest {
    data: String,
    should_write: bool,
}

struct ReleaseWrite;

#[async_trait]
impl Compensation<TestContext> for ReleaseWrite {
    type Error = TestError;

    fn kind(&self) -> &'static str {
        "release_write"
    }

    async fn undo(&self, ctx: &TestContext, saga_succeeded: bool) -> Result<(), TestError> {
        if saga_succeeded {
            ctx.push("kept write");
        } else {
            ctx.push("compensate write");
        }
        Ok(())
    }
}

struct ConditionalWriteStep;

#[async_trait]
impl SagaStep for ConditionalWriteStep {
    type Context = TestContext;
    type Data = WriteRequest;
    type Undo = ReleaseWrite;
    type Error = TestError;

    fn name(&self) -> &'static str {
        "conditional_write"
    }

    async fn execute(
        &self,
        ctx: &TestContext,
        data: &mut WriteRequest,
    ) -> StepOutcome<ReleaseWrite, TestError> {
        if data.should_write {
            ctx.push(format!("wrote: {}", data.data));
            StepOutcome::proceed().with_compensation(ReleaseWrite)
        } else {
            ctx.push("skipped write");
            StepOutcome::halt()
        }
    }
}

struct TransformDataStep;

#[async_trait]
impl SagaStep for TransformDataStep {
    type Context = TestContext;
    type Data = WriteRequest;
    type Undo = ReleaseWrite;
    type Error = TestError;

    fn name(&self) -> &'static str {
        "transform_data"
    }

    async fn execute(
        &self,
        ctx: &TestContext,
        data: &mut WriteRequest,
    ) -> StepOutcome<ReleaseWrite, TestError> {
        ctx.push("transformed data");
        data.data = format!("transformed_{}", data.data);
        StepOutcome::proceed()
    }
}

struct FailStep;

#[async_trait]
impl SagaStep for FailStep {
    type Context = TestContext;
    type Data = WriteRequest;
    type Undo = ReleaseWrite;
    type Error = TestError;

    fn name(&self) -> &'static str {
        "fail"
    }

    async fn execute(
        &self,
        _ctx: &TestContext,
        _data: &mut WriteRequest,
    ) -> StepOutcome<ReleaseWrite, TestError> {
        StepOutcome::fail(TestError("intentional failure".to_string()))
    }
}

const STEP_TIMEOUT: Duration = Duration::from_secs(1);

fn request(should_write: bool) -> WriteRequest {
    WriteRequest {
        data: "test_data".to_string(),
        should_write,
    }
}

#[tokio::test]
async fn conditional_step_proceeds_when_condition_true() {
    let ctx = TestContext::default();
    let saga = SagaBuilder::new("write")
        .first_step(ConditionalWriteStep, STEP_TIMEOUT)
        .then(TransformDataStep, STEP_TIMEOUT)
        .build();
    let mut data = request(true);

    let report = saga.run(&ctx, &mut data, &CancellationToken::new()).await;

    assert_eq!(report.result.ok(), Some(SagaCompletion::Completed));
    assert_eq!(data.data, "transformed_test_data");
    assert_eq!(
        ctx.log(),
        vec!["wrote: test_data", "transformed data", "kept write"]
    );
}

#[tokio::test]
async fn conditional_step_halts_when_condition_false() {
    let ctx = TestContext::default();
    let saga = SagaBuilder::new("write")
        .first_step(ConditionalWriteStep, STEP_TIMEOUT)
        .then(TransformDataStep, STEP_TIMEOUT)
        .build();
    let mut data = request(false);

    let report = saga.run(&ctx, &mut data, &CancellationToken::new()).await;

    assert_eq!(
        report.result.ok(),
        Some(SagaCompletion::Halted {
            step: "conditional_write".to_string()
        })
    );
    assert_eq!(data.data, "test_data");
    assert_eq!(ctx.log(), vec!["skipped write"]);
}

#[tokio::test]
async fn halted_saga_never_reaches_failing_step() {
    let ctx = TestContext::default();
    let saga = SagaBuilder::new("write")
        .first_step(ConditionalWriteStep, STEP_TIMEOUT)
        .then(FailStep, STEP_TIMEOUT)
        .build();
    let mut data = request(false);

    let report = saga.run(&ctx, &mut data, &CancellationToken::new()).await;

    assert!(report.succeeded());
    assert_eq!(report.audit.started_steps(), vec!["conditional_write"]);
}

#[tokio::test]
async fn failure_after_write_rolls_the_write_back() {
    let ctx = TestContext::default();
    let saga = SagaBuilder::new("write")
        .first_step(ConditionalWriteStep, STEP_TIMEOUT)
        .then(TransformDataStep, STEP_TIMEOUT)
        .then(FailStep, STEP_TIMEOUT)
        .build();
    let mut data = request(true);

    let report = saga.run(&ctx, &mut data, &CancellationToken::new()).await;

    assert!(!report.succeeded());
    assert_eq!(
        ctx.log(),
        vec!["wrote: test_data", "transformed data", "compensate write"]
    );
}
