//! Integration tests for the cumulative timeout and the external stop signal.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use migrator_saga::{
    CancellationToken, Compensation, SagaBuilder, SagaError, SagaStep, StepOutcome,
};

#[derive(Default)]
struct TestContext {
    log: Mutex<Vec<String>>,
    stop: CancellationToken,
}

impl TestContext {
    fn push(&self, entry: String) {
        self.log.lock().expect("lock poisoned").push(entry);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().expect("lock poisoned").clone()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct TestError(String);

struct Rollback(&'static str);

#[async_trait]
impl Compensation<TestContext> for Rollback {
    type Error = TestError;

    fn kind(&self) -> &'static str {
        "rollback"
    }

    async fn undo(&self, ctx: &TestContext, saga_succeeded: bool) -> Result<(), TestError> {
        ctx.push(format!("undo {} ok={saga_succeeded}", self.0));
        Ok(())
    }
}

struct SlowStep {
    name: &'static str,
    takes: Duration,
    cancels_stop: bool,
}

#[async_trait]
impl SagaStep for SlowStep {
    type Context = TestContext;
    type Data = ();
    type Undo = Rollback;
    type Error = TestError;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(&self, ctx: &TestContext, _data: &mut ()) -> StepOutcome<Rollback, TestError> {
        tokio::time::sleep(self.takes).await;
        if self.cancels_stop {
            ctx.stop.cancel();
        }
        ctx.push(format!("ran {}", self.name));
        StepOutcome::proceed().with_compensation(Rollback(self.name))
    }
}

fn slow(name: &'static str, takes: Duration) -> SlowStep {
    SlowStep {
        name,
        takes,
        cancels_stop: false,
    }
}

#[tokio::test(start_paused = true)]
async fn running_step_completes_but_next_step_is_refused_after_budget() {
    let ctx = TestContext::default();
    let saga = SagaBuilder::new("slow")
        .first_step(slow("first", Duration::from_secs(5)), Duration::from_secs(1))
        .then(slow("second", Duration::ZERO), Duration::from_secs(1))
        .build();

    let report = saga.run(&ctx, &mut (), &CancellationToken::new()).await;

    match report.result {
        Err(SagaError::TimedOut { step, budget }) => {
            assert_eq!(step, "second");
            assert_eq!(budget, Duration::from_secs(2));
        }
        other => panic!("expected TimedOut, got {other:?}"),
    }
    assert_eq!(ctx.log(), vec!["ran first", "undo first ok=false"]);
}

#[tokio::test(start_paused = true)]
async fn budget_is_cumulative_across_steps() {
    let ctx = TestContext::default();
    let saga = SagaBuilder::new("within_budget")
        .first_step(slow("first", Duration::from_secs(3)), Duration::from_secs(1))
        .then(slow("second", Duration::from_secs(1)), Duration::from_secs(4))
        .build();

    let report = saga.run(&ctx, &mut (), &CancellationToken::new()).await;

    assert!(report.succeeded());
    assert_eq!(
        ctx.log(),
        vec![
            "ran first",
            "ran second",
            "undo second ok=true",
            "undo first ok=true",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn stop_signal_is_observed_at_the_next_step_boundary() {
    let ctx = TestContext::default();
    let saga = SagaBuilder::new("stoppable")
        .first_step(
            SlowStep {
                name: "first",
                takes: Duration::from_millis(10),
                cancels_stop: true,
            },
            Duration::from_secs(10),
        )
        .then(slow("second", Duration::ZERO), Duration::from_secs(10))
        .build();
    let stop = ctx.stop.clone();

    let report = saga.run(&ctx, &mut (), &stop).await;

    match report.result {
        Err(SagaError::Stopped { step }) => assert_eq!(step, "second"),
        other => panic!("expected Stopped, got {other:?}"),
    }
    assert_eq!(ctx.log(), vec!["ran first", "undo first ok=false"]);
}
