//! Turns volume notifications into serialized migration runs.
//!
//! The dispatcher owns two tasks joined by a bounded queue. The watch task
//! filters notifications down to legacy volumes that are not already queued
//! or migrating. The worker runs one saga at a time and pauses for the
//! configured interval after every successful run.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use migrator_core::volume;
use migrator_saga::{SagaCompletion, SagaError, SagaReport};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::OperationError;
use crate::migration::{MigrationContext, MigrationData, migration_saga};
use crate::traits::{DependentWorkloads, JobSpawner, VolumeStore, VolumeWatch};

const SUMMARY_CAPACITY: usize = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a single migration run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The volume is now CSI backed.
    Migrated,
    /// `step` stopped the run cleanly, usually because another replica holds
    /// the lease.
    Deferred { step: String },
    /// The run failed at `step` and was rolled back.
    Failed { step: String, reason: String },
}

impl fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Migrated => write!(f, "migrated"),
            Self::Deferred { step } => write!(f, "deferred at {step}"),
            Self::Failed { step, reason } => write!(f, "failed at {step}: {reason}"),
        }
    }
}

/// Result of one migration run, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSummary {
    pub volume: String,
    pub outcome: MigrationOutcome,
    pub compensation_failures: usize,
}

impl MigrationSummary {
    #[must_use]
    pub fn from_report(volume: impl Into<String>, report: &SagaReport<OperationError>) -> Self {
        let outcome = match &report.result {
            Ok(SagaCompletion::Completed) => MigrationOutcome::Migrated,
            Ok(SagaCompletion::Halted { step }) => MigrationOutcome::Deferred { step: step.clone() },
            Err(e) => MigrationOutcome::Failed {
                step: e.step().to_string(),
                reason: error_chain(e),
            },
        };
        Self {
            volume: volume.into(),
            outcome,
            compensation_failures: report.compensation_errors.len(),
        }
    }

    #[must_use]
    pub fn is_migrated(&self) -> bool {
        self.outcome == MigrationOutcome::Migrated
    }
}

fn error_chain(err: &SagaError<OperationError>) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Names of volumes that are queued or migrating.
#[derive(Debug, Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    /// Mark `name` in flight; `false` when it already was.
    fn claim(&self, name: &str) -> bool {
        lock(&self.0).insert(name.to_string())
    }

    fn release(&self, name: &str) {
        lock(&self.0).remove(name);
    }
}

#[derive(Debug)]
struct QueuedVolume {
    name: String,
    wait_for_binding: bool,
}

#[derive(Default)]
struct Lifecycle {
    stop: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// Single-worker migration dispatcher.
///
/// At most one saga runs per dispatcher. Replicas running their own
/// dispatchers are kept apart by the lease, not by this type.
pub struct MigrationDispatcher<V, J, W, N> {
    context: Arc<MigrationContext<V, J, W>>,
    watch: Arc<N>,
    in_flight: InFlight,
    summaries: broadcast::Sender<MigrationSummary>,
    lifecycle: Mutex<Lifecycle>,
}

impl<V, J, W, N> MigrationDispatcher<V, J, W, N>
where
    V: VolumeStore + 'static,
    J: JobSpawner + 'static,
    W: DependentWorkloads + 'static,
    N: VolumeWatch + 'static,
{
    pub fn new(context: Arc<MigrationContext<V, J, W>>, watch: Arc<N>) -> Self {
        let (summaries, _) = broadcast::channel(SUMMARY_CAPACITY);
        Self {
            context,
            watch,
            in_flight: InFlight::default(),
            summaries,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Receive a summary of every run that finishes from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MigrationSummary> {
        self.summaries.subscribe()
    }

    /// `false` once stopped, or once the worker has exited on its own.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.lifecycle)
            .stop
            .as_ref()
            .is_some_and(|stop| !stop.is_cancelled())
    }

    /// Subscribe to notifications and start the worker.
    ///
    /// Does nothing when already running. After a stop, the new worker waits
    /// for the previous tasks to exit before taking its first volume. Must be
    /// called inside a tokio runtime.
    pub fn start(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle
            .stop
            .as_ref()
            .is_some_and(|stop| !stop.is_cancelled())
        {
            debug!("dispatcher already running");
            return;
        }

        let stop = CancellationToken::new();
        let capacity = self.context.settings().queue_capacity.max(1);
        let (queue, pending) = mpsc::channel(capacity);

        let watcher = tokio::spawn(watch_volumes(
            Arc::clone(&self.watch),
            queue,
            self.in_flight.clone(),
            stop.clone(),
        ));
        let previous = std::mem::take(&mut lifecycle.tasks);
        let worker = tokio::spawn({
            let context = Arc::clone(&self.context);
            let in_flight = self.in_flight.clone();
            let summaries = self.summaries.clone();
            let stop = stop.clone();
            async move {
                join_tasks(previous).await;
                run_worker(context, pending, in_flight, summaries, stop).await;
            }
        });

        lifecycle.tasks.push(watcher);
        lifecycle.tasks.push(worker);
        lifecycle.stop = Some(stop);
        info!(capacity, identity = self.context.identity(), "dispatcher started");
    }

    /// Ask both tasks to exit. Does nothing when not running.
    ///
    /// A saga in progress stops at its next step boundary and rolls back.
    pub fn stop(&self) {
        let lifecycle = lock(&self.lifecycle);
        match lifecycle.stop.as_ref() {
            Some(stop) if !stop.is_cancelled() => {
                stop.cancel();
                info!("dispatcher stopping");
            }
            _ => debug!("dispatcher not running"),
        }
    }

    /// Wait until every task started so far has exited.
    pub async fn stopped(&self) {
        let tasks = std::mem::take(&mut lock(&self.lifecycle).tasks);
        join_tasks(tasks).await;
    }
}

async fn join_tasks(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "dispatcher task panicked");
        }
    }
}

async fn watch_volumes<N: VolumeWatch>(
    watch: Arc<N>,
    queue: mpsc::Sender<QueuedVolume>,
    in_flight: InFlight,
    stop: CancellationToken,
) {
    let mut events = watch.watch();
    loop {
        let next = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            next = events.next() => next,
        };
        let pv = match next {
            Some(Ok(pv)) => pv,
            Some(Err(e)) => {
                warn!(error = %e, "volume watch error");
                continue;
            }
            None => {
                info!("volume watch ended");
                break;
            }
        };

        if !volume::is_legacy(&pv) {
            continue;
        }
        let name = volume::volume_name(&pv).to_string();
        if volume::is_migration_ignored(&pv) {
            debug!(volume = %name, "volume opted out of migration");
            continue;
        }
        if !in_flight.claim(&name) {
            debug!(volume = %name, "volume already queued");
            continue;
        }

        debug!(volume = %name, "queueing volume");
        let item = QueuedVolume {
            name: name.clone(),
            wait_for_binding: volume::is_bound(&pv),
        };
        let queued = tokio::select! {
            () = stop.cancelled() => false,
            sent = queue.send(item) => sent.is_ok(),
        };
        if !queued {
            in_flight.release(&name);
            break;
        }
    }
    debug!("volume watch task exited");
}

async fn run_worker<V, J, W>(
    context: Arc<MigrationContext<V, J, W>>,
    mut pending: mpsc::Receiver<QueuedVolume>,
    in_flight: InFlight,
    summaries: broadcast::Sender<MigrationSummary>,
    stop: CancellationToken,
) where
    V: VolumeStore + 'static,
    J: JobSpawner + 'static,
    W: DependentWorkloads + 'static,
{
    // Marks the dispatcher stopped however the worker exits, panics included.
    let _running = stop.clone().drop_guard();
    let interval = context.settings().interval;
    loop {
        let item = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            item = pending.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        info!(volume = %item.name, "migrating volume");
        let saga = migration_saga::<V, J, W>(&item.name, &context.settings().timeouts);
        let data = MigrationData::new(item.name.clone(), item.wait_for_binding);
        let delivered = saga
            .spawn(Arc::clone(&context), data, stop.clone())
            .await;
        in_flight.release(&item.name);

        let succeeded = match delivered {
            Ok(report) => {
                let summary = MigrationSummary::from_report(&item.name, &report);
                match &summary.outcome {
                    MigrationOutcome::Migrated => info!(volume = %item.name, "volume migrated"),
                    MigrationOutcome::Deferred { step } => {
                        info!(volume = %item.name, step = %step, "migration deferred");
                    }
                    MigrationOutcome::Failed { step, reason } => {
                        error!(volume = %item.name, step = %step, error = %reason, "migration failed");
                    }
                }
                for failure in &report.compensation_errors {
                    warn!(volume = %item.name, error = %failure, "rollback incomplete");
                }
                // No subscribers is fine.
                let _ = summaries.send(summary);
                report.succeeded()
            }
            Err(_) => {
                error!(volume = %item.name, "migration task ended without a report");
                false
            }
        };

        if succeeded {
            tokio::select! {
                () = stop.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    pending.close();
    while let Ok(item) = pending.try_recv() {
        in_flight.release(&item.name);
    }
    info!("migration worker stopped");
}
