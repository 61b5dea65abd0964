use std::sync::Arc;

use migrator_core::{MigrationSettings, SystemClock};
use migrator_operations::dispatcher::{MigrationDispatcher, MigrationOutcome, MigrationSummary};
use migrator_operations::migration::MigrationContext;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use super::connect;
use crate::error::Result;
use crate::shutdown;

/// Running totals of finished migrations.
#[derive(Debug, Default, PartialEq, Eq)]
struct Tally {
    migrated: usize,
    deferred: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, summary: &MigrationSummary) {
        match summary.outcome {
            MigrationOutcome::Migrated => self.migrated += 1,
            MigrationOutcome::Deferred { .. } => self.deferred += 1,
            MigrationOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

pub(crate) async fn run(settings: MigrationSettings, identity: String) -> Result<()> {
    let cluster = connect(&settings).await?;
    let context = MigrationContext::new(
        Arc::clone(&cluster),
        Arc::clone(&cluster),
        Arc::clone(&cluster),
        Arc::new(SystemClock),
        identity,
        settings,
    );
    let dispatcher = MigrationDispatcher::new(Arc::new(context), cluster);
    let mut summaries = dispatcher.subscribe();
    dispatcher.start();

    let mut tally = Tally::default();
    let shutdown = shutdown::signalled();
    tokio::pin!(shutdown);
    let outcome = loop {
        tokio::select! {
            signalled = &mut shutdown => {
                info!("shutdown requested");
                break signalled;
            }
            summary = summaries.recv() => match summary {
                Ok(summary) => tally.record(&summary),
                Err(RecvError::Lagged(missed)) => warn!(missed, "missed migration summaries"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    dispatcher.stop();
    dispatcher.stopped().await;
    info!(
        migrated = tally.migrated,
        deferred = tally.deferred,
        failed = tally.failed,
        "controller stopped"
    );
    outcome
}
