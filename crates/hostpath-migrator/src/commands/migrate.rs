use std::sync::Arc;

use migrator_core::{MigrationSettings, SystemClock};
use migrator_operations::OperationError;
use migrator_operations::dispatcher::MigrationSummary;
use migrator_operations::migration::{MigrationContext, MigrationData, migrate};
use migrator_saga::{CancellationToken, SagaReport};
use tracing::info;

use super::{connect, fetch_volume};
use crate::error::{CliError, Result};
use crate::shutdown;

pub(crate) async fn run(settings: MigrationSettings, identity: String, volume: &str) -> Result<()> {
    let cluster = connect(&settings).await?;
    let pv = fetch_volume(&cluster, volume).await?;
    let mut data = MigrationData::for_volume(&pv);
    let context = MigrationContext::new(
        Arc::clone(&cluster),
        Arc::clone(&cluster),
        Arc::clone(&cluster),
        Arc::new(SystemClock),
        identity,
        settings,
    );

    let stop = CancellationToken::new();
    let interrupt = tokio::spawn({
        let stop = stop.clone();
        async move {
            if shutdown::signalled().await.is_ok() {
                info!("interrupted, rolling back after the current step");
                stop.cancel();
            }
        }
    });
    let report = migrate(&context, &mut data, &stop).await;
    interrupt.abort();

    print_report(volume, &report);
    match report.result {
        Ok(_) => Ok(()),
        Err(reason) => Err(CliError::MigrationFailed {
            volume: volume.to_string(),
            step: reason.step().to_string(),
            reason,
        }),
    }
}

fn print_report(volume: &str, report: &SagaReport<OperationError>) {
    println!("{}", report.audit.summary());
    if report.succeeded() {
        println!("{volume}: {}", MigrationSummary::from_report(volume, report).outcome);
    }
    for failure in &report.compensation_errors {
        println!("rollback incomplete: {failure}");
    }
}
