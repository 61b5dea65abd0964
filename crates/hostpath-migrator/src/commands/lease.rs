use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use migrator_core::{Clock, Lease, LeaseClaim, MigrationSettings, SystemClock, volume};

use super::{connect, fetch_volume};
use crate::error::Result;

pub(crate) async fn run(settings: &MigrationSettings, identity: &str, name: &str) -> Result<()> {
    let cluster = connect(settings).await?;
    let pv = fetch_volume(&cluster, name).await?;
    let current = Lease::from_meta(&pv.metadata)?;

    print!(
        "{}",
        describe(
            name,
            volume::storage_kind(&pv),
            current.as_ref(),
            identity,
            SystemClock.now(),
            settings.timeouts.total(),
        )
    );
    Ok(())
}

fn describe(
    name: &str,
    kind: volume::StorageKind,
    current: Option<&Lease>,
    identity: &str,
    now: DateTime<Utc>,
    budget: Duration,
) -> String {
    let mut lines = vec![format!("volume:  {name}"), format!("kind:    {kind}")];

    if let Some(lease) = current {
        lines.push(format!("holder:  {}", lease.holder));
        lines.push(format!(
            "started: {}",
            lease.start.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        lines.push(format!("age:     {}s", lease.age(now).num_seconds()));
        lines.push(format!("stale:   after {}s", budget.saturating_mul(2).as_secs()));
    }

    let state = match Lease::evaluate(current, identity, now, budget) {
        LeaseClaim::Vacant => "free",
        LeaseClaim::HeldBySelf => "held by this replica",
        LeaseClaim::Stale { .. } => "stale, may be taken over",
        LeaseClaim::Contended { .. } => "held by another replica",
    };
    lines.push(format!("state:   {state}"));
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
