use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Where a step ended up after the run and the unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepStatus {
    /// Ran and asked to proceed; nothing to undo.
    Executed,
    /// Asked the saga to stop without an error.
    Halted,
    Failed,
    /// Its compensation ran after the saga succeeded.
    Finalized,
    /// Its compensation rolled the step back.
    Compensated,
    CompensationFailed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Executed => "executed",
            Self::Halted => "halted",
            Self::Failed => "failed",
            Self::Finalized => "finalized",
            Self::Compensated => "rolled back",
            Self::CompensationFailed => "undo failed",
        })
    }
}

/// One started step.
#[derive(Debug)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub started_at: Instant,
    /// Set when the step returns and again when its compensation runs.
    pub finished_at: Option<Instant>,
    /// Description of the compensation the step registered.
    pub undo: Option<String>,
}

impl StepRecord {
    /// Time from the start of the step to its last update.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.finished_at
            .map(|finished| finished.saturating_duration_since(self.started_at))
    }
}

/// Step-by-step record of one saga run.
#[derive(Debug, Default)]
pub struct SagaAuditLog {
    records: Vec<StepRecord>,
}

impl SagaAuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&mut self, step: &str) {
        self.records.push(StepRecord {
            name: step.to_string(),
            status: StepStatus::Executed,
            started_at: Instant::now(),
            finished_at: None,
            undo: None,
        });
    }

    pub(crate) fn finish(&mut self, status: StepStatus, undo: Option<String>) {
        if let Some(record) = self.records.last_mut() {
            record.status = status;
            record.finished_at = Some(Instant::now());
            record.undo = undo;
        }
    }

    /// Update the latest record of `step` once its compensation has run.
    pub(crate) fn settle(&mut self, step: &str, status: StepStatus) {
        if let Some(record) = self.records.iter_mut().rev().find(|r| r.name == step) {
            record.status = status;
            record.finished_at = Some(Instant::now());
        }
    }

    #[must_use]
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Names of the steps that were started, in order.
    #[must_use]
    pub fn started_steps(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.name.as_str()).collect()
    }

    /// One line per started step: status, name and time spent.
    #[must_use]
    pub fn summary(&self) -> String {
        self.records
            .iter()
            .map(|record| match record.elapsed() {
                Some(elapsed) => format!("{:<12} {} ({elapsed:.1?})", record.status, record.name),
                None => format!("{:<12} {}", record.status, record.name),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_marks_step_running_as_executed() {
        let mut log = SagaAuditLog::new();
        log.begin("lease_check");

        let record = &log.records()[0];
        assert_eq!(record.name, "lease_check");
        assert_eq!(record.status, StepStatus::Executed);
        assert!(record.elapsed().is_none());
    }

    #[test]
    fn finish_updates_only_the_latest_step() {
        let mut log = SagaAuditLog::new();
        log.begin("first");
        log.finish(StepStatus::Executed, None);
        log.begin("second");
        log.finish(StepStatus::Failed, Some("delete the copy".to_string()));

        assert_eq!(log.records()[0].status, StepStatus::Executed);
        assert!(log.records()[0].undo.is_none());
        assert_eq!(log.records()[1].status, StepStatus::Failed);
        assert_eq!(log.records()[1].undo.as_deref(), Some("delete the copy"));
    }

    #[test]
    fn settle_targets_the_named_step() {
        let mut log = SagaAuditLog::new();
        log.begin("first");
        log.finish(StepStatus::Executed, Some("undo first".to_string()));
        log.begin("second");
        log.finish(StepStatus::Executed, None);
        log.settle("first", StepStatus::Compensated);

        assert_eq!(log.records()[0].status, StepStatus::Compensated);
        assert_eq!(log.records()[1].status, StepStatus::Executed);
    }

    #[test]
    fn settling_an_unknown_step_is_ignored() {
        let mut log = SagaAuditLog::new();
        log.begin("first");

        log.settle("missing", StepStatus::Compensated);

        assert_eq!(log.records()[0].status, StepStatus::Executed);
    }

    #[tokio::test(start_paused = true)]
    async fn summary_lists_status_name_and_time() {
        let mut log = SagaAuditLog::new();
        log.begin("transform_content");
        tokio::time::sleep(Duration::from_secs(2)).await;
        log.finish(StepStatus::Executed, None);
        log.begin("publish_replacement");
        log.finish(StepStatus::Failed, None);
        log.begin("never_finished");

        let summary = log.summary();
        let lines: Vec<&str> = summary.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("executed"));
        assert!(lines[0].contains("transform_content (2.0s)"));
        assert!(lines[1].starts_with("failed"));
        assert_eq!(lines[2].trim_end(), "executed     never_finished");
    }
}
