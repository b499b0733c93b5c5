use chrono::{DateTime, Utc};
use serde::Serialize;

use super::command::CommandStatus;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "camelCase")]
pub enum StepOutcome {
    Ok,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step: String,
    pub outcome: StepOutcome,
    pub at: DateTime<Utc>,
}

/// Ordered record of the steps of a startup or teardown sequence.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleReport {
    pub steps: Vec<StepRecord>,
}

impl LifecycleReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: impl Into<String>, outcome: StepOutcome) {
        let step = step.into();
        match &outcome {
            StepOutcome::Ok => tracing::info!(step = %step, "step ok"),
            StepOutcome::Failed(reason) => tracing::warn!(step = %step, %reason, "step failed"),
            StepOutcome::Skipped(reason) => tracing::info!(step = %step, %reason, "step skipped"),
        }
        self.steps.push(StepRecord {
            step,
            outcome,
            at: Utc::now(),
        });
    }

    pub fn record_status(&mut self, step: impl Into<String>, status: &CommandStatus) {
        let outcome = if status.is_failed() {
            StepOutcome::Failed(status.failure_summary())
        } else {
            StepOutcome::Ok
        };
        self.record(step, outcome);
    }

    /// Record a step whose local part may have errored before any remote status existed.
    pub fn record_result(&mut self, step: impl Into<String>, result: Result<CommandStatus>) {
        match result {
            Ok(status) => self.record_status(step, &status),
            Err(e) => self.record(step, StepOutcome::Failed(e.to_string())),
        }
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed(_)))
    }

    pub fn is_clean(&self) -> bool {
        self.failed_steps().next().is_none()
    }

    pub fn outcome_of(&self, step: &str) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.step == step)
            .map(|s| &s.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;

    #[test]
    fn failed_status_and_local_error_both_count_as_failures() {
        let mut report = LifecycleReport::new();
        report.record_status("kill front", &CommandStatus::ok());
        report.record_status(
            "kill registry",
            &CommandStatus::failed("10.0.0.1", "connection reset"),
        );
        report.record_result(
            "collect inventory",
            Err(OrchestratorError::State("disk full".into())),
        );

        assert!(!report.is_clean());
        let failed: Vec<_> = report.failed_steps().map(|s| s.step.as_str()).collect();
        assert_eq!(failed, vec!["kill registry", "collect inventory"]);
        assert_eq!(report.outcome_of("kill front"), Some(&StepOutcome::Ok));
    }

    #[test]
    fn report_serializes_outcome_inline() {
        let mut report = LifecycleReport::new();
        report.record("kill front", StepOutcome::Skipped("never started".into()));
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"outcome\":\"skipped\""));
        assert!(json.contains("\"reason\":\"never started\""));
    }
}
