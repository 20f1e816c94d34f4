use serde::Serialize;

use crate::worker::task::{OutcomeStatus, TaskOutcome};

/// Aggregate view of one run, computed from its recorded outcomes
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub avg_duration_ms: u64,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[TaskOutcome]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Self::default()
        };

        let mut total_duration: u64 = 0;
        for outcome in outcomes {
            total_duration += outcome.duration_ms;
            match outcome.status {
                OutcomeStatus::Success => summary.succeeded += 1,
                OutcomeStatus::Error => summary.failed += 1,
                OutcomeStatus::Skipped => summary.skipped += 1,
            }
        }

        if !outcomes.is_empty() {
            summary.avg_duration_ms = total_duration / outcomes.len() as u64;
        }

        summary
    }
}
