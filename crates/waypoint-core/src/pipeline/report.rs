//! Run reports.

use serde::Serialize;

use crate::steps::StepOutcome;

/// Lifecycle of a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "outcome")]
pub enum StepReport {
    Skipped { step: String },
    Executed { step: String, tx_hash: String, gas_used: u64 },
    Recovered { step: String, tx_hash: String },
}

impl StepReport {
    pub fn new(step: &str, outcome: StepOutcome) -> Self {
        let step = step.to_string();
        match outcome {
            StepOutcome::Skipped => StepReport::Skipped { step },
            StepOutcome::Executed { tx_hash, gas_used } => StepReport::Executed {
                step,
                tx_hash,
                gas_used,
            },
            StepOutcome::Recovered { tx_hash } => StepReport::Recovered { step, tx_hash },
        }
    }

    pub fn step(&self) -> &str {
        match self {
            StepReport::Skipped { step }
            | StepReport::Executed { step, .. }
            | StepReport::Recovered { step, .. } => step,
        }
    }

    /// Whether this step sent a transaction.
    pub fn executed(&self) -> bool {
        matches!(self, StepReport::Executed { .. })
    }
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub key: String,
    pub status: RunStatus,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            status: RunStatus::Pending,
            steps: Vec::new(),
        }
    }

    pub fn executed(&self) -> usize {
        self.steps.iter().filter(|s| s.executed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, StepReport::Skipped { .. }))
            .count()
    }

    pub fn gas_used(&self) -> u64 {
        self.steps
            .iter()
            .map(|s| match s {
                StepReport::Executed { gas_used, .. } => *gas_used,
                _ => 0,
            })
            .sum()
    }
}
