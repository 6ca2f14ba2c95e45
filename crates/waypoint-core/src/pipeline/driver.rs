//! Sequential, resumable plan execution.
//!
//! The driver loads the progress store, runs each step of the plan in its
//! authored order and stops at the first failure. The store is flushed after
//! every step that changed it and once more when the run ends, whatever the
//! outcome, so a later run picks up at the first incomplete step.

use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::chain::ChainAdapter;
use crate::error::{StepError, StoreError};
use crate::state::{Session, StateKey, StateStore};
use crate::steps::{Plan, Step, StepOutcome, run_step};

use super::report::{RunReport, RunStatus, StepReport};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Deployment '{key}' failed: {source}")]
    Step {
        key: String,
        report: Box<RunReport>,
        #[source]
        source: StepError,
    },
}

impl PipelineError {
    /// The step error, if the run stopped on one.
    pub fn step_error(&self) -> Option<&StepError> {
        match self {
            PipelineError::Step { source, .. } => Some(source),
            PipelineError::Store(_) => None,
        }
    }

    /// Partial report of a failed run.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            PipelineError::Step { report, .. } => Some(report.as_ref()),
            PipelineError::Store(_) => None,
        }
    }
}

/// How often a step is attempted within one run.
///
/// Only transient chain failures are retried; everything else stops the run
/// on the first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

pub struct Pipeline<'a> {
    store: &'a dyn StateStore,
    chain: &'a mut dyn ChainAdapter,
    retry: RetryPolicy,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a dyn StateStore, chain: &'a mut dyn ChainAdapter) -> Self {
        Self {
            store,
            chain,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run `plan` against the state recorded under `key`.
    pub fn run(&mut self, key: &StateKey, plan: &Plan) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::new(key.as_str());
        let mut session = Session::open(self.store, key.clone())?;
        transition(&mut report, RunStatus::Running);

        for issue in plan.lint(session.state()) {
            tracing::warn!(key = %key, "Plan order: {}", issue);
        }

        let mut failure = None;
        for step in plan.steps() {
            match self.attempt(step, &mut session) {
                Ok(outcome) => {
                    let changed = !matches!(outcome, StepOutcome::Skipped);
                    report.steps.push(StepReport::new(step.name(), outcome));
                    if changed && let Err(source) = session.checkpoint() {
                        failure = Some(StepError::Record {
                            step: step.name().to_string(),
                            source,
                        });
                        break;
                    }
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        let flushed = session.close();
        match failure {
            None => {
                if let Err(err) = flushed {
                    transition(&mut report, RunStatus::Failed);
                    tracing::error!(key = %key, error = %err, "Deployment ran but its progress could not be saved");
                    return Err(err.into());
                }
                transition(&mut report, RunStatus::Completed);
                tracing::info!(
                    key = %key,
                    executed = report.executed(),
                    skipped = report.skipped(),
                    gas_used = report.gas_used(),
                    "Deployment completed"
                );
                Ok(report)
            }
            Some(source) => {
                transition(&mut report, RunStatus::Failed);
                tracing::error!(key = %key, step = source.step(), error = %source, "Deployment failed");
                if let Err(err) = flushed {
                    tracing::error!(key = %key, error = %err, "Progress of the failed run could not be saved");
                }
                Err(PipelineError::Step {
                    key: key.to_string(),
                    report: Box::new(report),
                    source,
                })
            }
        }
    }

    fn attempt(&mut self, step: &Step, session: &mut Session<'_>) -> Result<StepOutcome, StepError> {
        let mut attempt = 1;
        loop {
            tracing::debug!(step = step.name(), attempt, "Running step");
            match run_step(step, session.state_mut(), &mut *self.chain) {
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    tracing::warn!(
                        step = step.name(),
                        attempt,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    // A pending transaction hash must survive a crash during backoff.
                    if let Err(flush_err) = session.checkpoint() {
                        tracing::warn!(error = %flush_err, "Checkpoint before retry failed");
                    }
                    thread::sleep(self.retry.backoff);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn transition(report: &mut RunReport, to: RunStatus) {
    tracing::debug!(key = %report.key, from = ?report.status, to = ?to, "Run status");
    report.status = to;
}
