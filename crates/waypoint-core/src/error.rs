use std::path::PathBuf;

use thiserror::Error;

use crate::types::StoreKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No deployment state recorded for '{key}'")]
    NotFound { key: String },

    #[error("Deployment state '{key}' is corrupt: {reason}")]
    CorruptState { key: String, reason: String },

    #[error("I/O error on deployment state '{key}'")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to overwrite {entry}: recorded '{existing}', got '{attempted}'")]
    WriteOnce {
        entry: StoreKey,
        existing: String,
        attempted: String,
    },
}

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transaction rejected (code {code}): {log}")]
    Rejected { code: u32, log: String },

    #[error("Transaction {tx_hash} was broadcast but not confirmed")]
    Unconfirmed { tx_hash: String },

    /// The broadcast may have reached the node before it failed, and no
    /// hash came back to look it up by.
    #[error("Broadcast outcome unknown: {0}")]
    BroadcastUncertain(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Query failed: {0}")]
    Query(String),
}

impl ChainError {
    /// Whether re-sending the same call in-process may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport(_) | ChainError::Unconfirmed { .. })
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("Step '{step}' requires {missing}, which has not been recorded")]
    DependencyMissing { step: String, missing: StoreKey },

    #[error("Step '{step}' failed: {source}")]
    StepExecutionFailed {
        step: String,
        #[source]
        source: ChainError,
    },

    #[error(
        "Step '{step}' has an unconfirmed transaction ({tx_hash}) the chain cannot account for; \
         inspect it and run `waypoint resolve {step}` before retrying"
    )]
    AmbiguousOutcome { step: String, tx_hash: String },

    #[error("Step '{step}' could not use artifact {}: {reason}", path.display())]
    ArtifactInvalid {
        step: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Step '{step}' could not record its result: {source}")]
    Record {
        step: String,
        #[source]
        source: StoreError,
    },
}

impl StepError {
    pub fn step(&self) -> &str {
        match self {
            StepError::DependencyMissing { step, .. }
            | StepError::StepExecutionFailed { step, .. }
            | StepError::AmbiguousOutcome { step, .. }
            | StepError::ArtifactInvalid { step, .. }
            | StepError::Record { step, .. } => step,
        }
    }

    /// Only transient chain failures are worth retrying in the same run.
    pub fn is_retryable(&self) -> bool {
        match self {
            StepError::StepExecutionFailed { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Flow '{flow}' action '{action}' references unknown {missing}")]
    Unresolved {
        flow: String,
        action: String,
        missing: String,
    },

    #[error("Flow '{flow}' action '{action}' failed: {source}")]
    Chain {
        flow: String,
        action: String,
        #[source]
        source: ChainError,
    },

    #[error("Flow '{flow}' action '{action}': event attribute {event}.{attribute} not emitted")]
    CaptureMissing {
        flow: String,
        action: String,
        event: String,
        attribute: String,
    },

    #[error("Flow '{flow}' action '{action}' check failed: {detail}")]
    AssertionFailed {
        flow: String,
        action: String,
        detail: String,
    },
}
