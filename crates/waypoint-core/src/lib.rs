//! Waypoint Core Library
//!
//! Resumable deployment of a multi-contract protocol to a CosmWasm chain.
//! Progress is recorded after every step, so an interrupted deployment
//! continues where it stopped instead of starting over.

pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod flows;
pub mod pipeline;
pub mod service;
pub mod state;
pub mod status;
pub mod steps;
pub mod types;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{DeployConfig, load_config};
    pub use crate::context::AppContext;

    // Chain
    pub use crate::chain::{Artifact, ChainAdapter, CliChain, LocalChain, TxLookup, TxResponse};

    // Progress store
    pub use crate::state::{
        DeploymentState, FileStateStore, MemoryStateStore, Session, StateKey, StateStore,
    };

    // Steps and pipeline
    pub use crate::pipeline::{Pipeline, PipelineError, RetryPolicy, RunReport, RunStatus};
    pub use crate::steps::{Plan, Step, StepAction, StepOutcome};

    // Flows
    pub use crate::flows::{Flow, FlowReport, FlowValidator};

    // Errors
    pub use crate::error::{ChainError, FlowError, StepError, StoreError};

    pub use crate::types::{Address, Coin, ModuleId, StoreKey};
}
