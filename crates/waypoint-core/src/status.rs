//! Progress reporting for a deployment.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::StoreError;
use crate::state::{StateKey, StateStore, load_or_default};
use crate::steps::Plan;

/// What the progress store records, set against the plan.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStatus {
    pub key: String,
    pub modules: BTreeMap<String, String>,
    pub contracts: BTreeMap<String, String>,
    pub completed_actions: Vec<String>,
    /// Steps with a sent but unconfirmed transaction, and its hash
    pub pending: BTreeMap<String, String>,
    /// Plan steps whose output is not recorded yet, in plan order
    pub outstanding: Vec<String>,
    pub summary: StatusSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub total_steps: usize,
    pub done: usize,
    pub outstanding: usize,
    pub pending: usize,
}

impl StatusSummary {
    pub fn is_complete(&self) -> bool {
        self.outstanding == 0
    }
}

/// Collect the status of `key` against `plan`. Never writes.
pub fn collect_status(
    store: &dyn StateStore,
    key: &StateKey,
    plan: &Plan,
) -> Result<DeploymentStatus, StoreError> {
    let state = load_or_default(store, key)?;
    let outstanding: Vec<String> = plan
        .outstanding(&state)
        .map(|step| step.name().to_string())
        .collect();

    let summary = StatusSummary {
        total_steps: plan.len(),
        done: plan.len() - outstanding.len(),
        outstanding: outstanding.len(),
        pending: state.pending_txs().len(),
    };

    Ok(DeploymentStatus {
        key: key.to_string(),
        modules: state
            .module_ids()
            .iter()
            .map(|(name, id)| (name.clone(), id.to_string()))
            .collect(),
        contracts: state
            .contract_addresses()
            .iter()
            .map(|(name, addr)| (name.clone(), addr.to_string()))
            .collect(),
        completed_actions: state.completed_actions().iter().cloned().collect(),
        pending: state.pending_txs().clone(),
        outstanding,
        summary,
    })
}
