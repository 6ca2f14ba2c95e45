//! Running a single step against the store and a chain.

use serde_json::Value;

use crate::chain::{Artifact, ChainAdapter, TxLookup, TxResponse};
use crate::error::{ChainError, StepError};
use crate::state::{DeploymentState, UNKNOWN_TX_HASH};
use crate::types::StoreKey;

use super::template::{self, Placeholder};
use super::{Step, StepAction};

/// What running a step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Output already recorded; no chain interaction.
    Skipped,
    /// One transaction was sent and confirmed.
    Executed { tx_hash: String, gas_used: u64 },
    /// A transaction from an earlier attempt was found on chain and recorded
    /// without resending.
    Recovered { tx_hash: String },
}

impl StepOutcome {
    pub fn gas_used(&self) -> u64 {
        match self {
            StepOutcome::Executed { gas_used, .. } => *gas_used,
            _ => 0,
        }
    }
}

/// Run `step`, recording its result in `state`.
///
/// Order of checks: every required key must be recorded, otherwise the step
/// fails with `DependencyMissing` without touching the chain; then the step
/// is skipped if its output is already recorded; then any transaction left
/// pending by an earlier attempt is looked up before anything is resent.
pub fn run_step(
    step: &Step,
    state: &mut DeploymentState,
    chain: &mut dyn ChainAdapter,
) -> Result<StepOutcome, StepError> {
    if let Some(missing) = step.requires().iter().find(|key| !state.contains(key)) {
        return Err(StepError::DependencyMissing {
            step: step.name().to_string(),
            missing: missing.clone(),
        });
    }

    if state.contains(step.produces()) {
        if state.clear_pending_tx(step.name()).is_some() {
            tracing::debug!(step = step.name(), "Dropped stale pending transaction");
        }
        if let StepAction::Upload { module, artifact } = step.action() {
            warn_if_artifact_changed(state, module, artifact);
        }
        tracing::info!(step = step.name(), "Skipped (already recorded)");
        return Ok(StepOutcome::Skipped);
    }

    if let Some(tx_hash) = state.pending_tx(step.name()).map(str::to_string) {
        if let Some(outcome) = recover_pending(step, state, chain, &tx_hash)? {
            return Ok(outcome);
        }
    }

    let tx = match send(step, state, chain) {
        Ok(tx) => tx,
        Err(StepError::StepExecutionFailed {
            step: name,
            source: ChainError::Unconfirmed { tx_hash },
        }) => {
            tracing::warn!(step = %name, tx_hash = %tx_hash, "Transaction not confirmed; recorded as pending");
            state.set_pending_tx(&name, &tx_hash);
            return Err(StepError::StepExecutionFailed {
                step: name,
                source: ChainError::Unconfirmed { tx_hash },
            });
        }
        Err(StepError::StepExecutionFailed {
            step: name,
            source: source @ ChainError::BroadcastUncertain(_),
        }) => {
            tracing::warn!(step = %name, error = %source, "Broadcast may have landed; blocking the step until resolved");
            state.set_pending_unknown(&name);
            return Err(StepError::StepExecutionFailed { step: name, source });
        }
        Err(err) => return Err(err),
    };

    tracing::info!(
        step = step.name(),
        tx_hash = %tx.tx_hash,
        gas_used = tx.gas_used,
        "Executed"
    );
    Ok(StepOutcome::Executed {
        tx_hash: tx.tx_hash,
        gas_used: tx.gas_used,
    })
}

/// Resolve a transaction an earlier attempt broadcast but never confirmed.
///
/// Returns `Some` when the transaction landed and its result was recorded,
/// `None` when it definitely failed and the step should be sent again.
fn recover_pending(
    step: &Step,
    state: &mut DeploymentState,
    chain: &mut dyn ChainAdapter,
    tx_hash: &str,
) -> Result<Option<StepOutcome>, StepError> {
    if tx_hash == UNKNOWN_TX_HASH {
        return Err(StepError::AmbiguousOutcome {
            step: step.name().to_string(),
            tx_hash: tx_hash.to_string(),
        });
    }

    let failed = |source| StepError::StepExecutionFailed {
        step: step.name().to_string(),
        source,
    };

    match chain.lookup_tx(tx_hash).map_err(failed)? {
        Some(TxLookup::Succeeded(tx)) => {
            let checksum = match step.action() {
                StepAction::Upload { module, artifact } => Artifact::read(module, artifact)
                    .ok()
                    .map(|a| a.checksum),
                _ => None,
            };
            record(step, state, &tx, checksum)?;
            state.clear_pending_tx(step.name());
            tracing::info!(step = step.name(), tx_hash, "Recovered result of earlier transaction");
            Ok(Some(StepOutcome::Recovered {
                tx_hash: tx_hash.to_string(),
            }))
        }
        Some(TxLookup::Failed { code, log }) => {
            tracing::warn!(step = step.name(), tx_hash, code, log = %log, "Earlier transaction failed on chain; resending");
            state.clear_pending_tx(step.name());
            Ok(None)
        }
        None => Err(StepError::AmbiguousOutcome {
            step: step.name().to_string(),
            tx_hash: tx_hash.to_string(),
        }),
    }
}

/// Perform the chain interaction and record its result.
fn send(
    step: &Step,
    state: &mut DeploymentState,
    chain: &mut dyn ChainAdapter,
) -> Result<TxResponse, StepError> {
    let failed = |source| StepError::StepExecutionFailed {
        step: step.name().to_string(),
        source,
    };

    match step.action() {
        StepAction::Upload { module, artifact } => {
            let loaded =
                Artifact::read(module, artifact).map_err(|reason| StepError::ArtifactInvalid {
                    step: step.name().to_string(),
                    path: artifact.clone(),
                    reason,
                })?;
            let uploaded = chain.upload(&loaded).map_err(failed)?;
            state
                .set_module_id(module, uploaded.module_id, Some(loaded.checksum))
                .map_err(|source| record_failed(step, source))?;
            Ok(uploaded.tx)
        }
        StepAction::Instantiate {
            contract,
            module,
            label,
            admin,
            msg,
        } => {
            let module_id = state
                .module_id(module)
                .cloned()
                .ok_or_else(|| missing(step, StoreKey::module(module)))?;
            let msg = render(step, msg, state)?;
            let instantiated = chain
                .instantiate(&module_id, &msg, label, admin.as_deref())
                .map_err(failed)?;
            state
                .set_address(contract, instantiated.address)
                .map_err(|source| record_failed(step, source))?;
            Ok(instantiated.tx)
        }
        StepAction::Execute {
            contract,
            msg,
            funds,
        } => {
            let address = state
                .address(contract)
                .cloned()
                .ok_or_else(|| missing(step, StoreKey::contract(contract)))?;
            let msg = render(step, msg, state)?;
            let tx = chain.execute(&address, &msg, funds).map_err(failed)?;
            mark_produced(step, state);
            Ok(tx)
        }
    }
}

/// Record a step's result from a transaction found on chain.
fn record(
    step: &Step,
    state: &mut DeploymentState,
    tx: &TxResponse,
    checksum: Option<String>,
) -> Result<(), StepError> {
    let failed = |source| StepError::StepExecutionFailed {
        step: step.name().to_string(),
        source,
    };
    match step.action() {
        StepAction::Upload { module, .. } => {
            let id = tx.module_id().map_err(failed)?;
            state
                .set_module_id(module, id, checksum)
                .map_err(|source| record_failed(step, source))
        }
        StepAction::Instantiate { contract, .. } => {
            let address = tx.contract_address().map_err(failed)?;
            state
                .set_address(contract, address)
                .map_err(|source| record_failed(step, source))
        }
        StepAction::Execute { .. } => {
            mark_produced(step, state);
            Ok(())
        }
    }
}

fn mark_produced(step: &Step, state: &mut DeploymentState) {
    if let StoreKey::Action(key) = step.produces() {
        state.mark_done(key);
    }
}

fn render(step: &Step, msg: &Value, state: &DeploymentState) -> Result<Value, StepError> {
    template::render(msg, &|p: &Placeholder| match p {
        Placeholder::Contract(name) => state
            .address(name)
            .map(|addr| Value::String(addr.to_string())),
        Placeholder::Module(name) => state.module_id(name).map(|id| id.to_json()),
        // Flow variables are not bound during deployment.
        Placeholder::Var(_) => Some(Value::String(p.to_string())),
    })
    .map_err(|p| {
        let key = p
            .store_key()
            .unwrap_or_else(|| StoreKey::action(p.to_string()));
        missing(step, key)
    })
}

fn missing(step: &Step, key: StoreKey) -> StepError {
    StepError::DependencyMissing {
        step: step.name().to_string(),
        missing: key,
    }
}

fn record_failed(step: &Step, source: crate::error::StoreError) -> StepError {
    StepError::Record {
        step: step.name().to_string(),
        source,
    }
}

fn warn_if_artifact_changed(state: &DeploymentState, module: &str, path: &std::path::Path) {
    let Some(recorded) = state.module_checksum(module) else {
        return;
    };
    if let Ok(current) = Artifact::read(module, path)
        && current.checksum != recorded
    {
        tracing::warn!(
            module,
            path = %path.display(),
            "Artifact changed since upload; keeping recorded module id"
        );
    }
}
