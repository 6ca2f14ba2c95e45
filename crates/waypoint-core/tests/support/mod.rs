//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;

use waypoint_core::chain::{
    Artifact, ChainAdapter, Instantiated, LocalChain, TxLookup, TxResponse, Uploaded,
};
use waypoint_core::error::{ChainError, StoreError};
use waypoint_core::state::{DeploymentState, MemoryStateStore, StateKey, StateStore};
use waypoint_core::types::{Address, Coin, ModuleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Upload,
    Instantiate,
    Execute,
    Query,
    LookupTx,
}

/// What to do to the next call of an operation.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail without touching the chain.
    Fail(ChainError),
    /// Apply the call, then report it as unconfirmed.
    Unconfirmed,
    /// Report the call as unconfirmed without applying it.
    Lost,
}

/// A [`LocalChain`] that can be told to fail specific calls.
pub struct FlakyChain {
    pub inner: LocalChain,
    faults: HashMap<Op, VecDeque<Option<Fault>>>,
    calls: HashMap<Op, usize>,
}

impl FlakyChain {
    pub fn new() -> Self {
        Self {
            inner: LocalChain::new("wasm"),
            faults: HashMap::new(),
            calls: HashMap::new(),
        }
    }

    /// Inject `fault` into the next call of `op`.
    pub fn fail_next(&mut self, op: Op, fault: Fault) {
        self.fail_nth(op, 1, fault);
    }

    /// Inject `fault` into the `n`th upcoming call of `op` (1-based).
    pub fn fail_nth(&mut self, op: Op, n: usize, fault: Fault) {
        let queue = self.faults.entry(op).or_default();
        while queue.len() < n {
            queue.push_back(None);
        }
        queue[n - 1] = Some(fault);
    }

    /// Calls of `op` received, failed ones included.
    pub fn calls(&self, op: Op) -> usize {
        self.calls.get(&op).copied().unwrap_or(0)
    }

    /// Transactions that actually changed the chain.
    pub fn tx_count(&self) -> usize {
        self.inner.tx_count()
    }

    fn take_fault(&mut self, op: Op) -> Option<Fault> {
        *self.calls.entry(op).or_default() += 1;
        self.faults.get_mut(&op).and_then(|q| q.pop_front()).flatten()
    }
}

fn lost_hash(op: Op) -> String {
    format!("LOST-{:?}", op).to_uppercase()
}

impl ChainAdapter for FlakyChain {
    fn upload(&mut self, artifact: &Artifact) -> Result<Uploaded, ChainError> {
        match self.take_fault(Op::Upload) {
            None => self.inner.upload(artifact),
            Some(Fault::Fail(err)) => Err(err),
            Some(Fault::Unconfirmed) => Err(ChainError::Unconfirmed {
                tx_hash: self.inner.upload(artifact)?.tx.tx_hash,
            }),
            Some(Fault::Lost) => Err(ChainError::Unconfirmed {
                tx_hash: lost_hash(Op::Upload),
            }),
        }
    }

    fn instantiate(
        &mut self,
        module: &ModuleId,
        msg: &Value,
        label: &str,
        admin: Option<&str>,
    ) -> Result<Instantiated, ChainError> {
        match self.take_fault(Op::Instantiate) {
            None => self.inner.instantiate(module, msg, label, admin),
            Some(Fault::Fail(err)) => Err(err),
            Some(Fault::Unconfirmed) => Err(ChainError::Unconfirmed {
                tx_hash: self.inner.instantiate(module, msg, label, admin)?.tx.tx_hash,
            }),
            Some(Fault::Lost) => Err(ChainError::Unconfirmed {
                tx_hash: lost_hash(Op::Instantiate),
            }),
        }
    }

    fn execute(
        &mut self,
        contract: &Address,
        msg: &Value,
        funds: &[Coin],
    ) -> Result<TxResponse, ChainError> {
        match self.take_fault(Op::Execute) {
            None => self.inner.execute(contract, msg, funds),
            Some(Fault::Fail(err)) => Err(err),
            Some(Fault::Unconfirmed) => Err(ChainError::Unconfirmed {
                tx_hash: self.inner.execute(contract, msg, funds)?.tx_hash,
            }),
            Some(Fault::Lost) => Err(ChainError::Unconfirmed {
                tx_hash: lost_hash(Op::Execute),
            }),
        }
    }

    fn query_smart(&mut self, contract: &Address, msg: &Value) -> Result<Value, ChainError> {
        match self.take_fault(Op::Query) {
            Some(Fault::Fail(err)) => Err(err),
            _ => self.inner.query_smart(contract, msg),
        }
    }

    fn lookup_tx(&mut self, tx_hash: &str) -> Result<Option<TxLookup>, ChainError> {
        match self.take_fault(Op::LookupTx) {
            Some(Fault::Fail(err)) => Err(err),
            _ => self.inner.lookup_tx(tx_hash),
        }
    }
}

/// Write a minimal wasm module named after `module` into `dir`.
pub fn write_artifact(dir: &Path, module: &str) -> PathBuf {
    let path = dir.join(format!("{}.wasm", module.replace('-', "_")));
    let mut bytes = b"\0asm\x01\0\0\0".to_vec();
    bytes.extend_from_slice(module.as_bytes());
    std::fs::write(&path, bytes).expect("Failed to write artifact");
    path
}

/// Temp dir with one artifact per module.
pub fn artifacts(modules: &[&str]) -> (TempDir, HashMap<String, PathBuf>) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let paths = modules
        .iter()
        .map(|m| (m.to_string(), write_artifact(temp.path(), m)))
        .collect();
    (temp, paths)
}

pub fn transport() -> Fault {
    Fault::Fail(ChainError::Transport("connection refused".to_string()))
}

pub fn rejected() -> Fault {
    Fault::Fail(ChainError::Rejected {
        code: 5,
        log: "insufficient funds".to_string(),
    })
}

pub fn uncertain() -> Fault {
    Fault::Fail(ChainError::BroadcastUncertain(
        "post failed: context deadline exceeded".to_string(),
    ))
}

/// In-memory store whose flushes start failing after a number of successes.
pub struct FailingStore {
    pub inner: MemoryStateStore,
    allowed: Cell<usize>,
}

impl FailingStore {
    pub fn after(successes: usize) -> Self {
        Self {
            inner: MemoryStateStore::new(),
            allowed: Cell::new(successes),
        }
    }
}

impl StateStore for FailingStore {
    fn load(&self, key: &StateKey) -> Result<DeploymentState, StoreError> {
        self.inner.load(key)
    }

    fn flush(&self, state: &DeploymentState, key: &StateKey) -> Result<(), StoreError> {
        match self.allowed.get() {
            0 => Err(StoreError::Io {
                key: key.to_string(),
                source: io::Error::other("disk full"),
            }),
            n => {
                self.allowed.set(n - 1);
                self.inner.flush(state, key)
            }
        }
    }
}
