//! Deployment state: the record of what has already happened on chain.
//!
//! Module ids and contract addresses are write-once. Completed actions are a
//! flat set of opaque completion keys such as `configure:oracle:price-source:uatom`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{Address, ModuleId, StoreKey};

/// Current on-disk format version.
pub const STATE_VERSION: u32 = 1;

/// Pending-transaction entry for a broadcast that failed before a hash
/// came back.
pub const UNKNOWN_TX_HASH: &str = "unknown";

/// Persisted deployment progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    /// State format version
    version: u32,

    /// When this state was first created
    created_at: DateTime<Utc>,

    /// Last time any entry was recorded
    updated_at: DateTime<Utc>,

    /// Uploaded module handles by logical module name
    #[serde(default)]
    module_ids: BTreeMap<String, ModuleId>,

    /// blake3 checksums of the artifacts behind `module_ids`
    #[serde(default)]
    module_checksums: BTreeMap<String, String>,

    /// Instantiated contract addresses by logical contract name
    #[serde(default)]
    contract_addresses: BTreeMap<String, Address>,

    /// One-shot configuration actions already applied
    #[serde(default)]
    completed_actions: BTreeSet<String>,

    /// Broadcast transactions whose outcome was never confirmed, by step name
    #[serde(default)]
    pending_txs: BTreeMap<String, String>,
}

impl DeploymentState {
    /// Create a new empty state
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION,
            created_at: now,
            updated_at: now,
            module_ids: BTreeMap::new(),
            module_checksums: BTreeMap::new(),
            contract_addresses: BTreeMap::new(),
            completed_actions: BTreeSet::new(),
            pending_txs: BTreeMap::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn module_ids(&self) -> &BTreeMap<String, ModuleId> {
        &self.module_ids
    }

    pub fn contract_addresses(&self) -> &BTreeMap<String, Address> {
        &self.contract_addresses
    }

    pub fn completed_actions(&self) -> &BTreeSet<String> {
        &self.completed_actions
    }

    pub fn pending_txs(&self) -> &BTreeMap<String, String> {
        &self.pending_txs
    }

    pub fn module_id(&self, name: &str) -> Option<&ModuleId> {
        self.module_ids.get(name)
    }

    pub fn module_checksum(&self, name: &str) -> Option<&str> {
        self.module_checksums.get(name).map(String::as_str)
    }

    pub fn address(&self, name: &str) -> Option<&Address> {
        self.contract_addresses.get(name)
    }

    pub fn is_done(&self, action: &str) -> bool {
        self.completed_actions.contains(action)
    }

    pub fn pending_tx(&self, step: &str) -> Option<&str> {
        self.pending_txs.get(step).map(String::as_str)
    }

    /// Whether the given key has been recorded.
    pub fn contains(&self, key: &StoreKey) -> bool {
        match key {
            StoreKey::Module(name) => self.module_ids.contains_key(name),
            StoreKey::Contract(name) => self.contract_addresses.contains_key(name),
            StoreKey::Action(action) => self.completed_actions.contains(action),
        }
    }

    /// Every recorded key, in a stable order.
    pub fn recorded_keys(&self) -> BTreeSet<StoreKey> {
        let modules = self.module_ids.keys().cloned().map(StoreKey::Module);
        let contracts = self
            .contract_addresses
            .keys()
            .cloned()
            .map(StoreKey::Contract);
        let actions = self.completed_actions.iter().cloned().map(StoreKey::Action);
        modules.chain(contracts).chain(actions).collect()
    }

    /// Record an uploaded module.
    ///
    /// Re-recording the same id is a no-op; a different id is refused.
    pub fn set_module_id(
        &mut self,
        name: &str,
        id: ModuleId,
        checksum: Option<String>,
    ) -> Result<(), StoreError> {
        if let Some(existing) = self.module_ids.get(name) {
            if *existing == id {
                return Ok(());
            }
            return Err(StoreError::WriteOnce {
                entry: StoreKey::module(name),
                existing: existing.to_string(),
                attempted: id.to_string(),
            });
        }
        self.module_ids.insert(name.to_string(), id);
        if let Some(checksum) = checksum {
            self.module_checksums.insert(name.to_string(), checksum);
        }
        self.touch();
        Ok(())
    }

    /// Record an instantiated contract address.
    pub fn set_address(&mut self, name: &str, address: Address) -> Result<(), StoreError> {
        if let Some(existing) = self.contract_addresses.get(name) {
            if *existing == address {
                return Ok(());
            }
            return Err(StoreError::WriteOnce {
                entry: StoreKey::contract(name),
                existing: existing.to_string(),
                attempted: address.to_string(),
            });
        }
        self.contract_addresses.insert(name.to_string(), address);
        self.touch();
        Ok(())
    }

    /// Mark a one-shot action as applied.
    pub fn mark_done(&mut self, action: &str) {
        if self.completed_actions.insert(action.to_string()) {
            self.touch();
        }
    }

    /// Record that `step` may have a transaction in flight whose hash is
    /// not known.
    pub fn set_pending_unknown(&mut self, step: &str) {
        self.set_pending_tx(step, UNKNOWN_TX_HASH);
    }

    pub fn set_pending_tx(&mut self, step: &str, tx_hash: &str) {
        self.pending_txs.insert(step.to_string(), tx_hash.to_string());
        self.touch();
    }

    /// Forget a pending transaction.
    ///
    /// Returns the hash that was recorded, if any.
    pub fn clear_pending_tx(&mut self, step: &str) -> Option<String> {
        let removed = self.pending_txs.remove(step);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Validate the state after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.version != STATE_VERSION {
            return Err(format!("unsupported state version {}", self.version));
        }
        if let Some((name, _)) = self.module_ids.iter().find(|(_, id)| id.as_str().is_empty()) {
            return Err(format!("empty module id recorded for '{name}'"));
        }
        if let Some((name, _)) = self
            .contract_addresses
            .iter()
            .find(|(_, addr)| addr.as_str().is_empty())
        {
            return Err(format!("empty address recorded for '{name}'"));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for DeploymentState {
    fn default() -> Self {
        Self::new()
    }
}
