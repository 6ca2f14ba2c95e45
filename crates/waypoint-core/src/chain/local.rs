//! In-memory chain used for dry runs and tests.
//!
//! Hands out sequential code ids and deterministic addresses and keeps a log
//! of every call. It does not run contract code: a smart query returns the
//! contract's recorded instantiation details and how many messages it has
//! received.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Value, json};

use super::{Artifact, ChainAdapter, Event, Instantiated, TxLookup, TxResponse, Uploaded};
use crate::error::ChainError;
use crate::state::DeploymentState;
use crate::types::{Address, Coin, ModuleId};

/// A call received by [`LocalChain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainCall {
    Upload { module: String },
    Instantiate { label: String },
    Execute { contract: Address, msg: Value },
    Query { contract: Address },
    LookupTx { tx_hash: String },
}

#[derive(Debug, Clone)]
struct LocalContract {
    code_id: u64,
    label: String,
    admin: Option<String>,
    init_msg: Value,
    executed: u64,
}

#[derive(Debug)]
pub struct LocalChain {
    prefix: String,
    height: u64,
    codes: BTreeMap<u64, String>,
    contracts: BTreeMap<Address, LocalContract>,
    txs: HashMap<String, TxResponse>,
    calls: Vec<ChainCall>,
}

impl Default for LocalChain {
    fn default() -> Self {
        Self::new("local")
    }
}

impl LocalChain {
    /// Create an empty chain whose addresses start with `prefix`.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            height: 0,
            codes: BTreeMap::new(),
            contracts: BTreeMap::new(),
            txs: HashMap::new(),
            calls: Vec::new(),
        }
    }

    /// Register everything `state` records as already on chain, so that a
    /// dry run can continue a partially completed deployment.
    pub fn adopt(&mut self, state: &DeploymentState) {
        for (module, id) in state.module_ids() {
            if let Ok(code_id) = id.as_str().parse::<u64>() {
                let checksum = state.module_checksum(module).unwrap_or_default();
                self.codes.insert(code_id, checksum.to_string());
            }
        }
        for (name, address) in state.contract_addresses() {
            self.contracts.entry(address.clone()).or_insert_with(|| LocalContract {
                code_id: 0,
                label: name.clone(),
                admin: None,
                init_msg: Value::Null,
                executed: 0,
            });
        }
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> &[ChainCall] {
        &self.calls
    }

    /// Calls that would have been transactions on a real chain.
    pub fn tx_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    ChainCall::Upload { .. }
                        | ChainCall::Instantiate { .. }
                        | ChainCall::Execute { .. }
                )
            })
            .count()
    }

    pub fn contract_count(&self) -> usize {
        self.contracts.len()
    }

    fn next_tx(&mut self, events: Vec<Event>, gas_used: u64) -> TxResponse {
        self.height += 1;
        let seed = format!("{}:{}:{:?}", self.prefix, self.height, events);
        let tx_hash = blake3::hash(seed.as_bytes()).to_hex().to_uppercase();
        let tx = TxResponse {
            tx_hash: tx_hash.clone(),
            gas_used,
            events,
        };
        self.txs.insert(tx_hash, tx.clone());
        tx
    }

    fn derive_address(&self, code_id: u64, label: &str) -> Address {
        let seed = format!("{}:{}:{}:{}", code_id, label, self.height, self.contracts.len());
        let digest = blake3::hash(seed.as_bytes()).to_hex().to_string();
        Address::new(format!("{}1{}", self.prefix, &digest[..38]))
    }
}

impl ChainAdapter for LocalChain {
    fn upload(&mut self, artifact: &Artifact) -> Result<Uploaded, ChainError> {
        self.calls.push(ChainCall::Upload {
            module: artifact.module.clone(),
        });
        let code_id = self.codes.keys().next_back().map_or(1, |last| last + 1);
        self.codes.insert(code_id, artifact.checksum.clone());

        let gas = 500_000 + artifact.bytecode.len() as u64 * 10;
        let tx = self.next_tx(
            vec![
                Event::new("store_code")
                    .attr("code_checksum", artifact.checksum.clone())
                    .attr("code_id", code_id.to_string()),
            ],
            gas,
        );
        Uploaded::from_tx(tx)
    }

    fn instantiate(
        &mut self,
        module: &ModuleId,
        msg: &Value,
        label: &str,
        admin: Option<&str>,
    ) -> Result<Instantiated, ChainError> {
        self.calls.push(ChainCall::Instantiate {
            label: label.to_string(),
        });
        let code_id: u64 = module
            .as_str()
            .parse()
            .map_err(|_| ChainError::Rejected {
                code: 2,
                log: format!("invalid code id '{module}'"),
            })?;
        if !self.codes.contains_key(&code_id) {
            return Err(ChainError::Rejected {
                code: 2,
                log: format!("no such code: {code_id}"),
            });
        }

        let address = self.derive_address(code_id, label);
        self.contracts.insert(
            address.clone(),
            LocalContract {
                code_id,
                label: label.to_string(),
                admin: admin.map(str::to_string),
                init_msg: msg.clone(),
                executed: 0,
            },
        );
        let tx = self.next_tx(
            vec![
                Event::new("instantiate")
                    .attr("_contract_address", address.to_string())
                    .attr("code_id", code_id.to_string()),
            ],
            250_000,
        );
        Instantiated::from_tx(tx)
    }

    fn execute(
        &mut self,
        contract: &Address,
        msg: &Value,
        _funds: &[Coin],
    ) -> Result<TxResponse, ChainError> {
        self.calls.push(ChainCall::Execute {
            contract: contract.clone(),
            msg: msg.clone(),
        });
        let entry = self
            .contracts
            .get_mut(contract)
            .ok_or_else(|| ChainError::Rejected {
                code: 5,
                log: format!("no such contract: {contract}"),
            })?;
        entry.executed += 1;

        let action = msg
            .as_object()
            .and_then(|obj| obj.keys().next())
            .cloned()
            .unwrap_or_default();
        Ok(self.next_tx(
            vec![
                Event::new("execute").attr("_contract_address", contract.to_string()),
                Event::new("wasm").attr("action", action),
            ],
            180_000,
        ))
    }

    fn query_smart(&mut self, contract: &Address, _msg: &Value) -> Result<Value, ChainError> {
        self.calls.push(ChainCall::Query {
            contract: contract.clone(),
        });
        let entry = self
            .contracts
            .get(contract)
            .ok_or_else(|| ChainError::Query(format!("no such contract: {contract}")))?;
        Ok(json!({
            "code_id": entry.code_id,
            "label": entry.label,
            "admin": entry.admin,
            "init_msg": entry.init_msg,
            "executed": entry.executed,
        }))
    }

    fn lookup_tx(&mut self, tx_hash: &str) -> Result<Option<TxLookup>, ChainError> {
        self.calls.push(ChainCall::LookupTx {
            tx_hash: tx_hash.to_string(),
        });
        Ok(self.txs.get(tx_hash).cloned().map(TxLookup::Succeeded))
    }
}
