//! Chain adapter layer.
//!
//! Everything the deployment needs from a chain goes through [`ChainAdapter`]:
//! upload a module, instantiate it, execute and query contracts, and look a
//! transaction up by hash. Calls block until the chain has answered.

pub mod cli;
pub mod local;

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::ChainError;
use crate::types::{Address, Coin, ModuleId};

pub use cli::{CliChain, CliChainOptions};
pub use local::{ChainCall, LocalChain};

/// Magic header every wasm module starts with.
const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// A compiled module ready to be uploaded.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub module: String,
    pub path: PathBuf,
    pub bytecode: Vec<u8>,
    /// blake3 hex digest of `bytecode`
    pub checksum: String,
}

impl Artifact {
    /// Read an artifact from disk and check it looks like wasm.
    pub fn read(module: &str, path: &Path) -> Result<Self, String> {
        let bytecode = std::fs::read(path).map_err(|e| e.to_string())?;
        Self::from_bytes(module, path, bytecode)
    }

    pub fn from_bytes(module: &str, path: &Path, bytecode: Vec<u8>) -> Result<Self, String> {
        if !bytecode.starts_with(WASM_MAGIC) {
            return Err("not a wasm module (missing \\0asm header)".to_string());
        }
        let checksum = blake3::hash(&bytecode).to_hex().to_string();
        Ok(Self {
            module: module.to_string(),
            path: path.to_path_buf(),
            bytecode,
            checksum,
        })
    }
}

/// A single event emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: String,
    pub attributes: Vec<(String, String)>,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Vec::new(),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }
}

/// Result of a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResponse {
    pub tx_hash: String,
    pub gas_used: u64,
    pub events: Vec<Event>,
}

impl TxResponse {
    /// First value of `key` on an event of type `kind`.
    pub fn attribute(&self, kind: &str, key: &str) -> Option<&str> {
        self.events
            .iter()
            .filter(|event| event.kind == kind)
            .flat_map(|event| event.attributes.iter())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Module id announced by a `store_code` event.
    pub fn module_id(&self) -> Result<ModuleId, ChainError> {
        match self.attribute("store_code", "code_id") {
            Some(id) if !id.is_empty() => Ok(ModuleId::new(id)),
            _ => Err(ChainError::UnexpectedResponse(format!(
                "transaction {} has no store_code.code_id attribute",
                self.tx_hash
            ))),
        }
    }

    /// Contract address announced by an `instantiate` event.
    pub fn contract_address(&self) -> Result<Address, ChainError> {
        match self.attribute("instantiate", "_contract_address") {
            Some(addr) if !addr.is_empty() => Ok(Address::new(addr)),
            _ => Err(ChainError::UnexpectedResponse(format!(
                "transaction {} has no instantiate._contract_address attribute",
                self.tx_hash
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Uploaded {
    pub module_id: ModuleId,
    pub tx: TxResponse,
}

impl Uploaded {
    pub fn from_tx(tx: TxResponse) -> Result<Self, ChainError> {
        Ok(Self {
            module_id: tx.module_id()?,
            tx,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Instantiated {
    pub address: Address,
    pub tx: TxResponse,
}

impl Instantiated {
    pub fn from_tx(tx: TxResponse) -> Result<Self, ChainError> {
        Ok(Self {
            address: tx.contract_address()?,
            tx,
        })
    }
}

/// Outcome of looking up a previously broadcast transaction.
#[derive(Debug, Clone)]
pub enum TxLookup {
    /// Included and succeeded.
    Succeeded(TxResponse),
    /// Included but failed; nothing was applied.
    Failed { code: u32, log: String },
}

/// Operations the deployment performs against a chain.
pub trait ChainAdapter {
    /// Upload a module and return its handle.
    fn upload(&mut self, artifact: &Artifact) -> Result<Uploaded, ChainError>;

    /// Create a contract from an uploaded module.
    fn instantiate(
        &mut self,
        module: &ModuleId,
        msg: &Value,
        label: &str,
        admin: Option<&str>,
    ) -> Result<Instantiated, ChainError>;

    /// Execute a message against a contract.
    fn execute(
        &mut self,
        contract: &Address,
        msg: &Value,
        funds: &[Coin],
    ) -> Result<TxResponse, ChainError>;

    /// Run a smart query against a contract.
    fn query_smart(&mut self, contract: &Address, msg: &Value) -> Result<Value, ChainError>;

    /// Look a transaction up by hash. `None` if the chain has no record of it.
    fn lookup_tx(&mut self, tx_hash: &str) -> Result<Option<TxLookup>, ChainError>;
}
