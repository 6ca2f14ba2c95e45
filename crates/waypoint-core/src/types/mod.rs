//! Shared core types used across the store, step and chain layers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle returned by a successful module upload (a code id on
/// CosmWasm chains).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// JSON form used when the id is spliced into a message.
    ///
    /// Numeric ids are emitted as numbers since that is what instantiate
    /// messages on CosmWasm chains expect.
    pub fn to_json(&self) -> serde_json::Value {
        match self.0.parse::<u64>() {
            Ok(n) => serde_json::Value::from(n),
            Err(_) => serde_json::Value::from(self.0.clone()),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// On-chain contract address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Native funds attached to an execute call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: u128,
}

impl Coin {
    pub fn new(amount: u128, denom: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// A key in the progress store.
///
/// Steps declare the keys they need (preconditions) and the keys they
/// record (postconditions) in terms of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreKey {
    /// Module id recorded by an upload step.
    Module(String),
    /// Contract address recorded by an instantiate step.
    Contract(String),
    /// Completion marker recorded by a one-shot configuration step.
    Action(String),
}

impl StoreKey {
    pub fn module(name: impl Into<String>) -> Self {
        Self::Module(name.into())
    }

    pub fn contract(name: impl Into<String>) -> Self {
        Self::Contract(name.into())
    }

    pub fn action(key: impl Into<String>) -> Self {
        Self::Action(key.into())
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKey::Module(name) => write!(f, "module:{name}"),
            StoreKey::Contract(name) => write!(f, "contract:{name}"),
            StoreKey::Action(key) => write!(f, "action:{key}"),
        }
    }
}
