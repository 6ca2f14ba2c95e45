//! Step library: named, skip-checked units of deployment work.
//!
//! Each step declares the store keys it reads and the key it records, and
//! performs at most one chain interaction when run.

pub mod catalogue;
pub mod exec;
pub mod plan;
pub mod template;

use std::path::PathBuf;

use serde_json::Value;

use crate::types::{Coin, StoreKey};

pub use exec::{StepOutcome, run_step};
pub use plan::{LintIssue, Plan};

/// The single chain interaction a step performs.
#[derive(Debug, Clone)]
pub enum StepAction {
    Upload {
        module: String,
        artifact: PathBuf,
    },
    Instantiate {
        contract: String,
        module: String,
        label: String,
        admin: Option<String>,
        msg: Value,
    },
    Execute {
        contract: String,
        msg: Value,
        funds: Vec<Coin>,
    },
}

/// One unit of the deployment plan.
#[derive(Debug, Clone)]
pub struct Step {
    name: String,
    action: StepAction,
    requires: Vec<StoreKey>,
    produces: StoreKey,
}

impl Step {
    /// Upload `module` from `artifact`; records the module id.
    pub fn upload(module: &str, artifact: impl Into<PathBuf>) -> Self {
        Self {
            name: format!("upload:{module}"),
            action: StepAction::Upload {
                module: module.to_string(),
                artifact: artifact.into(),
            },
            requires: Vec::new(),
            produces: StoreKey::module(module),
        }
    }

    /// Instantiate `contract` from the uploaded `module`; records its address.
    ///
    /// The label defaults to the contract name.
    pub fn instantiate(contract: &str, module: &str, msg: Value) -> Self {
        let mut requires = vec![StoreKey::module(module)];
        requires.extend(template::store_keys(&msg));
        Self {
            name: format!("instantiate:{contract}"),
            action: StepAction::Instantiate {
                contract: contract.to_string(),
                module: module.to_string(),
                label: contract.to_string(),
                admin: None,
                msg,
            },
            requires: dedup(requires),
            produces: StoreKey::contract(contract),
        }
    }

    /// Execute `msg` on `contract` once; records `action_key` as done.
    pub fn execute(action_key: &str, contract: &str, msg: Value) -> Self {
        let mut requires = vec![StoreKey::contract(contract)];
        requires.extend(template::store_keys(&msg));
        Self {
            name: action_key.to_string(),
            action: StepAction::Execute {
                contract: contract.to_string(),
                msg,
                funds: Vec::new(),
            },
            requires: dedup(requires),
            produces: StoreKey::action(action_key),
        }
    }

    pub fn with_label(mut self, new_label: impl Into<String>) -> Self {
        if let StepAction::Instantiate { label, .. } = &mut self.action {
            *label = new_label.into();
        }
        self
    }

    pub fn with_admin(mut self, new_admin: impl Into<String>) -> Self {
        if let StepAction::Instantiate { admin, .. } = &mut self.action {
            *admin = Some(new_admin.into());
        }
        self
    }

    pub fn with_funds(mut self, coins: Vec<Coin>) -> Self {
        if let StepAction::Execute { funds, .. } = &mut self.action {
            *funds = coins;
        }
        self
    }

    /// Add a precondition the message itself does not mention.
    pub fn requiring(mut self, key: StoreKey) -> Self {
        if !self.requires.contains(&key) {
            self.requires.push(key);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &StepAction {
        &self.action
    }

    pub fn requires(&self) -> &[StoreKey] {
        &self.requires
    }

    pub fn produces(&self) -> &StoreKey {
        &self.produces
    }
}

fn dedup(keys: Vec<StoreKey>) -> Vec<StoreKey> {
    let mut out: Vec<StoreKey> = Vec::with_capacity(keys.len());
    for key in keys {
        if !out.contains(&key) {
            out.push(key);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn instantiate_requires_module_and_referenced_contracts() {
        let step = Step::instantiate(
            "red-bank",
            "red-bank",
            json!({"config": {"address_provider": "${contract:address-provider}"}}),
        );
        assert_eq!(step.name(), "instantiate:red-bank");
        assert_eq!(
            step.requires(),
            &[
                StoreKey::module("red-bank"),
                StoreKey::contract("address-provider")
            ]
        );
        assert_eq!(step.produces(), &StoreKey::contract("red-bank"));
    }

    #[test]
    fn execute_requires_target_once() {
        let step = Step::execute(
            "configure:oracle:self",
            "oracle",
            json!({"set": "${contract:oracle}"}),
        );
        assert_eq!(step.requires(), &[StoreKey::contract("oracle")]);
        assert_eq!(step.produces(), &StoreKey::action("configure:oracle:self"));
    }
}
