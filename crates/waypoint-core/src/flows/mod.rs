//! Post-deployment validation flows.
//!
//! A flow is a scripted list of user actions against the deployed contracts.
//! Each action may be followed by checks that query a contract and compare a
//! value before and after the action. Flows are not resumable; they run end
//! to end and stop at the first failed check.

pub mod scenarios;
pub mod validator;

use serde_json::Value;

use crate::types::Coin;

pub use scenarios::configured_flows;
pub use validator::{FlowReport, FlowValidator};

#[derive(Debug, Clone)]
pub struct Flow {
    pub name: String,
    pub actions: Vec<FlowAction>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    pub fn then(mut self, action: FlowAction) -> Self {
        self.actions.push(action);
        self
    }
}

/// One user action: an execute message plus what to verify afterwards.
#[derive(Debug, Clone)]
pub struct FlowAction {
    pub name: String,
    pub contract: String,
    pub msg: Value,
    pub funds: Vec<Coin>,
    pub captures: Vec<Capture>,
    pub checks: Vec<Check>,
}

impl FlowAction {
    pub fn new(name: impl Into<String>, contract: impl Into<String>, msg: Value) -> Self {
        Self {
            name: name.into(),
            contract: contract.into(),
            msg,
            funds: Vec::new(),
            captures: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn with_funds(mut self, funds: Vec<Coin>) -> Self {
        self.funds = funds;
        self
    }

    /// Bind an event attribute of the action's transaction to a flow variable.
    pub fn capture(mut self, event: &str, attribute: &str, var: &str) -> Self {
        self.captures.push(Capture {
            event: event.to_string(),
            attribute: attribute.to_string(),
            var: var.to_string(),
        });
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Capture {
    pub event: String,
    pub attribute: String,
    pub var: String,
}

/// A query whose answer must change in an expected way.
#[derive(Debug, Clone)]
pub struct Check {
    pub contract: String,
    pub query: Value,
    /// JSON pointer into the query response, e.g. `/amount`
    pub pointer: String,
    pub expect: Expectation,
}

impl Check {
    pub fn new(contract: impl Into<String>, query: Value, pointer: &str, expect: Expectation) -> Self {
        Self {
            contract: contract.into(),
            query,
            pointer: pointer.to_string(),
            expect,
        }
    }

    /// Whether the check needs a snapshot taken before the action.
    pub fn needs_baseline(&self) -> bool {
        matches!(
            self.expect,
            Expectation::IncreasesBy(_)
                | Expectation::IncreasesByAtLeast(_)
                | Expectation::DecreasesBy(_)
                | Expectation::Decreases
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    /// After = before + n
    IncreasesBy(u128),
    /// After >= before + n (interest may accrue in between)
    IncreasesByAtLeast(u128),
    /// After = before - n
    DecreasesBy(u128),
    /// After < before
    Decreases,
    /// After equals the given value
    Equals(Value),
    /// Something is present at the pointer
    Exists,
}
