//! Runs flows and evaluates their checks.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::chain::ChainAdapter;
use crate::error::FlowError;
use crate::state::DeploymentState;
use crate::steps::template::{self, Placeholder};
use crate::types::Address;

use super::{Check, Expectation, Flow, FlowAction};

#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub action: String,
    pub tx_hash: String,
    pub gas_used: u64,
    pub checks_passed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    pub flow: String,
    pub actions: Vec<ActionReport>,
}

/// Runs flows against contracts recorded in a deployment state.
pub struct FlowValidator<'a> {
    chain: &'a mut dyn ChainAdapter,
    state: &'a DeploymentState,
}

impl<'a> FlowValidator<'a> {
    pub fn new(chain: &'a mut dyn ChainAdapter, state: &'a DeploymentState) -> Self {
        Self { chain, state }
    }

    pub fn run(&mut self, flow: &Flow) -> Result<FlowReport, FlowError> {
        tracing::info!(flow = %flow.name, actions = flow.actions.len(), "Running flow");
        let mut vars = HashMap::new();
        let mut report = FlowReport {
            flow: flow.name.clone(),
            actions: Vec::new(),
        };
        for action in &flow.actions {
            let done = self.run_action(flow, action, &mut vars)?;
            report.actions.push(done);
        }
        tracing::info!(flow = %flow.name, "Flow passed");
        Ok(report)
    }

    fn run_action(
        &mut self,
        flow: &Flow,
        action: &FlowAction,
        vars: &mut HashMap<String, String>,
    ) -> Result<ActionReport, FlowError> {
        let ctx = ActionCtx { flow, action };

        let baselines = action
            .checks
            .iter()
            .map(|check| {
                if !check.needs_baseline() {
                    return Ok(None);
                }
                // A query that depends on a value this action produces has
                // no meaningful "before"; it starts from zero.
                match self.render(&ctx, &check.query, vars) {
                    Ok(query) => self
                        .observe(&ctx, check, &query)
                        .map(|value| Some(value.cloned_or_null())),
                    Err(FlowError::Unresolved { .. }) => Ok(Some(Value::Null)),
                    Err(err) => Err(err),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let contract = self.address(&ctx, &action.contract)?;
        let msg = self.render(&ctx, &action.msg, vars)?;
        let tx = self
            .chain
            .execute(&contract, &msg, &action.funds)
            .map_err(|source| FlowError::Chain {
                flow: flow.name.clone(),
                action: action.name.clone(),
                source,
            })?;
        tracing::info!(
            flow = %flow.name,
            action = %action.name,
            tx_hash = %tx.tx_hash,
            gas_used = tx.gas_used,
            "Action executed"
        );

        for capture in &action.captures {
            let value = tx
                .attribute(&capture.event, &capture.attribute)
                .ok_or_else(|| FlowError::CaptureMissing {
                    flow: flow.name.clone(),
                    action: action.name.clone(),
                    event: capture.event.clone(),
                    attribute: capture.attribute.clone(),
                })?;
            vars.insert(capture.var.clone(), value.to_string());
        }

        for (check, baseline) in action.checks.iter().zip(baselines) {
            let query = self.render(&ctx, &check.query, vars)?;
            let after = self.observe(&ctx, check, &query)?.cloned_or_null();
            evaluate(&check.expect, baseline.as_ref(), &after).map_err(|detail| {
                ctx.assertion(format!("{} {}: {}", check.contract, check.pointer, detail))
            })?;
        }

        Ok(ActionReport {
            action: action.name.clone(),
            tx_hash: tx.tx_hash,
            gas_used: tx.gas_used,
            checks_passed: action.checks.len(),
        })
    }

    fn address(&self, ctx: &ActionCtx<'_>, contract: &str) -> Result<Address, FlowError> {
        self.state
            .address(contract)
            .cloned()
            .ok_or_else(|| ctx.unresolved(format!("contract '{contract}'")))
    }

    fn render(
        &self,
        ctx: &ActionCtx<'_>,
        template: &Value,
        vars: &HashMap<String, String>,
    ) -> Result<Value, FlowError> {
        template::render(template, &|p: &Placeholder| match p {
            Placeholder::Contract(name) => self
                .state
                .address(name)
                .map(|addr| Value::String(addr.to_string())),
            Placeholder::Module(name) => self.state.module_id(name).map(|id| id.to_json()),
            Placeholder::Var(name) => vars.get(name).cloned().map(Value::String),
        })
        .map_err(|p| ctx.unresolved(p.to_string()))
    }

    fn observe(
        &mut self,
        ctx: &ActionCtx<'_>,
        check: &Check,
        query: &Value,
    ) -> Result<Observed, FlowError> {
        let contract = self.address(ctx, &check.contract)?;
        let response = self
            .chain
            .query_smart(&contract, query)
            .map_err(|source| FlowError::Chain {
                flow: ctx.flow.name.clone(),
                action: ctx.action.name.clone(),
                source,
            })?;
        Ok(Observed(response.pointer(&check.pointer).cloned()))
    }
}

struct ActionCtx<'a> {
    flow: &'a Flow,
    action: &'a FlowAction,
}

impl ActionCtx<'_> {
    fn unresolved(&self, missing: String) -> FlowError {
        FlowError::Unresolved {
            flow: self.flow.name.clone(),
            action: self.action.name.clone(),
            missing,
        }
    }

    fn assertion(&self, detail: String) -> FlowError {
        FlowError::AssertionFailed {
            flow: self.flow.name.clone(),
            action: self.action.name.clone(),
            detail,
        }
    }
}

/// Value found at a check's pointer, if any.
struct Observed(Option<Value>);

impl Observed {
    fn cloned_or_null(self) -> Value {
        self.0.unwrap_or(Value::Null)
    }
}

/// Compare an observation against its expectation.
fn evaluate(expect: &Expectation, before: Option<&Value>, after: &Value) -> Result<(), String> {
    match expect {
        Expectation::Exists => {
            if after.is_null() {
                Err("expected a value, found none".to_string())
            } else {
                Ok(())
            }
        }
        Expectation::Equals(expected) => {
            if after == expected {
                Ok(())
            } else {
                Err(format!("expected {expected}, found {after}"))
            }
        }
        Expectation::IncreasesBy(n) => {
            let (b, a) = amounts(before, after)?;
            if b.checked_add(*n) == Some(a) {
                Ok(())
            } else {
                Err(format!("expected {b} + {n}, found {a}"))
            }
        }
        Expectation::IncreasesByAtLeast(n) => {
            let (b, a) = amounts(before, after)?;
            match b.checked_add(*n) {
                Some(min) if a >= min => Ok(()),
                _ => Err(format!("expected at least {b} + {n}, found {a}")),
            }
        }
        Expectation::DecreasesBy(n) => {
            let (b, a) = amounts(before, after)?;
            if b.checked_sub(*n) == Some(a) {
                Ok(())
            } else {
                Err(format!("expected {b} - {n}, found {a}"))
            }
        }
        Expectation::Decreases => {
            let (b, a) = amounts(before, after)?;
            if a < b {
                Ok(())
            } else {
                Err(format!("expected less than {b}, found {a}"))
            }
        }
    }
}

fn amounts(before: Option<&Value>, after: &Value) -> Result<(u128, u128), String> {
    let before = before.map(amount).transpose()?.unwrap_or(0);
    Ok((before, amount(after)?))
}

/// Parse an on-chain amount. Missing values count as zero.
fn amount(value: &Value) -> Result<u128, String> {
    match value {
        Value::Null => Ok(0),
        Value::String(s) => s
            .parse()
            .map_err(|_| format!("'{s}' is not an integer amount")),
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| format!("{n} is not an integer amount")),
        other => Err(format!("{other} is not an amount")),
    }
}
