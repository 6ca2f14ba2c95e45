//! Chain adapter that drives a Cosmos SDK node binary.
//!
//! Transactions are broadcast with `<binary> tx wasm ... --output json` and
//! then confirmed by polling `<binary> q tx <hash>` until the transaction is
//! included or the confirmation timeout runs out. Any `wasmd`-compatible
//! binary works (`wasmd`, `neutrond`, `osmosisd`, ...).

use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::{Artifact, ChainAdapter, Event, Instantiated, TxLookup, TxResponse, Uploaded};
use crate::error::ChainError;
use crate::types::{Address, Coin, ModuleId};

#[derive(Debug, Clone)]
pub struct CliChainOptions {
    /// Node binary, e.g. `neutrond`
    pub binary: String,
    /// RPC endpoint passed as `--node`
    pub node: String,
    pub chain_id: String,
    /// Keyring key name used with `--from`
    pub signer: String,
    pub keyring_backend: String,
    pub gas_prices: String,
    pub gas_adjustment: f64,
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug)]
pub struct CliChain {
    opts: CliChainOptions,
}

impl CliChain {
    pub fn new(opts: CliChainOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &CliChainOptions {
        &self.opts
    }

    fn run(&self, args: &[String]) -> Result<Output, ChainError> {
        tracing::debug!(binary = %self.opts.binary, ?args, "Invoking node binary");
        let output = Command::new(&self.opts.binary)
            .args(args)
            .output()
            .map_err(|e| {
                ChainError::Transport(format!("failed to run {}: {}", self.opts.binary, e))
            })?;
        Ok(Output {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn tx_flags(&self) -> Vec<String> {
        vec![
            "--from".to_string(),
            self.opts.signer.clone(),
            "--chain-id".to_string(),
            self.opts.chain_id.clone(),
            "--node".to_string(),
            self.opts.node.clone(),
            "--keyring-backend".to_string(),
            self.opts.keyring_backend.clone(),
            "--gas".to_string(),
            "auto".to_string(),
            "--gas-adjustment".to_string(),
            self.opts.gas_adjustment.to_string(),
            "--gas-prices".to_string(),
            self.opts.gas_prices.clone(),
            "--broadcast-mode".to_string(),
            "sync".to_string(),
            "--output".to_string(),
            "json".to_string(),
            "-y".to_string(),
        ]
    }

    /// Broadcast a transaction and wait for it to land.
    fn broadcast(&self, mut args: Vec<String>) -> Result<TxResponse, ChainError> {
        args.extend(self.tx_flags());
        let output = self.run(&args)?;
        if !output.success {
            return Err(classify_failure(&output.stderr));
        }
        let tx_hash = parse_broadcast(&output.stdout)?;
        tracing::debug!(tx_hash = %tx_hash, "Broadcast accepted, waiting for inclusion");
        self.wait_for(&tx_hash)
    }

    fn wait_for(&self, tx_hash: &str) -> Result<TxResponse, ChainError> {
        let deadline = Instant::now() + self.opts.confirm_timeout;
        loop {
            match self.query_tx(tx_hash) {
                Ok(Some(TxLookup::Succeeded(tx))) => return Ok(tx),
                Ok(Some(TxLookup::Failed { code, log })) => {
                    return Err(ChainError::Rejected { code, log });
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(tx_hash, error = %err, "Confirmation poll failed");
                }
            }
            if Instant::now() >= deadline {
                return Err(ChainError::Unconfirmed {
                    tx_hash: tx_hash.to_string(),
                });
            }
            thread::sleep(self.opts.poll_interval);
        }
    }

    fn query_tx(&self, tx_hash: &str) -> Result<Option<TxLookup>, ChainError> {
        let args = vec![
            "query".to_string(),
            "tx".to_string(),
            tx_hash.to_string(),
            "--node".to_string(),
            self.opts.node.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let output = self.run(&args)?;
        if !output.success {
            if output.stderr.contains("not found") {
                return Ok(None);
            }
            return Err(ChainError::Transport(output.stderr));
        }
        parse_tx(&output.stdout).map(Some)
    }
}

impl ChainAdapter for CliChain {
    fn upload(&mut self, artifact: &Artifact) -> Result<Uploaded, ChainError> {
        let args = vec![
            "tx".to_string(),
            "wasm".to_string(),
            "store".to_string(),
            artifact.path.to_string_lossy().to_string(),
        ];
        Uploaded::from_tx(self.broadcast(args)?)
    }

    fn instantiate(
        &mut self,
        module: &ModuleId,
        msg: &Value,
        label: &str,
        admin: Option<&str>,
    ) -> Result<Instantiated, ChainError> {
        let mut args = vec![
            "tx".to_string(),
            "wasm".to_string(),
            "instantiate".to_string(),
            module.to_string(),
            msg.to_string(),
            "--label".to_string(),
            label.to_string(),
        ];
        match admin {
            Some(admin) => {
                args.push("--admin".to_string());
                args.push(admin.to_string());
            }
            None => args.push("--no-admin".to_string()),
        }
        Instantiated::from_tx(self.broadcast(args)?)
    }

    fn execute(
        &mut self,
        contract: &Address,
        msg: &Value,
        funds: &[Coin],
    ) -> Result<TxResponse, ChainError> {
        let mut args = vec![
            "tx".to_string(),
            "wasm".to_string(),
            "execute".to_string(),
            contract.to_string(),
            msg.to_string(),
        ];
        if !funds.is_empty() {
            let amount = funds
                .iter()
                .map(Coin::to_string)
                .collect::<Vec<_>>()
                .join(",");
            args.push("--amount".to_string());
            args.push(amount);
        }
        self.broadcast(args)
    }

    fn query_smart(&mut self, contract: &Address, msg: &Value) -> Result<Value, ChainError> {
        let args = vec![
            "query".to_string(),
            "wasm".to_string(),
            "contract-state".to_string(),
            "smart".to_string(),
            contract.to_string(),
            msg.to_string(),
            "--node".to_string(),
            self.opts.node.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let output = self.run(&args)?;
        if !output.success {
            return Err(ChainError::Query(output.stderr));
        }
        let body: Value = serde_json::from_str(&output.stdout)
            .map_err(|e| ChainError::UnexpectedResponse(format!("query output: {e}")))?;
        body.get("data")
            .cloned()
            .ok_or_else(|| ChainError::UnexpectedResponse("query output has no data".to_string()))
    }

    fn lookup_tx(&mut self, tx_hash: &str) -> Result<Option<TxLookup>, ChainError> {
        self.query_tx(tx_hash)
    }
}

struct Output {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Map a failed broadcast command to a chain error.
///
/// Only failures to reach the node at all are safe to resend. A deadline or
/// a failed POST may hit after the node accepted the transaction.
fn classify_failure(stderr: &str) -> ChainError {
    let lower = stderr.to_lowercase();
    if lower.contains("connection refused")
        || lower.contains("no such host")
        || lower.contains("dial tcp")
    {
        ChainError::Transport(stderr.to_string())
    } else if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("deadline exceeded")
        || lower.contains("post failed")
        || lower.contains("connection reset")
    {
        ChainError::BroadcastUncertain(stderr.to_string())
    } else {
        // Simulation failures land here: the chain refused the message.
        ChainError::Rejected {
            code: 0,
            log: stderr.to_string(),
        }
    }
}

/// Extract the hash from a sync-mode broadcast response.
fn parse_broadcast(stdout: &str) -> Result<String, ChainError> {
    let body: Value = serde_json::from_str(stdout)
        .map_err(|e| ChainError::UnexpectedResponse(format!("broadcast output: {e}")))?;
    let code = body.get("code").and_then(Value::as_u64).unwrap_or(0) as u32;
    if code != 0 {
        let log = body
            .get("raw_log")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(ChainError::Rejected { code, log });
    }
    body.get("txhash")
        .and_then(Value::as_str)
        .filter(|hash| !hash.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ChainError::UnexpectedResponse("broadcast output has no txhash".to_string()))
}

/// Parse the JSON printed by `q tx`.
fn parse_tx(stdout: &str) -> Result<TxLookup, ChainError> {
    let body: Value = serde_json::from_str(stdout)
        .map_err(|e| ChainError::UnexpectedResponse(format!("tx output: {e}")))?;
    let code = body.get("code").and_then(Value::as_u64).unwrap_or(0) as u32;
    if code != 0 {
        let log = body
            .get("raw_log")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Ok(TxLookup::Failed { code, log });
    }

    let tx_hash = body
        .get("txhash")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let gas_used = match body.get("gas_used") {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    };

    // SDK 0.50+ reports events at the top level; older nodes nest them in logs.
    let mut raw_events: Vec<&Value> = body
        .get("events")
        .and_then(Value::as_array)
        .map(|events| events.iter().collect())
        .unwrap_or_default();
    if raw_events.is_empty()
        && let Some(logs) = body.get("logs").and_then(Value::as_array)
    {
        raw_events = logs
            .iter()
            .filter_map(|log| log.get("events").and_then(Value::as_array))
            .flatten()
            .collect();
    }

    let events = raw_events.into_iter().filter_map(parse_event).collect();
    Ok(TxLookup::Succeeded(TxResponse {
        tx_hash,
        gas_used,
        events,
    }))
}

fn parse_event(raw: &Value) -> Option<Event> {
    let kind = raw.get("type").and_then(Value::as_str)?;
    let attributes = raw
        .get("attributes")
        .and_then(Value::as_array)
        .map(|attrs| {
            attrs
                .iter()
                .filter_map(|attr| {
                    let key = attr.get("key").and_then(Value::as_str)?;
                    let value = attr.get("value").and_then(Value::as_str).unwrap_or_default();
                    Some((key.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();
    Some(Event {
        kind: kind.to_string(),
        attributes,
    })
}
