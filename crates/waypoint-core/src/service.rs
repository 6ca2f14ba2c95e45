//! Deploy, validate and resolve operations built on [`AppContext`].

use anyhow::Context as _;
use serde::Serialize;

use crate::chain::ChainAdapter;
use crate::context::AppContext;
use crate::flows::{Flow, FlowReport, FlowValidator, configured_flows};
use crate::pipeline::{Pipeline, RetryPolicy, RunReport};
use crate::state::{Session, StateKey, StateStore, load_or_default};
use crate::steps::Plan;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    /// Run against an in-memory chain and never touch the durable store
    pub dry_run: bool,
    /// Run validation flows even if the config does not enable them
    pub flows: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub dry_run: bool,
    pub report: RunReport,
    /// Flows that passed, in order
    pub flows: Vec<FlowReport>,
    /// Why the flow run stopped, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_failure: Option<String>,
}

/// Run the configured plan, then any enabled flows.
///
/// A failed run is returned as an error wrapping
/// [`PipelineError`](crate::pipeline::PipelineError), which carries the
/// partial report.
pub fn deploy(ctx: &AppContext, opts: DeployOptions) -> anyhow::Result<DeployOutcome> {
    let key = ctx.state_key()?;
    let plan = ctx.plan();
    let wants_flows = opts.flows || ctx.config().flows.enabled;

    if opts.dry_run {
        let (store, mut chain) = ctx.dry_run()?;
        tracing::info!(key = %key, "Dry run against an in-memory chain");
        let report = Pipeline::new(&store, &mut chain)
            .with_retry(RetryPolicy::default())
            .run(&key, &plan)?;
        if wants_flows {
            tracing::info!("Flows are skipped in a dry run");
        }
        return Ok(DeployOutcome {
            dry_run: true,
            report,
            flows: Vec::new(),
            flow_failure: None,
        });
    }

    let store = ctx.state_store();
    let mut chain = ctx.chain();
    let report = Pipeline::new(&store, &mut chain)
        .with_retry(ctx.retry_policy())
        .run(&key, &plan)?;

    let (flows, failure) = if wants_flows {
        run_flows_until_failure(&store, &key, &mut chain, &configured_flows(ctx.config()))?
    } else {
        (Vec::new(), None)
    };
    if let Some(err) = &failure {
        tracing::error!(key = %key, error = %format!("{err:#}"), "Validation flows failed");
    }

    Ok(DeployOutcome {
        dry_run: false,
        report,
        flows,
        flow_failure: failure.map(|err| format!("{err:#}")),
    })
}

/// Run `flows` in order against the contracts recorded under `key`.
pub fn run_flows(
    store: &dyn StateStore,
    key: &StateKey,
    chain: &mut dyn ChainAdapter,
    flows: &[Flow],
) -> anyhow::Result<Vec<FlowReport>> {
    let (reports, failure) = run_flows_until_failure(store, key, chain, flows)?;
    match failure {
        Some(err) => Err(err),
        None => Ok(reports),
    }
}

/// Run `flows` in order, stopping at the first failure.
///
/// Returns the reports of the flows that passed alongside the failure.
/// Only loading the recorded state fails the call itself.
fn run_flows_until_failure(
    store: &dyn StateStore,
    key: &StateKey,
    chain: &mut dyn ChainAdapter,
    flows: &[Flow],
) -> anyhow::Result<(Vec<FlowReport>, Option<anyhow::Error>)> {
    let state = load_or_default(store, key)?;
    let mut validator = FlowValidator::new(chain, &state);
    let mut reports = Vec::with_capacity(flows.len());
    for flow in flows {
        match validator
            .run(flow)
            .with_context(|| format!("Flow '{}' failed", flow.name))
        {
            Ok(report) => reports.push(report),
            Err(err) => return Ok((reports, Some(err))),
        }
    }
    Ok((reports, None))
}

/// Forget the unconfirmed transaction recorded for `step`, so the next run
/// sends it again. Returns the forgotten hash.
pub fn resolve_pending(
    store: &dyn StateStore,
    key: &StateKey,
    plan: &Plan,
    step: &str,
) -> anyhow::Result<String> {
    if plan.get(step).is_none() {
        anyhow::bail!("Step '{}' is not part of the plan", step);
    }
    if load_or_default(store, key)?.pending_tx(step).is_none() {
        anyhow::bail!("Step '{}' has no pending transaction", step);
    }
    let mut session = Session::open(store, key.clone())?;
    let cleared = session.state_mut().clear_pending_tx(step);
    session.close()?;
    let tx_hash = cleared.unwrap_or_default();
    tracing::info!(step, tx_hash = %tx_hash, "Cleared pending transaction");
    Ok(tx_hash)
}
