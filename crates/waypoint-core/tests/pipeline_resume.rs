//! Resumability of the pipeline driver.
//!
//! The fixture plan uploads module A, instantiates A, uploads module B,
//! instantiates B with A's address in its message and finally configures B.

mod support;

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use waypoint_core::chain::ChainAdapter;
use waypoint_core::error::{ChainError, StepError, StoreError};
use waypoint_core::pipeline::{
    Pipeline, PipelineError, RetryPolicy, RunReport, RunStatus, StepReport,
};
use waypoint_core::service::resolve_pending;
use waypoint_core::state::{
    FileStateStore, MemoryStateStore, StateKey, StateStore, UNKNOWN_TX_HASH,
};
use waypoint_core::steps::{Plan, Step};
use waypoint_core::types::StoreKey;

use support::{FailingStore, Fault, FlakyChain, Op, artifacts, rejected, transport, uncertain};

fn key() -> StateKey {
    StateKey::new("testnet-1", "owner").unwrap()
}

fn two_contract_plan(paths: &HashMap<String, PathBuf>) -> Plan {
    [
        Step::upload("a", &paths["a"]),
        Step::instantiate("a", "a", json!({ "owner": "wasm1deployer" })),
        Step::upload("b", &paths["b"]),
        Step::instantiate("b", "b", json!({ "a": "${contract:a}" })),
        Step::execute("configure:b", "b", json!({ "set_a": { "address": "${contract:a}" } })),
    ]
    .into_iter()
    .collect()
}

fn run(
    store: &dyn StateStore,
    chain: &mut FlakyChain,
    plan: &Plan,
    retry: RetryPolicy,
) -> Result<RunReport, PipelineError> {
    Pipeline::new(store, chain).with_retry(retry).run(&key(), plan)
}

fn keys(items: &[StoreKey]) -> BTreeSet<StoreKey> {
    items.iter().cloned().collect()
}

fn retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff: Duration::ZERO,
    }
}

#[test]
fn fresh_run_executes_every_step_once() {
    let (_dir, paths) = artifacts(&["a", "b"]);
    let plan = two_contract_plan(&paths);
    let store = MemoryStateStore::new();
    let mut chain = FlakyChain::new();

    let report = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.executed(), 5);
    assert_eq!(chain.tx_count(), 5);
    assert!(report.gas_used() > 0);

    let state = store.load(&key()).unwrap();
    assert!(state.module_checksum("a").is_some());
    let b_init = chain
        .inner
        .query_smart(state.address("b").unwrap(), &json!({}))
        .unwrap();
    assert_eq!(b_init["init_msg"]["a"], state.address("a").unwrap().as_str());
}

#[test]
fn second_run_sends_nothing() {
    let (_dir, paths) = artifacts(&["a", "b"]);
    let plan = two_contract_plan(&paths);
    let store = MemoryStateStore::new();
    let mut chain = FlakyChain::new();
    run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap();
    let before = store.load(&key()).unwrap();

    let report = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.executed(), 0);
    assert_eq!(report.skipped(), 5);
    assert_eq!(chain.tx_count(), 5);
    let after = store.load(&key()).unwrap();
    assert_eq!(before.recorded_keys(), after.recorded_keys());
    assert_eq!(before.contract_addresses(), after.contract_addresses());
}

#[test]
fn failed_run_resumes_at_failing_step() {
    let (_dir, paths) = artifacts(&["a", "b"]);
    let plan = two_contract_plan(&paths);
    let store = MemoryStateStore::new();
    let mut chain = FlakyChain::new();
    chain.fail_nth(Op::Instantiate, 2, rejected());

    let err = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap_err();
    let report = err.report().unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.executed(), 3);
    assert!(matches!(
        err.step_error(),
        Some(StepError::StepExecutionFailed {
            source: ChainError::Rejected { code: 5, .. },
            ..
        })
    ));

    // Exactly what succeeded before the failure is durable.
    let partial = store.load(&key()).unwrap();
    assert_eq!(
        partial.recorded_keys(),
        keys(&[
            StoreKey::module("a"),
            StoreKey::contract("a"),
            StoreKey::module("b")
        ])
    );

    let resumed = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap();
    assert_eq!(resumed.skipped(), 3);
    assert_eq!(resumed.executed(), 2);
    assert_eq!(chain.tx_count(), 5);
    assert_eq!(chain.calls(Op::Upload), 2);

    // Same recorded outcome as a run that never failed.
    let clean_store = MemoryStateStore::new();
    let mut clean_chain = FlakyChain::new();
    run(&clean_store, &mut clean_chain, &plan, RetryPolicy::default()).unwrap();
    assert_eq!(
        store.load(&key()).unwrap().recorded_keys(),
        clean_store.load(&key()).unwrap().recorded_keys()
    );
}

#[test]
fn transport_failure_on_second_instantiate_resumes_cleanly() {
    let (_dir, paths) = artifacts(&["a", "b"]);
    let plan = two_contract_plan(&paths);
    let store = MemoryStateStore::new();
    let mut chain = FlakyChain::new();
    chain.fail_nth(Op::Instantiate, 2, transport());

    let err = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap_err();
    assert_eq!(err.report().unwrap().status, RunStatus::Failed);
    assert_eq!(
        store.load(&key()).unwrap().recorded_keys(),
        keys(&[
            StoreKey::module("a"),
            StoreKey::contract("a"),
            StoreKey::module("b")
        ])
    );

    let report = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.skipped(), 3);
    assert_eq!(report.executed(), 2);

    // upload a, upload b and instantiate a went out once each.
    assert_eq!(chain.calls(Op::Upload), 2);
    assert_eq!(chain.calls(Op::Instantiate), 3);
    let state = store.load(&key()).unwrap();
    assert!(state.contains(&StoreKey::contract("b")));
    assert!(state.is_done("configure:b"));
}

#[test]
fn missing_dependency_stops_before_any_chain_call() {
    let (_dir, paths) = artifacts(&["a", "b"]);
    let plan: Plan = [
        Step::upload("b", &paths["b"]),
        Step::instantiate("b", "b", json!({ "a": "${contract:a}" })),
    ]
    .into_iter()
    .collect();
    let store = MemoryStateStore::new();
    let mut chain = FlakyChain::new();

    let err = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap_err();

    match err.step_error() {
        Some(StepError::DependencyMissing { step, missing }) => {
            assert_eq!(step, "instantiate:b");
            assert_eq!(*missing, StoreKey::contract("a"));
        }
        other => panic!("expected DependencyMissing, got {other:?}"),
    }
    assert_eq!(chain.calls(Op::Instantiate), 0);
}

#[test]
fn per_item_steps_resume_individually() {
    let (_dir, paths) = artifacts(&["oracle"]);
    let mut plan = Plan::new();
    plan.push(Step::upload("oracle", &paths["oracle"]));
    plan.push(Step::instantiate("oracle", "oracle", json!({})));
    for denom in ["uatom", "uosmo", "untrn"] {
        plan.push(Step::execute(
            &format!("configure:oracle:price-source:{denom}"),
            "oracle",
            json!({
                "set_price_source": { "denom": denom, "price_source": { "fixed": { "price": "1" } } }
            }),
        ));
    }
    let store = MemoryStateStore::new();
    let mut chain = FlakyChain::new();
    chain.fail_nth(Op::Execute, 2, rejected());

    run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap_err();
    let partial = store.load(&key()).unwrap();
    assert!(partial.is_done("configure:oracle:price-source:uatom"));
    assert!(!partial.is_done("configure:oracle:price-source:uosmo"));

    let report = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap();
    let executed: Vec<_> = report
        .steps
        .iter()
        .filter(|s| s.executed())
        .map(StepReport::step)
        .collect();
    assert_eq!(
        executed,
        vec![
            "configure:oracle:price-source:uosmo",
            "configure:oracle:price-source:untrn"
        ]
    );
}

#[test]
fn transient_failures_are_retried_in_process() {
    let (_dir, paths) = artifacts(&["a", "b"]);
    let plan = two_contract_plan(&paths);
    let store = MemoryStateStore::new();
    let mut chain = FlakyChain::new();
    chain.fail_next(Op::Upload, transport());

    let report = run(&store, &mut chain, &plan, retries(2)).unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(chain.calls(Op::Upload), 3);
    assert_eq!(chain.tx_count(), 5);
}

#[test]
fn rejections_are_not_retried() {
    let (_dir, paths) = artifacts(&["a", "b"]);
    let plan = two_contract_plan(&paths);
    let store = MemoryStateStore::new();
    let mut chain = FlakyChain::new();
    chain.fail_next(Op::Upload, rejected());

    run(&store, &mut chain, &plan, retries(3)).unwrap_err();

    assert_eq!(chain.calls(Op::Upload), 1);
}

#[test]
fn unconfirmed_transaction_is_recovered_without_resending() {
    let (_dir, paths) = artifacts(&["a", "b"]);
    let plan = two_contract_plan(&paths);
    let store = MemoryStateStore::new();
    let mut chain = FlakyChain::new();
    chain.fail_next(Op::Execute, Fault::Unconfirmed);

    let err = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap_err();
    assert!(matches!(
        err.step_error(),
        Some(StepError::StepExecutionFailed {
            source: ChainError::Unconfirmed { .. },
            ..
        })
    ));
    assert!(store.load(&key()).unwrap().pending_tx("configure:b").is_some());
    assert_eq!(chain.tx_count(), 5);

    let report = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap();

    assert!(matches!(
        report.steps.last(),
        Some(StepReport::Recovered { step, .. }) if step == "configure:b"
    ));
    assert_eq!(chain.calls(Op::Execute), 1);
    assert_eq!(chain.tx_count(), 5);
    let state = store.load(&key()).unwrap();
    assert!(state.is_done("configure:b"));
    assert!(state.pending_tx("configure:b").is_none());
}

#[test]
fn lost_transaction_blocks_until_resolved() {
    let (_dir, paths) = artifacts(&["a", "b"]);
    let plan = two_contract_plan(&paths);
    let store = MemoryStateStore::new();
    let mut chain = FlakyChain::new();
    chain.fail_next(Op::Execute, Fault::Lost);

    run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap_err();

    // The chain has no record of the hash, so resending could double-apply.
    let err = run(&store, &mut chain, &plan, retries(3)).unwrap_err();
    assert!(matches!(
        err.step_error(),
        Some(StepError::AmbiguousOutcome { step, .. }) if step == "configure:b"
    ));
    assert_eq!(chain.calls(Op::Execute), 1);

    resolve_pending(&store, &key(), &plan, "configure:b").unwrap();
    let report = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap();
    assert_eq!(report.executed(), 1);
    assert_eq!(chain.calls(Op::Execute), 2);
}

#[test]
fn uncertain_broadcast_is_never_resent_automatically() {
    let (_dir, paths) = artifacts(&["a", "b"]);
    let plan = two_contract_plan(&paths);
    let store = MemoryStateStore::new();
    let mut chain = FlakyChain::new();
    chain.fail_next(Op::Execute, uncertain());

    let err = run(&store, &mut chain, &plan, retries(3)).unwrap_err();
    assert!(matches!(
        err.step_error(),
        Some(StepError::StepExecutionFailed {
            source: ChainError::BroadcastUncertain(_),
            ..
        })
    ));
    assert_eq!(chain.calls(Op::Execute), 1);
    assert_eq!(
        store.load(&key()).unwrap().pending_tx("configure:b"),
        Some(UNKNOWN_TX_HASH)
    );

    // Without a hash there is nothing to look up; the step stays blocked.
    let err = run(&store, &mut chain, &plan, retries(3)).unwrap_err();
    assert!(matches!(
        err.step_error(),
        Some(StepError::AmbiguousOutcome { step, .. }) if step == "configure:b"
    ));
    assert_eq!(chain.calls(Op::Execute), 1);
    assert_eq!(chain.calls(Op::LookupTx), 0);

    let cleared = resolve_pending(&store, &key(), &plan, "configure:b").unwrap();
    assert_eq!(cleared, UNKNOWN_TX_HASH);
    let report = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap();
    assert_eq!(report.executed(), 1);
    assert_eq!(chain.calls(Op::Execute), 2);
}

#[test]
fn checkpoint_failure_is_reported_with_partial_run() {
    let (_dir, paths) = artifacts(&["a", "b"]);
    let plan = two_contract_plan(&paths);
    let store = FailingStore::after(1);
    let mut chain = FlakyChain::new();

    let err = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap_err();

    match err.step_error() {
        Some(StepError::Record { step, source }) => {
            assert_eq!(step, "instantiate:a");
            assert!(matches!(source, StoreError::Io { .. }));
        }
        other => panic!("expected Record, got {other:?}"),
    }
    let report = err.report().unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.executed(), 2);
    assert_eq!(chain.calls(Op::Upload), 1);
    assert_eq!(
        store.inner.load(&key()).unwrap().recorded_keys(),
        keys(&[StoreKey::module("a")])
    );
}

#[test]
fn store_is_flushed_when_a_run_fails() {
    let (_dir, paths) = artifacts(&["a", "b"]);
    let plan = two_contract_plan(&paths);
    let state_dir = TempDir::new().unwrap();
    let store = FileStateStore::new(state_dir.path().to_path_buf());
    let mut chain = FlakyChain::new();
    chain.fail_next(Op::Instantiate, rejected());

    run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap_err();

    let path = store.path_for(&key());
    assert!(path.exists());
    let on_disk = store.load(&key()).unwrap();
    assert!(on_disk.contains(&StoreKey::module("a")));
    assert!(!on_disk.contains(&StoreKey::contract("a")));
}

#[test]
fn corrupt_store_aborts_before_touching_chain() {
    let (_dir, paths) = artifacts(&["a", "b"]);
    let plan = two_contract_plan(&paths);
    let state_dir = TempDir::new().unwrap();
    let store = FileStateStore::new(state_dir.path().to_path_buf());
    std::fs::write(store.path_for(&key()), "{ not json").unwrap();
    let mut chain = FlakyChain::new();

    let err = run(&store, &mut chain, &plan, RetryPolicy::default()).unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Store(StoreError::CorruptState { .. })
    ));
    assert_eq!(chain.calls(Op::Upload), 0);
    assert_eq!(
        std::fs::read_to_string(store.path_for(&key())).unwrap(),
        "{ not json"
    );
}
