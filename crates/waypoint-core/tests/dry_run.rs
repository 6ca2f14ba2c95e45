//! Full protocol plan rehearsed through the application context.

mod support;

use std::path::Path;

use tempfile::TempDir;

use waypoint_core::context::AppContext;
use waypoint_core::pipeline::RunStatus;
use waypoint_core::service::{self, DeployOptions};
use waypoint_core::state::{DeploymentState, StateStore};
use waypoint_core::status::collect_status;
use waypoint_core::steps::catalogue::MODULES;
use waypoint_core::types::{Address, ModuleId};

use support::write_artifact;

const CONFIG: &str = r#"
[chain]
chain_id = "pion-1"
node = "https://rpc.pion.example:443"
signer = "deployer"
deployer = "neutron1deployer"
address_prefix = "neutron"
gas_prices = "0.025untrn"

[deployment]
base_denom = "untrn"
artifacts_dir = "artifacts"
owner = "neutron1multisig"

[[assets]]
denom = "untrn"
price_source = { fixed = { price = "1" } }
params = { max_loan_to_value = "0.5" }
market = { reserve_factor = "0.1" }

[[assets]]
denom = "uusdc"
price_source = { pyth = { price_feed_id = "eaa0" } }

[[routes]]
denom_in = "untrn"
denom_out = "uusdc"
route = { astro = { swaps = [] } }

[[perps_markets]]
denom = "untrn"
"#;

fn setup() -> (TempDir, AppContext) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp.path().join("waypoint.toml");
    std::fs::write(&config_path, CONFIG).unwrap();
    let artifacts = temp.path().join("artifacts");
    std::fs::create_dir_all(&artifacts).unwrap();
    for module in MODULES {
        write_artifact(&artifacts, module);
    }
    let ctx = AppContext::load(&config_path, Some(temp.path().join("state"))).unwrap();
    (temp, ctx)
}

fn dry_run() -> DeployOptions {
    DeployOptions {
        dry_run: true,
        flows: true,
    }
}

#[test]
fn dry_run_executes_whole_plan_without_saving() {
    let (temp, ctx) = setup();
    let plan_len = ctx.plan().len();

    let outcome = service::deploy(&ctx, dry_run()).unwrap();

    assert!(outcome.dry_run);
    assert_eq!(outcome.report.status, RunStatus::Completed);
    assert_eq!(outcome.report.executed(), plan_len);
    assert!(outcome.flows.is_empty());
    assert!(!temp.path().join("state").exists());
}

#[test]
fn dry_run_continues_from_recorded_progress() {
    let (_temp, ctx) = setup();
    let key = ctx.state_key().unwrap();

    let mut state = DeploymentState::new();
    state
        .set_module_id("address-provider", ModuleId::new("12"), None)
        .unwrap();
    state
        .set_address("address-provider", Address::new("neutron1provider"))
        .unwrap();
    ctx.state_store().flush(&state, &key).unwrap();
    let before = std::fs::read(ctx.state_store().path_for(&key)).unwrap();

    let outcome = service::deploy(&ctx, dry_run()).unwrap();

    assert_eq!(outcome.report.skipped(), 2);
    assert_eq!(outcome.report.executed(), ctx.plan().len() - 2);
    let after = std::fs::read(ctx.state_store().path_for(&key)).unwrap();
    assert_eq!(before, after);

    let status = collect_status(&ctx.state_store(), &key, &ctx.plan()).unwrap();
    assert_eq!(status.summary.done, 2);
}

#[test]
fn artifacts_dir_is_resolved_next_to_config() {
    let (temp, ctx) = setup();
    let path = ctx.config().artifact_path("red-bank");
    assert_eq!(path, temp.path().join("artifacts").join("red_bank.wasm"));
    assert!(Path::new(&path).exists());
}
