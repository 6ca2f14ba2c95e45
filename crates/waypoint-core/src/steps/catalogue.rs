//! The protocol's deployment plan.
//!
//! Order: upload every module, instantiate contracts so that each one only
//! references contracts created before it, register addresses, configure
//! per-item state (one step per asset, route or market), wire contracts to
//! each other, then hand ownership over.

use serde_json::{Value, json};

use crate::config::DeployConfig;
use crate::types::StoreKey;

use super::template::{contract_ref, merge};
use super::{Plan, Step};

/// Modules uploaded by the plan, in upload order.
pub const MODULES: &[&str] = &[
    "address-provider",
    "oracle",
    "params",
    "red-bank",
    "incentives",
    "swapper",
    "rewards-collector",
    "account-nft",
    "health",
    "credit-manager",
    "perps",
];

/// Address types registered with the address provider, and the contract
/// behind each.
const ADDRESS_TYPES: &[(&str, &str)] = &[
    ("oracle", "oracle"),
    ("params", "params"),
    ("red_bank", "red-bank"),
    ("incentives", "incentives"),
    ("swapper", "swapper"),
    ("rewards_collector", "rewards-collector"),
    ("credit_manager", "credit-manager"),
    ("health", "health"),
    ("perps", "perps"),
];

/// Contracts whose ownership moves to `deployment.owner`.
const OWNED_CONTRACTS: &[&str] = &[
    "address-provider",
    "oracle",
    "params",
    "red-bank",
    "incentives",
    "swapper",
    "rewards-collector",
    "health",
    "credit-manager",
];

/// Build the full plan for `config`.
pub fn protocol_plan(config: &DeployConfig) -> Plan {
    let mut plan = Plan::new();
    plan.extend(upload_steps(config));
    plan.extend(instantiate_steps(config));
    plan.extend(address_steps());
    plan.extend(asset_steps(config));
    plan.extend(route_steps(config));
    plan.extend(wiring_steps());
    plan.extend(perps_steps(config));
    plan.extend(ownership_steps(config));
    plan
}

fn upload_steps(config: &DeployConfig) -> Vec<Step> {
    MODULES
        .iter()
        .map(|module| Step::upload(module, config.artifact_path(module)))
        .collect()
}

fn instantiate_steps(config: &DeployConfig) -> Vec<Step> {
    let deployer = config.chain.deployer.as_str();
    let base_denom = config.deployment.base_denom.as_str();
    let provider = contract_ref("address-provider");

    let defaults: Vec<(&str, Value)> = vec![
        (
            "address-provider",
            json!({ "owner": deployer, "prefix": config.chain.address_prefix }),
        ),
        ("oracle", json!({ "owner": deployer, "base_denom": base_denom })),
        (
            "params",
            json!({ "owner": deployer, "address_provider": provider }),
        ),
        (
            "red-bank",
            json!({ "owner": deployer, "config": { "address_provider": provider } }),
        ),
        (
            "incentives",
            json!({
                "owner": deployer,
                "address_provider": provider,
                "epoch_duration": 604_800,
                "max_whitelisted_denoms": 10,
            }),
        ),
        ("swapper", json!({ "owner": deployer })),
        (
            "rewards-collector",
            json!({
                "owner": deployer,
                "address_provider": provider,
                "safety_fund_denom": base_denom,
                "fee_collector_denom": base_denom,
            }),
        ),
        (
            "account-nft",
            json!({
                "name": "Credit Accounts",
                "symbol": "CA",
                "minter": deployer,
                "max_value_for_burn": "1000000",
            }),
        ),
        ("health", json!({ "owner": deployer })),
        (
            "credit-manager",
            json!({
                "owner": deployer,
                "params": contract_ref("params"),
                "oracle": contract_ref("oracle"),
                "red_bank": contract_ref("red-bank"),
                "swapper": contract_ref("swapper"),
                "incentives": contract_ref("incentives"),
                "health_contract": contract_ref("health"),
                "max_unlocking_positions": "10",
                "max_slippage": "0.2",
            }),
        ),
        (
            "perps",
            json!({
                "address_provider": provider,
                "base_denom": base_denom,
                "cooldown_period": 86_400,
                "max_positions": 4,
            }),
        ),
    ];

    defaults
        .into_iter()
        .map(|(contract, msg)| {
            let msg = merge(msg, config.instantiate.get(contract));
            Step::instantiate(contract, contract, msg)
                .with_label(config.label(contract))
                .with_admin(deployer)
        })
        .collect()
}

fn address_steps() -> Vec<Step> {
    ADDRESS_TYPES
        .iter()
        .map(|(address_type, contract)| {
            Step::execute(
                &format!("configure:address-provider:{address_type}"),
                "address-provider",
                json!({
                    "set_address": {
                        "address_type": address_type,
                        "address": contract_ref(contract),
                    }
                }),
            )
        })
        .collect()
}

fn asset_steps(config: &DeployConfig) -> Vec<Step> {
    let mut steps = Vec::new();
    for asset in &config.assets {
        let denom = asset.denom.as_str();
        steps.push(Step::execute(
            &format!("configure:oracle:price-source:{denom}"),
            "oracle",
            json!({ "set_price_source": { "denom": denom, "price_source": asset.price_source } }),
        ));
        steps.push(
            Step::execute(
                &format!("configure:params:asset:{denom}"),
                "params",
                json!({
                    "update_asset_params": {
                        "add_or_update": {
                            "params": merge(json!({ "denom": denom }), Some(&asset.params))
                        }
                    }
                }),
            )
            .requiring(StoreKey::action(format!(
                "configure:oracle:price-source:{denom}"
            ))),
        );
        if let Some(market) = &asset.market {
            steps.push(
                Step::execute(
                    &format!("configure:red-bank:market:{denom}"),
                    "red-bank",
                    json!({ "init_asset": { "denom": denom, "params": market } }),
                )
                .requiring(StoreKey::action(format!("configure:params:asset:{denom}"))),
            );
        }
    }
    steps
}

fn route_steps(config: &DeployConfig) -> Vec<Step> {
    config
        .routes
        .iter()
        .map(|route| {
            Step::execute(
                &format!("configure:swapper:route:{}", route.id()),
                "swapper",
                json!({
                    "set_route": {
                        "denom_in": route.denom_in,
                        "denom_out": route.denom_out,
                        "route": route.route,
                    }
                }),
            )
        })
        .collect()
}

fn wiring_steps() -> Vec<Step> {
    vec![
        Step::execute(
            "configure:health:credit-manager",
            "health",
            json!({
                "update_config": { "credit_manager": contract_ref("credit-manager") }
            }),
        ),
        Step::execute(
            "configure:account-nft:propose-minter",
            "account-nft",
            json!({
                "update_ownership": {
                    "transfer_ownership": { "new_owner": contract_ref("credit-manager") }
                }
            }),
        ),
        Step::execute(
            "configure:credit-manager:account-nft",
            "credit-manager",
            json!({
                "update_config": { "updates": { "account_nft": contract_ref("account-nft") } }
            }),
        )
        .requiring(StoreKey::action("configure:account-nft:propose-minter")),
        Step::execute(
            "configure:credit-manager:perps",
            "credit-manager",
            json!({
                "update_config": { "updates": { "perps": contract_ref("perps") } }
            }),
        ),
    ]
}

fn perps_steps(config: &DeployConfig) -> Vec<Step> {
    config
        .perps_markets
        .iter()
        .map(|market| {
            let denom = market.denom.as_str();
            Step::execute(
                &format!("configure:params:perp:{denom}"),
                "params",
                json!({
                    "update_perp_params": {
                        "add_or_update": {
                            "params": merge(json!({ "denom": denom }), Some(&market.params))
                        }
                    }
                }),
            )
            .requiring(StoreKey::contract("perps"))
        })
        .collect()
}

fn ownership_steps(config: &DeployConfig) -> Vec<Step> {
    let Some(owner) = config.deployment.owner.as_deref() else {
        return Vec::new();
    };
    OWNED_CONTRACTS
        .iter()
        .map(|contract| {
            Step::execute(
                &format!("configure:ownership:{contract}"),
                contract,
                json!({ "update_owner": { "propose_new_owner": { "proposed": owner } } }),
            )
        })
        .collect()
}
