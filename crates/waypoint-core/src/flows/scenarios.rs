//! Flows built from the `[flows]` section of the config.
//!
//! All actions are signed by the deployer, so user-scoped queries are made
//! for the deployer's address.

use serde_json::{Value, json};

use crate::config::{
    CoinConfig, CreditAccountFlowConfig, DeployConfig, LiquidationFlowConfig, RedBankFlowConfig,
};
use crate::steps::template::var_ref;
use crate::types::Coin;

use super::{Check, Expectation, Flow, FlowAction};

const ACCOUNT_ID: &str = "account_id";

/// Every flow enabled by `config`, in the order they should run.
pub fn configured_flows(config: &DeployConfig) -> Vec<Flow> {
    let user = config.chain.deployer.as_str();
    let flows = &config.flows;
    let mut out = Vec::new();
    if let Some(red_bank) = &flows.red_bank {
        out.push(red_bank_flow(user, red_bank));
    }
    if let Some(account) = &flows.credit_account {
        out.push(credit_account_flow(user, account));
    }
    if let Some(liquidation) = &flows.liquidation {
        out.push(liquidation_flow(liquidation));
    }
    out
}

fn red_bank_flow(user: &str, cfg: &RedBankFlowConfig) -> Flow {
    let collateral = json!({ "user_collateral": { "user": user, "denom": cfg.deposit.denom } });
    let debt = json!({ "user_debt": { "user": user, "denom": cfg.borrow.denom } });

    Flow::new("red-bank")
        .then(
            FlowAction::new("deposit", "red-bank", json!({ "deposit": {} }))
                .with_funds(vec![Coin::from(&cfg.deposit)])
                .check(Check::new(
                    "red-bank",
                    collateral,
                    "/amount",
                    Expectation::IncreasesBy(u128::from(cfg.deposit.amount)),
                )),
        )
        .then(
            FlowAction::new(
                "borrow",
                "red-bank",
                json!({
                    "borrow": { "denom": cfg.borrow.denom, "amount": cfg.borrow.amount.to_string() }
                }),
            )
            .check(Check::new(
                "red-bank",
                debt.clone(),
                "/amount",
                // Interest accrues between the two queries.
                Expectation::IncreasesByAtLeast(u128::from(cfg.borrow.amount)),
            )),
        )
        .then(
            FlowAction::new("repay", "red-bank", json!({ "repay": {} }))
                .with_funds(vec![Coin::from(&cfg.borrow)])
                .check(Check::new("red-bank", debt, "/amount", Expectation::Decreases)),
        )
}

fn credit_account_flow(user: &str, cfg: &CreditAccountFlowConfig) -> Flow {
    let account = var_ref(ACCOUNT_ID);
    let positions = json!({ "positions": { "account_id": account } });
    let remaining = cfg.deposit.amount.saturating_sub(cfg.swap_amount);

    Flow::new("credit-account")
        .then(
            FlowAction::new(
                "create-account",
                "credit-manager",
                json!({ "create_credit_account": "default" }),
            )
            .capture("wasm", "token_id", ACCOUNT_ID)
            .check(Check::new(
                "account-nft",
                json!({ "owner_of": { "token_id": account } }),
                "/owner",
                Expectation::Equals(Value::String(user.to_string())),
            )),
        )
        .then(
            update_account("deposit", json!({ "deposit": coin_json(&cfg.deposit) }))
                .with_funds(vec![Coin::from(&cfg.deposit)])
                .check(Check::new(
                    "credit-manager",
                    positions.clone(),
                    "/deposits/0/amount",
                    Expectation::IncreasesBy(u128::from(cfg.deposit.amount)),
                )),
        )
        .then(
            update_account(
                "swap",
                json!({
                    "swap_exact_in": {
                        "coin_in": {
                            "denom": cfg.deposit.denom,
                            "amount": { "exact": cfg.swap_amount.to_string() },
                        },
                        "denom_out": cfg.swap_to,
                        "min_receive": "0",
                    }
                }),
            )
            .check(Check::new(
                "credit-manager",
                positions.clone(),
                "/deposits/1",
                Expectation::Exists,
            )),
        )
        .then(
            update_account(
                "withdraw",
                json!({
                    "withdraw": {
                        "denom": cfg.deposit.denom,
                        "amount": { "exact": remaining.to_string() },
                    }
                }),
            )
            .check(Check::new(
                "credit-manager",
                positions,
                "/account_id",
                Expectation::Exists,
            )),
        )
}

fn liquidation_flow(cfg: &LiquidationFlowConfig) -> Flow {
    let liquidatee = cfg.liquidatee_account_id.as_str();
    Flow::new("liquidation").then(
        FlowAction::new(
            "liquidate",
            "credit-manager",
            json!({
                "liquidate": {
                    "liquidatee_account_id": liquidatee,
                    "debt_coin": coin_json(&cfg.debt),
                    "request": { "deposit": cfg.request_denom },
                }
            }),
        )
        .with_funds(vec![Coin::from(&cfg.debt)])
        .check(Check::new(
            "credit-manager",
            json!({ "positions": { "account_id": liquidatee } }),
            "/debts/0/amount",
            Expectation::Decreases,
        )),
    )
}

fn update_account(name: &str, action: Value) -> FlowAction {
    FlowAction::new(
        name,
        "credit-manager",
        json!({
            "update_credit_account": {
                "account_id": var_ref(ACCOUNT_ID),
                "actions": [action],
            }
        }),
    )
}

fn coin_json(coin: &CoinConfig) -> Value {
    json!({ "denom": coin.denom, "amount": coin.amount.to_string() })
}
