//! Configuration schema for waypoint.toml
//!
//! One document per deployment target. Message bodies for per-item
//! configuration (price sources, asset params, routes, markets) are free-form
//! tables passed through to the contracts as JSON.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::CliChainOptions;
use crate::types::Coin;

/// Root configuration structure for waypoint.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Chain connection and signer
    pub chain: ChainConfig,

    /// Deployment-wide settings
    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// Extra fields merged into a contract's instantiate message, by contract name
    #[serde(default)]
    pub instantiate: BTreeMap<String, Value>,

    /// Listed assets
    #[serde(default)]
    pub assets: Vec<AssetConfig>,

    /// Swapper routes
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Perpetual markets
    #[serde(default)]
    pub perps_markets: Vec<PerpsMarketConfig>,

    /// Post-deployment validation flows
    #[serde(default)]
    pub flows: FlowsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: String,

    /// RPC endpoint
    pub node: String,

    /// Node binary used to sign and broadcast
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Keyring key name of the deployer
    pub signer: String,

    /// Deployer account address
    pub deployer: String,

    /// Bech32 prefix of the chain's addresses
    pub address_prefix: String,

    #[serde(default = "default_keyring_backend")]
    pub keyring_backend: String,

    pub gas_prices: String,

    #[serde(default = "default_gas_adjustment")]
    pub gas_adjustment: f64,

    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_binary() -> String {
    "wasmd".to_string()
}

fn default_keyring_backend() -> String {
    "test".to_string()
}

fn default_gas_adjustment() -> f64 {
    1.4
}

fn default_confirm_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    2
}

impl ChainConfig {
    pub fn cli_options(&self) -> CliChainOptions {
        CliChainOptions {
            binary: self.binary.clone(),
            node: self.node.clone(),
            chain_id: self.chain_id.clone(),
            signer: self.signer.clone(),
            keyring_backend: self.keyring_backend.clone(),
            gas_prices: self.gas_prices.clone(),
            gas_adjustment: self.gas_adjustment,
            confirm_timeout: Duration::from_secs(self.confirm_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Signer role; together with the chain id it names the state document
    #[serde(default = "default_role")]
    pub role: String,

    /// Prefix for contract labels
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,

    /// Directory containing compiled modules
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// File name prefix of each module, e.g. `proto_` for `proto_oracle.wasm`
    #[serde(default)]
    pub artifact_prefix: String,

    /// Denom prices are quoted in
    pub base_denom: String,

    /// Account that receives ownership of every contract at the end
    #[serde(default)]
    pub owner: Option<String>,

    /// In-process attempts per step for transient failures
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_role() -> String {
    "owner".to_string()
}

fn default_label_prefix() -> String {
    "waypoint".to_string()
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_retry_attempts() -> u32 {
    1
}

fn default_retry_backoff() -> u64 {
    2_000
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            label_prefix: default_label_prefix(),
            artifacts_dir: default_artifacts_dir(),
            artifact_prefix: String::new(),
            base_denom: String::new(),
            owner: None,
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

/// A listed asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub denom: String,

    /// Oracle price source definition
    pub price_source: Value,

    /// Risk parameters registered with the params contract
    #[serde(default = "empty_object")]
    pub params: Value,

    /// Red bank market parameters; assets without them are not lent out
    #[serde(default)]
    pub market: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub denom_in: String,
    pub denom_out: String,
    pub route: Value,
}

impl RouteConfig {
    pub fn id(&self) -> String {
        format!("{}->{}", self.denom_in, self.denom_out)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerpsMarketConfig {
    pub denom: String,
    #[serde(default = "empty_object")]
    pub params: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Amount of a single denom as written in config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinConfig {
    pub denom: String,
    pub amount: u64,
}

impl From<&CoinConfig> for Coin {
    fn from(coin: &CoinConfig) -> Self {
        Coin::new(u128::from(coin.amount), coin.denom.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowsConfig {
    /// Run flows after a completed deployment
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub red_bank: Option<RedBankFlowConfig>,

    #[serde(default)]
    pub credit_account: Option<CreditAccountFlowConfig>,

    #[serde(default)]
    pub liquidation: Option<LiquidationFlowConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedBankFlowConfig {
    pub deposit: CoinConfig,
    pub borrow: CoinConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAccountFlowConfig {
    pub deposit: CoinConfig,
    /// Denom to swap part of the deposit into
    pub swap_to: String,
    pub swap_amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationFlowConfig {
    /// Credit account expected to be unhealthy
    pub liquidatee_account_id: String,
    pub debt: CoinConfig,
    pub request_denom: String,
}

impl DeployConfig {
    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let chain = &self.chain;
        if chain.chain_id.trim().is_empty() {
            anyhow::bail!("chain.chain_id must not be empty");
        }
        if chain.signer.trim().is_empty() {
            anyhow::bail!("chain.signer must not be empty");
        }
        if !chain.deployer.starts_with(&chain.address_prefix) {
            anyhow::bail!(
                "chain.deployer '{}' does not use address prefix '{}'",
                chain.deployer,
                chain.address_prefix
            );
        }
        let node = url::Url::parse(&chain.node)
            .map_err(|e| anyhow::anyhow!("chain.node '{}' is not a valid URL: {}", chain.node, e))?;
        if !matches!(node.scheme(), "http" | "https" | "tcp") {
            anyhow::bail!("chain.node must use http, https or tcp, got '{}'", node.scheme());
        }
        if chain.poll_interval_secs == 0 {
            anyhow::bail!("chain.poll_interval_secs must be at least 1");
        }
        if self.deployment.base_denom.trim().is_empty() {
            anyhow::bail!("deployment.base_denom must not be empty");
        }
        if self.deployment.retry_attempts == 0 {
            anyhow::bail!("deployment.retry_attempts must be at least 1");
        }

        let mut denoms = HashSet::new();
        for asset in &self.assets {
            if !denoms.insert(asset.denom.as_str()) {
                anyhow::bail!("Asset '{}' is listed more than once", asset.denom);
            }
        }
        let mut routes = HashSet::new();
        for route in &self.routes {
            if route.denom_in == route.denom_out {
                anyhow::bail!("Route {} swaps a denom into itself", route.id());
            }
            if !routes.insert(route.id()) {
                anyhow::bail!("Route {} is listed more than once", route.id());
            }
        }
        let mut markets = HashSet::new();
        for market in &self.perps_markets {
            if !markets.insert(market.denom.as_str()) {
                anyhow::bail!("Perps market '{}' is listed more than once", market.denom);
            }
        }
        Ok(())
    }

    /// Path of the compiled module for `module`.
    pub fn artifact_path(&self, module: &str) -> PathBuf {
        let file = format!(
            "{}{}.wasm",
            self.deployment.artifact_prefix,
            module.replace('-', "_")
        );
        self.deployment.artifacts_dir.join(file)
    }

    /// On-chain label for `contract`.
    pub fn label(&self, contract: &str) -> String {
        format!("{}-{}", self.deployment.label_prefix, contract)
    }
}
