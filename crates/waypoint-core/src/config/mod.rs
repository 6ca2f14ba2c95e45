//! Deployment configuration (waypoint.toml).

pub mod parser;
pub mod schema;

pub use parser::{load_config, parse_config_str};
pub use schema::{
    AssetConfig, ChainConfig, CoinConfig, CreditAccountFlowConfig, DeployConfig,
    DeploymentConfig, FlowsConfig, LiquidationFlowConfig, PerpsMarketConfig, RedBankFlowConfig,
    RouteConfig,
};
