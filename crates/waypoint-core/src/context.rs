//! Application context shared by every command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;

use crate::chain::{CliChain, LocalChain};
use crate::config::{DeployConfig, load_config};
use crate::pipeline::RetryPolicy;
use crate::state::{FileStateStore, MemoryStateStore, StateKey, load_or_default};
use crate::steps::Plan;
use crate::steps::catalogue::protocol_plan;

/// Loaded configuration plus the paths derived from it.
///
/// Frontends build this once and pass it to the deploy, status and resolve
/// operations.
#[derive(Debug, Clone)]
pub struct AppContext {
    config_path: PathBuf,
    config: DeployConfig,
    state_dir: PathBuf,
}

impl AppContext {
    /// Load `config_path`; progress documents go to `state_dir`, or the
    /// per-user default when it is `None`.
    pub fn load(config_path: &Path, state_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = load_config(config_path)?;
        let state_dir = match state_dir {
            Some(dir) => dir,
            None => FileStateStore::default_dir()?,
        };
        Ok(Self::new(config_path.to_path_buf(), config, state_dir))
    }

    pub fn new(config_path: PathBuf, config: DeployConfig, state_dir: PathBuf) -> Self {
        Self {
            config_path,
            config,
            state_dir,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Key of this deployment's progress document.
    pub fn state_key(&self) -> anyhow::Result<StateKey> {
        StateKey::new(&self.config.chain.chain_id, &self.config.deployment.role)
    }

    pub fn state_store(&self) -> FileStateStore {
        FileStateStore::new(self.state_dir.clone())
    }

    /// Chain adapter that signs through the node binary.
    pub fn chain(&self) -> CliChain {
        CliChain::new(self.config.chain.cli_options())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.deployment.retry_attempts,
            backoff: Duration::from_millis(self.config.deployment.retry_backoff_ms),
        }
    }

    pub fn plan(&self) -> Plan {
        protocol_plan(&self.config)
    }

    /// Throwaway store and chain for a dry run.
    ///
    /// The store starts from a copy of the durable document, so only
    /// outstanding steps run, and the chain already knows every recorded
    /// module and contract.
    pub fn dry_run(&self) -> anyhow::Result<(MemoryStateStore, LocalChain)> {
        let key = self.state_key()?;
        let state = load_or_default(&self.state_store(), &key)
            .with_context(|| format!("Failed to load deployment state '{key}'"))?;
        let store = MemoryStateStore::with_state(&key, &state)?;
        let mut chain = LocalChain::new(&self.config.chain.address_prefix);
        chain.adopt(&state);
        Ok((store, chain))
    }
}
