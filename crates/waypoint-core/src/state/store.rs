//! Deployment state persistence.
//!
//! One state document per environment label (chain id + signer role). The
//! file store keeps them in the user's state directory:
//! - Unix: `$XDG_STATE_HOME/waypoint/deployments/<key>.json`
//! - Windows: `%LOCALAPPDATA%\waypoint\deployments\<key>.json`

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::StoreError;
use crate::state::types::DeploymentState;

/// Environment-scoped name of a state document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey(String);

impl StateKey {
    /// Build a key from a chain id and signer role, e.g. `pion-1-owner`.
    pub fn new(chain_id: &str, role: &str) -> anyhow::Result<Self> {
        Self::parse(&format!("{chain_id}-{role}"))
    }

    /// Accept a raw key, rejecting anything that is not safe as a file name.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        if raw.is_empty() {
            anyhow::bail!("State key must not be empty");
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            anyhow::bail!("State key '{}' contains invalid character '{}'", raw, bad);
        }
        if raw.starts_with('.') {
            anyhow::bail!("State key '{}' must not start with '.'", raw);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable storage for deployment state documents.
pub trait StateStore {
    /// Load the state recorded under `key`.
    ///
    /// Returns `StoreError::NotFound` when nothing has been recorded yet and
    /// `StoreError::CorruptState` when the document cannot be parsed.
    fn load(&self, key: &StateKey) -> Result<DeploymentState, StoreError>;

    /// Persist `state` under `key`, replacing any previous document atomically.
    fn flush(&self, state: &DeploymentState, key: &StateKey) -> Result<(), StoreError>;
}

/// Load a state, substituting an empty one on first run.
pub fn load_or_default(
    store: &dyn StateStore,
    key: &StateKey,
) -> Result<DeploymentState, StoreError> {
    match store.load(key) {
        Ok(state) => Ok(state),
        Err(StoreError::NotFound { .. }) => {
            tracing::info!(key = %key, "No recorded progress, starting fresh");
            Ok(DeploymentState::new())
        }
        Err(err) => Err(err),
    }
}

fn decode(key: &StateKey, bytes: &[u8]) -> Result<DeploymentState, StoreError> {
    let state: DeploymentState =
        serde_json::from_slice(bytes).map_err(|e| StoreError::CorruptState {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
    state.validate().map_err(|reason| StoreError::CorruptState {
        key: key.to_string(),
        reason,
    })?;
    Ok(state)
}

fn encode(key: &StateKey, state: &DeploymentState) -> Result<Vec<u8>, StoreError> {
    let mut bytes = serde_json::to_vec_pretty(state).map_err(|e| StoreError::Io {
        key: key.to_string(),
        source: e.into(),
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// State documents stored as pretty-printed JSON files.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Get default state directory for deployment documents
    ///
    /// # Returns
    /// - Unix: `$XDG_STATE_HOME/waypoint/deployments` or `~/.local/state/waypoint/deployments`
    /// - Windows: `%LOCALAPPDATA%\waypoint\deployments`
    pub fn default_dir() -> anyhow::Result<PathBuf> {
        let base = if cfg!(unix) {
            dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .ok_or_else(|| anyhow::anyhow!("Cannot determine state directory"))?
        } else {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Cannot determine local app data directory"))?
        };
        Ok(base.join("waypoint").join("deployments"))
    }

    pub fn path_for(&self, key: &StateKey) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, key: &StateKey) -> Result<DeploymentState, StoreError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                });
            }
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                });
            }
        };
        decode(key, &bytes)
    }

    /// Save atomically (tmp + rename)
    fn flush(&self, state: &DeploymentState, key: &StateKey) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(io_err)?;

        // Serialize first so a failure never leaves a truncated file behind
        let bytes = encode(key, state)?;
        let path = self.path_for(key);
        let tmp_path = self
            .dir
            .join(format!("{}.json.{}.tmp", key, std::process::id()));

        fs::write(&tmp_path, bytes).map_err(io_err)?;
        fs::rename(&tmp_path, &path).map_err(io_err)?;

        tracing::debug!(path = %path.display(), "Flushed deployment state");
        Ok(())
    }
}

/// In-memory store holding serialized documents.
///
/// Used for dry runs and tests. Documents go through the same JSON encoding
/// as the file store, so corrupt input can be injected with [`MemoryStateStore::put_raw`].
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    docs: Mutex<HashMap<String, Vec<u8>>>,
    flushes: Mutex<usize>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with an existing state.
    pub fn with_state(key: &StateKey, state: &DeploymentState) -> Result<Self, StoreError> {
        let store = Self::new();
        store.put_raw(key, encode(key, state)?);
        Ok(store)
    }

    pub fn put_raw(&self, key: &StateKey, bytes: Vec<u8>) {
        self.docs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), bytes);
    }

    /// Number of successful flushes so far.
    pub fn flush_count(&self) -> usize {
        *self
            .flushes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, key: &StateKey) -> Result<DeploymentState, StoreError> {
        let docs = self
            .docs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match docs.get(key.as_str()) {
            Some(bytes) => decode(key, bytes),
            None => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    fn flush(&self, state: &DeploymentState, key: &StateKey) -> Result<(), StoreError> {
        let bytes = encode(key, state)?;
        self.put_raw(key, bytes);
        *self
            .flushes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
        Ok(())
    }
}
