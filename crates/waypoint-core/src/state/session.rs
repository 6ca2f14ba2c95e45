//! Scoped access to a deployment state.
//!
//! A [`Session`] is opened at the start of a run and flushed on every way out
//! of it: explicitly through [`Session::close`], or from `Drop` when the run
//! unwinds before reaching `close`.

use crate::error::StoreError;
use crate::state::store::{StateKey, StateStore, load_or_default};
use crate::state::types::DeploymentState;

pub struct Session<'a> {
    store: &'a dyn StateStore,
    key: StateKey,
    state: DeploymentState,
    closed: bool,
}

impl<'a> Session<'a> {
    /// Load the state for `key`, or start empty if none was recorded.
    ///
    /// A corrupt document is an error; the session is not opened and nothing
    /// is written over it.
    pub fn open(store: &'a dyn StateStore, key: StateKey) -> Result<Self, StoreError> {
        let state = load_or_default(store, &key)?;
        Ok(Self {
            store,
            key,
            state,
            closed: false,
        })
    }

    pub fn key(&self) -> &StateKey {
        &self.key
    }

    pub fn state(&self) -> &DeploymentState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut DeploymentState {
        &mut self.state
    }

    /// Persist the current state without ending the session.
    pub fn checkpoint(&mut self) -> Result<(), StoreError> {
        self.store.flush(&self.state, &self.key)
    }

    /// Flush and hand back the final state.
    pub fn close(mut self) -> Result<DeploymentState, StoreError> {
        self.closed = true;
        self.store.flush(&self.state, &self.key)?;
        Ok(std::mem::take(&mut self.state))
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.store.flush(&self.state, &self.key) {
            tracing::error!(key = %self.key, error = %err, "Failed to flush deployment state");
        }
    }
}
