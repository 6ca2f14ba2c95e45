//! Deployment progress store.
//!
//! Records which modules were uploaded, which contracts were instantiated
//! and which one-shot actions were applied, so a run can resume where the
//! previous one stopped.

pub mod session;
pub mod store;
pub mod types;

pub use session::Session;
pub use store::{FileStateStore, MemoryStateStore, StateKey, StateStore, load_or_default};
pub use types::{DeploymentState, STATE_VERSION, UNKNOWN_TX_HASH};
