//! Pipeline driver: runs a plan step by step against the progress store.

pub mod driver;
pub mod report;

pub use driver::{Pipeline, PipelineError, RetryPolicy};
pub use report::{RunReport, RunStatus, StepReport};
