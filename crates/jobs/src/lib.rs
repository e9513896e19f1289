//! Job records and synchronous execution.
//!
//! ## Design
//!
//! - A job is a typed kind plus a JSON payload of settings
//! - Handlers are registered by kind on an explicit [`JobExecutor`]
//! - Execution is run-to-completion; no retries, no queueing
//! - [`JobState`] collects progress and per-item errors/warnings while a job runs
//!
//! ## Components
//!
//! - `Job`: job record with status lifecycle and result
//! - `JobState`: progress + error/warning lists mutated by the running pipeline
//! - `JobExecutor`: routes a job to its handler and records the outcome

pub mod executor;
pub mod state;
pub mod types;

pub use executor::{JobExecutor, JobExecutorConfig, JobExecutorError, JobHandler};
pub use state::JobState;
pub use types::{Job, JobKind, JobStatus};
