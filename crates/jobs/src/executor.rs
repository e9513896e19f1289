//! Synchronous job executor with handler routing.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use photocal_core::{PipelineError, PipelineResult};

use super::state::JobState;
use super::types::{Job, JobKind, JobStatus};

/// Job handler function type.
///
/// Receives the job's settings payload and its mutable state, returns the
/// structured result or a job-fatal error.
pub type JobHandler =
    Box<dyn Fn(&serde_json::Value, &mut JobState) -> PipelineResult<serde_json::Value> + Send + Sync>;

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// Name for logging
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Executor error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobExecutorError {
    #[error("no handler for job kind: {0}")]
    NoHandler(String),
    #[error("job is not pending: {0:?}")]
    NotPending(JobStatus),
    #[error(transparent)]
    Failed(#[from] PipelineError),
}

/// Job executor.
///
/// Holds the registry of job handlers and runs jobs to completion on the
/// caller's thread.
pub struct JobExecutor {
    config: JobExecutorConfig,
    handlers: HashMap<String, JobHandler>,
}

impl JobExecutor {
    pub fn new(config: JobExecutorConfig) -> Self {
        Self {
            config,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job kind.
    pub fn register_handler<F>(&mut self, kind_pattern: impl Into<String>, handler: F)
    where
        F: Fn(&serde_json::Value, &mut JobState) -> PipelineResult<serde_json::Value>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(kind_pattern.into(), Box::new(handler));
    }

    pub fn has_handler(&self, kind: &JobKind) -> bool {
        self.get_handler(kind).is_some()
    }

    /// Get the handler for a job kind.
    fn get_handler(&self, kind: &JobKind) -> Option<&JobHandler> {
        // Try exact match first
        let type_name = kind.type_name();
        if let Some(h) = self.handlers.get(type_name) {
            return Some(h);
        }

        // Try category match (e.g., "photometry.*" matches "photometry.batch")
        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if type_name.starts_with(prefix) {
                    return Some(handler);
                }
            }
        }

        // Try wildcard
        self.handlers.get("*")
    }

    /// Create and run a job in one call.
    pub fn submit(&self, kind: JobKind, payload: serde_json::Value) -> Job {
        let mut job = Job::new(kind, payload);
        // The outcome is recorded on the job itself.
        let _ = self.execute(&mut job);
        job
    }

    /// Run a pending job to completion.
    pub fn execute(&self, job: &mut Job) -> Result<(), JobExecutorError> {
        if job.status != JobStatus::Pending {
            return Err(JobExecutorError::NotPending(job.status.clone()));
        }

        let handler = match self.get_handler(&job.kind) {
            Some(h) => h,
            None => {
                let error = JobExecutorError::NoHandler(job.kind.type_name().to_string());
                warn!(executor = %self.config.name, job_id = %job.id, error = %error, "no handler for job");
                job.mark_failed(error.to_string());
                return Err(error);
            }
        };

        job.mark_running();
        info!(
            executor = %self.config.name,
            job_id = %job.id,
            kind = job.kind.type_name(),
            "job started"
        );

        match handler(&job.payload, &mut job.state) {
            Ok(result) => {
                job.mark_completed(result);
                info!(
                    executor = %self.config.name,
                    job_id = %job.id,
                    errors = job.state.errors().len(),
                    warnings = job.state.warnings().len(),
                    duration_ms = job.duration_ms().unwrap_or_default(),
                    "job completed"
                );
                Ok(())
            }
            Err(error) => {
                job.mark_failed(error.to_string());
                debug!(
                    executor = %self.config.name,
                    job_id = %job.id,
                    error = %error,
                    "job failed"
                );
                Err(error.into())
            }
        }
    }
}

impl Default for JobExecutor {
    fn default() -> Self {
        Self::new(JobExecutorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_successful_job() {
        let mut executor = JobExecutor::default();
        executor.register_handler("field_cal", |payload, state| {
            state.add_warning("checked");
            Ok(serde_json::json!({ "echo": payload.clone() }))
        });

        let mut job = Job::new(JobKind::FieldCal, serde_json::json!({"file_ids": [1]}));
        let result = executor.execute(&mut job);

        assert!(result.is_ok());
        assert!(matches!(job.status, JobStatus::Completed));
        assert_eq!(job.state.warnings(), ["checked"]);
        assert_eq!(job.result.unwrap()["echo"]["file_ids"][0], 1);
    }

    #[test]
    fn failing_job_records_single_error() {
        let mut executor = JobExecutor::default();
        executor.register_handler("field_cal", |_payload, _state| {
            Err(PipelineError::validation("Missing catalog sources"))
        });

        let job = executor.submit(JobKind::FieldCal, serde_json::json!({}));

        assert_eq!(
            job.status,
            JobStatus::Failed {
                error: "validation failed: Missing catalog sources".to_string()
            }
        );
        assert!(job.result.is_none());
    }

    #[test]
    fn missing_handler_fails_job() {
        let executor = JobExecutor::default();
        let mut job = Job::new(JobKind::SourceExtraction, serde_json::json!({}));
        let result = executor.execute(&mut job);

        assert!(matches!(result, Err(JobExecutorError::NoHandler(_))));
        assert!(job.status.is_terminal());
    }

    #[test]
    fn finished_job_is_not_rerun() {
        let mut executor = JobExecutor::default();
        executor.register_handler("*", |_payload, _state| Ok(serde_json::Value::Null));

        let mut job = executor.submit(JobKind::custom("anything"), serde_json::json!({}));
        assert!(matches!(
            executor.execute(&mut job),
            Err(JobExecutorError::NotPending(JobStatus::Completed))
        ));
    }

    #[test]
    fn category_handler() {
        let mut executor = JobExecutor::default();
        executor.register_handler("photometry.*", |_payload, _state| Ok(serde_json::Value::Null));

        assert!(executor.has_handler(&JobKind::custom("photometry.batch")));
        assert!(!executor.has_handler(&JobKind::FieldCal));
    }
}
