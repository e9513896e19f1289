//! Core job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use photocal_core::JobId;

use crate::state::JobState;

/// Job kind/type for routing to the appropriate handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Photometric (zero-point) field calibration
    FieldCal,
    /// Source extraction over a batch of images
    SourceExtraction,
    /// Generic/custom job
    Custom { kind: String },
}

impl JobKind {
    pub fn custom(kind: impl Into<String>) -> Self {
        Self::Custom { kind: kind.into() }
    }

    pub fn type_name(&self) -> &str {
        match self {
            JobKind::FieldCal => "field_cal",
            JobKind::SourceExtraction => "source_extraction",
            JobKind::Custom { kind } => kind,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            JobKind::FieldCal => "Photometric Calibration",
            JobKind::SourceExtraction => "Extract Sources",
            JobKind::Custom { kind } => kind,
        }
    }
}

/// Job execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not started yet
    Pending,
    /// Currently being executed
    Running,
    /// Completed; the result may still come with errors/warnings
    Completed,
    /// Aborted with a single top-level error
    Failed { error: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }
}

/// A job invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Job kind for routing
    pub kind: JobKind,
    /// JSON settings payload
    pub payload: serde_json::Value,
    /// Current status
    pub status: JobStatus,
    /// Progress and per-item diagnostics
    pub state: JobState,
    /// Structured result, set on completion
    pub result: Option<serde_json::Value>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job was last updated
    pub updated_at: DateTime<Utc>,
    /// When execution started
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished (either way)
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job.
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        Self::with_id(JobId::new(), kind, payload)
    }

    /// Create a job with a caller-chosen ID.
    pub fn with_id(id: JobId, kind: JobKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            payload,
            status: JobStatus::Pending,
            state: JobState::new(id),
            result: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Mark job as running.
    pub fn mark_running(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Mark job as completed with its result.
    pub fn mark_completed(&mut self, result: serde_json::Value) {
        let now = Utc::now();
        self.state.complete();
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    /// Mark job as failed.
    pub fn mark_failed(&mut self, error: String) {
        let now = Utc::now();
        self.status = JobStatus::Failed { error };
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    /// Wall-clock execution time in milliseconds, once finished.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_lifecycle() {
        let mut job = Job::new(JobKind::FieldCal, serde_json::json!({"file_ids": [1]}));

        assert!(matches!(job.status, JobStatus::Pending));
        assert!(job.duration_ms().is_none());

        job.mark_running();
        assert!(matches!(job.status, JobStatus::Running));
        assert!(!job.status.is_terminal());

        job.mark_completed(serde_json::json!({"data": []}));
        assert!(job.status.is_terminal());
        assert_eq!(job.state.progress(), 100.0);
        assert!(job.duration_ms().is_some());
    }

    #[test]
    fn failed_job_keeps_progress() {
        let mut job = Job::new(JobKind::SourceExtraction, serde_json::json!({}));
        job.mark_running();
        job.state.update_progress(40.0);
        job.mark_failed("Could not detect any sources".to_string());

        assert_eq!(
            job.status,
            JobStatus::Failed {
                error: "Could not detect any sources".to_string()
            }
        );
        assert_eq!(job.state.progress(), 40.0);
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(JobKind::FieldCal).unwrap(),
            serde_json::json!("field_cal")
        );
        assert_eq!(JobKind::FieldCal.type_name(), "field_cal");
        assert_eq!(JobKind::custom("stacking").type_name(), "stacking");
    }
}
