//! Mutable state of a running job.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use photocal_core::JobId;

/// Progress and per-item diagnostics of one job invocation.
///
/// Progress is a percentage in `[0, 100]` and never decreases. A multi-stage
/// job can scope each stage to a slice of the range with [`JobState::set_stage`];
/// stage-local progress (0–100) is then mapped into that slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    job_id: JobId,
    progress: f64,
    errors: Vec<String>,
    warnings: Vec<String>,
    #[serde(skip, default = "full_span")]
    stage: (f64, f64),
}

fn full_span() -> (f64, f64) {
    (0.0, 100.0)
}

impl JobState {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            progress: 0.0,
            errors: Vec::new(),
            warnings: Vec::new(),
            stage: full_span(),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Record a recoverable per-item error.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!(job_id = %self.job_id, error = %msg, "job item failed");
        self.errors.push(msg);
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        debug!(job_id = %self.job_id, warning = %msg, "job warning");
        self.warnings.push(msg);
    }

    /// Restrict subsequent [`update_progress`](Self::update_progress) calls to `[from, to]`.
    pub fn set_stage(&mut self, from: f64, to: f64) {
        let from = from.clamp(0.0, 100.0);
        let to = to.clamp(from, 100.0);
        self.stage = (from, to);
    }

    /// Report stage-local progress in percent.
    ///
    /// Values outside `[0, 100]` are clamped; reports lower than the current
    /// overall progress are ignored.
    pub fn update_progress(&mut self, percent: f64) {
        if percent.is_nan() {
            return;
        }
        let (from, to) = self.stage;
        let overall = from + (to - from) * percent.clamp(0.0, 100.0) / 100.0;
        if overall > self.progress {
            self.progress = overall;
        }
    }

    pub(crate) fn complete(&mut self) {
        self.stage = full_span();
        self.progress = 100.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_monotonic() {
        let mut state = JobState::new(JobId::new());
        state.update_progress(50.0);
        state.update_progress(25.0);
        assert_eq!(state.progress(), 50.0);
        state.update_progress(150.0);
        assert_eq!(state.progress(), 100.0);
    }

    #[test]
    fn stages_map_into_their_slice() {
        let mut state = JobState::new(JobId::new());
        state.set_stage(0.0, 50.0);
        state.update_progress(100.0);
        assert_eq!(state.progress(), 50.0);

        state.set_stage(50.0, 100.0);
        state.update_progress(0.0);
        assert_eq!(state.progress(), 50.0);
        state.update_progress(50.0);
        assert_eq!(state.progress(), 75.0);
    }

    #[test]
    fn diagnostics_keep_insertion_order() {
        let mut state = JobState::new(JobId::new());
        state.add_error("Data file ID 1: boom");
        state.add_error("Data file ID 2: boom");
        state.add_warning("w");
        assert_eq!(state.errors(), ["Data file ID 1: boom", "Data file ID 2: boom"]);
        assert_eq!(state.warnings(), ["w"]);
    }
}
