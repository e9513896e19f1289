//! Job-fatal error model.

use thiserror::Error;

/// Result type used by every pipeline stage.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error that aborts a whole job.
///
/// Per-item failures (one image, one source) never become a `PipelineError`;
/// stages record them in the job state and keep going.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Missing or inconsistent job settings.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Input records violate a uniqueness rule (e.g. duplicate source ids).
    #[error("data integrity violated: {0}")]
    Integrity(String),

    /// A stage produced an empty result set.
    #[error("{0}")]
    Runtime(String),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Configuration errors and integrity errors are both caused by the job
    /// settings rather than by data content.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Integrity(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_by_kind() {
        assert_eq!(
            PipelineError::validation("Missing catalog sources").to_string(),
            "validation failed: Missing catalog sources"
        );
        assert_eq!(
            PipelineError::runtime("Could not detect any sources").to_string(),
            "Could not detect any sources"
        );
    }

    #[test]
    fn configuration_errors_are_classified() {
        assert!(PipelineError::integrity("dup").is_configuration());
        assert!(!PipelineError::runtime("empty").is_configuration());
    }
}
