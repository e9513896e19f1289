//! Tracing/logging setup shared by hosts and tests.

/// Initialize process-wide tracing from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    crate::tracing::init_with(&ObservabilityConfig::from_env());
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::{LogFormat, ObservabilityConfig, init_with};
