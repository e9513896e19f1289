//! Tracing/logging initialization.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log format.
pub const LOG_FORMAT_ENV: &str = "PHOTOCAL_LOG_FORMAT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable, for terminals.
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log format \"{0}\" (expected json or pretty)")]
pub struct UnknownLogFormat(String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            _ => Err(UnknownLogFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directives, e.g. `info,photocal_calibration=debug`.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl ObservabilityConfig {
    /// Read `RUST_LOG` and `PHOTOCAL_LOG_FORMAT`, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("RUST_LOG").ok(),
            std::env::var(LOG_FORMAT_ENV).ok(),
        )
    }

    fn from_vars(filter: Option<String>, format: Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            filter: filter
                .filter(|f| !f.trim().is_empty())
                .unwrap_or(defaults.filter),
            format: format
                .and_then(|f| f.parse().ok())
                .unwrap_or(defaults.format),
        }
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_with(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);
    let _ = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_env_is_empty() {
        let config = ObservabilityConfig::from_vars(None, Some("  ".into()));
        assert_eq!(config, ObservabilityConfig::default());
    }

    #[test]
    fn env_values_are_used() {
        let config = ObservabilityConfig::from_vars(
            Some("photocal_calibration=debug".into()),
            Some("Pretty".into()),
        );
        assert_eq!(config.filter, "photocal_calibration=debug");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ObservabilityConfig =
            serde_json::from_value(serde_json::json!({"format": "pretty"})).unwrap();
        assert_eq!(config.filter, "info");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn init_twice_is_harmless() {
        init_with(&ObservabilityConfig::default());
        init_with(&ObservabilityConfig::default());
    }
}
