//! # NMC Common
//!
//! Shared pieces of the NMC offline layer: the configuration object handed
//! to both the worker and the page bootstrapper, logging setup, and the
//! fetch timeout helper.
//!
//! ## Features
//!
//! - [`OfflineConfig`]: version token, core manifest, routing table,
//!   dynamic-data pattern, offline fallback and canonical script location
//! - Logging configuration and setup on `tracing-subscriber`
//! - Timeout utility for racing network work against a timer

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod logging;
pub mod timeout;

pub use config::{
    ActivationPolicy, CoreManifest, DynamicDataFallback, OfflineConfig, PathPattern, RouteConfig,
    Strategy, VersionToken, DEFAULT_NAMESPACE, DEFAULT_VERSION, RESET_FLAG, VERSION_PARAM,
};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use timeout::{with_timeout, Elapsed};

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ConfigError {
    /// Create an invalid-config error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Convert an optional millisecond count into a duration.
pub(crate) fn millis(value: Option<u64>) -> Option<Duration> {
    value.filter(|ms| *ms > 0).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_ignores_zero() {
        assert_eq!(millis(None), None);
        assert_eq!(millis(Some(0)), None);
        assert_eq!(millis(Some(250)), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_error_message() {
        let err = ConfigError::invalid("namespace is empty");
        assert_eq!(err.to_string(), "Invalid config: namespace is empty");
    }
}
