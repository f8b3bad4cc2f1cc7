//! Error types for the bootstrapper.

use nmc_common::ConfigError;
use thiserror::Error;

/// Errors raised by registration containers and the bootstrapper.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Unregister failed for {scope}: {message}")]
    UnregisterFailed { scope: String, message: String },

    #[error("Update check failed: {0}")]
    UpdateFailed(String),

    #[error("No registration for scope {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl BootstrapError {
    pub fn registration(message: impl Into<String>) -> Self {
        Self::RegistrationFailed(message.into())
    }

    pub fn unregister(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnregisterFailed {
            scope: scope.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for bootstrap operations.
pub type Result<T> = std::result::Result<T, BootstrapError>;
