//! Error types for the lifecycle manager.

use nmc_common::{ConfigError, Elapsed};
use thiserror::Error;

use crate::worker::WorkerState;

/// Errors that can occur in lifecycle operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Invalid state: expected {expected}, worker is {actual}")]
    InvalidState {
        expected: WorkerState,
        actual: WorkerState,
    },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ServiceWorkerError {
    pub(crate) fn invalid_state(expected: WorkerState, actual: WorkerState) -> Self {
        Self::InvalidState { expected, actual }
    }
}

/// Errors from the network side of a strategy.
///
/// These never leave a strategy: every strategy turns them into a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error(transparent)]
    Timeout(#[from] Elapsed),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }
}

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
