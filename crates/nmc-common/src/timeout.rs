//! Timeout utility for the network branch of a caching strategy.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// The operation did not finish in time.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Operation timed out after {0:?}")]
pub struct Elapsed(pub Duration);

/// Run an operation, optionally bounded by a timeout.
///
/// `None` awaits the operation without a deadline.
pub async fn with_timeout<T, Fut>(timeout: Option<Duration>, operation: Fut) -> Result<T, Elapsed>
where
    Fut: Future<Output = T>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| Elapsed(limit)),
        None => Ok(operation.await),
    }
}
