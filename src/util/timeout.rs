//! Caller-side bounds for suspension points.
//!
//! Awaiting a deferred value, a provider part or a subscription item never
//! times out on its own. Callers that need a bound wrap the await here.

use std::future::Future;
use std::time::Duration;

use crate::error::RociError;

/// Await `future`, failing with [`RociError::Timeout`] after `duration`.
pub async fn within<T>(
    duration: Duration,
    future: impl Future<Output = T>,
) -> Result<T, RociError> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| RociError::Timeout(duration.as_millis() as u64))
}

/// Like [`within`] for fallible futures; the inner error is kept as is.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, RociError>>,
) -> Result<T, RociError> {
    within(duration, future).await?
}
