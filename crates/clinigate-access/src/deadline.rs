//! Bounded backing-store calls.

use std::future::Future;
use std::time::Duration;

use crate::{AccessError, AccessResult};

/// Runs a store call with its own budget.
///
/// Elapsed budgets become [`AccessError::Timeout`] so a slow dependency turns
/// into a policy outcome instead of hanging the request. Dropping the returned
/// future cancels the underlying call.
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> AccessResult<T>
where
    F: Future<Output = AccessResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "Backing store call timed out"
            );
            Err(AccessError::Timeout { operation, timeout })
        }
    }
}
