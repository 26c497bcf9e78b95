//! Background task ownership.
//!
//! Sweeps run for the life of the service, not of a request or handler.
//! [`CleanupTasks`] is created once at startup and consumed at shutdown.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::rate_limit::RateLimiter;
use crate::region::RegionPolicyCache;

/// Owns the periodic cleanup tasks of the access pipeline.
#[derive(Debug)]
pub struct CleanupTasks {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl CleanupTasks {
    /// Starts the region cache sweep and the rate limiter sweep.
    #[must_use]
    pub fn start(regions: &Arc<RegionPolicyCache>, limiter: &Arc<RateLimiter>) -> Self {
        let shutdown = CancellationToken::new();
        let handles = vec![
            Arc::clone(regions).start_cleanup_task(shutdown.child_token()),
            Arc::clone(limiter).start_sweep_task(shutdown.child_token()),
        ];
        tracing::debug!(tasks = handles.len(), "Access cleanup tasks started");

        Self { shutdown, handles }
    }

    /// Number of running tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if no task is owned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancels every task and waits for it to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "Cleanup task ended abnormally");
            }
        }
        tracing::info!("Access cleanup tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, RegionConfig};
    use crate::testing::MockRegionStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_stops_all_tasks() {
        let regions = Arc::new(RegionPolicyCache::new(
            Arc::new(MockRegionStore::new()),
            RegionConfig::default(),
        ));
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig::default()));

        let tasks = CleanupTasks::start(&regions, &limiter);
        assert_eq!(tasks.len(), 2);

        tokio::time::timeout(Duration::from_secs(1), tasks.shutdown())
            .await
            .unwrap();
    }
}
