//! Sliding-window admission control.
//!
//! Each identity keeps a log of the instants of its admitted requests. A
//! request is admitted while fewer than `limit` entries fall inside the
//! trailing window. Bursts are therefore rejected sharply at request
//! `limit + 1` and admission resumes one slot at a time as old entries age
//! out. Rejected requests are not logged and do not extend the penalty.
//!
//! Buckets live in a [`DashMap`] and each has its own mutex, so unrelated
//! identities never contend. Idle buckets are reclaimed by
//! [`RateLimiter::sweep_idle`], run from a background task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RateLimitConfig;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// The limit that was applied.
    pub limit: u32,
    /// Requests left in the current window after this one.
    pub remaining: u32,
    /// Time until a slot frees up. Zero when admitted.
    pub retry_after: Duration,
}

#[derive(Debug, Default)]
struct RateBucket {
    hits: VecDeque<Instant>,
}

impl RateBucket {
    fn evict_before(&mut self, cutoff: Instant) {
        while self.hits.front().is_some_and(|hit| *hit <= cutoff) {
            self.hits.pop_front();
        }
    }
}

/// Per-identity sliding-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, Arc<Mutex<RateBucket>>>,
    default_limit: u32,
    window: Duration,
    sweep_interval: Duration,
}

impl RateLimiter {
    /// Creates a limiter from configuration.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            default_limit: config.requests_per_window,
            window: config.window,
            sweep_interval: config.sweep_interval,
        }
    }

    /// Admits `key` against the configured default limit.
    pub fn admit(&self, key: &str) -> bool {
        self.check(key, self.default_limit).allowed
    }

    /// Admits `key` against `limit`, recording the request when admitted.
    pub fn check(&self, key: &str, limit: u32) -> RateDecision {
        let bucket = self.bucket(key);
        let now = Instant::now();
        let mut bucket = bucket.lock();

        if let Some(cutoff) = now.checked_sub(self.window) {
            bucket.evict_before(cutoff);
        }

        let used = u32::try_from(bucket.hits.len()).unwrap_or(u32::MAX);
        if used < limit {
            bucket.hits.push_back(now);
            return RateDecision {
                allowed: true,
                limit,
                remaining: limit - used - 1,
                retry_after: Duration::ZERO,
            };
        }

        let retry_after = bucket
            .hits
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or(self.window);

        tracing::debug!(key, limit, retry_after_ms = retry_after.as_millis() as u64, "Rate limit exceeded");
        RateDecision {
            allowed: false,
            limit,
            remaining: 0,
            retry_after,
        }
    }

    /// Removes buckets with no request inside the window and trims the rest.
    /// Returns the number of buckets removed.
    pub fn sweep_idle(&self) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(self.window) else {
            return 0;
        };
        let before = self.buckets.len();

        // Buckets cloned out by an in-flight `check` stay mapped.
        self.buckets.retain(|_, bucket| {
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            let mut bucket = bucket.lock();
            bucket.evict_before(cutoff);
            !bucket.hits.is_empty()
        });

        before.saturating_sub(self.buckets.len())
    }

    /// Number of tracked identities.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    /// The default per-window limit.
    #[must_use]
    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }

    /// Spawns the periodic idle sweep. It stops when `shutdown` is cancelled.
    pub fn start_sweep_task(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = self.sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = self.sweep_idle();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = self.tracked_keys(), "Rate limiter sweep completed");
                        }
                    }
                }
            }

            tracing::debug!("Rate limiter sweep task stopped");
        })
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<RateBucket>> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(&bucket);
        }
        Arc::clone(self.buckets.entry(key.to_string()).or_default().value())
    }
}
