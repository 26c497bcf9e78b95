//! TTL cache for regional policies with single-flight loading.
//!
//! ## Keyspaces
//!
//! - **Policies** by region code, valid for `ttl`.
//! - **IP → region** mappings by client address, valid for `ip_ttl`.
//!   Addresses outside every known range are cached as "no region".
//!
//! ## Loading
//!
//! A miss starts one shared load per region code. Concurrent misses for the
//! same code await that load instead of calling the store again. The load
//! populates the cache and removes itself from the in-flight map before its
//! waiters see the result. Failures are never cached.
//!
//! ## Expiry
//!
//! Reads ignore expired entries; memory is reclaimed by
//! [`RegionPolicyCache::cleanup_expired`], run periodically by
//! [`RegionPolicyCache::start_cleanup_task`].

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RegionConfig;
use crate::deadline::bounded;
use crate::signals::RequestSignals;
use crate::storage::RegionStore;
use crate::types::RegionPolicy;
use crate::{AccessError, AccessResult};

type SharedLoad = Shared<BoxFuture<'static, AccessResult<Arc<RegionPolicy>>>>;

/// Where a resolved region code came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSource {
    /// `X-Region` header or `region` query parameter.
    Explicit,
    /// IP geolocation.
    Geolocation,
    /// Configured default.
    Default,
}

/// Outcome of region resolution.
#[derive(Debug, Clone)]
pub struct ResolvedRegion {
    /// Normalized region code.
    pub code: String,
    /// The policy in force for this request.
    pub policy: Arc<RegionPolicy>,
    /// How the code was chosen.
    pub source: RegionSource,
    /// `true` if the policy is the fallback substituted after a failed load.
    pub degraded: bool,
}

struct CachedPolicy {
    policy: Arc<RegionPolicy>,
    expires_at: Instant,
}

struct CachedRegionCode {
    code: Option<String>,
    expires_at: Instant,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionCacheStats {
    /// Cached policies, including expired entries not yet swept.
    pub policies: usize,
    /// Cached IP mappings, including expired entries not yet swept.
    pub ip_mappings: usize,
    /// Policy lookups answered from the cache.
    pub hits: u64,
    /// Policy lookups that missed the cache.
    pub misses: u64,
    /// Backing-store policy loads started.
    pub loads: u64,
    /// Misses that joined a load already in flight.
    pub coalesced: u64,
    /// Entries removed by sweeps.
    pub evictions: u64,
}

impl RegionCacheStats {
    /// Hit rate as a percentage.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Resolves the region of a request and caches its policy.
pub struct RegionPolicyCache {
    store: Arc<dyn RegionStore>,
    config: RegionConfig,
    policies: Arc<DashMap<String, CachedPolicy>>,
    ip_regions: DashMap<IpAddr, CachedRegionCode>,
    in_flight: Arc<DashMap<String, SharedLoad>>,
    counters: Arc<Counters>,
}

impl RegionPolicyCache {
    /// Creates an empty cache over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RegionStore>, config: RegionConfig) -> Self {
        Self {
            store,
            config,
            policies: Arc::new(DashMap::new()),
            ip_regions: DashMap::new(),
            in_flight: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Resolves the region code for a request and returns its policy.
    ///
    /// The code comes from the explicit signal, else IP geolocation, else the
    /// configured default. When the policy cannot be loaded, a `mandatory`
    /// caller gets the error; everyone else gets [`RegionPolicy::fallback`]
    /// with `degraded` set.
    ///
    /// # Errors
    ///
    /// Only when `mandatory`: `UnknownRegion` if no policy exists for the
    /// code, `Storage` or `Timeout` if the store failed.
    pub async fn resolve(
        &self,
        signals: &RequestSignals,
        mandatory: bool,
    ) -> AccessResult<ResolvedRegion> {
        let (code, source) = self.resolve_code(signals).await;

        match self.get_policy(&code).await {
            Ok(policy) => Ok(ResolvedRegion {
                code,
                policy,
                source,
                degraded: false,
            }),
            Err(err) if mandatory => {
                tracing::warn!(region = %code, error = %err, "Mandatory region policy unavailable");
                Err(err)
            }
            Err(err) => {
                tracing::warn!(
                    region = %code,
                    error = %err,
                    "Region policy unavailable, using fallback policy"
                );
                Ok(ResolvedRegion {
                    policy: Arc::new(RegionPolicy::fallback(code.clone())),
                    code,
                    source,
                    degraded: true,
                })
            }
        }
    }

    /// Returns the policy for `code`, loading it on a miss.
    ///
    /// # Errors
    ///
    /// `UnknownRegion` if the store has no policy for the code, otherwise the
    /// store error or `Timeout`.
    pub async fn get_policy(&self, code: &str) -> AccessResult<Arc<RegionPolicy>> {
        if let Some(policy) = self.cached_policy(code) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(policy);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let load = match self.in_flight.entry(code.to_string()) {
            Entry::Occupied(entry) => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                // A load may have finished between the first check and taking
                // the in-flight slot; it populates the cache before leaving.
                if let Some(policy) = self.cached_policy(code) {
                    return Ok(policy);
                }
                let load = self.start_load(code.to_string());
                entry.insert(load.clone());
                load
            }
        };

        load.await
    }

    /// Drops a cached policy so the next request reloads it.
    pub fn invalidate(&self, code: &str) {
        if self.policies.remove(code).is_some() {
            tracing::debug!(region = code, "Region policy invalidated");
        }
    }

    /// Drops every cached policy and IP mapping.
    pub fn clear(&self) {
        self.policies.clear();
        self.ip_regions.clear();
    }

    /// Removes expired policies and IP mappings. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.policies.retain(|_, entry| {
            let keep = entry.expires_at > now;
            removed += usize::from(!keep);
            keep
        });
        self.ip_regions.retain(|_, entry| {
            let keep = entry.expires_at > now;
            removed += usize::from(!keep);
            keep
        });

        if removed > 0 {
            self.counters
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Returns cache statistics.
    #[must_use]
    pub fn stats(&self) -> RegionCacheStats {
        RegionCacheStats {
            policies: self.policies.len(),
            ip_mappings: self.ip_regions.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Spawns the periodic sweep. It stops when `shutdown` is cancelled.
    pub fn start_cleanup_task(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = self.config.cleanup_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = self.cleanup_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "Region cache cleanup completed");
                        }
                    }
                }
            }

            tracing::debug!("Region cache cleanup task stopped");
        })
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn cached_policy(&self, code: &str) -> Option<Arc<RegionPolicy>> {
        self.policies
            .get(code)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| Arc::clone(&entry.policy))
    }

    fn start_load(&self, code: String) -> SharedLoad {
        let store = Arc::clone(&self.store);
        let policies = Arc::clone(&self.policies);
        let in_flight = Arc::clone(&self.in_flight);
        let counters = Arc::clone(&self.counters);
        let ttl = self.config.ttl;
        let timeout = self.config.load_timeout;

        async move {
            counters.loads.fetch_add(1, Ordering::Relaxed);

            let result = bounded(
                "region_policy_load",
                timeout,
                store.get_region_policy(&code),
            )
            .await
            .and_then(|found| {
                found.ok_or_else(|| AccessError::UnknownRegion { code: code.clone() })
            })
            .map(Arc::new);

            if let Ok(policy) = &result {
                policies.insert(
                    code.clone(),
                    CachedPolicy {
                        policy: Arc::clone(policy),
                        expires_at: Instant::now() + ttl,
                    },
                );
                tracing::debug!(region = %code, "Region policy loaded");
            }
            in_flight.remove(&code);

            result
        }
        .boxed()
        .shared()
    }

    async fn resolve_code(&self, signals: &RequestSignals) -> (String, RegionSource) {
        if let Some(code) = signals.explicit_region().and_then(normalize_code) {
            return (code, RegionSource::Explicit);
        }

        if let Some(ip) = signals.client_ip()
            && let Some(code) = self.region_for_ip(ip).await
        {
            return (code, RegionSource::Geolocation);
        }

        let default = normalize_code(&self.config.default_region)
            .unwrap_or_else(|| self.config.default_region.clone());
        (default, RegionSource::Default)
    }

    async fn region_for_ip(&self, ip: IpAddr) -> Option<String> {
        if let Some(entry) = self.ip_regions.get(&ip)
            && entry.expires_at > Instant::now()
        {
            return entry.code.clone();
        }

        let lookup = bounded(
            "region_ip_lookup",
            self.config.load_timeout,
            self.store.get_region_from_ip(ip),
        )
        .await;

        match lookup {
            Ok(found) => {
                let code = found.as_deref().and_then(normalize_code);
                self.ip_regions.insert(
                    ip,
                    CachedRegionCode {
                        code: code.clone(),
                        expires_at: Instant::now() + self.config.ip_ttl,
                    },
                );
                code
            }
            Err(err) => {
                tracing::warn!(%ip, error = %err, "IP geolocation failed, using default region");
                None
            }
        }
    }
}

impl std::fmt::Debug for RegionPolicyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionPolicyCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Trims and upper-cases a region code. Blank codes are `None`.
fn normalize_code(code: &str) -> Option<String> {
    let code = code.trim();
    (!code.is_empty()).then(|| code.to_ascii_uppercase())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRegionStore;
    use crate::types::RegionFlags;

    fn config() -> RegionConfig {
        RegionConfig {
            default_region: "US".to_string(),
            ttl: Duration::from_secs(60),
            ip_ttl: Duration::from_secs(60),
            load_timeout: Duration::from_secs(1),
            cleanup_interval: Duration::from_millis(10),
            mandatory: false,
        }
    }

    fn eu_policy() -> RegionPolicy {
        RegionPolicy::new("EU").with_flags(RegionFlags {
            gdpr: true,
            ..RegionFlags::default()
        })
    }

    fn store() -> Arc<MockRegionStore> {
        Arc::new(
            MockRegionStore::new()
                .with_policy(eu_policy())
                .with_policy(RegionPolicy::new("US"))
                .with_ip("203.0.113.7".parse().unwrap(), "eu"),
        )
    }

    fn explicit(code: &str) -> RequestSignals {
        RequestSignals::new().with_header("X-Region", code)
    }

    #[tokio::test]
    async fn test_resolve_within_ttl_loads_once() {
        let store = store();
        let cache = RegionPolicyCache::new(store.clone(), config());

        let first = cache.resolve(&explicit("EU"), true).await.unwrap();
        let second = cache.resolve(&explicit("EU"), true).await.unwrap();

        assert_eq!(first.code, "EU");
        assert!(first.policy.flags.gdpr);
        assert!(Arc::ptr_eq(&first.policy, &second.policy));
        assert_eq!(store.loads(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_resolve_after_ttl_loads_again() {
        let store = store();
        let cache = RegionPolicyCache::new(
            store.clone(),
            RegionConfig {
                ttl: Duration::from_millis(30),
                ..config()
            },
        );

        cache.resolve(&explicit("EU"), true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        cache.resolve(&explicit("EU"), true).await.unwrap();

        assert_eq!(store.loads(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_are_coalesced() {
        let store = store();
        store.set_delay(Duration::from_millis(50));
        let cache = Arc::new(RegionPolicyCache::new(store.clone(), config()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_policy("EU").await })
            })
            .collect();

        for task in tasks {
            let policy = task.await.unwrap().unwrap();
            assert_eq!(policy.code, "EU");
        }

        assert_eq!(store.loads(), 1);
        let stats = cache.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.coalesced, 15);
    }

    #[tokio::test]
    async fn test_explicit_region_is_normalized() {
        let cache = RegionPolicyCache::new(store(), config());
        let signals = RequestSignals::new().with_query("region=%20eu%20");
        let resolved = cache.resolve(&signals, true).await.unwrap();
        assert_eq!(resolved.code, "EU");
        assert_eq!(resolved.source, RegionSource::Explicit);
    }

    #[tokio::test]
    async fn test_header_wins_over_ip() {
        let cache = RegionPolicyCache::new(store(), config());
        let signals = explicit("US").with_client_ip("203.0.113.7".parse().unwrap());
        let resolved = cache.resolve(&signals, true).await.unwrap();
        assert_eq!(resolved.code, "US");
    }

    #[tokio::test]
    async fn test_ip_geolocation_is_cached() {
        let store = store();
        let cache = RegionPolicyCache::new(store.clone(), config());
        let signals = RequestSignals::new().with_client_ip("203.0.113.7".parse().unwrap());

        let resolved = cache.resolve(&signals, true).await.unwrap();
        assert_eq!(resolved.code, "EU");
        assert_eq!(resolved.source, RegionSource::Geolocation);
        cache.resolve(&signals, true).await.unwrap();

        assert_eq!(store.ip_lookups.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().ip_mappings, 1);
    }

    #[tokio::test]
    async fn test_unknown_ip_uses_default() {
        let cache = RegionPolicyCache::new(store(), config());
        let signals = RequestSignals::new().with_client_ip("198.51.100.1".parse().unwrap());
        let resolved = cache.resolve(&signals, true).await.unwrap();
        assert_eq!(resolved.code, "US");
        assert_eq!(resolved.source, RegionSource::Default);
    }

    #[tokio::test]
    async fn test_unknown_explicit_region() {
        let cache = RegionPolicyCache::new(store(), config());

        let err = cache.resolve(&explicit("MARS"), true).await.unwrap_err();
        assert!(matches!(err, AccessError::UnknownRegion { ref code } if code == "MARS"));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);

        let resolved = cache.resolve(&explicit("MARS"), false).await.unwrap();
        assert!(resolved.degraded);
        assert_eq!(*resolved.policy, RegionPolicy::fallback("MARS"));
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let store = store();
        store.fail_with("region store offline");
        let cache = RegionPolicyCache::new(store.clone(), config());

        let err = cache.resolve(&explicit("EU"), true).await.unwrap_err();
        assert!(matches!(err, AccessError::Storage { .. }));

        let degraded = cache.resolve(&explicit("EU"), false).await.unwrap();
        assert!(degraded.degraded);
        assert!(!degraded.policy.flags.gdpr);

        store.recover();
        let healed = cache.resolve(&explicit("EU"), false).await.unwrap();
        assert!(!healed.degraded);
        assert!(healed.policy.flags.gdpr);
        assert_eq!(store.loads(), 3);
    }

    #[tokio::test]
    async fn test_slow_load_times_out() {
        let store = store();
        store.set_delay(Duration::from_millis(200));
        let cache = RegionPolicyCache::new(
            store,
            RegionConfig {
                load_timeout: Duration::from_millis(20),
                ..config()
            },
        );

        let err = cache.resolve(&explicit("EU"), true).await.unwrap_err();
        assert!(matches!(err, AccessError::Timeout { .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_entries() {
        let cache = RegionPolicyCache::new(
            store(),
            RegionConfig {
                ttl: Duration::from_millis(10),
                ip_ttl: Duration::from_millis(10),
                ..config()
            },
        );
        cache.get_policy("EU").await.unwrap();
        cache
            .resolve(
                &RequestSignals::new().with_client_ip("203.0.113.7".parse().unwrap()),
                true,
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.stats().policies, 0);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let store = store();
        let cache = RegionPolicyCache::new(store.clone(), config());
        cache.get_policy("EU").await.unwrap();
        cache.invalidate("EU");
        cache.get_policy("EU").await.unwrap();
        assert_eq!(store.loads(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_cancel() {
        let cache = Arc::new(RegionPolicyCache::new(store(), config()));
        let token = CancellationToken::new();
        let handle = Arc::clone(&cache).start_cleanup_task(token.clone());

        tokio::time::sleep(Duration::from_millis(25)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
