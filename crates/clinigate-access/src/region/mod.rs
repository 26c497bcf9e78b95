//! Region resolution and policy caching.

pub mod cache;

pub use cache::{RegionCacheStats, RegionPolicyCache, RegionSource, ResolvedRegion};
