//! In-memory region policy store with a CIDR geolocation table.

use std::net::IpAddr;

use async_trait::async_trait;
use clinigate_access::storage::RegionStore;
use clinigate_access::types::RegionPolicy;
use clinigate_access::AccessResult;
use dashmap::DashMap;
use ipnetwork::IpNetwork;
use parking_lot::RwLock;

/// Region policies keyed by upper-case code, plus CIDR → region ranges.
///
/// IP lookups pick the most specific matching range.
#[derive(Debug, Default)]
pub struct MemoryRegionStore {
    policies: DashMap<String, RegionPolicy>,
    ranges: RwLock<Vec<(IpNetwork, String)>>,
}

impl MemoryRegionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a policy. The code is stored upper-case.
    pub fn put_policy(&self, mut policy: RegionPolicy) {
        policy.code = policy.code.trim().to_ascii_uppercase();
        tracing::debug!(region = %policy.code, "Region policy stored");
        self.policies.insert(policy.code.clone(), policy);
    }

    /// Removes a policy. Returns `true` if it existed.
    pub fn remove_policy(&self, code: &str) -> bool {
        self.policies
            .remove(&code.trim().to_ascii_uppercase())
            .is_some()
    }

    /// Maps every address inside `network` to `region`.
    pub fn add_range(&self, network: IpNetwork, region: impl Into<String>) {
        let region = region.into().trim().to_ascii_uppercase();
        let mut ranges = self.ranges.write();
        ranges.retain(|(existing, _)| *existing != network);
        ranges.push((network, region));
    }

    /// Number of stored policies.
    #[must_use]
    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    /// Number of stored IP ranges.
    #[must_use]
    pub fn range_count(&self) -> usize {
        self.ranges.read().len()
    }
}

#[async_trait]
impl RegionStore for MemoryRegionStore {
    async fn get_region_policy(&self, code: &str) -> AccessResult<Option<RegionPolicy>> {
        Ok(self
            .policies
            .get(&code.trim().to_ascii_uppercase())
            .map(|policy| policy.clone()))
    }

    async fn get_region_from_ip(&self, ip: IpAddr) -> AccessResult<Option<String>> {
        Ok(self
            .ranges
            .read()
            .iter()
            .filter(|(network, _)| network.contains(ip))
            .max_by_key(|(network, _)| network.prefix())
            .map(|(_, region)| region.clone()))
    }
}
