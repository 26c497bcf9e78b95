//! Region policy storage trait.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::AccessResult;
use crate::types::RegionPolicy;

/// Backing store for regional policies and IP geolocation.
#[async_trait]
pub trait RegionStore: Send + Sync {
    /// Load the policy for a region code.
    ///
    /// Returns `None` if no policy is defined for the code.
    async fn get_region_policy(&self, code: &str) -> AccessResult<Option<RegionPolicy>>;

    /// Map a client address to a region code.
    ///
    /// Returns `None` if the address is not covered by any known range.
    async fn get_region_from_ip(&self, ip: IpAddr) -> AccessResult<Option<String>>;
}
