//! In-memory storage backend for the Clinigate access pipeline.
//!
//! Implements every storage trait of `clinigate-access` on top of
//! [`dashmap`] and [`parking_lot`] locks:
//!
//! - [`MemoryRoleStorage`]: roles, permissions and assignments
//! - [`MemoryRegionStore`]: region policies and a CIDR geolocation table
//! - [`MemoryAuditStore`]: append-only audit log
//!
//! # Example
//!
//! ```ignore
//! use clinigate_db_memory::MemoryStores;
//!
//! let stores = MemoryStores::new();
//! let pipeline = AccessPipeline::new(
//!     &config,
//!     tokens,
//!     stores.roles.clone(),
//!     stores.regions.clone(),
//!     stores.audit.clone(),
//! );
//! ```

pub mod audit;
pub mod region;
pub mod role;
pub mod seed;

use std::sync::Arc;

pub use audit::MemoryAuditStore;
pub use region::MemoryRegionStore;
pub use role::MemoryRoleStorage;
pub use seed::{AssignmentSeed, IpRangeSeed, RoleSeed, SeedConfig, SeedError, SeedSummary};

/// The three in-memory stores, shareable as trait objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryStores {
    /// Role, permission and assignment storage.
    pub roles: Arc<MemoryRoleStorage>,
    /// Region policy and geolocation storage.
    pub regions: Arc<MemoryRegionStore>,
    /// Audit log.
    pub audit: Arc<MemoryAuditStore>,
}

impl MemoryStores {
    /// Creates empty stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
