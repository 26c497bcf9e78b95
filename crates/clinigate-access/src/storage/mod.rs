//! Storage traits for access-control data.
//!
//! This module defines storage interfaces for:
//!
//! - Roles, permissions and role assignments
//! - Regional policies and IP geolocation
//! - The append-only audit trail
//!
//! # Implementations
//!
//! Storage implementations are provided in separate crates:
//!
//! - `clinigate-db-memory` - in-memory backend

pub mod audit;
pub mod region;
pub mod role;

pub use audit::AuditStore;
pub use region::RegionStore;
pub use role::{
    ADMIN_ROLE, Permission, Role, RoleBuilder, RoleStorage, USER_ROLE, default_permissions,
};
