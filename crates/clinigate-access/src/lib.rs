//! # clinigate-access
//!
//! Access-control and regional compliance enforcement for multi-tenant
//! healthcare APIs.
//!
//! Every request passes an ordered decision chain before it reaches a
//! handler: authentication, region resolution, compliance validation,
//! tenant-scoped permission checks and admission control. Break-glass
//! emergency access bypasses role gating but never the audit trail.
//!
//! ## Modules
//!
//! - [`pipeline`] - The decision chain and its request-scoped grant
//! - [`middleware`] - Axum adapter and the JSON error contract
//! - [`permission`] - Role resolution and the role administration service
//! - [`region`] - Region resolution and the policy cache
//! - [`compliance`] - GDPR / HIPAA / CCPA and regional header checks
//! - [`rate_limit`] - Sliding-window admission control
//! - [`audit`] - Audit records and emission
//! - [`token`] - Bearer token validation
//! - [`storage`] - Storage traits for roles, regions and the audit trail
//! - [`config`] - Pipeline configuration

pub mod audit;
pub mod compliance;
pub mod config;
mod deadline;
pub mod error;
pub mod headers;
pub mod lifecycle;
pub mod middleware;
pub mod permission;
pub mod pipeline;
pub mod rate_limit;
pub mod region;
pub mod signals;
pub mod storage;
pub mod token;
pub mod types;

#[cfg(test)]
mod testing;

pub use audit::{AuditOptions, AuditRecord, AuditSink};
pub use compliance::{ComplianceError, ComplianceReport, ComplianceRule, ComplianceValidator};
pub use config::{AccessConfig, AuditConfig, ConfigError, RateLimitConfig, RegionConfig};
pub use error::{AccessError, ErrorKind};
pub use lifecycle::CleanupTasks;
pub use middleware::{AccessState, ErrorBody, RequestId, access_middleware, request_id};
pub use permission::{PermissionResolver, RoleService};
pub use pipeline::{AccessDecision, AccessGrant, AccessPipeline, AccessRequirement};
pub use rate_limit::{RateDecision, RateLimiter};
pub use region::{RegionPolicyCache, RegionSource, ResolvedRegion};
pub use signals::RequestSignals;
pub use storage::{AuditStore, Permission, RegionStore, Role, RoleStorage};
pub use token::{JwtTokenValidator, TokenValidator};
pub use types::{Claims, Principal, RegionFlags, RegionPolicy};

/// Type alias for access pipeline results.
pub type AccessResult<T> = Result<T, AccessError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use clinigate_access::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AccessResult;
    pub use crate::config::AccessConfig;
    pub use crate::error::{AccessError, ErrorKind};
    pub use crate::middleware::{AccessState, RequestId, access_middleware, request_id};
    pub use crate::pipeline::{AccessDecision, AccessGrant, AccessPipeline, AccessRequirement};
    pub use crate::storage::{AuditStore, Permission, RegionStore, Role, RoleStorage};
    pub use crate::token::{JwtTokenValidator, TokenValidator};
    pub use crate::types::{Principal, RegionPolicy};
}
