//! Role-based, tenant-scoped authorization.
//!
//! - [`PermissionResolver`] answers permission checks for the pipeline.
//! - [`RoleService`] is the validated write path for roles and assignments.

pub mod resolver;
pub mod service;

pub use resolver::PermissionResolver;
pub use service::RoleService;
