//! Role storage trait.
//!
//! Defines the interface for role, permission and assignment persistence.
//! Implementations are provided by storage backends (e.g. `clinigate-db-memory`).

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AccessResult;

/// Name of the built-in administrator role.
pub const ADMIN_ROLE: &str = "admin";

/// Name of the built-in baseline role.
pub const USER_ROLE: &str = "user";

// =============================================================================
// Permission
// =============================================================================

/// A permission that can be linked to roles.
///
/// Permissions exist independently of roles; the association is many-to-many.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    /// Globally unique name (e.g. "patient:read").
    pub name: String,

    /// Description of what the permission allows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Permission {
    /// Create a new permission.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// =============================================================================
// Role Type
// =============================================================================

/// A role in the authorization system.
///
/// Roles group permissions and are assigned to principals within an
/// organization. System roles have no organization and are shared by all
/// tenants; every other role belongs to exactly one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// Unique identifier for the role.
    pub id: Uuid,

    /// Role name, unique within its organization.
    pub name: String,

    /// Human-readable description of the role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Owning organization. `None` only for system roles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Permissions linked to this role.
    #[serde(default)]
    pub permissions: HashSet<String>,

    /// Whether this is an immutable, non-deletable system role.
    #[serde(default)]
    pub is_system: bool,

    /// Whether the role is active.
    ///
    /// Inactive roles do not grant any permissions.
    pub active: bool,

    /// When the role was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the role was last updated.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Role {
    /// Creates a new active role with the given name and no permissions.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            organization_id: None,
            permissions: HashSet::new(),
            is_system: false,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a new role builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> RoleBuilder {
        RoleBuilder::new(name)
    }

    /// Returns `true` if the role is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns `true` if the role has a specific permission.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Returns `true` if the role may be used inside `org_id`.
    ///
    /// System roles apply everywhere; tenant roles only in their own organization.
    #[must_use]
    pub fn applies_to(&self, org_id: &str) -> bool {
        self.is_system || self.organization_id.as_deref() == Some(org_id)
    }
}

// =============================================================================
// Role Builder
// =============================================================================

/// Builder for creating `Role` instances.
pub struct RoleBuilder {
    role: Role,
}

impl RoleBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            role: Role::new(name),
        }
    }

    /// Sets the role ID.
    #[must_use]
    pub fn id(mut self, id: Uuid) -> Self {
        self.role.id = id;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.role.description = Some(description.into());
        self
    }

    /// Sets the owning organization.
    #[must_use]
    pub fn organization(mut self, org_id: impl Into<String>) -> Self {
        self.role.organization_id = Some(org_id.into());
        self
    }

    /// Adds a permission to the role.
    #[must_use]
    pub fn add_permission(mut self, permission: impl Into<String>) -> Self {
        self.role.permissions.insert(permission.into());
        self
    }

    /// Sets whether this is a system role.
    #[must_use]
    pub fn system(mut self, is_system: bool) -> Self {
        self.role.is_system = is_system;
        self
    }

    /// Sets whether the role is active.
    #[must_use]
    pub fn active(mut self, active: bool) -> Self {
        self.role.active = active;
        self
    }

    /// Builds the role.
    #[must_use]
    pub fn build(self) -> Role {
        self.role
    }
}

// =============================================================================
// Role Storage Trait
// =============================================================================

/// Storage operations for roles, permissions and their assignments.
///
/// Validation of system roles and tenant ownership lives in
/// [`RoleService`](crate::permission::RoleService); stores only persist.
/// Link and assignment writes are expected to be idempotent.
#[async_trait]
pub trait RoleStorage: Send + Sync {
    /// Find a role by its unique ID.
    async fn find_by_id(&self, role_id: Uuid) -> AccessResult<Option<Role>>;

    /// Find a role by name within an organization, or among system roles
    /// when `org_id` is `None`.
    async fn find_by_name(&self, name: &str, org_id: Option<&str>) -> AccessResult<Option<Role>>;

    /// Create a new role.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the name is already taken in the same scope.
    async fn create(&self, role: &Role) -> AccessResult<()>;

    /// Replace an existing role.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the role doesn't exist.
    async fn update(&self, role: &Role) -> AccessResult<()>;

    /// Delete a role and every assignment that references it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the role doesn't exist.
    async fn delete(&self, role_id: Uuid) -> AccessResult<()>;

    /// List the roles visible in an organization (its own plus system roles),
    /// or only system roles when `org_id` is `None`.
    async fn list(&self, org_id: Option<&str>) -> AccessResult<Vec<Role>>;

    /// Roles assigned to a principal within one organization.
    async fn get_user_roles(&self, principal_id: &str, org_id: &str) -> AccessResult<Vec<Role>>;

    /// Permission names linked to a role.
    async fn get_role_permissions(&self, role_id: Uuid) -> AccessResult<HashSet<String>>;

    /// Link a permission to a role.
    async fn add_role_permission(&self, role_id: Uuid, permission: &str) -> AccessResult<()>;

    /// Unlink a permission from a role.
    async fn remove_role_permission(&self, role_id: Uuid, permission: &str) -> AccessResult<()>;

    /// Assign a role to a principal within an organization.
    async fn assign_user_role(
        &self,
        principal_id: &str,
        org_id: &str,
        role_id: Uuid,
    ) -> AccessResult<()>;

    /// Remove a role assignment.
    async fn remove_user_role(
        &self,
        principal_id: &str,
        org_id: &str,
        role_id: Uuid,
    ) -> AccessResult<()>;

    /// Register a permission. Registering an existing name is a no-op.
    async fn create_permission(&self, permission: &Permission) -> AccessResult<()>;

    /// Find a permission by name.
    async fn find_permission(&self, name: &str) -> AccessResult<Option<Permission>>;

    /// All registered permissions.
    async fn list_permissions(&self) -> AccessResult<Vec<Permission>>;
}

// =============================================================================
// Default Permissions
// =============================================================================

/// Returns the permissions registered at startup.
#[must_use]
pub fn default_permissions() -> Vec<Permission> {
    vec![
        Permission::new("patient:read").with_description("View patient records"),
        Permission::new("patient:write").with_description("Create and modify patient records"),
        Permission::new("appointment:read").with_description("View appointments"),
        Permission::new("appointment:write").with_description("Book and modify appointments"),
        Permission::new("clinic:manage").with_description("Manage clinic settings"),
        Permission::new("account:read").with_description("View accounts"),
        Permission::new("account:manage").with_description("Manage accounts"),
        Permission::new("role:manage").with_description("Manage roles and assignments"),
        Permission::new("audit:read").with_description("View audit trail"),
    ]
}

// =============================================================================
// Tests
// =============================================================================
