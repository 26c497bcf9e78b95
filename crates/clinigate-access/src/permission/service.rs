//! Role and permission administration.
//!
//! `RoleService` is the only write path for roles. It owns the rules the
//! stores do not enforce: system roles are immutable, tenant roles belong to
//! exactly one organization, and grants never cross tenants.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::deadline::bounded;
use crate::storage::{ADMIN_ROLE, Permission, Role, RoleStorage, USER_ROLE};
use crate::{AccessError, AccessResult};

/// Permissions linked to the built-in `user` role.
const USER_ROLE_PERMISSIONS: &[&str] = &["patient:read", "appointment:read", "account:read"];

/// Validated role, permission and assignment mutations.
#[derive(Clone)]
pub struct RoleService {
    storage: Arc<dyn RoleStorage>,
    timeout: Duration,
}

impl RoleService {
    /// Creates a service whose store calls are each bounded by `timeout`.
    #[must_use]
    pub fn new(storage: Arc<dyn RoleStorage>, timeout: Duration) -> Self {
        Self { storage, timeout }
    }

    // -------------------------------------------------------------------------
    // Roles
    // -------------------------------------------------------------------------

    /// Creates a tenant role.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for a blank name, a missing organization or a system
    /// role; `Conflict` if the name is reserved or already used in the org.
    pub async fn create_role(&self, mut role: Role) -> AccessResult<Role> {
        role.name = validate_name(&role.name)?;
        if role.is_system {
            return Err(AccessError::invalid_request(
                "System roles are seeded at startup and cannot be created",
            ));
        }
        let org_id = require_org(&role)?.to_string();
        reject_reserved(&role.name)?;

        let existing = bounded(
            "role_lookup",
            self.timeout,
            self.storage.find_by_name(&role.name, Some(&org_id)),
        )
        .await?;
        if existing.is_some() {
            return Err(AccessError::conflict(format!(
                "Role '{}' already exists in organization '{org_id}'",
                role.name
            )));
        }

        for permission in &role.permissions {
            self.ensure_permission(permission).await?;
        }

        let now = OffsetDateTime::now_utc();
        role.created_at = now;
        role.updated_at = now;
        bounded("role_create", self.timeout, self.storage.create(&role)).await?;

        tracing::info!(role_id = %role.id, name = %role.name, org_id, "Role created");
        Ok(role)
    }

    /// Replaces a tenant role.
    ///
    /// The system flag is read from the stored role, so a caller cannot
    /// unlock a system role by clearing the flag on its copy.
    ///
    /// # Errors
    ///
    /// `SystemRoleImmutable` for system roles, `NotFound` for unknown ids,
    /// plus the validation errors of [`create_role`](Self::create_role).
    pub async fn update_role(&self, mut role: Role) -> AccessResult<Role> {
        let stored = self.load_mutable(role.id).await?;
        if role.is_system {
            return Err(AccessError::SystemRoleImmutable { name: role.name });
        }

        role.name = validate_name(&role.name)?;
        let org_id = require_org(&role)?.to_string();
        reject_reserved(&role.name)?;

        if stored.organization_id.as_deref() != Some(org_id.as_str()) {
            return Err(AccessError::invalid_request(
                "Roles cannot move between organizations",
            ));
        }

        if stored.name != role.name {
            let clash = bounded(
                "role_lookup",
                self.timeout,
                self.storage.find_by_name(&role.name, Some(&org_id)),
            )
            .await?;
            if clash.is_some_and(|other| other.id != role.id) {
                return Err(AccessError::conflict(format!(
                    "Role '{}' already exists in organization '{org_id}'",
                    role.name
                )));
            }
        }

        for permission in role.permissions.difference(&stored.permissions) {
            self.ensure_permission(permission).await?;
        }

        role.created_at = stored.created_at;
        role.updated_at = OffsetDateTime::now_utc();
        bounded("role_update", self.timeout, self.storage.update(&role)).await?;

        tracing::info!(role_id = %role.id, name = %role.name, "Role updated");
        Ok(role)
    }

    /// Deletes a tenant role together with its assignments.
    ///
    /// # Errors
    ///
    /// `SystemRoleImmutable` for system roles, `NotFound` for unknown ids.
    pub async fn delete_role(&self, role_id: Uuid) -> AccessResult<()> {
        let stored = self.load_mutable(role_id).await?;
        bounded("role_delete", self.timeout, self.storage.delete(role_id)).await?;
        tracing::info!(role_id = %role_id, name = %stored.name, "Role deleted");
        Ok(())
    }

    /// Lists the roles visible inside an organization.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn list_roles(&self, org_id: &str) -> AccessResult<Vec<Role>> {
        bounded("role_list", self.timeout, self.storage.list(Some(org_id))).await
    }

    // -------------------------------------------------------------------------
    // Permission links
    // -------------------------------------------------------------------------

    /// Links a registered permission to a tenant role. Linking twice is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown role or permission, `SystemRoleImmutable`
    /// for system roles.
    pub async fn assign_permission(&self, role_id: Uuid, permission: &str) -> AccessResult<()> {
        let role = self.load_mutable(role_id).await?;
        self.ensure_permission(permission).await?;
        if role.has_permission(permission) {
            tracing::debug!(role_id = %role_id, permission, "Permission already linked");
            return Ok(());
        }
        bounded(
            "role_permission_link",
            self.timeout,
            self.storage.add_role_permission(role_id, permission),
        )
        .await
    }

    /// Unlinks a permission from a tenant role. Unlinking an absent link is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown role, `SystemRoleImmutable` for system roles.
    pub async fn revoke_permission(&self, role_id: Uuid, permission: &str) -> AccessResult<()> {
        let role = self.load_mutable(role_id).await?;
        if !role.has_permission(permission) {
            return Ok(());
        }
        bounded(
            "role_permission_unlink",
            self.timeout,
            self.storage.remove_role_permission(role_id, permission),
        )
        .await
    }

    /// Registers a permission. Registering an existing name is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for a blank name, or the store error.
    pub async fn register_permission(&self, permission: Permission) -> AccessResult<()> {
        if permission.name.trim().is_empty() {
            return Err(AccessError::invalid_request(
                "Permission name must not be empty",
            ));
        }
        bounded(
            "permission_create",
            self.timeout,
            self.storage.create_permission(&permission),
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Principal assignments
    // -------------------------------------------------------------------------

    /// Assigns a role to a principal inside `org_id`. Assigning twice is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown role; `Forbidden` when the role belongs to a
    /// different organization.
    pub async fn assign_role(
        &self,
        principal_id: &str,
        org_id: &str,
        role_id: Uuid,
    ) -> AccessResult<()> {
        if principal_id.trim().is_empty() || org_id.trim().is_empty() {
            return Err(AccessError::invalid_request(
                "Assignments require a principal and an organization",
            ));
        }
        let role = self.load(role_id).await?;
        if !role.applies_to(org_id) {
            return Err(AccessError::forbidden(format!(
                "Role '{}' does not belong to organization '{org_id}'",
                role.name
            )));
        }

        bounded(
            "role_assign",
            self.timeout,
            self.storage.assign_user_role(principal_id, org_id, role_id),
        )
        .await?;

        tracing::info!(principal_id, org_id, role = %role.name, "Role assigned");
        Ok(())
    }

    /// Removes a role assignment. Removing an absent assignment is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn unassign_role(
        &self,
        principal_id: &str,
        org_id: &str,
        role_id: Uuid,
    ) -> AccessResult<()> {
        bounded(
            "role_unassign",
            self.timeout,
            self.storage.remove_user_role(principal_id, org_id, role_id),
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    /// Registers `permissions` and creates the `admin` and `user` system
    /// roles if they are absent. Safe to call on every start.
    ///
    /// `admin` receives every registered permission; `user` a read-only
    /// baseline.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    pub async fn seed_system_roles(&self, permissions: &[Permission]) -> AccessResult<()> {
        for permission in permissions {
            self.register_permission(permission.clone()).await?;
        }

        let registered = bounded(
            "permission_list",
            self.timeout,
            self.storage.list_permissions(),
        )
        .await?;

        let admin = registered
            .iter()
            .fold(
                Role::builder(ADMIN_ROLE)
                    .description("Full access within every organization")
                    .system(true),
                |builder, permission| builder.add_permission(permission.name.clone()),
            )
            .build();

        let user = USER_ROLE_PERMISSIONS
            .iter()
            .filter(|name| registered.iter().any(|p| p.name == **name))
            .fold(
                Role::builder(USER_ROLE)
                    .description("Baseline read access")
                    .system(true),
                |builder, name| builder.add_permission(*name),
            )
            .build();

        for role in [admin, user] {
            let existing = bounded(
                "role_lookup",
                self.timeout,
                self.storage.find_by_name(&role.name, None),
            )
            .await?;
            if existing.is_some() {
                tracing::debug!(name = %role.name, "System role already present");
                continue;
            }
            bounded("role_create", self.timeout, self.storage.create(&role)).await?;
            tracing::info!(name = %role.name, "Seeded system role");
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    async fn load(&self, role_id: Uuid) -> AccessResult<Role> {
        bounded("role_lookup", self.timeout, self.storage.find_by_id(role_id))
            .await?
            .ok_or_else(|| AccessError::not_found("Role", role_id.to_string()))
    }

    async fn load_mutable(&self, role_id: Uuid) -> AccessResult<Role> {
        let role = self.load(role_id).await?;
        if role.is_system {
            tracing::warn!(role_id = %role_id, name = %role.name, "Rejected system role mutation");
            return Err(AccessError::SystemRoleImmutable { name: role.name });
        }
        Ok(role)
    }

    async fn ensure_permission(&self, name: &str) -> AccessResult<()> {
        let found = bounded(
            "permission_lookup",
            self.timeout,
            self.storage.find_permission(name),
        )
        .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(AccessError::not_found("Permission", name)),
        }
    }
}

impl std::fmt::Debug for RoleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleService")
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn validate_name(name: &str) -> AccessResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AccessError::invalid_request("Role name must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn require_org(role: &Role) -> AccessResult<&str> {
    role.organization_id
        .as_deref()
        .filter(|org| !org.trim().is_empty())
        .ok_or_else(|| AccessError::invalid_request("Non-system roles require an organization"))
}

fn reject_reserved(name: &str) -> AccessResult<()> {
    if name.eq_ignore_ascii_case(ADMIN_ROLE) || name.eq_ignore_ascii_case(USER_ROLE) {
        return Err(AccessError::conflict(format!(
            "Role name '{name}' is reserved for system roles"
        )));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
