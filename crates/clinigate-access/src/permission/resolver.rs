//! Tenant-scoped permission resolution.

use std::sync::Arc;
use std::time::Duration;

use crate::deadline::bounded;
use crate::storage::RoleStorage;
use crate::types::Principal;
use crate::{AccessError, AccessResult};

/// Decides whether a principal holds a permission inside one organization.
///
/// Stateless apart from the store handle: every decision reads the store,
/// so role changes apply to the next request without invalidation.
#[derive(Clone)]
pub struct PermissionResolver {
    storage: Arc<dyn RoleStorage>,
    timeout: Duration,
}

impl PermissionResolver {
    /// Creates a resolver whose store calls are each bounded by `timeout`.
    #[must_use]
    pub fn new(storage: Arc<dyn RoleStorage>, timeout: Duration) -> Self {
        Self { storage, timeout }
    }

    /// Returns `true` if some active role assigned to `principal` within
    /// `org_id` links `permission`.
    ///
    /// Roles are walked in store order and the first match wins; the answer
    /// does not depend on that order.
    ///
    /// # Errors
    ///
    /// Store failures and timeouts are returned as errors. They are never
    /// reported as `false`.
    pub async fn has_permission(
        &self,
        principal: &Principal,
        permission: &str,
        org_id: &str,
    ) -> AccessResult<bool> {
        if org_id.trim().is_empty() {
            return Err(AccessError::invalid_request(
                "Permission checks require an organization",
            ));
        }

        let roles = bounded(
            "role_lookup",
            self.timeout,
            self.storage.get_user_roles(principal.id(), org_id),
        )
        .await?;

        for role in roles
            .iter()
            .filter(|role| role.is_active() && role.applies_to(org_id))
        {
            let permissions = bounded(
                "permission_lookup",
                self.timeout,
                self.storage.get_role_permissions(role.id),
            )
            .await?;

            if permissions.contains(permission) {
                tracing::debug!(
                    principal = %principal.id(),
                    org_id,
                    permission,
                    role = %role.name,
                    "Permission granted by role"
                );
                return Ok(true);
            }
        }

        tracing::debug!(
            principal = %principal.id(),
            org_id,
            permission,
            roles = roles.len(),
            "No role grants permission"
        );
        Ok(false)
    }

    /// Like [`has_permission`](Self::has_permission) but turns a deny into
    /// [`AccessError::Forbidden`].
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` on deny, or the store error.
    pub async fn require_permission(
        &self,
        principal: &Principal,
        permission: &str,
        org_id: &str,
    ) -> AccessResult<()> {
        if self.has_permission(principal, permission, org_id).await? {
            Ok(())
        } else {
            Err(AccessError::forbidden(format!(
                "Missing permission '{permission}' in organization '{org_id}'"
            )))
        }
    }
}

impl std::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionResolver")
            .field("timeout", &self.timeout)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
