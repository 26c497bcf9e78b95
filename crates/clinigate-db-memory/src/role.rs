//! In-memory role, permission and assignment storage.

use std::collections::HashSet;

use async_trait::async_trait;
use clinigate_access::storage::{Permission, Role, RoleStorage};
use clinigate_access::{AccessError, AccessResult};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use uuid::Uuid;

/// Name scope key: `(organization, name)`, organization `None` for system roles.
type NameKey = (Option<String>, String);

/// Role storage backed by concurrent hash maps.
///
/// Name uniqueness is enforced per scope through a name index, so two
/// concurrent creates of the same name cannot both succeed.
#[derive(Debug, Default)]
pub struct MemoryRoleStorage {
    roles: DashMap<Uuid, Role>,
    names: DashMap<NameKey, Uuid>,
    assignments: DashMap<(String, String), HashSet<Uuid>>,
    permissions: DashMap<String, Permission>,
}

impl MemoryRoleStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored roles.
    #[must_use]
    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    /// Number of `(principal, organization, role)` assignments.
    #[must_use]
    pub fn assignment_count(&self) -> usize {
        self.assignments.iter().map(|entry| entry.value().len()).sum()
    }

    fn name_key(role: &Role) -> NameKey {
        (role.organization_id.clone(), role.name.clone())
    }

    fn name_taken(org_id: Option<&str>, name: &str) -> AccessError {
        match org_id {
            Some(org_id) => AccessError::conflict(format!(
                "Role '{name}' already exists in organization '{org_id}'"
            )),
            None => AccessError::conflict(format!("System role '{name}' already exists")),
        }
    }
}

#[async_trait]
impl RoleStorage for MemoryRoleStorage {
    async fn find_by_id(&self, role_id: Uuid) -> AccessResult<Option<Role>> {
        Ok(self.roles.get(&role_id).map(|role| role.clone()))
    }

    async fn find_by_name(&self, name: &str, org_id: Option<&str>) -> AccessResult<Option<Role>> {
        let key = (org_id.map(str::to_string), name.to_string());
        let Some(id) = self.names.get(&key).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.roles.get(&id).map(|role| role.clone()))
    }

    async fn create(&self, role: &Role) -> AccessResult<()> {
        if self.roles.contains_key(&role.id) {
            return Err(AccessError::conflict(format!(
                "Role '{}' already exists",
                role.id
            )));
        }

        match self.names.entry(Self::name_key(role)) {
            Entry::Occupied(_) => {
                return Err(Self::name_taken(
                    role.organization_id.as_deref(),
                    &role.name,
                ));
            }
            Entry::Vacant(entry) => {
                entry.insert(role.id);
            }
        }

        self.roles.insert(role.id, role.clone());
        tracing::debug!(role_id = %role.id, name = %role.name, "Role stored");
        Ok(())
    }

    async fn update(&self, role: &Role) -> AccessResult<()> {
        let previous = self
            .roles
            .get(&role.id)
            .map(|existing| Self::name_key(&existing))
            .ok_or_else(|| AccessError::not_found("Role", role.id.to_string()))?;

        let next = Self::name_key(role);
        if previous != next {
            match self.names.entry(next) {
                Entry::Occupied(entry) if *entry.get() != role.id => {
                    return Err(Self::name_taken(
                        role.organization_id.as_deref(),
                        &role.name,
                    ));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(entry) => {
                    entry.insert(role.id);
                }
            }
            self.names.remove_if(&previous, |_, id| *id == role.id);
        }

        self.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn delete(&self, role_id: Uuid) -> AccessResult<()> {
        let (_, role) = self
            .roles
            .remove(&role_id)
            .ok_or_else(|| AccessError::not_found("Role", role_id.to_string()))?;

        self.names
            .remove_if(&Self::name_key(&role), |_, id| *id == role_id);
        self.assignments.retain(|_, roles| {
            roles.remove(&role_id);
            !roles.is_empty()
        });
        Ok(())
    }

    async fn list(&self, org_id: Option<&str>) -> AccessResult<Vec<Role>> {
        let mut roles: Vec<Role> = self
            .roles
            .iter()
            .filter(|role| {
                role.organization_id.is_none() || role.organization_id.as_deref() == org_id
            })
            .map(|role| role.clone())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn get_user_roles(&self, principal_id: &str, org_id: &str) -> AccessResult<Vec<Role>> {
        let key = (principal_id.to_string(), org_id.to_string());
        let Some(role_ids) = self.assignments.get(&key).map(|ids| ids.clone()) else {
            return Ok(Vec::new());
        };

        Ok(role_ids
            .iter()
            .filter_map(|id| self.roles.get(id).map(|role| role.clone()))
            .collect())
    }

    async fn get_role_permissions(&self, role_id: Uuid) -> AccessResult<HashSet<String>> {
        self.roles
            .get(&role_id)
            .map(|role| role.permissions.clone())
            .ok_or_else(|| AccessError::not_found("Role", role_id.to_string()))
    }

    async fn add_role_permission(&self, role_id: Uuid, permission: &str) -> AccessResult<()> {
        let mut role = self
            .roles
            .get_mut(&role_id)
            .ok_or_else(|| AccessError::not_found("Role", role_id.to_string()))?;
        if role.permissions.insert(permission.to_string()) {
            role.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn remove_role_permission(&self, role_id: Uuid, permission: &str) -> AccessResult<()> {
        let mut role = self
            .roles
            .get_mut(&role_id)
            .ok_or_else(|| AccessError::not_found("Role", role_id.to_string()))?;
        if role.permissions.remove(permission) {
            role.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn assign_user_role(
        &self,
        principal_id: &str,
        org_id: &str,
        role_id: Uuid,
    ) -> AccessResult<()> {
        if !self.roles.contains_key(&role_id) {
            return Err(AccessError::not_found("Role", role_id.to_string()));
        }
        self.assignments
            .entry((principal_id.to_string(), org_id.to_string()))
            .or_default()
            .insert(role_id);
        Ok(())
    }

    async fn remove_user_role(
        &self,
        principal_id: &str,
        org_id: &str,
        role_id: Uuid,
    ) -> AccessResult<()> {
        let key = (principal_id.to_string(), org_id.to_string());
        let emptied = match self.assignments.get_mut(&key) {
            Some(mut roles) => {
                roles.remove(&role_id);
                roles.is_empty()
            }
            None => false,
        };
        if emptied {
            self.assignments.remove_if(&key, |_, roles| roles.is_empty());
        }
        Ok(())
    }

    async fn create_permission(&self, permission: &Permission) -> AccessResult<()> {
        self.permissions
            .entry(permission.name.clone())
            .or_insert_with(|| permission.clone());
        Ok(())
    }

    async fn find_permission(&self, name: &str) -> AccessResult<Option<Permission>> {
        Ok(self.permissions.get(name).map(|p| p.clone()))
    }

    async fn list_permissions(&self) -> AccessResult<Vec<Permission>> {
        let mut permissions: Vec<Permission> =
            self.permissions.iter().map(|p| p.clone()).collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }
}
