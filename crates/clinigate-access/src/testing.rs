//! Mock stores shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::audit::AuditRecord;
use crate::storage::{AuditStore, Permission, RegionStore, Role, RoleStorage};
use crate::types::RegionPolicy;
use crate::{AccessError, AccessResult};

// =============================================================================
// Role storage
// =============================================================================

#[derive(Default)]
struct RoleState {
    roles: HashMap<Uuid, Role>,
    assignments: HashSet<(String, String, Uuid)>,
    permissions: HashMap<String, Permission>,
}

#[derive(Default)]
pub(crate) struct MockRoleStorage {
    state: Mutex<RoleState>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    pub(crate) calls: AtomicUsize,
}

impl MockRoleStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_role(&self, role: Role) {
        self.state.lock().roles.insert(role.id, role);
    }

    pub(crate) fn assign(&self, principal: &str, org: &str, role_id: Uuid) {
        self.state
            .lock()
            .assignments
            .insert((principal.to_string(), org.to_string(), role_id));
    }

    pub(crate) fn role(&self, role_id: Uuid) -> Option<Role> {
        self.state.lock().roles.get(&role_id).cloned()
    }

    pub(crate) fn assignment_count(&self) -> usize {
        self.state.lock().assignments.len()
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.failure.lock() = Some(message.to_string());
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    async fn enter(&self) -> AccessResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure.lock().clone() {
            Some(message) => Err(AccessError::storage(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RoleStorage for MockRoleStorage {
    async fn find_by_id(&self, role_id: Uuid) -> AccessResult<Option<Role>> {
        self.enter().await?;
        Ok(self.state.lock().roles.get(&role_id).cloned())
    }

    async fn find_by_name(&self, name: &str, org_id: Option<&str>) -> AccessResult<Option<Role>> {
        self.enter().await?;
        Ok(self
            .state
            .lock()
            .roles
            .values()
            .find(|r| r.name == name && r.organization_id.as_deref() == org_id)
            .cloned())
    }

    async fn create(&self, role: &Role) -> AccessResult<()> {
        self.enter().await?;
        self.state.lock().roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn update(&self, role: &Role) -> AccessResult<()> {
        self.enter().await?;
        let mut state = self.state.lock();
        match state.roles.get_mut(&role.id) {
            Some(existing) => {
                *existing = role.clone();
                Ok(())
            }
            None => Err(AccessError::not_found("Role", role.id.to_string())),
        }
    }

    async fn delete(&self, role_id: Uuid) -> AccessResult<()> {
        self.enter().await?;
        let mut state = self.state.lock();
        state
            .roles
            .remove(&role_id)
            .ok_or_else(|| AccessError::not_found("Role", role_id.to_string()))?;
        state.assignments.retain(|(_, _, id)| *id != role_id);
        Ok(())
    }

    async fn list(&self, org_id: Option<&str>) -> AccessResult<Vec<Role>> {
        self.enter().await?;
        Ok(self
            .state
            .lock()
            .roles
            .values()
            .filter(|r| r.is_system || (org_id.is_some() && r.organization_id.as_deref() == org_id))
            .cloned()
            .collect())
    }

    async fn get_user_roles(&self, principal_id: &str, org_id: &str) -> AccessResult<Vec<Role>> {
        self.enter().await?;
        let state = self.state.lock();
        Ok(state
            .assignments
            .iter()
            .filter(|(p, o, _)| p == principal_id && o == org_id)
            .filter_map(|(_, _, id)| state.roles.get(id).cloned())
            .collect())
    }

    async fn get_role_permissions(&self, role_id: Uuid) -> AccessResult<HashSet<String>> {
        self.enter().await?;
        Ok(self
            .state
            .lock()
            .roles
            .get(&role_id)
            .map(|r| r.permissions.clone())
            .unwrap_or_default())
    }

    async fn add_role_permission(&self, role_id: Uuid, permission: &str) -> AccessResult<()> {
        self.enter().await?;
        if let Some(role) = self.state.lock().roles.get_mut(&role_id) {
            role.permissions.insert(permission.to_string());
        }
        Ok(())
    }

    async fn remove_role_permission(&self, role_id: Uuid, permission: &str) -> AccessResult<()> {
        self.enter().await?;
        if let Some(role) = self.state.lock().roles.get_mut(&role_id) {
            role.permissions.remove(permission);
        }
        Ok(())
    }

    async fn assign_user_role(
        &self,
        principal_id: &str,
        org_id: &str,
        role_id: Uuid,
    ) -> AccessResult<()> {
        self.enter().await?;
        self.assign(principal_id, org_id, role_id);
        Ok(())
    }

    async fn remove_user_role(
        &self,
        principal_id: &str,
        org_id: &str,
        role_id: Uuid,
    ) -> AccessResult<()> {
        self.enter().await?;
        self.state.lock().assignments.remove(&(
            principal_id.to_string(),
            org_id.to_string(),
            role_id,
        ));
        Ok(())
    }

    async fn create_permission(&self, permission: &Permission) -> AccessResult<()> {
        self.enter().await?;
        self.state
            .lock()
            .permissions
            .entry(permission.name.clone())
            .or_insert_with(|| permission.clone());
        Ok(())
    }

    async fn find_permission(&self, name: &str) -> AccessResult<Option<Permission>> {
        self.enter().await?;
        Ok(self.state.lock().permissions.get(name).cloned())
    }

    async fn list_permissions(&self) -> AccessResult<Vec<Permission>> {
        self.enter().await?;
        Ok(self.state.lock().permissions.values().cloned().collect())
    }
}

// =============================================================================
// Region storage
// =============================================================================

#[derive(Default)]
pub(crate) struct MockRegionStore {
    policies: Mutex<HashMap<String, RegionPolicy>>,
    ip_table: Mutex<HashMap<IpAddr, String>>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    pub(crate) policy_loads: AtomicUsize,
    pub(crate) ip_lookups: AtomicUsize,
}

impl MockRegionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_policy(self, policy: RegionPolicy) -> Self {
        self.policies.lock().insert(policy.code.clone(), policy);
        self
    }

    pub(crate) fn with_ip(self, ip: IpAddr, code: &str) -> Self {
        self.ip_table.lock().insert(ip, code.to_string());
        self
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.failure.lock() = Some(message.to_string());
    }

    pub(crate) fn recover(&self) {
        *self.failure.lock() = None;
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub(crate) fn loads(&self) -> usize {
        self.policy_loads.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> AccessResult<()> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure.lock().clone() {
            Some(message) => Err(AccessError::storage(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RegionStore for MockRegionStore {
    async fn get_region_policy(&self, code: &str) -> AccessResult<Option<RegionPolicy>> {
        self.policy_loads.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        Ok(self.policies.lock().get(code).cloned())
    }

    async fn get_region_from_ip(&self, ip: IpAddr) -> AccessResult<Option<String>> {
        self.ip_lookups.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        Ok(self.ip_table.lock().get(&ip).cloned())
    }
}

// =============================================================================
// Audit storage
// =============================================================================

#[derive(Default)]
pub(crate) struct RecordingAuditStore {
    records: Mutex<Vec<AuditRecord>>,
    failing: Mutex<bool>,
}

impl RecordingAuditStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        let store = Self::default();
        *store.failing.lock() = true;
        store
    }

    pub(crate) fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub(crate) async fn wait_for(&self, count: usize) -> Vec<AuditRecord> {
        for _ in 0..100 {
            if self.records.lock().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.records()
    }
}

#[async_trait]
impl AuditStore for RecordingAuditStore {
    async fn append(&self, record: &AuditRecord) -> AccessResult<()> {
        if *self.failing.lock() {
            return Err(AccessError::audit_write("audit store offline"));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}
