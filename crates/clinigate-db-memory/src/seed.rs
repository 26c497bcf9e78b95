//! Startup seeding of the in-memory stores.
//!
//! ```toml
//! [[seed.regions]]
//! code = "EU"
//! flags = { gdpr = true }
//!
//! [[seed.ip_ranges]]
//! cidr = "203.0.113.0/24"
//! region = "EU"
//!
//! [[seed.roles]]
//! name = "doctor"
//! organization_id = "clinic-a"
//! permissions = ["patient:read", "patient:write"]
//!
//! [[seed.assignments]]
//! principal_id = "dr-house"
//! organization_id = "clinic-a"
//! role = "doctor"
//! ```
//!
//! Roles and assignments go through [`RoleService`], so seeded data obeys the
//! same rules as runtime mutations. Seeding is idempotent.

use std::time::Duration;

use clinigate_access::permission::RoleService;
use clinigate_access::storage::{Permission, Role, RoleStorage, default_permissions};
use clinigate_access::types::RegionPolicy;
use clinigate_access::AccessError;
use ipnetwork::{IpNetwork, IpNetworkError};
use serde::{Deserialize, Serialize};

use crate::MemoryStores;

/// Data loaded into the stores at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Permissions registered in addition to the built-in set.
    pub permissions: Vec<Permission>,
    /// Region policies.
    pub regions: Vec<RegionPolicy>,
    /// CIDR → region geolocation ranges.
    pub ip_ranges: Vec<IpRangeSeed>,
    /// Tenant roles.
    pub roles: Vec<RoleSeed>,
    /// Role assignments.
    pub assignments: Vec<AssignmentSeed>,
}

/// One geolocation range.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpRangeSeed {
    /// Network in CIDR notation.
    pub cidr: String,
    /// Region code for addresses inside the network.
    pub region: String,
}

/// One tenant role.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoleSeed {
    /// Role name.
    pub name: String,
    /// Owning organization.
    pub organization_id: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Linked permission names.
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// One role assignment. `role` names a role of the organization or a system role.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssignmentSeed {
    /// Principal receiving the role.
    pub principal_id: String,
    /// Organization the assignment applies in.
    pub organization_id: String,
    /// Role name.
    pub role: String,
}

/// Seeding failures.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// A geolocation range is not valid CIDR.
    #[error("Invalid CIDR '{cidr}': {source}")]
    InvalidCidr {
        /// The rejected value.
        cidr: String,
        /// Parse error.
        #[source]
        source: IpNetworkError,
    },

    /// An assignment names a role that does not exist.
    #[error("Assignment for '{principal_id}' names unknown role '{role}' in '{organization_id}'")]
    UnknownRole {
        /// Principal of the assignment.
        principal_id: String,
        /// Organization of the assignment.
        organization_id: String,
        /// Role name.
        role: String,
    },

    /// The access layer rejected seeded data.
    #[error(transparent)]
    Access(#[from] AccessError),
}

/// Counts of what a seeding run loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    /// Permissions registered, built-in included.
    pub permissions: usize,
    /// Region policies stored.
    pub regions: usize,
    /// Geolocation ranges stored.
    pub ip_ranges: usize,
    /// Tenant roles created by this run.
    pub roles_created: usize,
    /// Assignments applied.
    pub assignments: usize,
}

impl SeedConfig {
    /// Loads the seed data into `stores`.
    ///
    /// Registers the built-in permissions and system roles first. Roles that
    /// already exist are left untouched.
    ///
    /// # Errors
    ///
    /// Returns the first invalid range, unknown role or rejected mutation.
    pub async fn apply(
        &self,
        stores: &MemoryStores,
        store_timeout: Duration,
    ) -> Result<SeedSummary, SeedError> {
        let service = RoleService::new(stores.roles.clone(), store_timeout);
        let mut summary = SeedSummary::default();

        let mut permissions = default_permissions();
        permissions.extend(self.permissions.iter().cloned());
        service.seed_system_roles(&permissions).await?;
        summary.permissions = stores.roles.list_permissions().await?.len();

        for policy in &self.regions {
            stores.regions.put_policy(policy.clone());
            summary.regions += 1;
        }

        for range in &self.ip_ranges {
            let network: IpNetwork = range.cidr.parse().map_err(|source| SeedError::InvalidCidr {
                cidr: range.cidr.clone(),
                source,
            })?;
            stores.regions.add_range(network, range.region.as_str());
            summary.ip_ranges += 1;
        }

        for seed in &self.roles {
            let existing = stores
                .roles
                .find_by_name(&seed.name, Some(&seed.organization_id))
                .await?;
            if existing.is_some() {
                continue;
            }

            let mut role = Role::builder(seed.name.as_str())
                .organization(seed.organization_id.as_str());
            if let Some(description) = &seed.description {
                role = role.description(description.as_str());
            }
            for permission in &seed.permissions {
                role = role.add_permission(permission.as_str());
            }
            service.create_role(role.build()).await?;
            summary.roles_created += 1;
        }

        for assignment in &self.assignments {
            let role = match stores
                .roles
                .find_by_name(&assignment.role, Some(&assignment.organization_id))
                .await?
            {
                Some(role) => role,
                None => stores
                    .roles
                    .find_by_name(&assignment.role, None)
                    .await?
                    .ok_or_else(|| SeedError::UnknownRole {
                        principal_id: assignment.principal_id.clone(),
                        organization_id: assignment.organization_id.clone(),
                        role: assignment.role.clone(),
                    })?,
            };
            service
                .assign_role(&assignment.principal_id, &assignment.organization_id, role.id)
                .await?;
            summary.assignments += 1;
        }

        tracing::info!(
            permissions = summary.permissions,
            regions = summary.regions,
            ip_ranges = summary.ip_ranges,
            roles_created = summary.roles_created,
            assignments = summary.assignments,
            "Seed data loaded"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinigate_access::storage::{ADMIN_ROLE, USER_ROLE};
    use clinigate_access::types::Principal;
    use clinigate_access::PermissionResolver;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn seed() -> SeedConfig {
        serde_json::from_value(json!({
            "regions": [
                { "code": "EU", "flags": { "gdpr": true } },
                { "code": "US", "flags": { "hipaa": true }, "default_rate_limit": 50 }
            ],
            "ip_ranges": [{ "cidr": "203.0.113.0/24", "region": "EU" }],
            "roles": [{
                "name": "doctor",
                "organization_id": "clinic-a",
                "permissions": ["patient:read", "patient:write"]
            }],
            "assignments": [
                { "principal_id": "dr-1", "organization_id": "clinic-a", "role": "doctor" },
                { "principal_id": "ops-1", "organization_id": "clinic-a", "role": "admin" }
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_apply_loads_everything() {
        let stores = MemoryStores::new();
        let summary = seed().apply(&stores, TIMEOUT).await.unwrap();

        assert_eq!(summary.permissions, default_permissions().len());
        assert_eq!(summary.regions, 2);
        assert_eq!(summary.ip_ranges, 1);
        assert_eq!(summary.roles_created, 1);
        assert_eq!(summary.assignments, 2);

        assert!(stores.roles.find_by_name(ADMIN_ROLE, None).await.unwrap().is_some());
        assert!(stores.roles.find_by_name(USER_ROLE, None).await.unwrap().is_some());
        assert_eq!(stores.regions.policy_count(), 2);
    }

    #[tokio::test]
    async fn test_seeded_assignments_grant_permissions() {
        let stores = MemoryStores::new();
        seed().apply(&stores, TIMEOUT).await.unwrap();

        let resolver = PermissionResolver::new(stores.roles.clone(), TIMEOUT);
        let doctor = Principal::new("dr-1", "clinic-a");
        assert!(
            resolver
                .has_permission(&doctor, "patient:write", "clinic-a")
                .await
                .unwrap()
        );
        assert!(
            !resolver
                .has_permission(&doctor, "patient:write", "clinic-b")
                .await
                .unwrap()
        );

        let ops = Principal::new("ops-1", "clinic-a");
        assert!(
            resolver
                .has_permission(&ops, "role:manage", "clinic-a")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let stores = MemoryStores::new();
        seed().apply(&stores, TIMEOUT).await.unwrap();
        let second = seed().apply(&stores, TIMEOUT).await.unwrap();

        assert_eq!(second.roles_created, 0);
        assert_eq!(stores.roles.role_count(), 3);
        assert_eq!(stores.roles.assignment_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_cidr_is_rejected() {
        let mut config = seed();
        config.ip_ranges.push(IpRangeSeed {
            cidr: "10.0.0.0/99".to_string(),
            region: "EU".to_string(),
        });
        let err = config.apply(&MemoryStores::new(), TIMEOUT).await.unwrap_err();
        assert!(matches!(err, SeedError::InvalidCidr { .. }));
    }

    #[tokio::test]
    async fn test_unknown_role_assignment_is_rejected() {
        let mut config = seed();
        config.assignments.push(AssignmentSeed {
            principal_id: "u-9".to_string(),
            organization_id: "clinic-a".to_string(),
            role: "surgeon".to_string(),
        });
        let err = config.apply(&MemoryStores::new(), TIMEOUT).await.unwrap_err();
        assert!(matches!(err, SeedError::UnknownRole { .. }));
    }

    #[tokio::test]
    async fn test_role_with_unregistered_permission_is_rejected() {
        let mut config = seed();
        config.roles.push(RoleSeed {
            name: "billing".to_string(),
            organization_id: "clinic-a".to_string(),
            description: None,
            permissions: vec!["invoice:write".to_string()],
        });
        let err = config.apply(&MemoryStores::new(), TIMEOUT).await.unwrap_err();
        assert!(matches!(err, SeedError::Access(AccessError::NotFound { .. })));

        // Registering the permission makes the same role valid.
        config.permissions.push(Permission::new("invoice:write"));
        config.apply(&MemoryStores::new(), TIMEOUT).await.unwrap();
    }
}
