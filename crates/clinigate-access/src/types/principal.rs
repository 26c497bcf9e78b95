//! Authenticated caller identity.

use serde::{Deserialize, Serialize};

/// Claims produced by the token validator.
///
/// This is the single claim shape the pipeline understands. Older token
/// issuers emitted `user_id` / `organization_id`; those names are accepted
/// as aliases so both variants decode into the same structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal identifier.
    #[serde(alias = "user_id")]
    pub sub: String,

    /// Home organization of the principal.
    #[serde(alias = "organization_id")]
    pub org_id: String,

    /// Role names carried by the token.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Denormalized permission names carried by the token.
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Expiration (seconds since the Unix epoch).
    pub exp: i64,
}

/// The authenticated caller plus organization context.
///
/// Built once from validated [`Claims`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    id: String,
    org_id: String,
    roles: Vec<String>,
    permissions: Vec<String>,
}

impl Principal {
    /// Creates a principal with no roles.
    #[must_use]
    pub fn new(id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            org_id: org_id.into(),
            roles: Vec::new(),
            permissions: Vec::new(),
        }
    }

    /// Builds a principal from validated claims.
    #[must_use]
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            org_id: claims.org_id,
            roles: claims.roles,
            permissions: claims.permissions,
        }
    }

    /// Sets the role names.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Principal identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Home organization.
    #[must_use]
    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    /// Role names carried by the credential.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Denormalized permission names carried by the credential.
    ///
    /// Informational only; authorization always consults the role store.
    #[must_use]
    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }
}
