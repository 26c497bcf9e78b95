//! The ordered access decision chain.
//!
//! For every request [`AccessPipeline::evaluate`] runs, in order:
//!
//! 1. **Authenticate**: bearer token → [`Principal`]
//! 2. **Region**: resolve the region code and load its policy
//! 3. **Compliance**: check the obligations the policy activates
//! 4. **Permission**: tenant-scoped role check (skipped for break-glass)
//! 5. **Admission**: sliding-window rate limit
//!
//! The first failing stage ends the chain. Rejections that are policy
//! decisions are recorded as `access.denied`; outages are not, since they say
//! nothing about the caller. Nothing here depends on HTTP; the axum adapter
//! lives in [`crate::middleware`].

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::audit::{ACTION_ACCESS_DENIED, ACTION_ACCESS_GRANTED, AuditOptions, AuditSink};
use crate::compliance::ComplianceValidator;
use crate::config::AccessConfig;
use crate::lifecycle::CleanupTasks;
use crate::permission::PermissionResolver;
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::region::RegionPolicyCache;
use crate::signals::RequestSignals;
use crate::storage::{AuditStore, RegionStore, RoleStorage};
use crate::token::TokenValidator;
use crate::types::{Principal, RegionPolicy};
use crate::{AccessError, AccessResult};

/// Actor recorded when no principal is known.
pub const ANONYMOUS_ACTOR: &str = "anonymous";

// =============================================================================
// Requirement
// =============================================================================

/// What a route demands of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRequirement {
    permission: Option<String>,
    region_mandatory: Option<bool>,
    entity_type: Option<String>,
    public: bool,
    break_glass: bool,
}

impl AccessRequirement {
    /// Requires an authenticated principal holding `permission` in the
    /// target organization.
    #[must_use]
    pub fn permission(permission: impl Into<String>) -> Self {
        Self {
            permission: Some(permission.into()),
            ..Self::default()
        }
    }

    /// Requires an authenticated principal and nothing else.
    #[must_use]
    pub fn authenticated() -> Self {
        Self::default()
    }

    /// Admits anonymous callers. A token, if sent, must still be valid.
    ///
    /// Region, compliance and rate limiting still apply; anonymous callers
    /// are rate limited by client address.
    #[must_use]
    pub fn public() -> Self {
        Self {
            public: true,
            ..Self::default()
        }
    }

    /// Names the entity type recorded in the audit trail.
    #[must_use]
    pub fn for_entity(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Overrides the configured region strictness for this route.
    #[must_use]
    pub fn region_mandatory(mut self, mandatory: bool) -> Self {
        self.region_mandatory = Some(mandatory);
        self
    }

    /// Lets a declared emergency stand in for the permission check.
    ///
    /// Only honoured in HIPAA regions; elsewhere the emergency headers are
    /// ignored and the permission is enforced as usual.
    #[must_use]
    pub fn allow_break_glass(mut self) -> Self {
        self.break_glass = true;
        self
    }

    /// The required permission, if any.
    #[must_use]
    pub fn required_permission(&self) -> Option<&str> {
        self.permission.as_deref()
    }

    /// The audited entity type, if any.
    #[must_use]
    pub fn entity_type(&self) -> Option<&str> {
        self.entity_type.as_deref()
    }

    /// Whether anonymous callers are admitted.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.public
    }

    /// Whether a declared emergency may bypass the permission check.
    #[must_use]
    pub fn allows_break_glass(&self) -> bool {
        self.break_glass
    }
}

// =============================================================================
// Decision and grant
// =============================================================================

/// How access was granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Every stage passed.
    Granted,
    /// Role gating was bypassed by break-glass access.
    EmergencyOverride {
        /// Reason code supplied by the caller.
        reason: String,
        /// Id of the emergency audit record.
        audit_id: Uuid,
    },
}

impl AccessDecision {
    /// Short label used in audit metadata.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::EmergencyOverride { .. } => "emergency_override",
        }
    }

    /// Returns `true` for break-glass grants.
    #[must_use]
    pub fn is_emergency(&self) -> bool {
        matches!(self, Self::EmergencyOverride { .. })
    }
}

/// Request-scoped result of a successful evaluation.
///
/// Inserted into the request extensions for downstream handlers.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    /// The authenticated caller. `None` only on public routes.
    pub principal: Option<Principal>,
    /// Organization the request acts in.
    pub org_id: Option<String>,
    /// Resolved region code.
    pub region_code: String,
    /// Region policy in force.
    pub policy: Arc<RegionPolicy>,
    /// `true` if the policy is the fallback after a failed load.
    pub region_degraded: bool,
    /// How access was granted.
    pub decision: AccessDecision,
    /// CCPA do-not-sell preference, for handlers to honour.
    pub do_not_sell: Option<bool>,
    /// Admission outcome, for rate-limit response headers.
    pub rate: RateDecision,
    /// Request trace identifier.
    pub request_id: String,
    permission: Option<String>,
    entity_type: Option<String>,
    audit_options: AuditOptions,
}

impl AccessGrant {
    /// Actor id used in audit records.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        self.principal
            .as_ref()
            .map_or(ANONYMOUS_ACTOR, Principal::id)
    }

    /// Request context (client ip, user agent, request id) for handlers that
    /// write their own audit records.
    #[must_use]
    pub fn audit_options(&self) -> AuditOptions {
        self.audit_options.clone()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// The access decision engine.
pub struct AccessPipeline {
    tokens: Arc<dyn TokenValidator>,
    regions: Arc<RegionPolicyCache>,
    compliance: ComplianceValidator,
    permissions: PermissionResolver,
    limiter: Arc<RateLimiter>,
    audit: AuditSink,
    region_mandatory: bool,
    trust_forwarded_headers: bool,
}

impl AccessPipeline {
    /// Wires the pipeline stages over the given collaborators.
    #[must_use]
    pub fn new(
        config: &AccessConfig,
        tokens: Arc<dyn TokenValidator>,
        roles: Arc<dyn RoleStorage>,
        regions: Arc<dyn RegionStore>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            tokens,
            regions: Arc::new(RegionPolicyCache::new(regions, config.region.clone())),
            compliance: ComplianceValidator::new(),
            permissions: PermissionResolver::new(roles, config.store_timeout),
            limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            audit: AuditSink::new(audit, config.store_timeout, config.audit.clone()),
            region_mandatory: config.region.mandatory,
            trust_forwarded_headers: config.trust_forwarded_headers,
        }
    }

    /// The region policy cache.
    #[must_use]
    pub fn region_cache(&self) -> &Arc<RegionPolicyCache> {
        &self.regions
    }

    /// The rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The audit sink.
    #[must_use]
    pub fn audit(&self) -> &AuditSink {
        &self.audit
    }

    /// Whether proxy forwarding headers are trusted.
    #[must_use]
    pub fn trusts_forwarded_headers(&self) -> bool {
        self.trust_forwarded_headers
    }

    /// Starts the background sweeps for this pipeline's shared state.
    #[must_use]
    pub fn start_cleanup_tasks(&self) -> CleanupTasks {
        CleanupTasks::start(&self.regions, &self.limiter)
    }

    /// Runs the decision chain for one request.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing stage.
    pub async fn evaluate(
        &self,
        signals: &RequestSignals,
        requirement: &AccessRequirement,
        request_id: &str,
    ) -> AccessResult<AccessGrant> {
        let principal = match self.authenticate(signals, requirement).await {
            Ok(principal) => principal,
            Err(err) => {
                self.record_denial(None, signals.target_org(), signals, requirement, request_id, &err);
                return Err(err);
            }
        };

        let org_id = signals
            .target_org()
            .map(str::to_string)
            .or_else(|| principal.as_ref().map(|p| p.org_id().to_string()));
        let actor = principal.as_ref().map(|p| p.id().to_string());

        match self
            .authorize(principal, org_id.clone(), signals, requirement, request_id)
            .await
        {
            Ok(grant) => {
                tracing::debug!(
                    request_id,
                    actor = grant.actor_id(),
                    org_id = ?grant.org_id,
                    region = %grant.region_code,
                    decision = grant.decision.as_str(),
                    "Access granted"
                );
                Ok(grant)
            }
            Err(err) => {
                self.record_denial(actor.as_deref(), org_id.as_deref(), signals, requirement, request_id, &err);
                Err(err)
            }
        }
    }

    /// Records the outcome of a granted request after the handler ran.
    ///
    /// Fire-and-forget; audit failures never affect the response.
    pub fn record_outcome(&self, grant: &AccessGrant, status: u16) {
        if !self.audit.logs_access_decisions() {
            return;
        }

        let options = grant.audit_options.clone().with_metadata(json!({
            "status": status,
            "region": grant.region_code,
            "decision": grant.decision.as_str(),
            "permission": grant.permission,
        }));
        self.audit.log_async(
            grant.actor_id(),
            grant.org_id.as_deref(),
            ACTION_ACCESS_GRANTED,
            grant.entity_type.as_deref(),
            None,
            options,
        );
    }

    // -------------------------------------------------------------------------
    // Stages
    // -------------------------------------------------------------------------

    async fn authenticate(
        &self,
        signals: &RequestSignals,
        requirement: &AccessRequirement,
    ) -> AccessResult<Option<Principal>> {
        match signals.bearer_token() {
            Some(token) => {
                let claims = self.tokens.validate(token).await?;
                Ok(Some(Principal::from_claims(claims)))
            }
            None if requirement.is_public() => Ok(None),
            None => Err(AccessError::unauthenticated("Missing bearer token")),
        }
    }

    async fn authorize(
        &self,
        principal: Option<Principal>,
        org_id: Option<String>,
        signals: &RequestSignals,
        requirement: &AccessRequirement,
        request_id: &str,
    ) -> AccessResult<AccessGrant> {
        let mandatory = requirement
            .region_mandatory
            .unwrap_or(self.region_mandatory);
        let region = self.regions.resolve(signals, mandatory).await?;

        let report = self.compliance.validate(&region.policy, signals)?;

        let emergency = match report.emergency {
            Some(_) if !requirement.allows_break_glass() => {
                tracing::debug!(
                    permission = ?requirement.required_permission(),
                    "Emergency access not available on this route"
                );
                None
            }
            other => other,
        };
        let emergency_reason = match (emergency, &principal) {
            (Some(emergency), Some(_)) => Some(emergency.reason),
            (Some(_), None) => {
                return Err(AccessError::unauthenticated(
                    "Emergency access requires an authenticated principal",
                ));
            }
            (None, _) => None,
        };

        if emergency_reason.is_none()
            && let Some(permission) = requirement.required_permission()
        {
            let principal = principal
                .as_ref()
                .ok_or_else(|| AccessError::unauthenticated("Missing bearer token"))?;
            let org = org_id.as_deref().ok_or_else(|| {
                AccessError::invalid_request("Request does not name an organization")
            })?;
            self.permissions
                .require_permission(principal, permission, org)
                .await?;
        }

        let rate_key = match (&principal, signals.client_ip()) {
            (Some(principal), _) => format!("principal:{}", principal.id()),
            (None, Some(ip)) => format!("ip:{ip}"),
            (None, None) => ANONYMOUS_ACTOR.to_string(),
        };
        let limit = region
            .policy
            .default_rate_limit
            .unwrap_or_else(|| self.limiter.default_limit());
        let rate = self.limiter.check(&rate_key, limit);
        if !rate.allowed {
            return Err(AccessError::RateLimited {
                limit,
                retry_after: rate.retry_after,
            });
        }

        let audit_options = AuditOptions::from_signals(signals).with_request_id(request_id);

        let decision = match (emergency_reason, &principal) {
            (Some(reason), Some(principal)) => {
                let record = self
                    .audit
                    .log_emergency(principal.id(), &reason, audit_options.clone())
                    .await?;
                AccessDecision::EmergencyOverride {
                    reason,
                    audit_id: record.id(),
                }
            }
            _ => AccessDecision::Granted,
        };

        Ok(AccessGrant {
            principal,
            org_id,
            region_code: region.code,
            policy: region.policy,
            region_degraded: region.degraded,
            decision,
            do_not_sell: report.do_not_sell,
            rate,
            request_id: request_id.to_string(),
            permission: requirement.permission.clone(),
            entity_type: requirement.entity_type.clone(),
            audit_options,
        })
    }

    fn record_denial(
        &self,
        actor: Option<&str>,
        org_id: Option<&str>,
        signals: &RequestSignals,
        requirement: &AccessRequirement,
        request_id: &str,
        err: &AccessError,
    ) {
        if !err.is_denial() {
            tracing::error!(request_id, error = %err, "Access evaluation failed");
            return;
        }

        tracing::info!(
            request_id,
            actor = actor.unwrap_or(ANONYMOUS_ACTOR),
            org_id,
            code = err.code(),
            "Access denied"
        );

        if !self.audit.logs_denials() {
            return;
        }

        let options = AuditOptions::from_signals(signals)
            .with_request_id(request_id)
            .with_metadata(json!({
                "code": err.code(),
                "status": err.status_code().as_u16(),
                "reason": err.public_message(),
                "permission": requirement.required_permission(),
            }));
        self.audit.log_async(
            actor.unwrap_or(ANONYMOUS_ACTOR),
            org_id,
            ACTION_ACCESS_DENIED,
            requirement.entity_type(),
            None,
            options,
        );
    }
}

impl std::fmt::Debug for AccessPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessPipeline")
            .field("regions", &self.regions)
            .field("limiter", &self.limiter)
            .field("region_mandatory", &self.region_mandatory)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
