//! Immutable audit records.

use std::net::IpAddr;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::signals::RequestSignals;

/// Action recorded for a granted request.
pub const ACTION_ACCESS_GRANTED: &str = "access.granted";
/// Action recorded for a rejected request.
pub const ACTION_ACCESS_DENIED: &str = "access.denied";
/// Action recorded for break-glass access.
pub const ACTION_EMERGENCY_ACCESS: &str = "emergency.access";

// =============================================================================
// Options
// =============================================================================

/// Optional request context attached to an audit record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditOptions {
    /// Structured description of what changed.
    pub changes: Option<Value>,
    /// Free-form context.
    pub metadata: Option<Value>,
    /// Client address.
    pub client_ip: Option<IpAddr>,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// Request trace identifier.
    pub request_id: Option<String>,
}

impl AuditOptions {
    /// Captures the client address and user agent of a request.
    #[must_use]
    pub fn from_signals(signals: &RequestSignals) -> Self {
        Self {
            client_ip: signals.client_ip(),
            user_agent: signals.user_agent().map(str::to_string),
            request_id: signals.request_id().map(str::to_string),
            ..Self::default()
        }
    }

    /// Sets the request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Sets the changes payload.
    #[must_use]
    pub fn with_changes(mut self, changes: Value) -> Self {
        self.changes = Some(changes);
        self
    }

    /// Sets the metadata payload.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// =============================================================================
// Record
// =============================================================================

/// A write-once audit trail entry.
///
/// Fields are private and only readable; a record cannot change after
/// [`AuditRecordBuilder::build`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    id: Uuid,
    actor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<String>,
    action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    changes: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    emergency: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason_code: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

impl AuditRecord {
    /// Starts a record for `actor_id` performing `action`.
    #[must_use]
    pub fn builder(actor_id: impl Into<String>, action: impl Into<String>) -> AuditRecordBuilder {
        AuditRecordBuilder::new(actor_id, action)
    }

    /// Record id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Acting principal.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Organization the action happened in. `None` for emergency records.
    #[must_use]
    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }

    /// Action verb.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Entity type acted upon.
    #[must_use]
    pub fn entity_type(&self) -> Option<&str> {
        self.entity_type.as_deref()
    }

    /// Entity id acted upon.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    /// Structured changes.
    #[must_use]
    pub fn changes(&self) -> Option<&Value> {
        self.changes.as_ref()
    }

    /// Free-form metadata.
    #[must_use]
    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    /// Client address.
    #[must_use]
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    /// Client user agent.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Request trace identifier.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// `true` for break-glass records.
    #[must_use]
    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    /// Reason code of a break-glass record.
    #[must_use]
    pub fn reason_code(&self) -> Option<&str> {
        self.reason_code.as_deref()
    }

    /// When the record was created.
    #[must_use]
    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`AuditRecord`].
#[derive(Debug, Clone)]
pub struct AuditRecordBuilder {
    record: AuditRecord,
}

impl AuditRecordBuilder {
    fn new(actor_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            record: AuditRecord {
                id: Uuid::new_v4(),
                actor_id: actor_id.into(),
                organization_id: None,
                action: action.into(),
                entity_type: None,
                entity_id: None,
                changes: None,
                metadata: None,
                client_ip: None,
                user_agent: None,
                request_id: None,
                emergency: false,
                reason_code: None,
                timestamp: OffsetDateTime::now_utc(),
            },
        }
    }

    /// Sets the organization.
    #[must_use]
    pub fn organization(mut self, org_id: impl Into<String>) -> Self {
        self.record.organization_id = Some(org_id.into());
        self
    }

    /// Sets the entity acted upon.
    #[must_use]
    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: Option<String>) -> Self {
        self.record.entity_type = Some(entity_type.into());
        self.record.entity_id = entity_id;
        self
    }

    /// Applies request context.
    #[must_use]
    pub fn options(mut self, options: AuditOptions) -> Self {
        self.record.changes = options.changes;
        self.record.metadata = options.metadata;
        self.record.client_ip = options.client_ip;
        self.record.user_agent = options.user_agent;
        self.record.request_id = options.request_id;
        self
    }

    /// Marks the record as break-glass with a reason code.
    #[must_use]
    pub fn emergency(mut self, reason_code: impl Into<String>) -> Self {
        self.record.emergency = true;
        self.record.reason_code = Some(reason_code.into());
        self
    }

    /// Finishes the record.
    #[must_use]
    pub fn build(self) -> AuditRecord {
        self.record
    }
}
