//! Access pipeline error types.
//!
//! Every stage of the pipeline returns an [`AccessError`]. Errors are grouped
//! into [`ErrorKind`]s, and the kind alone decides the HTTP status code via
//! [`ErrorKind::status_code`]. The grouping keeps a policy "deny" apart from an
//! infrastructure "can't tell": `Authorization` is a decision, `PolicyLoad` is
//! an outage.

use std::fmt;
use std::time::Duration;

use axum::http::StatusCode;

use crate::compliance::ComplianceError;

/// Errors that can occur while evaluating an access decision.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AccessError {
    /// The request lacks a usable credential.
    #[error("Unauthenticated: {message}")]
    Unauthenticated {
        /// Description of why authentication failed.
        message: String,
    },

    /// The principal does not hold the required permission.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Description of why access is forbidden.
        message: String,
    },

    /// A system role was the target of an update or delete.
    #[error("System role '{name}' cannot be modified")]
    SystemRoleImmutable {
        /// Name of the system role.
        name: String,
    },

    /// A regulatory requirement of the active region policy is not met.
    #[error(transparent)]
    Compliance(#[from] ComplianceError),

    /// The caller exceeded its admission budget.
    #[error("Rate limit of {limit} requests exceeded")]
    RateLimited {
        /// The limit that was applied.
        limit: u32,
        /// Time until the oldest request leaves the window.
        retry_after: Duration,
    },

    /// An explicitly requested region has no policy.
    #[error("Unknown region: {code}")]
    UnknownRegion {
        /// The requested region code.
        code: String,
    },

    /// A backing store failed while resolving policy or permissions.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// A backing store call did not finish within its budget.
    #[error("Timed out after {timeout:?} during {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The audit store rejected a record.
    #[error("Audit write failed: {message}")]
    AuditWrite {
        /// Description of the audit failure.
        message: String,
    },

    /// The request or mutation is malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of what is invalid.
        message: String,
    },

    /// The referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity type.
        entity: &'static str,
        /// Entity identifier.
        id: String,
    },

    /// The mutation conflicts with existing state.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AccessError {
    /// Creates a new `Unauthenticated` error.
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            message: message.into(),
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `AuditWrite` error.
    #[must_use]
    pub fn audit_write(message: impl Into<String>) -> Self {
        Self::AuditWrite {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated { .. } => ErrorKind::Authentication,
            Self::Forbidden { .. } | Self::SystemRoleImmutable { .. } => ErrorKind::Authorization,
            Self::Compliance(err) if err.is_correctable() => ErrorKind::InvalidRequest,
            Self::Compliance(_) => ErrorKind::Compliance,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::UnknownRegion { .. } | Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::Storage { .. } | Self::Timeout { .. } => ErrorKind::PolicyLoad,
            Self::AuditWrite { .. } => ErrorKind::AuditWrite,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns the HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    /// Returns `true` if the error is a policy decision rather than an outage.
    #[must_use]
    pub fn is_denial(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Authentication
                | ErrorKind::Authorization
                | ErrorKind::Compliance
                | ErrorKind::RateLimited
                | ErrorKind::InvalidRequest
        )
    }

    /// Machine-readable code placed in the error body.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Compliance(err) => err.rule.code(),
            Self::SystemRoleImmutable { .. } => "system_role_immutable",
            Self::UnknownRegion { .. } => "unknown_region",
            Self::Timeout { .. } => "policy_timeout",
            _ => self.kind().code(),
        }
    }

    /// Message safe to return to the client.
    ///
    /// Server-side failures never leak their internal detail.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::PolicyLoad => "Access policy is temporarily unavailable".to_string(),
            ErrorKind::AuditWrite | ErrorKind::Internal => "Internal server error".to_string(),
            _ => match self {
                Self::Unauthenticated { message }
                | Self::Forbidden { message }
                | Self::InvalidRequest { message }
                | Self::Conflict { message } => message.clone(),
                Self::Compliance(err) => err.message.clone(),
                other => other.to_string(),
            },
        }
    }
}

// =============================================================================
// Error Kind
// =============================================================================

/// Error kinds, each mapped to exactly one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid credential.
    Authentication,
    /// Permission denied.
    Authorization,
    /// Regulatory requirement unmet.
    Compliance,
    /// Admission budget exhausted.
    RateLimited,
    /// Backing store unavailable.
    PolicyLoad,
    /// Audit store unavailable.
    AuditWrite,
    /// Client-correctable defect.
    InvalidRequest,
    /// Missing entity.
    NotFound,
    /// Conflicting state.
    Conflict,
    /// Unexpected failure.
    Internal,
}

impl ErrorKind {
    /// The single kind → status table.
    #[must_use]
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization | Self::Compliance => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::PolicyLoad | Self::AuditWrite | Self::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Default machine-readable code for the kind.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Authentication => "unauthenticated",
            Self::Authorization => "forbidden",
            Self::Compliance => "compliance_violation",
            Self::RateLimited => "rate_limited",
            Self::PolicyLoad => "policy_unavailable",
            Self::AuditWrite => "audit_unavailable",
            Self::InvalidRequest => "invalid_request",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// =============================================================================
// Tests
// =============================================================================
