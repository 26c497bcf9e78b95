//! Request signal names understood by the pipeline.
//!
//! These names are part of the public contract with clients and must not
//! change. Header names are lower-case because `http` normalizes them.

/// Bearer credential.
pub const AUTHORIZATION: &str = "authorization";
/// Explicit region selection.
pub const REGION: &str = "x-region";
/// Explicit region selection via query string.
pub const REGION_QUERY_PARAM: &str = "region";
/// Target organization when no `{org_id}` path parameter exists.
pub const ORGANIZATION_ID: &str = "x-organization-id";

/// GDPR consent signal.
pub const GDPR_CONSENT: &str = "x-gdpr-consent";
/// GDPR data-processing-agreement version.
pub const DPA_VERSION: &str = "x-dpa-version";
/// GDPR data-transfer mechanism.
pub const DATA_TRANSFER_MECHANISM: &str = "x-data-transfer-mechanism";

/// HIPAA business-associate-agreement version.
pub const BAA_VERSION: &str = "x-baa-version";
/// Request trace identifier.
pub const REQUEST_ID: &str = "x-request-id";
/// Cross-service correlation identifier.
pub const CORRELATION_ID: &str = "x-correlation-id";

/// CCPA privacy notice version.
pub const PRIVACY_NOTICE_VERSION: &str = "x-privacy-notice-version";
/// CCPA do-not-sell preference.
pub const DO_NOT_SELL: &str = "x-do-not-sell";

/// Break-glass emergency access flag.
pub const EMERGENCY_ACCESS: &str = "x-emergency-access";
/// Mandatory reason code accompanying emergency access.
pub const EMERGENCY_REASON: &str = "x-emergency-reason";

/// Browser origin.
pub const ORIGIN: &str = "origin";
/// Client user agent.
pub const USER_AGENT: &str = "user-agent";
/// Scheme reported by a TLS-terminating proxy.
pub const FORWARDED_PROTO: &str = "x-forwarded-proto";
/// Client address chain reported by a proxy.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Client address reported by a proxy.
pub const REAL_IP: &str = "x-real-ip";

/// Signals that carry one value. When a client repeats one of these, the
/// first occurrence wins instead of the HTTP list join.
pub const SINGLE_VALUED: &[&str] = &[
    AUTHORIZATION,
    REGION,
    ORGANIZATION_ID,
    GDPR_CONSENT,
    DPA_VERSION,
    DATA_TRANSFER_MECHANISM,
    BAA_VERSION,
    REQUEST_ID,
    CORRELATION_ID,
    PRIVACY_NOTICE_VERSION,
    DO_NOT_SELL,
    EMERGENCY_ACCESS,
    EMERGENCY_REASON,
    ORIGIN,
    FORWARDED_PROTO,
    REAL_IP,
];

/// Whether `name` (lower-case) is a single-valued signal.
#[must_use]
pub fn is_single_valued(name: &str) -> bool {
    SINGLE_VALUED.contains(&name)
}

/// Parses a boolean signal value.
///
/// Accepts `true/false`, `1/0`, `yes/no` (case-insensitive). Returns `None`
/// for anything else.
#[must_use]
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
