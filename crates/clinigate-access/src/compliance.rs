//! Regional compliance validation.
//!
//! [`ComplianceValidator`] checks a request against the obligations its
//! [`RegionPolicy`] activates. Rules run in a fixed order and the first
//! failing rule ends evaluation:
//!
//! 1. GDPR: consent, data-processing-agreement version, transfer mechanism
//! 2. HIPAA: secure transport, business-associate-agreement version,
//!    traceability headers
//! 3. CCPA: privacy notice version, optional do-not-sell preference
//! 4. Generic: policy-required headers and the origin allow-list
//!
//! Break-glass signals are read last, in every region. They never relax the
//! rules above; they only tell the pipeline to skip role gating.

use std::fmt;

use crate::headers::{self, parse_flag};
use crate::signals::RequestSignals;
use crate::types::RegionPolicy;

/// Headers a HIPAA request must carry for traceability.
const HIPAA_TRACE_HEADERS: &[(&str, &str)] = &[
    (headers::REQUEST_ID, "X-Request-ID"),
    (headers::CORRELATION_ID, "X-Correlation-ID"),
    (headers::AUTHORIZATION, "Authorization"),
];

// =============================================================================
// Errors
// =============================================================================

/// The rule family that rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComplianceRule {
    /// GDPR obligations.
    Gdpr,
    /// HIPAA obligations.
    Hipaa,
    /// CCPA obligations.
    Ccpa,
    /// Policy-required headers.
    RequiredHeaders,
    /// Origin allow-list.
    Origin,
    /// Break-glass signalling.
    EmergencyAccess,
}

impl ComplianceRule {
    /// Machine-readable code used in error bodies.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Gdpr => "compliance_gdpr",
            Self::Hipaa => "compliance_hipaa",
            Self::Ccpa => "compliance_ccpa",
            Self::RequiredHeaders => "compliance_required_headers",
            Self::Origin => "compliance_origin",
            Self::EmergencyAccess => "compliance_emergency_access",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Gdpr => "GDPR",
            Self::Hipaa => "HIPAA",
            Self::Ccpa => "CCPA",
            Self::RequiredHeaders => "required headers",
            Self::Origin => "origin",
            Self::EmergencyAccess => "emergency access",
        }
    }
}

impl fmt::Display for ComplianceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A failed compliance rule.
///
/// `correctable` separates a malformed signal the client can fix (400) from
/// an obligation that is missing or withheld (403).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Compliance violation ({rule}): {message}")]
pub struct ComplianceError {
    /// The rule that failed.
    pub rule: ComplianceRule,
    /// Client-facing description.
    pub message: String,
    correctable: bool,
}

impl ComplianceError {
    /// A required signal is missing or withheld.
    #[must_use]
    pub fn rejected(rule: ComplianceRule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
            correctable: false,
        }
    }

    /// A signal is present but malformed.
    #[must_use]
    pub fn malformed(rule: ComplianceRule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
            correctable: true,
        }
    }

    /// Returns `true` if the client can fix the request by correcting a value.
    #[must_use]
    pub fn is_correctable(&self) -> bool {
        self.correctable
    }
}

// =============================================================================
// Report
// =============================================================================

/// Break-glass request details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyAccess {
    /// Reason code supplied with the request.
    pub reason: String,
}

/// Request-scoped outcomes of a successful validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplianceReport {
    /// CCPA do-not-sell preference, when the client sent one.
    ///
    /// Recorded for downstream handlers to honour; not enforced here.
    pub do_not_sell: Option<bool>,

    /// Present when the request invoked break-glass access.
    pub emergency: Option<EmergencyAccess>,
}

// =============================================================================
// Validator
// =============================================================================

/// Stateless validator for regional obligations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplianceValidator;

impl ComplianceValidator {
    /// Creates a validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validates `signals` against `policy`.
    ///
    /// # Errors
    ///
    /// Returns the first failing rule.
    pub fn validate(
        &self,
        policy: &RegionPolicy,
        signals: &RequestSignals,
    ) -> Result<ComplianceReport, ComplianceError> {
        let mut report = ComplianceReport::default();

        if policy.flags.gdpr {
            check_gdpr(signals)?;
        }
        if policy.flags.hipaa {
            check_hipaa(signals)?;
        }
        if policy.flags.ccpa {
            report.do_not_sell = check_ccpa(signals)?;
        }
        check_required_headers(policy, signals)?;
        check_origin(policy, signals)?;
        // Emergency access only exists in HIPAA regions.
        if policy.flags.hipaa {
            report.emergency = check_emergency(signals)?;
        }

        tracing::debug!(
            region = %policy.code,
            do_not_sell = ?report.do_not_sell,
            emergency = report.emergency.is_some(),
            "Compliance checks passed"
        );
        Ok(report)
    }
}

fn check_gdpr(signals: &RequestSignals) -> Result<(), ComplianceError> {
    let consent = signals.header(headers::GDPR_CONSENT).ok_or_else(|| {
        ComplianceError::rejected(ComplianceRule::Gdpr, "GDPR requires X-GDPR-Consent")
    })?;
    if parse_flag(consent) == Some(false) {
        return Err(ComplianceError::rejected(
            ComplianceRule::Gdpr,
            "GDPR consent was withheld",
        ));
    }

    require(signals, ComplianceRule::Gdpr, headers::DPA_VERSION, "GDPR requires X-DPA-Version")?;
    require(
        signals,
        ComplianceRule::Gdpr,
        headers::DATA_TRANSFER_MECHANISM,
        "GDPR requires X-Data-Transfer-Mechanism",
    )
}

fn check_hipaa(signals: &RequestSignals) -> Result<(), ComplianceError> {
    if !signals.is_secure() {
        return Err(ComplianceError::rejected(
            ComplianceRule::Hipaa,
            "HIPAA requires a secure transport",
        ));
    }

    require(signals, ComplianceRule::Hipaa, headers::BAA_VERSION, "HIPAA requires X-BAA-Version")?;

    for (name, display) in HIPAA_TRACE_HEADERS {
        if !signals.has_header(name) {
            return Err(ComplianceError::rejected(
                ComplianceRule::Hipaa,
                format!("HIPAA requires the {display} header"),
            ));
        }
    }
    Ok(())
}

fn check_ccpa(signals: &RequestSignals) -> Result<Option<bool>, ComplianceError> {
    require(
        signals,
        ComplianceRule::Ccpa,
        headers::PRIVACY_NOTICE_VERSION,
        "CCPA requires X-Privacy-Notice-Version",
    )?;

    signals
        .header(headers::DO_NOT_SELL)
        .map(|value| {
            parse_flag(value).ok_or_else(|| {
                ComplianceError::malformed(
                    ComplianceRule::Ccpa,
                    "X-Do-Not-Sell must be true or false",
                )
            })
        })
        .transpose()
}

fn check_required_headers(
    policy: &RegionPolicy,
    signals: &RequestSignals,
) -> Result<(), ComplianceError> {
    match policy
        .required_headers
        .iter()
        .find(|name| !signals.has_header(name))
    {
        Some(missing) => Err(ComplianceError::rejected(
            ComplianceRule::RequiredHeaders,
            format!("Region {} requires the {missing} header", policy.code),
        )),
        None => Ok(()),
    }
}

fn check_origin(policy: &RegionPolicy, signals: &RequestSignals) -> Result<(), ComplianceError> {
    match signals.origin() {
        Some(origin) if !policy.origin_allowed(origin) => Err(ComplianceError::rejected(
            ComplianceRule::Origin,
            format!("Origin {origin} is not allowed in region {}", policy.code),
        )),
        _ => Ok(()),
    }
}

fn check_emergency(signals: &RequestSignals) -> Result<Option<EmergencyAccess>, ComplianceError> {
    let Some(flag) = signals.header(headers::EMERGENCY_ACCESS) else {
        return Ok(None);
    };

    match parse_flag(flag) {
        None => Err(ComplianceError::malformed(
            ComplianceRule::EmergencyAccess,
            "X-Emergency-Access must be true or false",
        )),
        Some(false) => Ok(None),
        Some(true) => signals
            .header(headers::EMERGENCY_REASON)
            .map(|reason| {
                Some(EmergencyAccess {
                    reason: reason.to_string(),
                })
            })
            .ok_or_else(|| {
                ComplianceError::malformed(
                    ComplianceRule::EmergencyAccess,
                    "Emergency access requires X-Emergency-Reason",
                )
            }),
    }
}

fn require(
    signals: &RequestSignals,
    rule: ComplianceRule,
    name: &str,
    message: &str,
) -> Result<(), ComplianceError> {
    if signals.has_header(name) {
        Ok(())
    } else {
        Err(ComplianceError::rejected(rule, message))
    }
}

// =============================================================================
// Tests
// =============================================================================
