//! Regional compliance policy record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Regulatory regimes a region may activate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionFlags {
    /// EU General Data Protection Regulation.
    pub gdpr: bool,
    /// US Health Insurance Portability and Accountability Act.
    pub hipaa: bool,
    /// California Consumer Privacy Act.
    pub ccpa: bool,
}

/// Compliance policy for one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionPolicy {
    /// Region code (e.g. "EU", "US-CA").
    pub code: String,

    /// Regulatory regimes in force.
    #[serde(default)]
    pub flags: RegionFlags,

    /// Headers every request must carry.
    #[serde(default)]
    pub required_headers: Vec<String>,

    /// Origins allowed to call the API. Entries may contain one `*` wildcard.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Requests admitted per rate-limit window; `None` uses the service default.
    #[serde(default)]
    pub default_rate_limit: Option<u32>,

    /// Feature toggles for downstream handlers.
    #[serde(default)]
    pub features: HashMap<String, bool>,
}

impl RegionPolicy {
    /// Creates a policy with no obligations.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            flags: RegionFlags::default(),
            required_headers: Vec::new(),
            allowed_origins: Vec::new(),
            default_rate_limit: None,
            features: HashMap::new(),
        }
    }

    /// Policy substituted when a non-mandatory lookup fails.
    ///
    /// No regulatory flags, no required headers, no origin restriction and
    /// the service-wide rate limit.
    #[must_use]
    pub fn fallback(code: impl Into<String>) -> Self {
        Self::new(code)
    }

    /// Sets the regulatory flags.
    #[must_use]
    pub fn with_flags(mut self, flags: RegionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Adds a required header.
    #[must_use]
    pub fn require_header(mut self, name: impl Into<String>) -> Self {
        self.required_headers.push(name.into());
        self
    }

    /// Adds an allowed origin pattern.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    /// Sets the per-window rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, limit: u32) -> Self {
        self.default_rate_limit = Some(limit);
        self
    }

    /// Sets a feature flag.
    #[must_use]
    pub fn with_feature(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.features.insert(name.into(), enabled);
        self
    }

    /// Returns whether a feature is enabled. Unknown features are disabled.
    #[must_use]
    pub fn feature(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }

    /// Returns `true` if the origin matches the allow-list.
    ///
    /// An empty allow-list imposes no restriction.
    #[must_use]
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.is_empty()
            || self
                .allowed_origins
                .iter()
                .any(|pattern| origin_matches(pattern, origin))
    }
}

/// Matches an origin against a pattern with at most one `*`.
fn origin_matches(pattern: &str, origin: &str) -> bool {
    let pattern = pattern.trim();
    match pattern.split_once('*') {
        None => pattern.eq_ignore_ascii_case(origin),
        Some((prefix, suffix)) => {
            let origin = origin.to_ascii_lowercase();
            let prefix = prefix.to_ascii_lowercase();
            let suffix = suffix.to_ascii_lowercase();
            origin.len() >= prefix.len() + suffix.len()
                && origin.starts_with(&prefix)
                && origin.ends_with(&suffix)
        }
    }
}
