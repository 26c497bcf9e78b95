//! Typed view of the request inputs the pipeline reads.
//!
//! `RequestSignals` is populated once from the HTTP request and then passed
//! explicitly to every stage. Stages never look at the raw request.

use std::collections::HashMap;
use std::net::IpAddr;

use axum::http::{HeaderMap, Uri};

use crate::headers;

/// Request-scoped signals consumed by the pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct RequestSignals {
    /// Header values keyed by lower-case name. Blank values are dropped.
    headers: HashMap<String, String>,
    /// Value of the `region` query parameter.
    query_region: Option<String>,
    /// Resolved client address.
    client_ip: Option<IpAddr>,
    /// Whether the request arrived over an encrypted connection.
    secure_transport: bool,
    /// Organization named by the route's `{org_id}` path parameter.
    path_org_id: Option<String>,
}

impl RequestSignals {
    /// Creates an empty signal set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds signals from HTTP request parts.
    ///
    /// Forwarding headers (`X-Forwarded-For`, `X-Real-IP`,
    /// `X-Forwarded-Proto`) are only honoured when `trust_forwarded` is set,
    /// i.e. when the service runs behind a proxy that overwrites them.
    #[must_use]
    pub fn from_http(
        header_map: &HeaderMap,
        uri: &Uri,
        peer: Option<IpAddr>,
        trust_forwarded: bool,
    ) -> Self {
        let mut signals = Self::new();

        for (name, value) in header_map {
            if let Ok(value) = value.to_str() {
                signals = signals.with_header(name.as_str(), value);
            }
        }

        if let Some(query) = uri.query() {
            signals = signals.with_query(query);
        }

        let forwarded_ip = if trust_forwarded {
            signals
                .header(headers::FORWARDED_FOR)
                .and_then(|chain| chain.split(',').next())
                .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
                .or_else(|| {
                    signals
                        .header(headers::REAL_IP)
                        .and_then(|ip| ip.parse::<IpAddr>().ok())
                })
        } else {
            None
        };
        signals.client_ip = forwarded_ip.or(peer);

        let forwarded_https = trust_forwarded
            && signals
                .header(headers::FORWARDED_PROTO)
                .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
        let scheme_https = uri.scheme_str() == Some("https");
        signals.secure_transport = forwarded_https || scheme_https;

        signals
    }

    /// Adds a header value. Names are case-insensitive.
    ///
    /// Repeated list headers are joined with `", "` as HTTP allows. For the
    /// single-valued signals in [`headers::SINGLE_VALUED`] the first value
    /// is kept.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return self;
        }
        let name = name.to_ascii_lowercase();
        let single = headers::is_single_valued(&name);
        self.headers
            .entry(name)
            .and_modify(|existing| {
                if !single {
                    existing.push_str(", ");
                    existing.push_str(value);
                }
            })
            .or_insert_with(|| value.to_string());
        self
    }

    /// Reads the `region` parameter from a raw query string.
    #[must_use]
    pub fn with_query(mut self, query: &str) -> Self {
        self.query_region = url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == headers::REGION_QUERY_PARAM)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }

    /// Sets the client address.
    #[must_use]
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Marks the request as arriving over an encrypted connection.
    #[must_use]
    pub fn with_secure_transport(mut self, secure: bool) -> Self {
        self.secure_transport = secure;
        self
    }

    /// Sets the organization named in the route path.
    #[must_use]
    pub fn with_path_org(mut self, org_id: impl Into<String>) -> Self {
        self.path_org_id = Some(org_id.into());
        self
    }

    /// Returns a header value by (case-insensitive) name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            self.headers
                .get(&name.to_ascii_lowercase())
                .map(String::as_str)
        } else {
            self.headers.get(name).map(String::as_str)
        }
    }

    /// Returns `true` if the header is present with a non-blank value.
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Returns the bearer token from the `Authorization` header.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header(headers::AUTHORIZATION)?;
        let (scheme, token) = value.split_once(' ')?;
        if scheme.eq_ignore_ascii_case("bearer") {
            Some(token.trim()).filter(|t| !t.is_empty())
        } else {
            None
        }
    }

    /// Explicit region signal: `X-Region` header first, then the query parameter.
    #[must_use]
    pub fn explicit_region(&self) -> Option<&str> {
        self.header(headers::REGION)
            .or(self.query_region.as_deref())
    }

    /// Returns the client address, if known.
    #[must_use]
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    /// Returns `true` if the connection is encrypted.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure_transport
    }

    /// Returns the `Origin` header.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.header(headers::ORIGIN)
    }

    /// Returns the `User-Agent` header.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.header(headers::USER_AGENT)
    }

    /// Returns the `X-Request-ID` header.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.header(headers::REQUEST_ID)
    }

    /// Organization the request targets, if it names one.
    ///
    /// The route path wins over the `X-Organization-ID` header.
    #[must_use]
    pub fn target_org(&self) -> Option<&str> {
        self.path_org_id
            .as_deref()
            .or_else(|| self.header(headers::ORGANIZATION_ID))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let signals = RequestSignals::new().with_header("X-DPA-Version", "2.1");
        assert_eq!(signals.header("x-dpa-version"), Some("2.1"));
        assert_eq!(signals.header("X-DPA-VERSION"), Some("2.1"));
    }

    #[test]
    fn test_blank_headers_are_absent() {
        let signals = RequestSignals::new().with_header("X-BAA-Version", "   ");
        assert!(!signals.has_header(headers::BAA_VERSION));
    }

    #[test]
    fn test_bearer_token() {
        let signals = RequestSignals::new().with_header("Authorization", "Bearer abc.def");
        assert_eq!(signals.bearer_token(), Some("abc.def"));

        let signals = RequestSignals::new().with_header("Authorization", "Basic dXNlcg==");
        assert_eq!(signals.bearer_token(), None);

        let signals = RequestSignals::new().with_header("Authorization", "Bearer ");
        assert_eq!(signals.bearer_token(), None);
    }

    #[test]
    fn test_explicit_region_prefers_header() {
        let signals = RequestSignals::new()
            .with_header("X-Region", "EU")
            .with_query("region=US&x=1");
        assert_eq!(signals.explicit_region(), Some("EU"));

        let signals = RequestSignals::new().with_query("x=1&region=US-CA");
        assert_eq!(signals.explicit_region(), Some("US-CA"));
    }

    #[test]
    fn test_forwarded_headers_require_trust() {
        let mut map = HeaderMap::new();
        map.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        map.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        let uri: Uri = "/api/patients".parse().unwrap();
        let peer: IpAddr = "10.0.0.1".parse().unwrap();

        let trusted = RequestSignals::from_http(&map, &uri, Some(peer), true);
        assert_eq!(trusted.client_ip(), Some("203.0.113.9".parse().unwrap()));
        assert!(trusted.is_secure());

        let untrusted = RequestSignals::from_http(&map, &uri, Some(peer), false);
        assert_eq!(untrusted.client_ip(), Some(peer));
        assert!(!untrusted.is_secure());
    }

    #[test]
    fn test_repeated_single_valued_headers_keep_first() {
        let mut map = HeaderMap::new();
        map.append("x-region", HeaderValue::from_static("EU"));
        map.append("x-region", HeaderValue::from_static("EU"));
        map.append("authorization", HeaderValue::from_static("Bearer first"));
        map.append("authorization", HeaderValue::from_static("Bearer second"));
        map.append("x-emergency-access", HeaderValue::from_static("true"));
        map.append("x-emergency-access", HeaderValue::from_static("false"));
        map.append("accept", HeaderValue::from_static("text/html"));
        map.append("accept", HeaderValue::from_static("application/json"));
        let uri: Uri = "/api/patients".parse().unwrap();

        let signals = RequestSignals::from_http(&map, &uri, None, false);
        assert_eq!(signals.explicit_region(), Some("EU"));
        assert_eq!(signals.bearer_token(), Some("first"));
        assert_eq!(signals.header("x-emergency-access"), Some("true"));
        assert_eq!(signals.header("accept"), Some("text/html, application/json"));
    }

    #[test]
    fn test_target_org_prefers_path() {
        let signals = RequestSignals::new()
            .with_header("X-Organization-ID", "org-b")
            .with_path_org("org-a");
        assert_eq!(signals.target_org(), Some("org-a"));

        let signals = RequestSignals::new().with_header("X-Organization-ID", "org-b");
        assert_eq!(signals.target_org(), Some("org-b"));
    }
}
