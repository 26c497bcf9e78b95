//! Request trace identifiers.

use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, Request},
    http::{HeaderValue, request::Parts},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::headers;

/// Trace identifier of the current request, stored in the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Ensures each request has a trace id and mirrors it on the response.
///
/// A client-supplied `X-Request-ID` is kept. Otherwise one is generated, but
/// only into the extensions: the request headers still show what the client
/// actually sent, which is what compliance checks look at.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(headers::REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(RequestId::generate, |value| RequestId(value.to_string()));

    req.extensions_mut().insert(id.clone());

    let mut res = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        res.headers_mut().insert(headers::REQUEST_ID, value);
    }
    res
}

impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(RequestId::generate))
    }
}
