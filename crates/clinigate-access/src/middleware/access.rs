//! Axum adapter for the access pipeline.
//!
//! ```ignore
//! use axum::{Router, middleware::from_fn_with_state, routing::get};
//! use clinigate_access::middleware::{AccessState, access_middleware};
//! use clinigate_access::AccessRequirement;
//!
//! let patients = Router::new()
//!     .route("/organizations/{org_id}/patients", get(list_patients))
//!     .route_layer(from_fn_with_state(
//!         AccessState::new(pipeline.clone(), AccessRequirement::permission("patient:read")),
//!         access_middleware,
//!     ));
//! ```
//!
//! Attach it with `route_layer` so `{org_id}` path parameters are visible.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    extract::{
        ConnectInfo, FromRequestParts, RawPathParams, Request, State,
        rejection::RawPathParamsRejection,
    },
    http::{HeaderValue, request::Parts},
    middleware::Next,
    response::Response,
};
use futures_util::FutureExt;

use super::error::{RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, error_response, panic_response};
use super::request_id::RequestId;
use crate::AccessError;
use crate::pipeline::{AccessGrant, AccessPipeline, AccessRequirement};
use crate::signals::RequestSignals;

/// Path parameter naming the target organization.
pub const ORG_PATH_PARAM: &str = "org_id";

/// State of one access-guarded route.
#[derive(Clone)]
pub struct AccessState {
    pipeline: Arc<AccessPipeline>,
    requirement: Arc<AccessRequirement>,
}

impl AccessState {
    /// Guards a route with `requirement`.
    #[must_use]
    pub fn new(pipeline: Arc<AccessPipeline>, requirement: AccessRequirement) -> Self {
        Self {
            pipeline,
            requirement: Arc::new(requirement),
        }
    }
}

/// Runs the access pipeline in front of a handler.
///
/// On success the [`AccessGrant`] is inserted into the request extensions and
/// the handler runs. A panic in the pipeline or the handler becomes a 500 with
/// the request's trace id instead of tearing down the connection.
pub async fn access_middleware(
    State(state): State<AccessState>,
    path: Result<RawPathParams, RawPathParamsRejection>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .cloned()
        .or_else(|| {
            req.headers()
                .get(crate::headers::REQUEST_ID)
                .and_then(|value| value.to_str().ok())
                .map(|value| RequestId(value.to_string()))
        })
        .unwrap_or_else(RequestId::generate);

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let mut signals = RequestSignals::from_http(
        req.headers(),
        req.uri(),
        peer,
        state.pipeline.trusts_forwarded_headers(),
    );
    if let Ok(params) = &path
        && let Some((_, org_id)) = params.iter().find(|(name, _)| *name == ORG_PATH_PARAM)
    {
        signals = signals.with_path_org(org_id);
    }

    let pipeline = Arc::clone(&state.pipeline);
    let requirement = Arc::clone(&state.requirement);
    let trace_id = request_id.0.clone();

    let outcome = AssertUnwindSafe(async move {
        let grant = pipeline
            .evaluate(&signals, &requirement, request_id.as_str())
            .await?;
        req.extensions_mut().insert(grant.clone());
        let response = next.run(req).await;
        Ok::<_, AccessError>((grant, response))
    })
    .catch_unwind()
    .await;

    match outcome {
        Ok(Ok((grant, mut response))) => {
            state
                .pipeline
                .record_outcome(&grant, response.status().as_u16());

            let headers = response.headers_mut();
            headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(grant.rate.limit));
            headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(grant.rate.remaining));
            response
        }
        Ok(Err(err)) => error_response(&err, Some(&trace_id)),
        Err(panic) => {
            tracing::error!(
                request_id = %trace_id,
                panic = %panic_message(panic.as_ref()),
                "Request handler panicked"
            );
            panic_response(&trace_id)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<S> FromRequestParts<S> for AccessGrant
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AccessGrant>().cloned().ok_or_else(|| {
            tracing::error!(path = %parts.uri.path(), "Handler requires an access grant but the route is unguarded");
            let trace_id = parts.extensions.get::<RequestId>().map(RequestId::as_str);
            error_response(&AccessError::internal("access grant missing"), trace_id)
        })
    }
}
