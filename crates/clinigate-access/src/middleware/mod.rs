//! HTTP middleware for access enforcement.
//!
//! - [`request_id`]: trace id propagation
//! - [`access_middleware`]: runs the [`AccessPipeline`](crate::AccessPipeline)
//!   for a guarded route and hands the [`AccessGrant`](crate::AccessGrant) to
//!   the handler
//! - [`error_response`]: the JSON error contract

pub mod access;
pub mod error;
pub mod request_id;

pub use access::{AccessState, ORG_PATH_PARAM, access_middleware};
pub use error::{ErrorBody, RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, error_response};
pub use request_id::{RequestId, request_id};
