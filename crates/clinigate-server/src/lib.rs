//! Clinigate HTTP server.
//!
//! Wires the `clinigate-access` pipeline in front of a small set of
//! organization-scoped routes, backed by the in-memory stores of
//! `clinigate-db-memory`.

pub mod config;
pub mod handlers;
pub mod observability;
pub mod server;

pub use config::AppConfig;
pub use observability::{apply_logging_level, init_tracing, install_panic_hook};
pub use server::{AppState, ClinigateServer, ServerBuilder, build_router, build_state};
