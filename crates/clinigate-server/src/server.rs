use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{MethodRouter, get, post},
};
use clinigate_access::middleware::{AccessState, RequestId, access_middleware, request_id};
use clinigate_access::{AccessPipeline, AccessRequirement, JwtTokenValidator, RoleService};
use clinigate_db_memory::{MemoryStores, SeedError};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{config::AppConfig, handlers};

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AccessPipeline>,
    pub stores: MemoryStores,
    pub roles: RoleService,
}

/// Seeds the in-memory stores and wires the access pipeline over them.
///
/// # Errors
///
/// Returns the first seed entry that cannot be loaded.
pub async fn build_state(cfg: &AppConfig) -> Result<AppState, SeedError> {
    let stores = MemoryStores::new();
    let summary = cfg.seed.apply(&stores, cfg.access.store_timeout).await?;
    tracing::info!(
        permissions = summary.permissions,
        regions = summary.regions,
        ip_ranges = summary.ip_ranges,
        roles = summary.roles_created,
        assignments = summary.assignments,
        "Stores seeded"
    );

    let pipeline = AccessPipeline::new(
        &cfg.access,
        Arc::new(JwtTokenValidator::new(&cfg.access.jwt_secret)),
        stores.roles.clone(),
        stores.regions.clone(),
        stores.audit.clone(),
    );

    Ok(AppState {
        pipeline: Arc::new(pipeline),
        roles: RoleService::new(stores.roles.clone(), cfg.access.store_timeout),
        stores,
    })
}

fn guarded(
    pipeline: &Arc<AccessPipeline>,
    requirement: AccessRequirement,
    route: MethodRouter<AppState>,
) -> MethodRouter<AppState> {
    route.layer(from_fn_with_state(
        AccessState::new(Arc::clone(pipeline), requirement),
        access_middleware,
    ))
}

pub fn build_router(cfg: &AppConfig, state: AppState) -> Router {
    let pipeline = &state.pipeline;

    let patients = guarded(
        pipeline,
        AccessRequirement::permission("patient:read")
            .for_entity("patient")
            .allow_break_glass(),
        get(handlers::list_patients),
    )
    .merge(guarded(
        pipeline,
        AccessRequirement::permission("patient:write")
            .for_entity("patient")
            .allow_break_glass(),
        post(handlers::create_patient),
    ));

    let roles = guarded(
        pipeline,
        AccessRequirement::permission("role:manage").for_entity("role"),
        get(handlers::list_roles).post(handlers::create_role),
    );

    let audit = guarded(
        pipeline,
        AccessRequirement::permission("audit:read").for_entity("audit"),
        get(handlers::list_audit),
    );

    let region = guarded(
        pipeline,
        AccessRequirement::public(),
        get(handlers::current_region),
    );

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/api/regions/current", region)
        .route("/api/organizations/{org_id}/patients", patients)
        .route("/api/organizations/{org_id}/roles", roles)
        .route("/api/organizations/{org_id}/audit", audit)
        // Outermost first: request id -> trace -> timeout -> concurrency limit
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(request_id))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            use tracing::field::Empty;
                            let req_id = req
                                .extensions()
                                .get::<RequestId>()
                                .map(|id| id.as_str().to_string())
                                .unwrap_or_default();
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri(),
                                http.status_code = Empty,
                                request_id = %req_id
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>,
                             latency: std::time::Duration,
                             span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = res.status().as_u16(),
                                    elapsed_ms = latency.as_millis() as u64,
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::GATEWAY_TIMEOUT,
                    cfg.server.request_timeout,
                ))
                .layer(GlobalConcurrencyLimitLayer::new(
                    cfg.server.max_concurrent_requests,
                )),
        )
        .with_state(state)
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Seeds the stores and assembles the router.
    ///
    /// # Errors
    ///
    /// Fails if the seed data cannot be loaded.
    pub async fn build(self) -> Result<ClinigateServer, SeedError> {
        let state = build_state(&self.config).await?;
        let app = build_router(&self.config, state.clone());

        Ok(ClinigateServer {
            addr: self.addr,
            app,
            state,
        })
    }
}

pub struct ClinigateServer {
    addr: SocketAddr,
    app: Router,
    state: AppState,
}

impl ClinigateServer {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serves on an already bound listener until `shutdown` resolves, then
    /// stops the pipeline's background sweeps.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let cleanup = self.state.pipeline.start_cleanup_tasks();
        tracing::info!(%addr, "listening");

        let served = axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        cleanup.shutdown().await;
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
