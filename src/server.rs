//! # Server Configuration
//!
//! This module contains the router, shared state and lifecycle of the relay:
//! HTTP serving with graceful shutdown alongside the periodic retention sweep.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header::CONTENT_TYPE},
    middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::gradesync::{GradeSyncClient, SyncUpstream};
use crate::handlers;
use crate::repositories::sync_job::JobStore;
use crate::retention::RetentionSweeper;
use crate::sync_service::SyncService;
use crate::telemetry::{self, REQUEST_ID_HEADER};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: Arc<SyncService>,
}

impl AppState {
    /// Wire the GradeSync client, job store and sweeper from configuration.
    pub fn from_config(config: AppConfig) -> Result<Self, url::ParseError> {
        let client = GradeSyncClient::from_config(&config)?;
        Ok(Self::with_upstream(config, Arc::new(client)))
    }

    /// Build state around an arbitrary upstream implementation.
    pub fn with_upstream(config: AppConfig, upstream: Arc<dyn SyncUpstream>) -> Self {
        let store = Arc::new(JobStore::new());
        let sweeper = RetentionSweeper::new(Arc::clone(&store), config.job_ttl());
        let service = SyncService::new(upstream, store, sweeper);
        Self {
            config: Arc::new(config),
            service: Arc::new(service),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        self.service.store()
    }

    /// Sweeper bound to this state's store and configured TTL.
    pub fn sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(Arc::clone(self.store()), self.config.job_ttl())
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/sync", get(handlers::sync::list_courses))
        .route(
            "/sync/jobs",
            get(handlers::sync::list_sync_jobs).post(handlers::sync::reserved_course_id),
        )
        .route(
            "/sync/jobs/{job_id}",
            get(handlers::sync::get_sync_job).post(handlers::sync::reserved_course_id),
        )
        .route("/sync/{course_id}", post(handlers::sync::sync_course))
        .route("/sync/{course_id}/start", post(handlers::sync::start_sync_job))
        .route(
            "/sync/{course_id}/sources/{source}",
            post(handlers::sync::sync_course_source),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(telemetry::trace_context_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
}

/// Build the CORS layer; an empty origin list allows any origin.
fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(origin = %origin, error = %err, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(REQUEST_ID_HEADER)])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
        .max_age(Duration::from_secs(3600))
}

/// Serve `state` on `listener` until `shutdown` fires, sweeping expired jobs
/// in the background for as long as the server runs.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let sweeper_token = shutdown.child_token();
    let sweeper = tokio::spawn(
        state
            .sweeper()
            .run(state.config.sweep_interval(), sweeper_token.clone()),
    );

    let app = create_app(state);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;

    sweeper_token.cancel();
    if let Err(err) = sweeper.await {
        warn!(error = %err, "Retention sweeper task ended abnormally");
    }

    result
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let addr = config
        .bind_addr()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;
    let profile = config.profile.clone();
    let state = AppState::from_config(config)?;

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, %profile, "Server listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    serve(listener, state, shutdown).await?;
    info!("Server stopped");
    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl-C handler");
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
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT (Ctrl-C), starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
        () = token.cancelled() => return,
    }
    token.cancel();
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::sync::list_courses,
        crate::handlers::sync::sync_course,
        crate::handlers::sync::sync_course_source,
        crate::handlers::sync::start_sync_job,
        crate::handlers::sync::get_sync_job,
        crate::handlers::sync::list_sync_jobs,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::handlers::sync::SyncJobList,
            crate::models::sync_job::SyncJob,
            crate::models::sync_job::JobStatus,
            crate::gradesync::SyncSource,
            crate::error::ApiError,
            crate::error::UpstreamErrorDetails,
        )
    ),
    tags(
        (name = "root", description = "Service metadata"),
        (name = "sync", description = "Synchronous calls relayed to GradeSync"),
        (name = "jobs", description = "Background sync jobs and progress polling")
    ),
    info(
        title = "GradeSync Relay API",
        description = "Relays grade synchronization requests to GradeSync and tracks background sync progress",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
