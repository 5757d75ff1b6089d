//! # Server Configuration
//!
//! Router assembly, OpenAPI documentation and the HTTP serve loop for the
//! chain sync operator API.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::adapters::AdapterRegistry;
use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::handlers;
use crate::service::SyncService;
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub service: SyncService,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
        adapters: Arc<AdapterRegistry>,
    ) -> Self {
        let service = SyncService::new(
            Arc::clone(&db),
            adapters,
            config.scheduler.default_max_retries,
        );
        Self {
            config,
            db,
            service,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/sync", post(handlers::sync::initiate_sync))
        .route("/batches/{batch_id}", get(handlers::batches::batch_status))
        .route("/conflicts", get(handlers::conflicts::list_conflicts))
        .route(
            "/conflicts/{id}/resolve",
            post(handlers::conflicts::resolve_conflict),
        )
        .route("/metrics/sync", get(handlers::metrics::list_sync_metrics))
        .route(
            "/configurations",
            get(handlers::configurations::list_configurations)
                .put(handlers::configurations::upsert_configuration),
        )
        .route(
            "/locations",
            get(handlers::locations::list_locations).post(handlers::locations::create_location),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_context_middleware))
}

/// Serves the API until `shutdown` fires
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state
        .config
        .bind_addr()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Registers the operator bearer scheme referenced by protected paths
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::sync::initiate_sync,
        crate::handlers::batches::batch_status,
        crate::handlers::conflicts::list_conflicts,
        crate::handlers::conflicts::resolve_conflict,
        crate::handlers::metrics::list_sync_metrics,
        crate::handlers::configurations::list_configurations,
        crate::handlers::configurations::upsert_configuration,
        crate::handlers::locations::list_locations,
        crate::handlers::locations::create_location,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthStatus,
            crate::error::ApiError,
            crate::handlers::sync::InitiateSyncRequest,
            crate::handlers::sync::InitiateSyncResponse,
            crate::handlers::batches::BatchStatusResponse,
            crate::handlers::conflicts::ResolveConflictRequest,
            crate::handlers::configurations::UpsertConfigurationRequest,
            crate::handlers::locations::CreateLocationRequest,
            crate::handlers::types::JobInfo,
            crate::handlers::types::OperationInfo,
            crate::handlers::types::ConflictInfo,
            crate::handlers::types::MetricInfo,
            crate::handlers::types::ConfigurationInfo,
            crate::handlers::types::LocationInfo,
            crate::models::enums::SyncType,
            crate::models::enums::SyncDirection,
            crate::models::sync_configuration::FieldRules,
            crate::resolver::ResolutionStrategy,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "sync", description = "Sync passes and batch status"),
        (name = "conflicts", description = "Conflict review and resolution"),
        (name = "metrics", description = "Sync performance metrics"),
        (name = "configurations", description = "Per-table sync policy"),
        (name = "locations", description = "Chain locations"),
    ),
    info(
        title = "Chain Sync API",
        description = "Operator API for the chain-wide data synchronization engine",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
