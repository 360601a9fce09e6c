//! HTTP gateway for the PKE workflow engine.
//!
//! Serves `/health` and the v1 API, with CORS, request tracing and a body
//! size limit. Built on Axum.

pub mod api_v1;
pub mod error;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use pke_config::AppConfig;
use pke_store::InMemoryAnchorRepository;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use api_v1::{ApiState, SharedApiState, USER_ID_HEADER};
pub use error::ApiError;

/// Build the full router: `/health` plus the v1 API under `/v1`.
pub fn build_router(state: SharedApiState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin.as_bytes().starts_with(b"http://localhost")
                || origin.as_bytes().starts_with(b"http://127.0.0.1")
        }))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(USER_ID_HEADER)])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the gateway HTTP server and the audit retention sweeper.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let router = pke_providers::router::build_from_config(&config);
    let provider = router
        .default()
        .ok_or("No default provider configured; set an API key")?;

    let stores = pke_store::open(&config.store).await?;
    let sweeper = pke_audit::RetentionSweeper::from_config(stores.audit.clone(), &config.audit);
    let sweeper = sweeper.start();

    let body_limit = config.gateway.body_limit_bytes;
    let state = Arc::new(ApiState::new(
        config.clone(),
        stores,
        Arc::new(InMemoryAnchorRepository::new()),
        provider,
    ));
    let app = build_router(state, body_limit);

    info!(
        addr = %addr,
        provider = router.default_name(),
        model = %config.resolved_model(),
        store = %config.store.backend,
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
