//! HTTP server assembly and startup.

use std::sync::Arc;

use axum::{
    middleware,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::{
    app_context::AppContext,
    auth::{self, AuthState},
    config::GatewayConfig,
    data_connector::{
        MemoryResponseStorage, NoopResponseStorage, PostgresResponseStorage,
        SharedResponseStorage,
    },
    providers::ModelRegistry,
    routers::{models, responses},
};

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn liveness() -> Json<serde_json::Value> {
    Json(json!({"status": "alive"}))
}

async fn readiness() -> Json<serde_json::Value> {
    Json(json!({"status": "ready"}))
}

pub fn build_app(ctx: Arc<AppContext>) -> Router {
    let auth_state = AuthState::new(ctx.config.api_keys.clone());

    let protected_routes = Router::new()
        .route("/v1/responses", post(responses::create_response))
        .route("/v1/responses/compact", post(responses::compact_response))
        .route("/v1/responses/{response_id}", get(responses::get_response))
        .route(
            "/v1/responses/{response_id}",
            delete(responses::delete_response),
        )
        .route(
            "/v1/responses/{response_id}/cancel",
            post(responses::cancel_response),
        )
        .layer(middleware::from_fn(auth::require_json_content))
        .layer(middleware::from_fn_with_state(
            auth_state,
            auth::require_bearer,
        ));

    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/liveness", get(liveness))
        .route("/readiness", get(readiness))
        .route("/v1/models", get(models::list_models))
        .route("/v1/models/{model_id}", get(models::get_model));

    let max_payload_size = ctx.config.max_payload_size;

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .layer(axum::extract::DefaultBodyLimit::max(max_payload_size))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Pick the storage backend: Postgres when `DATABASE_URL` points at one, the
/// in-memory table for `DATABASE_URL=memory`, and the erroring no-op backend
/// otherwise, so missing persistence only surfaces on first use.
pub async fn build_storage(
    config: &GatewayConfig,
) -> Result<SharedResponseStorage, Box<dyn std::error::Error>> {
    if let Some(postgres) = config.postgres() {
        let storage = PostgresResponseStorage::connect(&postgres).await?;
        info!("response storage: postgres");
        return Ok(Arc::new(storage));
    }
    if config.database_url.as_deref() == Some("memory") {
        info!("response storage: in-memory");
        return Ok(Arc::new(MemoryResponseStorage::new()));
    }
    info!("response storage: not configured");
    Ok(Arc::new(NoopResponseStorage::new()))
}

pub async fn startup(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    let client = reqwest::Client::new();
    let registry = ModelRegistry::from_config(&config, &client);
    let response_storage = build_storage(&config).await?;

    let bind_addr = format!("{}:{}", config.host, config.port);
    let ctx = Arc::new(AppContext::new(
        config,
        client,
        registry,
        response_storage,
    ));
    let app = build_app(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("listening on {}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
