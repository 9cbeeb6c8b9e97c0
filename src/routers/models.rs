//! `/v1/models` endpoints
//!
//! Listing and retrieval straight off the model registry; these routes are
//! public (no bearer token required).

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};

use crate::{app_context::AppContext, routers::error};

pub async fn list_models(State(ctx): State<Arc<AppContext>>) -> Response {
    Json(ctx.registry.list()).into_response()
}

pub async fn get_model(
    State(ctx): State<Arc<AppContext>>,
    Path(model_id): Path<String>,
) -> Response {
    match ctx.registry.get(&model_id) {
        Some(summary) => Json(summary).into_response(),
        None => error::not_found(format!("Model '{}' not found.", model_id)),
    }
}
