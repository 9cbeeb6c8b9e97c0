//! Bearer-token authentication middleware
//!
//! Valid tokens come from a comma-separated configuration; an empty list
//! accepts any bearer token (development mode). A missing or malformed
//! `Authorization` header is a 401 before any handler runs.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, Method},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::routers::error;

#[derive(Clone)]
pub struct AuthState {
    api_keys: Arc<Vec<String>>,
}

impl AuthState {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
        }
    }

    fn accepts(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        self.api_keys.is_empty() || self.api_keys.iter().any(|key| key == token)
    }
}

pub async fn require_bearer(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = match header_value.and_then(|v| v.strip_prefix("Bearer ")) {
        Some(token) => token,
        None => {
            debug!("missing or malformed Authorization header");
            return error::unauthorized("Missing bearer token.");
        }
    };

    if !auth.accepts(token) {
        return error::unauthorized("Invalid bearer token.");
    }

    next.run(request).await
}

/// Non-GET endpoints take JSON bodies only.
pub async fn require_json_content(request: Request, next: Next) -> Response {
    if request.method() != Method::GET && request.method() != Method::DELETE {
        let is_json = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);
        if !is_json {
            return error::invalid_request_error(
                "Content-Type must be application/json.",
                None,
            );
        }
    }
    next.run(request).await
}
