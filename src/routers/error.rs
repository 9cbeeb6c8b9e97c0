//! OpenAI-format error responses
//!
//! Every error body is `{"error": {"message", "type", "param", "code"}}`,
//! with `param` naming the offending field when applicable.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    message: &'a str,
    #[serde(rename = "type")]
    error_type: &'static str,
    param: Option<&'a str>,
    code: Option<&'a str>,
}

pub fn invalid_request_error(message: impl AsRef<str>, param: Option<&str>) -> Response {
    create_error(
        StatusCode::BAD_REQUEST,
        "invalid_request_error",
        message,
        param,
    )
}

pub fn unauthorized(message: impl AsRef<str>) -> Response {
    create_error(StatusCode::UNAUTHORIZED, "unauthorized", message, None)
}

pub fn not_found(message: impl AsRef<str>) -> Response {
    create_error(StatusCode::NOT_FOUND, "not_found", message, None)
}

pub fn conflict(message: impl AsRef<str>) -> Response {
    create_error(StatusCode::CONFLICT, "conflict", message, None)
}

pub fn rate_limit_error(message: impl AsRef<str>) -> Response {
    create_error(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limit_error",
        message,
        None,
    )
}

pub fn server_error(message: impl AsRef<str>) -> Response {
    create_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "server_error",
        message,
        None,
    )
}

pub fn not_implemented(message: impl AsRef<str>) -> Response {
    create_error(StatusCode::NOT_IMPLEMENTED, "not_implemented", message, None)
}

pub fn create_error(
    status: StatusCode,
    error_type: &'static str,
    message: impl AsRef<str>,
    param: Option<&str>,
) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                message: message.as_ref(),
                error_type,
                param,
                code: None,
            },
        }),
    )
        .into_response()
}
