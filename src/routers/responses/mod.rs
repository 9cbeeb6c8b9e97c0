//! `/v1/responses` HTTP surface
//!
//! Request validation, model resolution, and dispatch into the streaming,
//! synchronous, and background orchestration paths, plus the stored-response
//! CRUD endpoints.

use std::{io, sync::Arc};

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    app_context::AppContext,
    data_connector::{
        CancelOutcome, ResponseId, ResponseStorageError, SharedResponseStorage, StoredResponse,
    },
    protocols::responses::{
        generate_id, ResponseInputOutputItem, ResponseStatus, ResponsesRequest, ResponsesResponse,
        ToolChoice, ToolChoiceMode,
    },
    providers::{AdapterError, ProviderRequest},
    routers::error,
};

pub mod conversation;
pub mod non_streaming;
pub mod streaming;

use conversation::{assemble_conversation, build_provider_request, ConversationError};
use non_streaming::{run_sync_turn, start_background_turn, SyncTurnError};
use streaming::run_streaming_turn;

// ============================================================================
// Turn context
// ============================================================================

/// Everything one request needs to run: ids, the validated request, the
/// normalized input items destined for persistence, and the provider request.
pub struct ResponseTurn {
    pub response_id: String,
    pub created_at: DateTime<Utc>,
    pub request: ResponsesRequest,
    pub input_items: Vec<ResponseInputOutputItem>,
    pub provider_request: ProviderRequest,
}

impl ResponseTurn {
    pub fn new(
        request: ResponsesRequest,
        assembled: conversation::AssembledConversation,
        upstream_model: &str,
    ) -> Self {
        let provider_request = build_provider_request(&request, upstream_model, &assembled);
        Self {
            response_id: generate_id("resp"),
            created_at: Utc::now(),
            request,
            input_items: assembled.items,
            provider_request,
        }
    }

    /// The response object with request fields echoed and no output yet.
    pub fn base_response(&self, status: ResponseStatus) -> ResponsesResponse {
        ResponsesResponse {
            id: self.response_id.clone(),
            object: "response".to_string(),
            created_at: self.created_at.timestamp(),
            status,
            background: self.request.background,
            error: None,
            incomplete_details: None,
            instructions: self.request.instructions.clone(),
            max_output_tokens: self.request.max_output_tokens,
            model: self.request.model.clone(),
            output: Vec::new(),
            parallel_tool_calls: self.request.parallel_tool_calls.unwrap_or(true),
            previous_response_id: self.request.previous_response_id.clone(),
            reasoning: self.request.reasoning.clone(),
            store: self.request.store,
            temperature: self.request.temperature,
            text: self.request.text.clone(),
            tool_choice: self
                .request
                .tool_choice
                .clone()
                .unwrap_or(ToolChoice::Mode(ToolChoiceMode::Auto)),
            tools: self.request.tools.clone().unwrap_or_default(),
            top_p: self.request.top_p,
            truncation: self.request.truncation,
            usage: None,
            metadata: self.request.metadata.clone(),
        }
    }

    /// Row shape for a given response object.
    pub fn to_stored(&self, response: &ResponsesResponse) -> StoredResponse {
        StoredResponse {
            id: ResponseId(response.id.clone()),
            model: self.request.model.clone(),
            status: response.status,
            background: self.request.background,
            store: self.request.store,
            instructions: self.request.instructions.clone(),
            previous_response_id: self
                .request
                .previous_response_id
                .as_deref()
                .map(ResponseId::from),
            temperature: self.request.temperature,
            top_p: self.request.top_p,
            max_output_tokens: self.request.max_output_tokens,
            tool_choice: self.request.tool_choice.clone(),
            tools: self.request.tools.clone().unwrap_or_default(),
            parallel_tool_calls: self.request.parallel_tool_calls,
            truncation: self.request.truncation,
            text: self.request.text.clone(),
            reasoning: self.request.reasoning.clone(),
            metadata: self.request.metadata.clone(),
            input: self.input_items.clone(),
            output: response.output.clone(),
            usage: response.usage.clone(),
            error: response.error.clone(),
            incomplete_details: response.incomplete_details.clone(),
            created_at: self.created_at,
            completed_at: (response.status == ResponseStatus::Completed).then(Utc::now),
            cancelled_at: None,
        }
    }
}

// ============================================================================
// POST /v1/responses
// ============================================================================

pub async fn create_response(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<ResponsesRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error::invalid_request_error(rejection.body_text(), None),
    };
    handle_create(ctx, request).await
}

/// `POST /v1/responses/compact`: identical semantics, but continuation only.
pub async fn compact_response(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<ResponsesRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error::invalid_request_error(rejection.body_text(), None),
    };
    if request.previous_response_id.is_none() {
        return error::invalid_request_error(
            "'previous_response_id' is required for compaction.",
            Some("previous_response_id"),
        );
    }
    handle_create(ctx, request).await
}

async fn handle_create(ctx: Arc<AppContext>, request: ResponsesRequest) -> Response {
    if let Err(errors) = request.validate() {
        return validation_error_response(&errors);
    }

    if let Some(tool_type) = request.unsupported_tool() {
        return error::not_implemented(format!(
            "Tool type '{}' is not implemented.",
            tool_type.as_str()
        ));
    }

    let resolved = match ctx.registry.resolve(&request.model) {
        Ok(resolved) => resolved,
        Err(err) => return error::invalid_request_error(err.to_string(), Some("model")),
    };

    let assembled = match assemble_conversation(&request, &ctx.response_storage).await {
        Ok(assembled) => assembled,
        Err(err) => return conversation_error_response(err),
    };

    let turn = ResponseTurn::new(request, assembled, &resolved.upstream_model);
    info!(
        response_id = %turn.response_id,
        model = %turn.request.model,
        stream = turn.request.stream,
        background = turn.request.background,
        "dispatching response"
    );

    if turn.request.background {
        return match start_background_turn(
            turn,
            resolved.adapter.clone(),
            ctx.response_storage.clone(),
        )
        .await
        {
            Ok(response) => Json(response).into_response(),
            Err(err) => storage_error_response(err),
        };
    }

    if turn.request.stream {
        return handle_streaming_create(ctx, turn, resolved.adapter).await;
    }

    match run_sync_turn(&turn, resolved.adapter.as_ref(), &ctx.response_storage).await {
        Ok(response) => Json(response).into_response(),
        Err(SyncTurnError::Adapter(err)) => adapter_error_response(err),
        Err(SyncTurnError::Storage(err)) => storage_error_response(err),
    }
}

async fn handle_streaming_create(
    ctx: Arc<AppContext>,
    turn: ResponseTurn,
    adapter: Arc<dyn crate::providers::ProviderAdapter>,
) -> Response {
    // Errors before the first byte stay plain HTTP errors
    let events = match adapter.chat_stream(turn.provider_request.clone()).await {
        Ok(events) => events,
        Err(err) => return adapter_error_response(err),
    };

    // The in_progress row lands before the first event is written
    if turn.request.store {
        let initial = turn.base_response(ResponseStatus::InProgress);
        if let Err(err) = ctx.response_storage.upsert_response(turn.to_stored(&initial)).await {
            return storage_error_response(err);
        }
    }

    let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, io::Error>>();
    tokio::spawn(run_streaming_turn(
        turn,
        events,
        ctx.response_storage.clone(),
        tx,
    ));

    sse_response(rx)
}

fn sse_response(rx: mpsc::UnboundedReceiver<Result<Bytes, io::Error>>) -> Response {
    let stream = UnboundedReceiverStream::new(rx);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    response
}

// ============================================================================
// GET / DELETE / cancel
// ============================================================================

pub async fn get_response(
    State(ctx): State<Arc<AppContext>>,
    Path(response_id): Path<String>,
) -> Response {
    match load_response(&ctx.response_storage, &response_id).await {
        Ok(row) => Json(row.to_response()).into_response(),
        Err(response) => response,
    }
}

pub async fn delete_response(
    State(ctx): State<Arc<AppContext>>,
    Path(response_id): Path<String>,
) -> Response {
    match ctx
        .response_storage
        .delete_response(&ResponseId::from(response_id.as_str()))
        .await
    {
        Ok(true) => Json(json!({
            "id": response_id,
            "object": "response",
            "deleted": true,
        }))
        .into_response(),
        Ok(false) => not_found_response(&response_id),
        Err(err) => storage_error_response(err),
    }
}

pub async fn cancel_response(
    State(ctx): State<Arc<AppContext>>,
    Path(response_id): Path<String>,
) -> Response {
    match ctx
        .response_storage
        .cancel_response(&ResponseId::from(response_id.as_str()))
        .await
    {
        Ok(CancelOutcome::Cancelled(row)) => {
            info!(response_id = %response_id, "response cancelled");
            Json(row.to_response()).into_response()
        }
        Ok(CancelOutcome::NotCancellable(status)) => error::conflict(format!(
            "Response '{}' cannot be cancelled from status '{}'.",
            response_id,
            status.as_str()
        )),
        Ok(CancelOutcome::NotFound) => not_found_response(&response_id),
        Err(err) => storage_error_response(err),
    }
}

async fn load_response(
    storage: &SharedResponseStorage,
    response_id: &str,
) -> Result<StoredResponse, Response> {
    match storage.get_response(&ResponseId::from(response_id)).await {
        Ok(Some(row)) => Ok(row),
        Ok(None) => Err(not_found_response(response_id)),
        Err(err) => Err(storage_error_response(err)),
    }
}

fn not_found_response(response_id: &str) -> Response {
    error::not_found(format!("Response '{}' not found.", response_id))
}

// ============================================================================
// Error mapping
// ============================================================================

fn validation_error_response(errors: &validator::ValidationErrors) -> Response {
    for (field, field_errors) in errors.field_errors() {
        if let Some(first) = field_errors.first() {
            let message = first
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("Invalid value for '{}'.", field));
            let param = (field != "__all__").then_some(field.as_ref());
            return error::invalid_request_error(message, param);
        }
    }
    error::invalid_request_error(errors.to_string(), None)
}

fn conversation_error_response(err: ConversationError) -> Response {
    match err {
        ConversationError::PreviousNotFound(_) => error::not_found(err.to_string()),
        ConversationError::PreviousNotStored(_) => {
            error::invalid_request_error(err.to_string(), Some("previous_response_id"))
        }
        ConversationError::Storage(err) => storage_error_response(err),
    }
}

fn adapter_error_response(err: AdapterError) -> Response {
    match err {
        AdapterError::RateLimited(message) => error::rate_limit_error(message),
        other => error::server_error(other.to_string()),
    }
}

fn storage_error_response(err: ResponseStorageError) -> Response {
    warn!(error = %err, "storage operation failed");
    error::server_error(err.to_string())
}
