//! Non-streaming and background orchestration for `/v1/responses`
//!
//! The synchronous path drives the adapter once and projects the final result
//! into output items. Background mode persists an `in_progress` row, answers
//! immediately, and finishes the same projection in a deferred task.

use serde_json::json;
use tracing::{info, warn};

use super::ResponseTurn;
use crate::{
    data_connector::{ResponseStorageError, SharedResponseStorage},
    protocols::responses::{
        generate_id, ResponseContentPart, ResponseOutputItem, ResponseStatus, ResponseUsage,
        ResponsesResponse,
    },
    providers::{AdapterError, ChatResult, ProviderAdapter, ProviderContentPart},
};

/// Project a one-shot chat result into output items plus usage.
///
/// Items follow content order, except reasoning items, which move to the head
/// of the output list.
pub fn project_chat_result(result: &ChatResult) -> (Vec<ResponseOutputItem>, ResponseUsage) {
    let mut reasoning: Vec<ResponseOutputItem> = Vec::new();
    let mut items: Vec<ResponseOutputItem> = Vec::new();

    for part in &result.content {
        match part {
            ProviderContentPart::Text { text } => {
                items.push(ResponseOutputItem::new_message(
                    generate_id("msg"),
                    vec![ResponseContentPart::OutputText {
                        text: text.clone(),
                        annotations: Vec::new(),
                    }],
                    "completed".to_string(),
                ));
            }
            ProviderContentPart::ToolUse {
                call_id,
                name,
                input,
            } => {
                items.push(ResponseOutputItem::new_function_call(
                    generate_id("fc"),
                    call_id.clone(),
                    name.clone(),
                    input.to_string(),
                    "completed".to_string(),
                ));
            }
            ProviderContentPart::Thinking { text } => {
                reasoning.push(ResponseOutputItem::new_reasoning(
                    generate_id("rs"),
                    text.clone(),
                ));
            }
            // Never produced by adapters as output
            ProviderContentPart::Image { .. } | ProviderContentPart::ToolResult { .. } => {}
        }
    }

    reasoning.extend(items);
    let usage = ResponseUsage::new(
        result.usage.input_tokens,
        result.usage.output_tokens,
        result.usage.cached_input_tokens,
    );
    (reasoning, usage)
}

/// Synchronous path: one adapter call, one JSON response, one terminal row.
pub async fn run_sync_turn(
    turn: &ResponseTurn,
    adapter: &dyn ProviderAdapter,
    storage: &SharedResponseStorage,
) -> Result<ResponsesResponse, SyncTurnError> {
    let result = adapter.chat(turn.provider_request.clone()).await?;
    let (output, usage) = project_chat_result(&result);

    let mut response = turn.base_response(ResponseStatus::Completed);
    response.output = output;
    response.usage = Some(usage);

    if turn.request.store {
        storage.upsert_response(turn.to_stored(&response)).await?;
    }
    Ok(response)
}

#[derive(thiserror::Error, Debug)]
pub enum SyncTurnError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Storage(#[from] ResponseStorageError),
}

/// Background mode: persist `in_progress`, reply immediately, finish later.
///
/// The deferred task reuses the synchronous projection and writes the
/// terminal row itself; its failures never reach the caller and are readable
/// via `GET /v1/responses/{id}`.
pub async fn start_background_turn(
    turn: ResponseTurn,
    adapter: std::sync::Arc<dyn ProviderAdapter>,
    storage: SharedResponseStorage,
) -> Result<ResponsesResponse, ResponseStorageError> {
    let initial = turn.base_response(ResponseStatus::InProgress);
    storage.upsert_response(turn.to_stored(&initial)).await?;

    let response_id = turn.response_id.clone();
    tokio::spawn(async move {
        match adapter.chat(turn.provider_request.clone()).await {
            Ok(result) => {
                let (output, usage) = project_chat_result(&result);
                let mut response = turn.base_response(ResponseStatus::Completed);
                response.output = output;
                response.usage = Some(usage);
                if let Err(err) = storage.upsert_response(turn.to_stored(&response)).await {
                    warn!(response_id = %response_id, error = %err,
                        "failed to persist background completion");
                } else {
                    info!(response_id = %response_id, "background response completed");
                }
            }
            Err(err) => {
                let mut response = turn.base_response(ResponseStatus::Failed);
                response.error = Some(json!({
                    "type": err.error_type(),
                    "message": err.to_string(),
                    "code": null,
                }));
                if let Err(err) = storage.upsert_response(turn.to_stored(&response)).await {
                    warn!(response_id = %response_id, error = %err,
                        "failed to persist background failure");
                }
            }
        }
    });

    Ok(initial)
}
