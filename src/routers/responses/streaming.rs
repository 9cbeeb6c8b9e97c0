//! Streaming orchestration for `/v1/responses`
//!
//! Projects the normalized provider event stream into the Responses API event
//! sequence: one strictly ordered SSE stream per request, with stable ids,
//! monotonic sequence numbers, lazily opened message items, and status-guarded
//! partial persistence.

use std::{io, time::Duration};

use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::{
    sync::mpsc,
    time::{sleep_until, Instant},
};
use tracing::{debug, warn};

use super::ResponseTurn;
use crate::{
    data_connector::{ResponseId, SharedResponseStorage},
    protocols::{
        event_types::{
            ContentPartEvent, OutputItemEvent, OutputTextEvent, ResponseEvent, DONE_MARKER,
            ERROR_EVENT,
        },
        responses::{
            generate_id, ResponseContentPart, ResponseOutputItem, ResponseStatus, ResponseUsage,
            ResponsesResponse,
        },
    },
    providers::{AdapterError, EventStream, ProviderEvent, ProviderUsage},
};

/// Coalescing window for mid-stream output checkpoints.
const CHECKPOINT_COALESCE: Duration = Duration::from_secs(1);

// ============================================================================
// Event emitter
// ============================================================================

struct MessageState {
    item_id: String,
    output_index: usize,
    text: String,
}

struct FunctionCallState {
    item_id: String,
    call_id: String,
    name: String,
    arguments: String,
    output_index: usize,
    done: bool,
}

/// Emits Responses API events over an SSE channel.
///
/// Sends are best-effort: a disconnected client drops subsequent frames while
/// the caller keeps driving the upstream so persistence still sees the end.
pub(crate) struct ResponseEventEmitter {
    tx: mpsc::UnboundedSender<Result<Bytes, io::Error>>,
    sequence_number: u64,
    message: Option<MessageState>,
    calls: Vec<FunctionCallState>,
    thinking: String,
    next_output_index: usize,
}

impl ResponseEventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<Result<Bytes, io::Error>>) -> Self {
        Self {
            tx,
            sequence_number: 0,
            message: None,
            calls: Vec::new(),
            thinking: String::new(),
            next_output_index: 0,
        }
    }

    /// Sequence numbers start at 1 on `response.in_progress`.
    fn next_sequence(&mut self) -> u64 {
        self.sequence_number += 1;
        self.sequence_number
    }

    fn send_event(&self, event: &Value) {
        let event_type = event
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("message");
        let data = event.to_string();
        let frame = format!("event: {}\ndata: {}\n\n", event_type, data);
        if self.tx.send(Ok(Bytes::from(frame))).is_err() {
            debug!("client disconnected; dropping event {}", event_type);
        }
    }

    pub fn emit_done_marker(&self) {
        let frame = format!("data: {}\n\n", DONE_MARKER);
        let _ = self.tx.send(Ok(Bytes::from(frame)));
    }

    pub fn emit_in_progress(&mut self, response: &ResponsesResponse) {
        let event = json!({
            "type": ResponseEvent::IN_PROGRESS,
            "sequence_number": self.next_sequence(),
            "response": response,
        });
        self.send_event(&event);
    }

    pub fn emit_error(&self, error: &Value) {
        let event = json!({
            "type": ERROR_EVENT,
            "error": error,
        });
        self.send_event(&event);
    }

    pub fn emit_failed(&mut self, response: &ResponsesResponse) {
        let event = json!({
            "type": ResponseEvent::FAILED,
            "sequence_number": self.next_sequence(),
            "response": response,
        });
        self.send_event(&event);
    }

    /// Project one non-terminal provider event onto the wire.
    pub fn handle_event(&mut self, event: ProviderEvent) {
        match event {
            ProviderEvent::TextDelta { delta } => {
                self.ensure_message_open();
                let (item_id, output_index) = match self.message.as_mut() {
                    Some(message) => {
                        message.text.push_str(&delta);
                        (message.item_id.clone(), message.output_index)
                    }
                    None => return,
                };
                let event = json!({
                    "type": OutputTextEvent::DELTA,
                    "sequence_number": self.next_sequence(),
                    "item_id": item_id,
                    "output_index": output_index,
                    "content_index": 0,
                    "delta": delta,
                });
                self.send_event(&event);
            }
            ProviderEvent::ToolCallStart { call_id, name, .. } => {
                let output_index = self.next_output_index;
                self.next_output_index += 1;
                let item_id = generate_id("fc");
                let item = json!({
                    "id": item_id,
                    "type": "function_call",
                    "status": "in_progress",
                    "call_id": call_id,
                    "name": name,
                    "arguments": "",
                });
                let event = json!({
                    "type": OutputItemEvent::ADDED,
                    "sequence_number": self.next_sequence(),
                    "output_index": output_index,
                    "item": item,
                });
                self.send_event(&event);
                self.calls.push(FunctionCallState {
                    item_id,
                    call_id,
                    name,
                    arguments: String::new(),
                    output_index,
                    done: false,
                });
            }
            // Arguments are only published whole on done
            ProviderEvent::ToolCallDelta {
                call_id,
                arguments_delta,
            } => {
                if let Some(call) = self.calls.iter_mut().find(|c| c.call_id == call_id) {
                    call.arguments.push_str(&arguments_delta);
                }
            }
            ProviderEvent::ToolCallDone {
                call_id, arguments, ..
            } => {
                let Some(call) = self.calls.iter_mut().find(|c| c.call_id == call_id) else {
                    warn!(call_id = %call_id, "tool_call_done for unknown call");
                    return;
                };
                call.arguments = arguments;
                call.done = true;
                let item = json!({
                    "id": call.item_id,
                    "type": "function_call",
                    "status": "completed",
                    "call_id": call.call_id,
                    "name": call.name,
                    "arguments": call.arguments,
                });
                let output_index = call.output_index;
                let event = json!({
                    "type": OutputItemEvent::DONE,
                    "sequence_number": self.next_sequence(),
                    "output_index": output_index,
                    "item": item,
                });
                self.send_event(&event);
            }
            // Thinking accumulates silently; it surfaces as a reasoning item
            // at the head of the final output array
            ProviderEvent::ThinkingDelta { delta } => {
                self.thinking.push_str(&delta);
            }
            ProviderEvent::ThinkingDone { text } => {
                self.thinking = text;
            }
            ProviderEvent::MessageDone { .. } => {
                debug!("terminal event reached projection; handled by the driver");
            }
        }
    }

    /// Open the message item on the first text delta only.
    fn ensure_message_open(&mut self) {
        if self.message.is_some() {
            return;
        }
        let output_index = self.next_output_index;
        self.next_output_index += 1;
        let item_id = generate_id("msg");

        let item = json!({
            "id": item_id,
            "type": "message",
            "status": "in_progress",
            "role": "assistant",
            "content": [],
        });
        let added = json!({
            "type": OutputItemEvent::ADDED,
            "sequence_number": self.next_sequence(),
            "output_index": output_index,
            "item": item,
        });
        self.send_event(&added);

        let part_added = json!({
            "type": ContentPartEvent::ADDED,
            "sequence_number": self.next_sequence(),
            "item_id": item_id,
            "output_index": output_index,
            "content_index": 0,
            "part": {"type": "output_text", "text": "", "annotations": []},
        });
        self.send_event(&part_added);

        self.message = Some(MessageState {
            item_id,
            output_index,
            text: String::new(),
        });
    }

    /// Close the message item, if one was opened. An opened item closes even
    /// when no text accumulated: `output_text.done` then carries `""`.
    fn close_message(&mut self) {
        let Some(message) = self.message.as_ref() else {
            return;
        };
        let (item_id, output_index, text) = (
            message.item_id.clone(),
            message.output_index,
            message.text.clone(),
        );

        let text_done = json!({
            "type": OutputTextEvent::DONE,
            "sequence_number": self.next_sequence(),
            "item_id": item_id,
            "output_index": output_index,
            "content_index": 0,
            "text": text,
        });
        self.send_event(&text_done);

        let part_done = json!({
            "type": ContentPartEvent::DONE,
            "sequence_number": self.next_sequence(),
            "item_id": item_id,
            "output_index": output_index,
            "content_index": 0,
            "part": {"type": "output_text", "text": text, "annotations": []},
        });
        self.send_event(&part_done);

        let item = json!({
            "id": item_id,
            "type": "message",
            "status": "completed",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text, "annotations": []}],
        });
        let item_done = json!({
            "type": OutputItemEvent::DONE,
            "sequence_number": self.next_sequence(),
            "output_index": output_index,
            "item": item,
        });
        self.send_event(&item_done);
    }

    /// Current output items in first-appearance order. `terminal` marks the
    /// interrupted shape (message `incomplete`) versus a live checkpoint
    /// (message `in_progress`).
    pub fn snapshot_output(&self, terminal: bool) -> Vec<ResponseOutputItem> {
        let mut items: Vec<(usize, ResponseOutputItem)> = Vec::new();

        if let Some(message) = &self.message {
            let status = if terminal { "incomplete" } else { "in_progress" };
            items.push((
                message.output_index,
                ResponseOutputItem::new_message(
                    message.item_id.clone(),
                    vec![ResponseContentPart::OutputText {
                        text: message.text.clone(),
                        annotations: Vec::new(),
                    }],
                    status.to_string(),
                ),
            ));
        }
        for call in &self.calls {
            let status = if call.done { "completed" } else { "in_progress" };
            items.push((
                call.output_index,
                ResponseOutputItem::new_function_call(
                    call.item_id.clone(),
                    call.call_id.clone(),
                    call.name.clone(),
                    call.arguments.clone(),
                    status.to_string(),
                ),
            ));
        }
        items.sort_by_key(|(index, _)| *index);
        items.into_iter().map(|(_, item)| item).collect()
    }

    /// Close open items, assemble the final output array (accumulated
    /// thinking heads it as a reasoning item), and emit `response.completed`.
    pub fn finish_completed(
        &mut self,
        turn: &ResponseTurn,
        usage: ProviderUsage,
    ) -> ResponsesResponse {
        self.close_message();

        let mut output: Vec<ResponseOutputItem> = Vec::new();
        if !self.thinking.is_empty() {
            output.push(ResponseOutputItem::new_reasoning(
                generate_id("rs"),
                std::mem::take(&mut self.thinking),
            ));
        }
        if let Some(message) = &self.message {
            output.push(ResponseOutputItem::new_message(
                message.item_id.clone(),
                vec![ResponseContentPart::OutputText {
                    text: message.text.clone(),
                    annotations: Vec::new(),
                }],
                "completed".to_string(),
            ));
        }
        let mut calls: Vec<&FunctionCallState> = self.calls.iter().collect();
        calls.sort_by_key(|call| call.output_index);
        for call in calls {
            let status = if call.done { "completed" } else { "in_progress" };
            output.push(ResponseOutputItem::new_function_call(
                call.item_id.clone(),
                call.call_id.clone(),
                call.name.clone(),
                call.arguments.clone(),
                status.to_string(),
            ));
        }

        let mut response = turn.base_response(ResponseStatus::Completed);
        response.output = output;
        response.usage = Some(ResponseUsage::new(
            usage.input_tokens,
            usage.output_tokens,
            usage.cached_input_tokens,
        ));

        let event = json!({
            "type": ResponseEvent::COMPLETED,
            "sequence_number": self.next_sequence(),
            "response": response,
        });
        self.send_event(&event);
        response
    }
}

// ============================================================================
// Stream driver
// ============================================================================

/// Drive the provider stream to completion, projecting events onto `tx`.
///
/// Runs as its own task per request; the caller has already written the
/// initial `in_progress` row when persistence is on. Terminal paths drop the
/// checkpoint deadline before writing, and the storage-side status guard
/// makes any still-racing partial write a no-op.
pub async fn run_streaming_turn(
    turn: ResponseTurn,
    mut events: EventStream,
    storage: SharedResponseStorage,
    tx: mpsc::UnboundedSender<Result<Bytes, io::Error>>,
) {
    let store = turn.request.store;
    let response_id = ResponseId::from(turn.response_id.as_str());

    let mut emitter = ResponseEventEmitter::new(tx);
    emitter.emit_in_progress(&turn.base_response(ResponseStatus::InProgress));

    let mut checkpoint_at: Option<Instant> = None;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(ProviderEvent::MessageDone { usage, .. })) => {
                    checkpoint_at = None;
                    let response = emitter.finish_completed(&turn, usage);
                    if store {
                        let stored = turn.to_stored(&response);
                        if let Err(err) = storage.upsert_response(stored).await {
                            warn!(response_id = %turn.response_id, error = %err,
                                "failed to persist completed response");
                        }
                    }
                    emitter.emit_done_marker();
                    return;
                }
                Some(Ok(event)) => {
                    let arm_checkpoint =
                        store && matches!(event, ProviderEvent::TextDelta { .. });
                    emitter.handle_event(event);
                    if arm_checkpoint && checkpoint_at.is_none() {
                        checkpoint_at = Some(Instant::now() + CHECKPOINT_COALESCE);
                    }
                }
                Some(Err(AdapterError::Aborted)) | None => {
                    checkpoint_at = None;
                    if store {
                        let mut response = turn.base_response(ResponseStatus::Incomplete);
                        response.output = emitter.snapshot_output(true);
                        response.incomplete_details = Some(json!({"reason": "interrupted"}));
                        if let Err(err) = storage.upsert_response(turn.to_stored(&response)).await {
                            warn!(response_id = %turn.response_id, error = %err,
                                "failed to persist interrupted response");
                        }
                    }
                    emitter.emit_done_marker();
                    return;
                }
                Some(Err(err)) => {
                    checkpoint_at = None;
                    let error_body = json!({
                        "type": err.error_type(),
                        "message": err.to_string(),
                        "code": null,
                    });
                    emitter.emit_error(&error_body);
                    let mut response = turn.base_response(ResponseStatus::Failed);
                    response.error = Some(error_body);
                    emitter.emit_failed(&response);
                    if store {
                        if let Err(err) = storage.upsert_response(turn.to_stored(&response)).await {
                            warn!(response_id = %turn.response_id, error = %err,
                                "failed to persist failed response");
                        }
                    }
                    emitter.emit_done_marker();
                    return;
                }
            },
            _ = sleep_until(checkpoint_at.unwrap_or_else(Instant::now)), if checkpoint_at.is_some() => {
                checkpoint_at = None;
                let output = emitter.snapshot_output(false);
                match storage.update_in_progress_output(&response_id, &output).await {
                    Ok(true) => {}
                    Ok(false) => debug!(response_id = %turn.response_id,
                        "checkpoint skipped; row no longer in progress"),
                    Err(err) => warn!(response_id = %turn.response_id, error = %err,
                        "checkpoint write failed"),
                }
            }
        }
    }
}
