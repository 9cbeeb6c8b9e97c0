//! Shared test fixtures: a scripted provider adapter and SSE frame helpers.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use response_gateway::{
    data_connector::SharedResponseStorage,
    protocols::responses::ResponsesRequest,
    providers::{
        AdapterError, ChatResult, EventStream, ProviderAdapter, ProviderEvent, ProviderUsage,
        StopReason,
    },
    routers::responses::{conversation::assemble_conversation, ResponseTurn},
};
use serde_json::Value;
use tokio::sync::mpsc;

/// Adapter that replays a canned script instead of calling upstream.
pub struct ScriptedAdapter {
    stream_script: Mutex<Option<Vec<Result<ProviderEvent, AdapterError>>>>,
    chat_result: Mutex<Option<ChatResult>>,
    chat_error: Mutex<Option<AdapterError>>,
}

impl ScriptedAdapter {
    pub fn streaming(script: Vec<Result<ProviderEvent, AdapterError>>) -> Arc<Self> {
        Arc::new(Self {
            stream_script: Mutex::new(Some(script)),
            chat_result: Mutex::new(None),
            chat_error: Mutex::new(None),
        })
    }

    pub fn one_shot(result: ChatResult) -> Arc<Self> {
        Arc::new(Self {
            stream_script: Mutex::new(None),
            chat_result: Mutex::new(Some(result)),
            chat_error: Mutex::new(None),
        })
    }

    /// One-shot calls fail with the given error.
    pub fn failing_chat(error: AdapterError) -> Arc<Self> {
        Arc::new(Self {
            stream_script: Mutex::new(None),
            chat_result: Mutex::new(None),
            chat_error: Mutex::new(Some(error)),
        })
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn chat(&self, _request: response_gateway::providers::ProviderRequest) -> Result<ChatResult, AdapterError> {
        if let Some(error) = self.chat_error.lock().expect("chat_error lock").take() {
            return Err(error);
        }
        self.chat_result
            .lock()
            .expect("chat_result lock")
            .take()
            .ok_or_else(|| AdapterError::Upstream("no scripted chat result".to_string()))
    }

    async fn chat_stream(
        &self,
        _request: response_gateway::providers::ProviderRequest,
    ) -> Result<EventStream, AdapterError> {
        let script = self
            .stream_script
            .lock()
            .expect("stream_script lock")
            .take()
            .ok_or_else(|| AdapterError::Upstream("no scripted stream".to_string()))?;
        Ok(Box::pin(futures_util::stream::iter(script)))
    }
}

pub fn text_request(model: &str, input: &str) -> ResponsesRequest {
    serde_json::from_value(serde_json::json!({
        "model": model,
        "input": input,
    }))
    .expect("valid request")
}

pub fn usage(input: u32, output: u32) -> ProviderUsage {
    ProviderUsage {
        input_tokens: input,
        output_tokens: output,
        cached_input_tokens: None,
    }
}

pub fn done(stop_reason: StopReason, input: u32, output: u32) -> ProviderEvent {
    ProviderEvent::MessageDone {
        stop_reason,
        usage: usage(input, output),
    }
}

/// Assemble a turn the way the create handler does.
pub async fn make_turn(
    request: ResponsesRequest,
    storage: &SharedResponseStorage,
) -> ResponseTurn {
    let assembled = assemble_conversation(&request, storage)
        .await
        .expect("assembly succeeds");
    ResponseTurn::new(request, assembled, "upstream-model")
}

/// One parsed SSE frame: the `event:` name (absent for `[DONE]`) and payload.
#[derive(Debug)]
pub struct Frame {
    pub event: Option<String>,
    pub data: String,
}

impl Frame {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.data).expect("frame payload is JSON")
    }

    pub fn is_done_marker(&self) -> bool {
        self.event.is_none() && self.data == "[DONE]"
    }
}

/// Drain every frame the driver wrote.
pub async fn collect_frames(
    mut rx: mpsc::UnboundedReceiver<Result<bytes::Bytes, std::io::Error>>,
) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(chunk) = rx.recv().await {
        let chunk = chunk.expect("stream chunks are Ok");
        let text = String::from_utf8(chunk.to_vec()).expect("frames are UTF-8");
        for block in text.split("\n\n").filter(|b| !b.trim().is_empty()) {
            let mut event = None;
            let mut data = String::new();
            for line in block.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event = Some(rest.trim().to_string());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data = rest.trim_start().to_string();
                }
            }
            frames.push(Frame { event, data });
        }
    }
    frames
}

/// Event-type sequence of the typed frames (the `[DONE]` marker reads as
/// `"[DONE]"` for easy whole-stream assertions).
pub fn event_types(frames: &[Frame]) -> Vec<String> {
    frames
        .iter()
        .map(|frame| {
            if frame.is_done_marker() {
                "[DONE]".to_string()
            } else {
                frame
                    .json()
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?")
                    .to_string()
            }
        })
        .collect()
}

pub fn items_request(model: &str, items: Value) -> ResponsesRequest {
    serde_json::from_value(serde_json::json!({
        "model": model,
        "input": items,
    }))
    .expect("valid request")
}
