//! OpenAI-compatible Chat Completions adapter
//!
//! Drives any backend speaking the chat-completions protocol and projects its
//! chunk deltas into normalized [`ProviderEvent`]s. Tool-call fragments are
//! correlated by chunk index; the final `MessageDone` is held until the
//! upstream terminates so the trailing usage chunk can be folded in.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::{
    AdapterError, ChatResult, EventStream, ProviderAdapter, ProviderContentPart, ProviderEvent,
    ProviderImageSource, ProviderMessage, ProviderRequest, ProviderRole, ProviderToolChoice,
    ProviderUsage, StopReason,
};
use crate::protocols::{
    chat::{
        ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatContent,
        ChatContentPart, ChatFunctionDef, ChatMessage, ChatTool, ChatUsage, ImageUrl,
        JsonSchemaFormat, ResponseFormat, StreamOptions,
    },
    responses::TextFormat,
};

pub struct OpenAiCompatibleAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatibleAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, request: &ProviderRequest, stream: bool) -> ChatCompletionRequest {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(ChatMessage::text("system", system.clone()));
        }
        for message in &request.messages {
            append_chat_messages(&mut messages, message);
        }

        let tools: Vec<ChatTool> = request
            .tools
            .iter()
            .map(|t| ChatTool {
                r#type: "function".to_string(),
                function: ChatFunctionDef {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect();

        let tool_choice = request.tool_choice.as_ref().map(|choice| match choice {
            ProviderToolChoice::Auto => json!("auto"),
            ProviderToolChoice::Required => json!("required"),
            ProviderToolChoice::None => json!("none"),
            ProviderToolChoice::Function(name) => {
                json!({"type": "function", "function": {"name": name}})
            }
        });

        let response_format = request.text_format.as_ref().map(|format| match format {
            TextFormat::Text => ResponseFormat::Text,
            TextFormat::JsonObject => ResponseFormat::JsonObject,
            TextFormat::JsonSchema {
                name,
                schema,
                strict,
                ..
            } => ResponseFormat::JsonSchema {
                json_schema: JsonSchemaFormat {
                    name: name.clone(),
                    schema: schema.clone(),
                    strict: *strict,
                },
            },
        });

        ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_output_tokens,
            stream: stream.then_some(true),
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice,
            response_format,
        }
    }

    async fn send(
        &self,
        payload: &ChatCompletionRequest,
        streaming: bool,
    ) -> Result<reqwest::Response, AdapterError> {
        let mut builder = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(payload);
        if streaming {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AdapterError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .unwrap_or(body);
            return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                AdapterError::RateLimited(message)
            } else {
                AdapterError::Upstream(format!("upstream returned {}: {}", status, message))
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    async fn chat(&self, request: ProviderRequest) -> Result<ChatResult, AdapterError> {
        let payload = self.build_request(&request, false);
        let response = self.send(&payload, false).await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::InvalidResponse("no choices in completion".to_string()))?;

        let mut content = Vec::new();
        if let Some(reasoning) = choice.message.reasoning_content {
            if !reasoning.is_empty() {
                content.push(ProviderContentPart::Thinking { text: reasoning });
            }
        }
        if let Some(text) = choice.message.content {
            if !text.is_empty() {
                content.push(ProviderContentPart::Text { text });
            }
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            let input = serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments.clone()));
            content.push(ProviderContentPart::ToolUse {
                call_id: call.id,
                name: call.function.name,
                input,
            });
        }

        Ok(ChatResult {
            content,
            stop_reason: map_finish_reason(choice.finish_reason.as_deref()),
            usage: map_usage(completion.usage),
        })
    }

    async fn chat_stream(&self, request: ProviderRequest) -> Result<EventStream, AdapterError> {
        let payload = self.build_request(&request, true);
        let response = self.send(&payload, true).await?;

        let (tx, rx) = mpsc::unbounded_channel::<Result<ProviderEvent, AdapterError>>();

        tokio::spawn(async move {
            let mut upstream = response.bytes_stream();
            let mut state = ChunkState::new();

            while let Some(chunk_result) = upstream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx.send(Err(AdapterError::from_transport(err)));
                        return;
                    }
                };
                for event in state.feed(&chunk) {
                    if tx.send(Ok(event)).is_err() {
                        return;
                    }
                }
                if state.finished {
                    return;
                }
            }

            // Upstream closed without the [DONE] terminator
            let _ = tx.send(Err(AdapterError::Aborted));
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

// ============================================================================
// Chunk accumulation
// ============================================================================

struct PendingCall {
    call_id: String,
    arguments: String,
    output_index: usize,
}

struct ChunkState {
    calls: BTreeMap<u32, PendingCall>,
    next_ordinal: usize,
    thinking: String,
    finish_reason: Option<String>,
    usage: ProviderUsage,
    finished: bool,
    // Undecoded tail of the wire stream plus the frame under assembly
    pending: String,
    data_lines: Vec<String>,
}

impl ChunkState {
    fn new() -> Self {
        Self {
            calls: BTreeMap::new(),
            next_ordinal: 0,
            thinking: String::new(),
            finish_reason: None,
            usage: ProviderUsage::default(),
            finished: false,
            pending: String::new(),
            data_lines: Vec::new(),
        }
    }

    /// Decode raw SSE bytes into completion chunks and project them.
    ///
    /// Lines are consumed as they complete; `data:` lines accumulate until
    /// the blank terminator closes the frame. The `[DONE]` sentinel flushes
    /// pending calls and marks the stream finished.
    fn feed(&mut self, chunk: &[u8]) -> Vec<ProviderEvent> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        let mut out = Vec::new();
        while let Some(end) = self.pending.find('\n') {
            if self.finished {
                break;
            }
            let raw: String = self.pending.drain(..=end).collect();
            let line = raw.trim_end_matches(['\r', '\n']);

            if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines.push(rest.trim_start().to_string());
                continue;
            }
            if !line.is_empty() || self.data_lines.is_empty() {
                continue;
            }

            let data = self.data_lines.join("\n");
            self.data_lines.clear();
            if data == "[DONE]" {
                self.finished = true;
                out.extend(self.finish());
                break;
            }
            match serde_json::from_str::<ChatCompletionChunk>(&data) {
                Ok(parsed) => out.extend(self.ingest(parsed)),
                Err(err) => debug!(error = %err, "skipping unparseable completion chunk"),
            }
        }
        out
    }

    fn ingest(&mut self, chunk: ChatCompletionChunk) -> Vec<ProviderEvent> {
        let mut events = Vec::new();

        if let Some(usage) = chunk.usage {
            self.usage = map_usage(Some(usage));
        }

        for choice in chunk.choices {
            if let Some(reasoning) = choice.delta.reasoning_content {
                if !reasoning.is_empty() {
                    self.thinking.push_str(&reasoning);
                    events.push(ProviderEvent::ThinkingDelta { delta: reasoning });
                }
            }
            if let Some(text) = choice.delta.content {
                if !text.is_empty() {
                    events.push(ProviderEvent::TextDelta { delta: text });
                }
            }
            for fragment in choice.delta.tool_calls.unwrap_or_default() {
                let entry = self.calls.entry(fragment.index);
                match entry {
                    std::collections::btree_map::Entry::Vacant(vacant) => {
                        let call_id = fragment
                            .id
                            .unwrap_or_else(|| format!("call_{}", fragment.index));
                        let name = fragment
                            .function
                            .as_ref()
                            .and_then(|f| f.name.clone())
                            .unwrap_or_default();
                        let output_index = self.next_ordinal;
                        self.next_ordinal += 1;
                        let arguments = fragment
                            .function
                            .and_then(|f| f.arguments)
                            .unwrap_or_default();
                        events.push(ProviderEvent::ToolCallStart {
                            call_id: call_id.clone(),
                            name,
                            output_index,
                        });
                        if !arguments.is_empty() {
                            events.push(ProviderEvent::ToolCallDelta {
                                call_id: call_id.clone(),
                                arguments_delta: arguments.clone(),
                            });
                        }
                        vacant.insert(PendingCall {
                            call_id,
                            arguments,
                            output_index,
                        });
                    }
                    std::collections::btree_map::Entry::Occupied(mut occupied) => {
                        if let Some(arguments) =
                            fragment.function.and_then(|f| f.arguments)
                        {
                            if !arguments.is_empty() {
                                let call = occupied.get_mut();
                                call.arguments.push_str(&arguments);
                                events.push(ProviderEvent::ToolCallDelta {
                                    call_id: call.call_id.clone(),
                                    arguments_delta: arguments,
                                });
                            }
                        }
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }

        events
    }

    /// Flush pending calls and the terminal event once upstream finishes.
    fn finish(&mut self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        if !self.thinking.is_empty() {
            events.push(ProviderEvent::ThinkingDone {
                text: std::mem::take(&mut self.thinking),
            });
        }
        for (_, call) in std::mem::take(&mut self.calls) {
            events.push(ProviderEvent::ToolCallDone {
                call_id: call.call_id,
                arguments: call.arguments,
                output_index: call.output_index,
            });
        }
        events.push(ProviderEvent::MessageDone {
            stop_reason: map_finish_reason(self.finish_reason.as_deref()),
            usage: self.usage,
        });
        events
    }
}

fn map_finish_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("tool_calls") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        Some("stop") | None => StopReason::Stop,
        Some(_) => StopReason::Stop,
    }
}

fn map_usage(usage: Option<ChatUsage>) -> ProviderUsage {
    match usage {
        Some(usage) => ProviderUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cached_input_tokens: usage.prompt_tokens_details.map(|d| d.cached_tokens),
        },
        None => ProviderUsage::default(),
    }
}

fn append_chat_messages(out: &mut Vec<ChatMessage>, message: &ProviderMessage) {
    let role = match message.role {
        ProviderRole::Assistant => "assistant",
        ProviderRole::User | ProviderRole::System => "user",
    };

    let mut parts: Vec<ChatContentPart> = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results: Vec<(String, String)> = Vec::new();

    for part in &message.content {
        match part {
            ProviderContentPart::Text { text } => {
                parts.push(ChatContentPart::Text { text: text.clone() })
            }
            ProviderContentPart::Image { source } => {
                let url = match source {
                    ProviderImageSource::Url(url) => url.clone(),
                    ProviderImageSource::Base64 { media_type, data } => {
                        format!("data:{};base64,{}", media_type, data)
                    }
                };
                parts.push(ChatContentPart::ImageUrl {
                    image_url: ImageUrl { url },
                });
            }
            ProviderContentPart::ToolUse {
                call_id,
                name,
                input,
            } => {
                tool_calls.push(crate::protocols::chat::ChatToolCall {
                    id: call_id.clone(),
                    r#type: "function".to_string(),
                    function: crate::protocols::chat::ChatFunctionCall {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                });
            }
            ProviderContentPart::ToolResult { call_id, content } => {
                tool_results.push((call_id.clone(), content.clone()));
            }
            ProviderContentPart::Thinking { .. } => {}
        }
    }

    // Tool results ride as dedicated `role: "tool"` messages on this protocol
    if !tool_results.is_empty() {
        for (call_id, content) in tool_results {
            out.push(ChatMessage {
                role: "tool".to_string(),
                content: Some(ChatContent::Text(content)),
                tool_calls: None,
                tool_call_id: Some(call_id),
            });
        }
        if parts.is_empty() {
            return;
        }
    }

    let content = if parts.is_empty() {
        None
    } else if parts.len() == 1 {
        match &parts[0] {
            ChatContentPart::Text { text } => Some(ChatContent::Text(text.clone())),
            _ => Some(ChatContent::Parts(parts)),
        }
    } else {
        Some(ChatContent::Parts(parts))
    };

    if content.is_none() && tool_calls.is_empty() {
        return;
    }

    out.push(ChatMessage {
        role: role.to_string(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::chat::{ChunkChoice, ChunkDelta, FunctionCallDelta, ToolCallDelta};

    fn chunk(choices: Vec<ChunkChoice>, usage: Option<ChatUsage>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            choices,
            usage,
        }
    }

    #[test]
    fn accumulates_tool_call_fragments() {
        let mut state = ChunkState::new();

        let events = state.ingest(chunk(
            vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    tool_calls: Some(vec![ToolCallDelta {
                        index: 0,
                        id: Some("call_abc".to_string()),
                        function: Some(FunctionCallDelta {
                            name: Some("get_weather".to_string()),
                            arguments: None,
                        }),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            None,
        ));
        assert!(matches!(
            events.as_slice(),
            [ProviderEvent::ToolCallStart { call_id, name, output_index: 0 }]
                if call_id == "call_abc" && name == "get_weather"
        ));

        state.ingest(chunk(
            vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    tool_calls: Some(vec![ToolCallDelta {
                        index: 0,
                        id: None,
                        function: Some(FunctionCallDelta {
                            name: None,
                            arguments: Some("{\"city\":\"NYC\"}".to_string()),
                        }),
                    }]),
                    ..Default::default()
                },
                finish_reason: Some("tool_calls".to_string()),
            }],
            None,
        ));

        let final_events = state.finish();
        assert!(matches!(
            final_events.as_slice(),
            [
                ProviderEvent::ToolCallDone { arguments, .. },
                ProviderEvent::MessageDone { stop_reason: StopReason::ToolUse, .. },
            ] if arguments == "{\"city\":\"NYC\"}"
        ));
    }

    #[test]
    fn feed_decodes_chunks_and_done_sentinel() {
        let mut state = ChunkState::new();

        let head = b"data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"He";
        assert!(state.feed(head).is_empty());

        let tail =
            b"llo\"},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n";
        let events = state.feed(tail);
        assert!(state.finished);
        assert!(matches!(
            events.as_slice(),
            [
                ProviderEvent::TextDelta { delta },
                ProviderEvent::MessageDone { stop_reason: StopReason::Stop, .. },
            ] if delta == "Hello"
        ));
    }

    #[test]
    fn usage_chunk_feeds_message_done() {
        let mut state = ChunkState::new();
        state.ingest(chunk(
            vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some("hi".to_string()),
                    ..Default::default()
                },
                finish_reason: Some("stop".to_string()),
            }],
            None,
        ));
        state.ingest(chunk(
            Vec::new(),
            Some(ChatUsage {
                prompt_tokens: 7,
                completion_tokens: 3,
                total_tokens: 10,
                prompt_tokens_details: None,
            }),
        ));
        let events = state.finish();
        match events.as_slice() {
            [ProviderEvent::MessageDone { stop_reason, usage }] => {
                assert_eq!(*stop_reason, StopReason::Stop);
                assert_eq!(usage.input_tokens, 7);
                assert_eq!(usage.output_tokens, 3);
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }
}
