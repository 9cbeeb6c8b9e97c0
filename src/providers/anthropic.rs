//! Anthropic Messages API adapter
//!
//! Translates [`ProviderRequest`]s onto `/v1/messages` and projects the
//! Messages event grammar (`content_block_start/delta/stop`, `message_delta`,
//! `message_stop`) into normalized [`ProviderEvent`]s.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use super::{
    AdapterError, ChatResult, EventStream, ProviderAdapter, ProviderContentPart, ProviderEvent,
    ProviderImageSource, ProviderMessage, ProviderRequest, ProviderRole, ProviderToolChoice,
    ProviderUsage, StopReason,
};
use crate::protocols::{
    messages::{
        ContentBlock, ContentBlockDelta, CreateMessageRequest, ErrorEnvelope, ImageSource,
        InputContent, InputContentBlock, InputMessage, Message, MessageStreamEvent, Role,
        StopReason as AnthropicStopReason, ThinkingConfig, Tool, ToolChoice,
    },
    responses::TextFormat,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Tool installed to force structured output; its streamed input is
/// re-projected as plain text so callers only ever see `output_text`.
const JSON_RESPONSE_TOOL: &str = "__json_response__";

pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, request: &ProviderRequest, stream: bool) -> CreateMessageRequest {
        let messages = request.messages.iter().map(to_input_message).collect();

        let mut tools: Vec<Tool> = request
            .tools
            .iter()
            .map(|t| Tool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect();

        let mut tool_choice = request.tool_choice.as_ref().map(|choice| match choice {
            ProviderToolChoice::Auto => ToolChoice::Auto,
            ProviderToolChoice::Required => ToolChoice::Any,
            ProviderToolChoice::None => ToolChoice::None,
            ProviderToolChoice::Function(name) => ToolChoice::Tool { name: name.clone() },
        });

        if let Some(schema) = json_output_schema(request.text_format.as_ref()) {
            tools.push(Tool {
                name: JSON_RESPONSE_TOOL.to_string(),
                description: Some("Produce the final answer as a JSON document.".to_string()),
                input_schema: schema,
            });
            tool_choice = Some(ToolChoice::Tool {
                name: JSON_RESPONSE_TOOL.to_string(),
            });
        }

        CreateMessageRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            stop_sequences: None,
            stream: stream.then_some(true),
            system: request.system.clone(),
            temperature: request.temperature,
            thinking: request
                .thinking_budget
                .map(|budget_tokens| ThinkingConfig::Enabled { budget_tokens }),
            tool_choice,
            tools: (!tools.is_empty()).then_some(tools),
            top_p: request.top_p,
        }
    }

    async fn send(
        &self,
        payload: &CreateMessageRequest,
        streaming: bool,
    ) -> Result<reqwest::Response, AdapterError> {
        let mut builder = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or(body);
            return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                AdapterError::RateLimited(message)
            } else {
                AdapterError::Upstream(format!("anthropic returned {}: {}", status, message))
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn chat(&self, request: ProviderRequest) -> Result<ChatResult, AdapterError> {
        let json_mode = json_output_schema(request.text_format.as_ref()).is_some();
        let payload = self.build_request(&request, false);
        let response = self.send(&payload, false).await?;

        let message: Message = response
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

        let mut content = Vec::with_capacity(message.content.len());
        for block in message.content {
            match block {
                ContentBlock::Text { text } => content.push(ProviderContentPart::Text { text }),
                ContentBlock::ToolUse { id, name, input } => {
                    if json_mode && name == JSON_RESPONSE_TOOL {
                        content.push(ProviderContentPart::Text {
                            text: input.to_string(),
                        });
                    } else {
                        content.push(ProviderContentPart::ToolUse {
                            call_id: id,
                            name,
                            input,
                        });
                    }
                }
                ContentBlock::Thinking { thinking, .. } => {
                    content.push(ProviderContentPart::Thinking { text: thinking })
                }
            }
        }

        let raw_stop = message.stop_reason.unwrap_or(AnthropicStopReason::EndTurn);
        // A forced __json_response__ call ends the turn from the caller's view
        let stop_reason = if json_mode && raw_stop == AnthropicStopReason::ToolUse {
            StopReason::EndTurn
        } else {
            map_stop_reason(raw_stop)
        };

        Ok(ChatResult {
            content,
            stop_reason,
            usage: ProviderUsage {
                input_tokens: message.usage.input_tokens,
                output_tokens: message.usage.output_tokens,
                cached_input_tokens: message.usage.cache_read_input_tokens,
            },
        })
    }

    async fn chat_stream(&self, request: ProviderRequest) -> Result<EventStream, AdapterError> {
        let json_mode = json_output_schema(request.text_format.as_ref()).is_some();
        let payload = self.build_request(&request, true);
        let response = self.send(&payload, true).await?;

        let (tx, rx) = mpsc::unbounded_channel::<Result<ProviderEvent, AdapterError>>();

        tokio::spawn(async move {
            let mut upstream = response.bytes_stream();
            let mut state = StreamState::new(json_mode);

            while let Some(chunk_result) = upstream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx.send(Err(AdapterError::from_transport(err)));
                        return;
                    }
                };
                for translated in state.feed(&chunk) {
                    if tx.send(translated).is_err() {
                        return;
                    }
                }
            }

            if !state.finished {
                // Upstream closed without message_stop
                let _ = tx.send(Err(AdapterError::Aborted));
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

// ============================================================================
// Stream translation
// ============================================================================

struct ToolBlock {
    call_id: String,
    name: String,
    arguments: String,
    output_index: usize,
    synthetic: bool,
}

struct StreamState {
    json_mode: bool,
    tool_blocks: HashMap<u32, ToolBlock>,
    thinking: String,
    thinking_block: Option<u32>,
    tool_ordinal: usize,
    usage: ProviderUsage,
    stop_reason: StopReason,
    finished: bool,
    // Undecoded tail of the wire stream plus the frame under assembly
    pending: String,
    data_lines: Vec<String>,
}

impl StreamState {
    fn new(json_mode: bool) -> Self {
        Self {
            json_mode,
            tool_blocks: HashMap::new(),
            thinking: String::new(),
            thinking_block: None,
            tool_ordinal: 0,
            usage: ProviderUsage::default(),
            stop_reason: StopReason::EndTurn,
            finished: false,
            pending: String::new(),
            data_lines: Vec::new(),
        }
    }

    /// Decode raw SSE bytes and translate every frame they complete.
    ///
    /// Frames are assembled one line at a time: `data:` lines accumulate
    /// until the blank terminator, everything else is ignored (the payload's
    /// `type` tag already names the event). A partial trailing line stays
    /// buffered for the next chunk.
    fn feed(&mut self, chunk: &[u8]) -> Vec<Result<ProviderEvent, AdapterError>> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        let mut out = Vec::new();
        while let Some(end) = self.pending.find('\n') {
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
            match serde_json::from_str::<MessageStreamEvent>(&data) {
                Ok(event) => out.extend(self.translate(event)),
                Err(err) => debug!(error = %err, "skipping unparseable messages event"),
            }
        }
        out
    }

    fn translate(&mut self, event: MessageStreamEvent) -> Vec<Result<ProviderEvent, AdapterError>> {
        match event {
            MessageStreamEvent::MessageStart { message } => {
                self.usage.input_tokens = message.usage.input_tokens;
                self.usage.cached_input_tokens = message.usage.cache_read_input_tokens;
                Vec::new()
            }
            MessageStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::ToolUse { id, name, .. } => {
                    let synthetic = self.json_mode && name == JSON_RESPONSE_TOOL;
                    let output_index = self.tool_ordinal;
                    self.tool_ordinal += 1;
                    self.tool_blocks.insert(
                        index,
                        ToolBlock {
                            call_id: id.clone(),
                            name: name.clone(),
                            arguments: String::new(),
                            output_index,
                            synthetic,
                        },
                    );
                    if synthetic {
                        Vec::new()
                    } else {
                        vec![Ok(ProviderEvent::ToolCallStart {
                            call_id: id,
                            name,
                            output_index,
                        })]
                    }
                }
                ContentBlock::Thinking { .. } => {
                    self.thinking_block = Some(index);
                    Vec::new()
                }
                ContentBlock::Text { .. } => Vec::new(),
            },
            MessageStreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentBlockDelta::TextDelta { text } => {
                    vec![Ok(ProviderEvent::TextDelta { delta: text })]
                }
                ContentBlockDelta::InputJsonDelta { partial_json } => {
                    match self.tool_blocks.get_mut(&index) {
                        Some(block) => {
                            block.arguments.push_str(&partial_json);
                            if block.synthetic {
                                // Structured output streams as ordinary text
                                vec![Ok(ProviderEvent::TextDelta {
                                    delta: partial_json,
                                })]
                            } else {
                                vec![Ok(ProviderEvent::ToolCallDelta {
                                    call_id: block.call_id.clone(),
                                    arguments_delta: partial_json,
                                })]
                            }
                        }
                        None => {
                            warn!(index, "input_json_delta for unknown content block");
                            Vec::new()
                        }
                    }
                }
                ContentBlockDelta::ThinkingDelta { thinking } => {
                    self.thinking.push_str(&thinking);
                    vec![Ok(ProviderEvent::ThinkingDelta { delta: thinking })]
                }
                ContentBlockDelta::SignatureDelta { .. } => Vec::new(),
            },
            MessageStreamEvent::ContentBlockStop { index } => {
                if self.thinking_block == Some(index) {
                    self.thinking_block = None;
                    return vec![Ok(ProviderEvent::ThinkingDone {
                        text: std::mem::take(&mut self.thinking),
                    })];
                }
                match self.tool_blocks.remove(&index) {
                    Some(block) if !block.synthetic => {
                        vec![Ok(ProviderEvent::ToolCallDone {
                            call_id: block.call_id,
                            arguments: block.arguments,
                            output_index: block.output_index,
                        })]
                    }
                    _ => Vec::new(),
                }
            }
            MessageStreamEvent::MessageDelta { delta, usage } => {
                self.usage.output_tokens = usage.output_tokens;
                if let Some(input_tokens) = usage.input_tokens {
                    self.usage.input_tokens = input_tokens;
                }
                if let Some(reason) = delta.stop_reason {
                    self.stop_reason = if self.json_mode && reason == AnthropicStopReason::ToolUse {
                        StopReason::EndTurn
                    } else {
                        map_stop_reason(reason)
                    };
                }
                Vec::new()
            }
            MessageStreamEvent::MessageStop => {
                self.finished = true;
                vec![Ok(ProviderEvent::MessageDone {
                    stop_reason: self.stop_reason,
                    usage: self.usage,
                })]
            }
            MessageStreamEvent::Ping => Vec::new(),
            MessageStreamEvent::Error { error } => {
                self.finished = true;
                vec![Err(AdapterError::Upstream(format!(
                    "{}: {}",
                    error.error_type, error.message
                )))]
            }
        }
    }
}

fn map_stop_reason(reason: AnthropicStopReason) -> StopReason {
    match reason {
        AnthropicStopReason::EndTurn => StopReason::EndTurn,
        AnthropicStopReason::ToolUse => StopReason::ToolUse,
        AnthropicStopReason::MaxTokens => StopReason::MaxTokens,
        AnthropicStopReason::StopSequence | AnthropicStopReason::Refusal => StopReason::Stop,
    }
}

fn json_output_schema(format: Option<&TextFormat>) -> Option<Value> {
    match format {
        Some(TextFormat::JsonSchema { schema, .. }) => Some(schema.clone()),
        Some(TextFormat::JsonObject) => Some(json!({"type": "object"})),
        Some(TextFormat::Text) | None => None,
    }
}

fn to_input_message(message: &ProviderMessage) -> InputMessage {
    let role = match message.role {
        ProviderRole::Assistant => Role::Assistant,
        // System text is hoisted before adapters run; anything left rides as user
        ProviderRole::User | ProviderRole::System => Role::User,
    };

    let blocks = message
        .content
        .iter()
        .filter_map(|part| match part {
            ProviderContentPart::Text { text } => {
                Some(InputContentBlock::Text { text: text.clone() })
            }
            ProviderContentPart::Image { source } => Some(InputContentBlock::Image {
                source: match source {
                    ProviderImageSource::Url(url) => ImageSource::Url { url: url.clone() },
                    ProviderImageSource::Base64 { media_type, data } => ImageSource::Base64 {
                        media_type: media_type.clone(),
                        data: data.clone(),
                    },
                },
            }),
            ProviderContentPart::ToolUse {
                call_id,
                name,
                input,
            } => Some(InputContentBlock::ToolUse {
                id: call_id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            ProviderContentPart::ToolResult { call_id, content } => {
                Some(InputContentBlock::ToolResult {
                    tool_use_id: call_id.clone(),
                    content: content.clone(),
                })
            }
            ProviderContentPart::Thinking { .. } => None,
        })
        .collect();

    InputMessage {
        role,
        content: InputContent::Blocks(blocks),
    }
}
