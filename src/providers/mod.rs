//! Provider adapter contract
//!
//! Every backend satisfies the same two-call interface: a one-shot chat and a
//! streaming chat yielding a lazy sequence of normalized [`ProviderEvent`]s.
//! The orchestrator never sees a provider's wire format.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use thiserror::Error;

use crate::protocols::responses::TextFormat;

pub mod anthropic;
pub mod openai;
pub mod registry;

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiCompatibleAdapter;
pub use registry::{ModelRegistry, ResolveError, ResolvedModel};

// ============================================================================
// Normalized conversation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    User,
    Assistant,
    System,
}

/// One normalized message handed to an adapter.
///
/// System text never appears here; the assembler hoists it into
/// [`ProviderRequest::system`].
#[derive(Debug, Clone)]
pub struct ProviderMessage {
    pub role: ProviderRole,
    pub content: Vec<ProviderContentPart>,
}

#[derive(Debug, Clone)]
pub enum ProviderContentPart {
    Text {
        text: String,
    },
    Image {
        source: ProviderImageSource,
    },
    ToolUse {
        call_id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        call_id: String,
        content: String,
    },
    Thinking {
        text: String,
    },
}

#[derive(Debug, Clone)]
pub enum ProviderImageSource {
    Url(String),
    Base64 { media_type: String, data: String },
}

#[derive(Debug, Clone)]
pub struct ProviderTool {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub enum ProviderToolChoice {
    Auto,
    Required,
    None,
    Function(String),
}

/// The backend-agnostic request an adapter translates onto its wire.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<ProviderMessage>,
    pub system: Option<String>,
    pub tools: Vec<ProviderTool>,
    pub tool_choice: Option<ProviderToolChoice>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_output_tokens: Option<u32>,
    /// Thinking-token budget derived from `reasoning.effort`
    pub thinking_budget: Option<u32>,
    /// Structured-output request, passed through for the adapter to realize
    pub text_format: Option<TextFormat>,
}

// ============================================================================
// Stream events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Stop,
    Cancelled,
}

impl StopReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::Stop => "stop",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Tokens served from the provider's prompt cache, when reported
    pub cached_input_tokens: Option<u32>,
}

/// Normalized streaming event.
///
/// Adapters project their own wire events into this sequence; a well-formed
/// stream ends with exactly one `MessageDone`.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    TextDelta {
        delta: String,
    },
    ToolCallStart {
        call_id: String,
        name: String,
        output_index: usize,
    },
    ToolCallDelta {
        call_id: String,
        arguments_delta: String,
    },
    ToolCallDone {
        call_id: String,
        arguments: String,
        output_index: usize,
    },
    ThinkingDelta {
        delta: String,
    },
    ThinkingDone {
        text: String,
    },
    MessageDone {
        stop_reason: StopReason,
        usage: ProviderUsage,
    },
}

/// Final result of a one-shot chat call.
#[derive(Debug, Clone)]
pub struct ChatResult {
    pub content: Vec<ProviderContentPart>,
    pub stop_reason: StopReason,
    pub usage: ProviderUsage,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum AdapterError {
    /// The upstream read was torn down mid-flight (client abort or transport
    /// interruption); the orchestrator persists whatever has accumulated.
    #[error("upstream stream aborted")]
    Aborted,

    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("malformed upstream payload: {0}")]
    InvalidResponse(String),
}

impl AdapterError {
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_body() || err.is_timeout() {
            Self::Aborted
        } else {
            Self::Upstream(err.to_string())
        }
    }

    /// Wire `type` for error bodies built from this failure.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limit_error",
            _ => "server_error",
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent, AdapterError>> + Send>>;

// ============================================================================
// Adapter trait
// ============================================================================

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-shot call returning the complete result.
    async fn chat(&self, request: ProviderRequest) -> Result<ChatResult, AdapterError>;

    /// Streaming call; the returned stream yields normalized events lazily.
    async fn chat_stream(&self, request: ProviderRequest) -> Result<EventStream, AdapterError>;
}
