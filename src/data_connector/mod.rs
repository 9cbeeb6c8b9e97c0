//! Response persistence gateway
//!
//! Structure:
//! 1. Core types (ResponseId, StoredResponse, errors)
//! 2. ResponseStorage trait
//! 3. Backends: postgres, memory, noop

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::protocols::responses::{
    ReasoningParam, ResponseInputOutputItem, ResponseOutputItem, ResponseStatus, ResponseTool,
    ResponseUsage, ResponsesResponse, TextConfig, ToolChoice, ToolChoiceMode, Truncation,
};

pub mod memory;
pub mod noop;
pub mod postgres;

pub use memory::MemoryResponseStorage;
pub use noop::NoopResponseStorage;
pub use postgres::PostgresResponseStorage;

// ============================================================================
// PART 1: Core types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseId(pub String);

impl From<&str> for ResponseId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ResponseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted response row. Columns mirror the request plus lifecycle state.
///
/// Rows are only ever written for `store=true` requests.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub id: ResponseId,
    pub model: String,
    pub status: ResponseStatus,
    pub background: bool,
    pub store: bool,
    pub instructions: Option<String>,
    pub previous_response_id: Option<ResponseId>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub tool_choice: Option<ToolChoice>,
    pub tools: Vec<ResponseTool>,
    pub parallel_tool_calls: Option<bool>,
    pub truncation: Option<Truncation>,
    pub text: Option<TextConfig>,
    pub reasoning: Option<ReasoningParam>,
    pub metadata: HashMap<String, String>,
    pub input: Vec<ResponseInputOutputItem>,
    pub output: Vec<ResponseOutputItem>,
    pub usage: Option<ResponseUsage>,
    pub error: Option<Value>,
    pub incomplete_details: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl StoredResponse {
    /// Reconstruct the public response object from a row.
    pub fn to_response(&self) -> ResponsesResponse {
        ResponsesResponse {
            id: self.id.0.clone(),
            object: "response".to_string(),
            created_at: self.created_at.timestamp(),
            status: self.status,
            background: self.background,
            error: self.error.clone(),
            incomplete_details: self.incomplete_details.clone(),
            instructions: self.instructions.clone(),
            max_output_tokens: self.max_output_tokens,
            model: self.model.clone(),
            output: self.output.clone(),
            parallel_tool_calls: self.parallel_tool_calls.unwrap_or(true),
            previous_response_id: self.previous_response_id.as_ref().map(|id| id.0.clone()),
            reasoning: self.reasoning.clone(),
            store: self.store,
            temperature: self.temperature,
            text: self.text.clone(),
            tool_choice: self
                .tool_choice
                .clone()
                .unwrap_or(ToolChoice::Mode(ToolChoiceMode::Auto)),
            tools: self.tools.clone(),
            top_p: self.top_p,
            truncation: self.truncation,
            usage: self.usage.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResponseStorageError {
    #[error("response storage is not configured; set DATABASE_URL")]
    NotConfigured,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    StorageError(String),
}

pub type ResponseResult<T> = Result<T, ResponseStorageError>;

/// Outcome of a guarded cancel transition.
#[derive(Debug)]
pub enum CancelOutcome {
    /// The row moved to `cancelled`; carries the updated row.
    Cancelled(Box<StoredResponse>),
    /// The row was already in a state cancel cannot leave.
    NotCancellable(ResponseStatus),
    NotFound,
}

// ============================================================================
// PART 2: Storage trait
// ============================================================================

#[async_trait]
pub trait ResponseStorage: Send + Sync {
    /// Insert, or update an existing row, but never overwrite a row that has
    /// already reached a terminal status. The first terminal writer wins.
    async fn upsert_response(&self, response: StoredResponse) -> ResponseResult<ResponseId>;

    /// Mid-stream checkpoint: replace `output` only while the row is still
    /// `in_progress`. Returns whether a row was written; a `false` means a
    /// terminal writer got there first and the checkpoint was dropped.
    async fn update_in_progress_output(
        &self,
        response_id: &ResponseId,
        output: &[ResponseOutputItem],
    ) -> ResponseResult<bool>;

    async fn get_response(&self, response_id: &ResponseId) -> ResponseResult<Option<StoredResponse>>;

    /// Returns whether a row existed.
    async fn delete_response(&self, response_id: &ResponseId) -> ResponseResult<bool>;

    /// Guarded `queued|in_progress → cancelled` transition.
    async fn cancel_response(&self, response_id: &ResponseId) -> ResponseResult<CancelOutcome>;
}

pub type SharedResponseStorage = Arc<dyn ResponseStorage>;
