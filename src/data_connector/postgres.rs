//! Postgres storage implementation
//!
//! Structure:
//! 1. PostgresStore pool wrapper
//! 2. PostgresResponseStorage with the status-guarded write paths

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use serde_json::Value;
use tokio_postgres::{NoTls, Row};

use super::{
    CancelOutcome, ResponseId, ResponseResult, ResponseStorage, ResponseStorageError,
    StoredResponse,
};
use crate::{
    config::PostgresConfig,
    protocols::responses::{ResponseOutputItem, ResponseStatus},
};

pub(crate) struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(config: &PostgresConfig) -> ResponseResult<Self> {
        let pg_config = tokio_postgres::Config::from_str(config.db_url.as_str())
            .map_err(|e| ResponseStorageError::StorageError(e.to_string()))?;
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(config.pool_max)
            .build()
            .map_err(|e| ResponseStorageError::StorageError(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn client(&self) -> ResponseResult<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| ResponseStorageError::StorageError(e.to_string()))
    }
}

impl Clone for PostgresStore {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

pub struct PostgresResponseStorage {
    store: PostgresStore,
}

const CANCELLABLE_GUARD: &str = "status IN ('queued', 'in_progress')";

impl PostgresResponseStorage {
    pub async fn connect(config: &PostgresConfig) -> ResponseResult<Self> {
        let store = PostgresStore::new(config)?;
        let storage = Self { store };
        storage.initialize_schema().await?;
        Ok(storage)
    }

    async fn initialize_schema(&self) -> ResponseResult<()> {
        let client = self.store.client().await?;
        client
            .batch_execute(
                "
            CREATE TABLE IF NOT EXISTS responses (
                id VARCHAR(64) PRIMARY KEY,
                model VARCHAR(128) NOT NULL,
                status VARCHAR(16) NOT NULL,
                background BOOLEAN NOT NULL DEFAULT FALSE,
                store BOOLEAN NOT NULL DEFAULT TRUE,
                instructions TEXT,
                previous_response_id VARCHAR(64),
                temperature REAL,
                top_p REAL,
                max_output_tokens BIGINT,
                tool_choice JSONB,
                tools JSONB,
                parallel_tool_calls BOOLEAN,
                truncation VARCHAR(16),
                text_format JSONB,
                reasoning JSONB,
                metadata JSONB,
                input_items JSONB,
                output_items JSONB,
                usage JSONB,
                error JSONB,
                incomplete_details JSONB,
                created_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ,
                cancelled_at TIMESTAMPTZ
            );
            CREATE INDEX IF NOT EXISTS responses_previous_idx
                ON responses (previous_response_id);",
            )
            .await
            .map_err(|e| ResponseStorageError::StorageError(e.to_string()))?;
        Ok(())
    }

    fn build_response_from_row(row: &Row) -> ResponseResult<StoredResponse> {
        let storage_err = |e: tokio_postgres::Error| ResponseStorageError::StorageError(e.to_string());

        let id: String = row.try_get("id").map_err(storage_err)?;
        let model: String = row.try_get("model").map_err(storage_err)?;
        let status_raw: String = row.try_get("status").map_err(storage_err)?;
        let status = ResponseStatus::parse(&status_raw).ok_or_else(|| {
            ResponseStorageError::StorageError(format!("unknown status '{}'", status_raw))
        })?;
        let previous: Option<String> =
            row.try_get("previous_response_id").map_err(storage_err)?;
        let max_output_tokens: Option<i64> =
            row.try_get("max_output_tokens").map_err(storage_err)?;

        let tool_choice: Option<Value> = row.try_get("tool_choice").map_err(storage_err)?;
        let tools: Option<Value> = row.try_get("tools").map_err(storage_err)?;
        let truncation: Option<String> = row.try_get("truncation").map_err(storage_err)?;
        let text_format: Option<Value> = row.try_get("text_format").map_err(storage_err)?;
        let reasoning: Option<Value> = row.try_get("reasoning").map_err(storage_err)?;
        let metadata: Option<Value> = row.try_get("metadata").map_err(storage_err)?;
        let input_items: Option<Value> = row.try_get("input_items").map_err(storage_err)?;
        let output_items: Option<Value> = row.try_get("output_items").map_err(storage_err)?;
        let usage: Option<Value> = row.try_get("usage").map_err(storage_err)?;

        Ok(StoredResponse {
            id: ResponseId(id),
            model,
            status,
            background: row.try_get("background").map_err(storage_err)?,
            store: row.try_get("store").map_err(storage_err)?,
            instructions: row.try_get("instructions").map_err(storage_err)?,
            previous_response_id: previous.map(ResponseId),
            temperature: row.try_get("temperature").map_err(storage_err)?,
            top_p: row.try_get("top_p").map_err(storage_err)?,
            max_output_tokens: max_output_tokens.map(|v| v as u32),
            tool_choice: tool_choice.map(serde_json::from_value).transpose()?,
            tools: tools
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default(),
            parallel_tool_calls: row.try_get("parallel_tool_calls").map_err(storage_err)?,
            truncation: truncation.map(|t| serde_json::from_value(Value::String(t))).transpose()?,
            text: text_format.map(serde_json::from_value).transpose()?,
            reasoning: reasoning.map(serde_json::from_value).transpose()?,
            metadata: metadata
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default(),
            input: input_items
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default(),
            output: output_items
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default(),
            usage: usage.map(serde_json::from_value).transpose()?,
            error: row.try_get("error").map_err(storage_err)?,
            incomplete_details: row.try_get("incomplete_details").map_err(storage_err)?,
            created_at: row.try_get("created_at").map_err(storage_err)?,
            completed_at: row.try_get("completed_at").map_err(storage_err)?,
            cancelled_at: row.try_get("cancelled_at").map_err(storage_err)?,
        })
    }
}

#[async_trait]
impl ResponseStorage for PostgresResponseStorage {
    async fn upsert_response(&self, response: StoredResponse) -> ResponseResult<ResponseId> {
        let response_id = response.id.clone();
        let previous_id = response.previous_response_id.as_ref().map(|r| r.0.clone());
        let tool_choice = response
            .tool_choice
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let tools = serde_json::to_value(&response.tools)?;
        let truncation = response
            .truncation
            .map(|t| serde_json::to_value(t).map(|v| v.as_str().map(str::to_string)))
            .transpose()?
            .flatten();
        let text_format = response.text.as_ref().map(serde_json::to_value).transpose()?;
        let reasoning = response
            .reasoning
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let metadata = serde_json::to_value(&response.metadata)?;
        let input_items = serde_json::to_value(&response.input)?;
        let output_items = serde_json::to_value(&response.output)?;
        let usage = response.usage.as_ref().map(serde_json::to_value).transpose()?;
        let max_output_tokens = response.max_output_tokens.map(|v| v as i64);

        let client = self.store.client().await?;
        client
            .execute(
                "INSERT INTO responses (id, model, status, background, store, instructions, \
                        previous_response_id, temperature, top_p, max_output_tokens, tool_choice, \
                        tools, parallel_tool_calls, truncation, text_format, reasoning, metadata, \
                        input_items, output_items, usage, error, incomplete_details, created_at, \
                        completed_at, cancelled_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                        $17, $18, $19, $20, $21, $22, $23, $24, $25) \
                 ON CONFLICT (id) DO UPDATE SET \
                        status = EXCLUDED.status, \
                        output_items = EXCLUDED.output_items, \
                        usage = EXCLUDED.usage, \
                        error = EXCLUDED.error, \
                        incomplete_details = EXCLUDED.incomplete_details, \
                        completed_at = EXCLUDED.completed_at, \
                        cancelled_at = EXCLUDED.cancelled_at \
                 WHERE responses.status IN ('queued', 'in_progress')",
                &[
                    &response_id.0,
                    &response.model,
                    &response.status.as_str(),
                    &response.background,
                    &response.store,
                    &response.instructions,
                    &previous_id,
                    &response.temperature,
                    &response.top_p,
                    &max_output_tokens,
                    &tool_choice,
                    &tools,
                    &response.parallel_tool_calls,
                    &truncation,
                    &text_format,
                    &reasoning,
                    &metadata,
                    &input_items,
                    &output_items,
                    &usage,
                    &response.error,
                    &response.incomplete_details,
                    &response.created_at,
                    &response.completed_at,
                    &response.cancelled_at,
                ],
            )
            .await
            .map_err(|e| ResponseStorageError::StorageError(e.to_string()))?;
        Ok(response_id)
    }

    async fn update_in_progress_output(
        &self,
        response_id: &ResponseId,
        output: &[ResponseOutputItem],
    ) -> ResponseResult<bool> {
        let output_items = serde_json::to_value(output)?;
        let client = self.store.client().await?;
        let updated = client
            .execute(
                "UPDATE responses SET output_items = $2 \
                 WHERE id = $1 AND status = 'in_progress'",
                &[&response_id.0, &output_items],
            )
            .await
            .map_err(|e| ResponseStorageError::StorageError(e.to_string()))?;
        Ok(updated > 0)
    }

    async fn get_response(
        &self,
        response_id: &ResponseId,
    ) -> ResponseResult<Option<StoredResponse>> {
        let client = self.store.client().await?;
        let row = client
            .query_opt("SELECT * FROM responses WHERE id = $1", &[&response_id.0])
            .await
            .map_err(|e| ResponseStorageError::StorageError(e.to_string()))?;
        row.as_ref().map(Self::build_response_from_row).transpose()
    }

    async fn delete_response(&self, response_id: &ResponseId) -> ResponseResult<bool> {
        let client = self.store.client().await?;
        let deleted = client
            .execute("DELETE FROM responses WHERE id = $1", &[&response_id.0])
            .await
            .map_err(|e| ResponseStorageError::StorageError(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn cancel_response(&self, response_id: &ResponseId) -> ResponseResult<CancelOutcome> {
        let now: DateTime<Utc> = Utc::now();
        let client = self.store.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE responses SET status = 'cancelled', cancelled_at = $2 \
                     WHERE id = $1 AND {} RETURNING *",
                    CANCELLABLE_GUARD
                ),
                &[&response_id.0, &now],
            )
            .await
            .map_err(|e| ResponseStorageError::StorageError(e.to_string()))?;

        if let Some(row) = row {
            return Ok(CancelOutcome::Cancelled(Box::new(
                Self::build_response_from_row(&row)?,
            )));
        }

        // Guard refused; report why
        match self.get_response(response_id).await? {
            Some(existing) => Ok(CancelOutcome::NotCancellable(existing.status)),
            None => Ok(CancelOutcome::NotFound),
        }
    }
}
