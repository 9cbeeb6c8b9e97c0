//! Unconfigured storage
//!
//! Installed when no `DATABASE_URL` is set. Startup succeeds; the first
//! persistence call reports the missing configuration.

use async_trait::async_trait;

use super::{
    CancelOutcome, ResponseId, ResponseResult, ResponseStorage, ResponseStorageError,
    StoredResponse,
};
use crate::protocols::responses::ResponseOutputItem;

#[derive(Default, Debug, Clone, Copy)]
pub struct NoopResponseStorage;

impl NoopResponseStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResponseStorage for NoopResponseStorage {
    async fn upsert_response(&self, _response: StoredResponse) -> ResponseResult<ResponseId> {
        Err(ResponseStorageError::NotConfigured)
    }

    async fn update_in_progress_output(
        &self,
        _response_id: &ResponseId,
        _output: &[ResponseOutputItem],
    ) -> ResponseResult<bool> {
        Err(ResponseStorageError::NotConfigured)
    }

    async fn get_response(
        &self,
        _response_id: &ResponseId,
    ) -> ResponseResult<Option<StoredResponse>> {
        Err(ResponseStorageError::NotConfigured)
    }

    async fn delete_response(&self, _response_id: &ResponseId) -> ResponseResult<bool> {
        Err(ResponseStorageError::NotConfigured)
    }

    async fn cancel_response(&self, _response_id: &ResponseId) -> ResponseResult<CancelOutcome> {
        Err(ResponseStorageError::NotConfigured)
    }
}
