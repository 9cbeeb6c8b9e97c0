//! In-memory storage implementation
//!
//! Backs tests and `DATABASE_URL=memory` development runs. Implements the
//! same status-guard semantics as the Postgres backend so guard behavior is
//! exercised without a database.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    CancelOutcome, ResponseId, ResponseResult, ResponseStorage, ResponseStorageError,
    StoredResponse,
};
use crate::protocols::responses::{ResponseOutputItem, ResponseStatus};

#[derive(Default, Clone)]
pub struct MemoryResponseStorage {
    rows: Arc<RwLock<HashMap<String, StoredResponse>>>,
}

impl MemoryResponseStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err() -> ResponseStorageError {
        ResponseStorageError::StorageError("response table lock poisoned".to_string())
    }
}

#[async_trait]
impl ResponseStorage for MemoryResponseStorage {
    async fn upsert_response(&self, response: StoredResponse) -> ResponseResult<ResponseId> {
        let id = response.id.clone();
        let mut rows = self.rows.write().map_err(|_| Self::lock_err())?;
        match rows.get(&id.0) {
            Some(existing) if existing.status.is_terminal() => {}
            _ => {
                rows.insert(id.0.clone(), response);
            }
        }
        Ok(id)
    }

    async fn update_in_progress_output(
        &self,
        response_id: &ResponseId,
        output: &[ResponseOutputItem],
    ) -> ResponseResult<bool> {
        let mut rows = self.rows.write().map_err(|_| Self::lock_err())?;
        match rows.get_mut(&response_id.0) {
            Some(row) if row.status == ResponseStatus::InProgress => {
                row.output = output.to_vec();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_response(
        &self,
        response_id: &ResponseId,
    ) -> ResponseResult<Option<StoredResponse>> {
        let rows = self.rows.read().map_err(|_| Self::lock_err())?;
        Ok(rows.get(&response_id.0).cloned())
    }

    async fn delete_response(&self, response_id: &ResponseId) -> ResponseResult<bool> {
        let mut rows = self.rows.write().map_err(|_| Self::lock_err())?;
        Ok(rows.remove(&response_id.0).is_some())
    }

    async fn cancel_response(&self, response_id: &ResponseId) -> ResponseResult<CancelOutcome> {
        let mut rows = self.rows.write().map_err(|_| Self::lock_err())?;
        match rows.get_mut(&response_id.0) {
            None => Ok(CancelOutcome::NotFound),
            Some(row) => match row.status {
                ResponseStatus::Queued | ResponseStatus::InProgress => {
                    row.status = ResponseStatus::Cancelled;
                    row.cancelled_at = Some(Utc::now());
                    Ok(CancelOutcome::Cancelled(Box::new(row.clone())))
                }
                status => Ok(CancelOutcome::NotCancellable(status)),
            },
        }
    }
}
