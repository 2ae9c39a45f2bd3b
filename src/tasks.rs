use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::records::{self, Record};
use crate::store::{KeyValueStore, UPLOAD_TASKS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTask {
    pub task_id: String,
    pub filename: String,
    pub status: TaskStatus,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Record for UploadTask {
    const TABLE: &'static str = UPLOAD_TASKS;
}

#[derive(Serialize)]
struct StatusPatch<'a> {
    status: TaskStatus,
    updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Upload task state. Only as durable as the store it is given.
#[derive(Clone)]
pub struct TaskRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, filename: &str) -> StoreResult<UploadTask> {
        let now = Utc::now().to_rfc3339();
        let task = UploadTask {
            task_id: Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            status: TaskStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
            result: None,
            error: None,
        };
        records::save(self.store.as_ref(), &task).await?;
        Ok(task)
    }

    async fn patch(&self, task_id: &str, patch: StatusPatch<'_>) -> StoreResult<Option<UploadTask>> {
        records::update(self.store.as_ref(), task_id, &patch).await
    }

    pub async fn set_status(&self, task_id: &str, status: TaskStatus) -> StoreResult<Option<UploadTask>> {
        self.patch(
            task_id,
            StatusPatch {
                status,
                updated_at: Utc::now().to_rfc3339(),
                result: None,
                error: None,
            },
        )
        .await
    }

    pub async fn complete(&self, task_id: &str, result: &Value) -> StoreResult<Option<UploadTask>> {
        self.patch(
            task_id,
            StatusPatch {
                status: TaskStatus::Completed,
                updated_at: Utc::now().to_rfc3339(),
                result: Some(result),
                error: None,
            },
        )
        .await
    }

    pub async fn fail(&self, task_id: &str, message: &str) -> StoreResult<Option<UploadTask>> {
        self.patch(
            task_id,
            StatusPatch {
                status: TaskStatus::Failed,
                updated_at: Utc::now().to_rfc3339(),
                result: None,
                error: Some(message),
            },
        )
        .await
    }

    pub async fn get(&self, task_id: &str) -> StoreResult<Option<UploadTask>> {
        records::load(self.store.as_ref(), task_id).await
    }
}
