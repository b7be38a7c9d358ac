use super::types::WebhookTask;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqItem {
    pub id: Uuid,
    pub task: WebhookTask,
    pub last_error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Operator-facing DLQ operations (4.L): list, retry (requeue original
/// task), delete.
#[async_trait::async_trait]
pub trait DlqStore: Send + Sync {
    async fn add(&self, task: WebhookTask, last_error: Option<String>) -> anyhow::Result<DlqItem>;
    async fn list(&self) -> anyhow::Result<Vec<DlqItem>>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
    /// Removes the item and returns the task it wrapped, with attempts
    /// reset to 0 and `last_error` cleared, ready for primary re-enqueue.
    async fn take_for_retry(&self, id: Uuid) -> anyhow::Result<Option<WebhookTask>>;
}

pub fn prepare_retry(mut task: WebhookTask) -> WebhookTask {
    task.attempts = 0;
    task.last_error = None;
    task.enqueue_time = chrono::Utc::now().timestamp_millis();
    task
}
