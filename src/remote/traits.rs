//! `RemoteTaskApi`: capability object for one integrated task service.

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::tasks::model::{RemoteTask, Task};

/// Operations on one remote service's tasks, addressed by external id.
#[async_trait]
pub trait RemoteTaskApi: Send + Sync {
    /// Service name. Also the key of this service's entry in `Task::external_ids`.
    fn name(&self) -> &str;

    /// Create the task remotely; the result carries the new external id.
    async fn create_task(&self, task: &Task) -> Result<RemoteTask, RemoteError>;

    /// All live tasks.
    async fn list_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError>;

    /// All tasks including deleted ones.
    ///
    /// Services that cannot list deleted items fall back to `list_tasks`;
    /// deletions on their side then go unseen by reconciliation.
    async fn list_tasks_with_deleted(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        self.list_tasks().await
    }

    async fn get_task(&self, external_id: &str) -> Result<RemoteTask, RemoteError>;

    /// Push the task's title, description, due and completed state.
    async fn update_task(&self, external_id: &str, task: &Task)
    -> Result<RemoteTask, RemoteError>;

    /// Set the completed flag and return the task as the service now holds it.
    async fn set_completed(
        &self,
        external_id: &str,
        completed: bool,
    ) -> Result<RemoteTask, RemoteError>;

    async fn delete_task(&self, external_id: &str) -> Result<(), RemoteError>;
}
