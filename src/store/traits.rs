//! `TaskRepository` trait: the async interface to the local task store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::tasks::model::{NewTask, Task};

/// The live external ids a service reported at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub service: String,
    pub taken_at: DateTime<Utc>,
    pub external_ids: Vec<String>,
}

impl Snapshot {
    /// Ids present in this snapshot but absent from `current`.
    pub fn vanished_from<'a>(&'a self, current: &[String]) -> Vec<&'a str> {
        self.external_ids
            .iter()
            .filter(|id| !current.contains(id))
            .map(String::as_str)
            .collect()
    }
}

/// Backend-agnostic task store. Implementations must be safe for concurrent
/// use by several workers.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Insert a task and return it with its assigned id.
    async fn create_task(&self, task: &NewTask) -> Result<Task, DatabaseError>;

    /// All tasks that are not soft-deleted.
    async fn list_tasks(&self) -> Result<Vec<Task>, DatabaseError>;

    /// All soft-deleted tasks.
    async fn list_deleted_tasks(&self) -> Result<Vec<Task>, DatabaseError>;

    async fn get_task(&self, id: i64) -> Result<Option<Task>, DatabaseError>;

    /// Overwrite title, description, due, completed, notified and
    /// `last_modified` with the given values. External ids are untouched.
    async fn update_task(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Mark a task deleted so the deletion can be propagated.
    async fn soft_delete_task(&self, id: i64) -> Result<(), DatabaseError>;

    /// Physically remove a task row.
    async fn delete_task(&self, id: i64) -> Result<(), DatabaseError>;

    async fn set_completed(&self, id: i64, completed: bool) -> Result<(), DatabaseError>;

    /// Overwrite only `last_modified`.
    async fn set_last_modified(&self, id: i64, at: DateTime<Utc>) -> Result<(), DatabaseError>;

    async fn mark_notified(&self, id: i64) -> Result<(), DatabaseError>;

    /// Open, unnotified, non-deleted tasks due within `[min, max]`.
    async fn list_due_unnotified(
        &self,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    ) -> Result<Vec<Task>, DatabaseError>;

    // ── External ids ────────────────────────────────────────────────

    async fn get_external_id(&self, id: i64, service: &str)
    -> Result<Option<String>, DatabaseError>;

    async fn set_external_id(
        &self,
        id: i64,
        service: &str,
        external_id: &str,
    ) -> Result<(), DatabaseError>;

    async fn remove_external_id(&self, id: i64, service: &str) -> Result<(), DatabaseError>;

    // ── Snapshots ───────────────────────────────────────────────────

    /// Store a snapshot. Only the newest few per service are kept.
    async fn record_snapshot(
        &self,
        service: &str,
        external_ids: &[String],
    ) -> Result<(), DatabaseError>;

    async fn last_snapshot(&self, service: &str) -> Result<Option<Snapshot>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vanished_ids() {
        let snap = Snapshot {
            service: "memory".into(),
            taken_at: Utc::now(),
            external_ids: vec!["a".into(), "b".into(), "c".into()],
        };
        let current = vec!["a".to_string(), "c".to_string(), "d".to_string()];
        assert_eq!(snap.vanished_from(&current), vec!["b"]);
    }
}
