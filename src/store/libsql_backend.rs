//! libSQL backend: async `TaskRepository` implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! shared by all callers; `libsql::Connection` is `Send + Sync` and safe
//! for concurrent async use.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Snapshot, TaskRepository};
use crate::tasks::model::{NewTask, Task};

/// Snapshots kept per service; older rows are pruned on insert.
pub const SNAPSHOT_RETENTION: i64 = 10;

/// libSQL task store.
pub struct LibSqlBackend {
    // Keeps the database alive for as long as the connection is used.
    _db: LibSqlDatabase,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open the task database at `path`, creating the file and its parent
    /// directory on first use.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Cannot open {}: {e}", path.display())))?;
        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Task database opened");
        Ok(backend)
    }

    /// A throwaway store that lives as long as the backend. Nothing is
    /// written to disk.
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Cannot open in-memory task store: {e}")))?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Cannot connect to task store: {e}")))?;
        let backend = Self { _db: db, conn };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_tasks(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut tasks = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => tasks.push(row_to_task(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("{op} row: {e}"))),
            }
        }
        Ok(tasks)
    }

    /// Execute a statement that must touch the row with `id`.
    async fn exec_for_task(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        id: i64,
        op: &str,
    ) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        if affected == 0 {
            return Err(DatabaseError::task_not_found(id));
        }
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Column list for task SELECT queries (9 columns).
const TASK_COLUMNS: &str =
    "id, external_ids, title, description, due, completed, notified, deleted, last_modified";

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// JSON path addressing one service inside the `external_ids` object.
fn service_path(service: &str) -> String {
    format!("$.\"{}\"", service.replace('"', ""))
}

fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let id: i64 = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("task.id: {e}")))?;

    let ids_raw: String = row.get(1).unwrap_or_else(|_| "{}".to_string());
    let external_ids: BTreeMap<String, String> = serde_json::from_str(&ids_raw)
        .map_err(|e| DatabaseError::Serialization(format!("task {id} external_ids: {e}")))?;

    let title: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("task.title: {e}")))?;

    let description: Option<String> = row.get::<String>(3).ok().filter(|s| !s.is_empty());

    let due = row
        .get::<String>(4)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|s| parse_datetime(&s));

    let completed = row.get::<i64>(5).unwrap_or(0) != 0;
    let notified = row.get::<i64>(6).unwrap_or(0) != 0;
    let deleted = row.get::<i64>(7).unwrap_or(0) != 0;

    let last_modified_str: String = row
        .get(8)
        .map_err(|e| DatabaseError::Query(format!("task.last_modified: {e}")))?;
    let last_modified = parse_datetime(&last_modified_str).ok_or_else(|| {
        DatabaseError::Serialization(format!(
            "task {id} last_modified '{last_modified_str}' is not RFC 3339"
        ))
    })?;

    Ok(Task {
        id,
        external_ids,
        title,
        description,
        due,
        completed,
        notified,
        deleted,
        last_modified,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl TaskRepository for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task, DatabaseError> {
        let ids_json = serde_json::to_string(&task.external_ids)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        // RETURNING keeps id assignment correct when several workers insert
        // over the shared connection.
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO tasks (external_ids, title, description, due, completed, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
                params![
                    ids_json,
                    task.title.as_str(),
                    task.description.clone(),
                    task.due.map(|d| d.to_rfc3339()),
                    task.completed as i64,
                    task.last_modified.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_task: {e}")))?;

        let id: i64 = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("create_task id: {e}")))?,
            Ok(None) => return Err(DatabaseError::Query("create_task: no id returned".into())),
            Err(e) => return Err(DatabaseError::Query(format!("create_task row: {e}"))),
        };

        debug!(task_id = id, "Task created");
        Ok(task.clone().into_task(id))
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, DatabaseError> {
        self.query_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE deleted = 0 ORDER BY completed, due, id"),
            (),
            "list_tasks",
        )
        .await
    }

    async fn list_deleted_tasks(&self) -> Result<Vec<Task>, DatabaseError> {
        self.query_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE deleted = 1 ORDER BY id"),
            (),
            "list_deleted_tasks",
        )
        .await
    }

    async fn get_task(&self, id: i64) -> Result<Option<Task>, DatabaseError> {
        let mut tasks = self
            .query_tasks(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                "get_task",
            )
            .await?;
        Ok(tasks.pop())
    }

    async fn update_task(&self, task: &Task) -> Result<(), DatabaseError> {
        self.exec_for_task(
            "UPDATE tasks SET title = ?1, description = ?2, due = ?3, completed = ?4, notified = ?5, last_modified = ?6 WHERE id = ?7",
            params![
                task.title.as_str(),
                task.description.clone(),
                task.due.map(|d| d.to_rfc3339()),
                task.completed as i64,
                task.notified as i64,
                task.last_modified.to_rfc3339(),
                task.id,
            ],
            task.id,
            "update_task",
        )
        .await
    }

    async fn soft_delete_task(&self, id: i64) -> Result<(), DatabaseError> {
        self.exec_for_task(
            "UPDATE tasks SET deleted = 1, last_modified = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
            id,
            "soft_delete_task",
        )
        .await
    }

    async fn delete_task(&self, id: i64) -> Result<(), DatabaseError> {
        self.exec_for_task("DELETE FROM tasks WHERE id = ?1", params![id], id, "delete_task")
            .await?;
        debug!(task_id = id, "Task row removed");
        Ok(())
    }

    async fn set_completed(&self, id: i64, completed: bool) -> Result<(), DatabaseError> {
        self.exec_for_task(
            "UPDATE tasks SET completed = ?1, last_modified = ?2 WHERE id = ?3",
            params![completed as i64, Utc::now().to_rfc3339(), id],
            id,
            "set_completed",
        )
        .await
    }

    async fn set_last_modified(&self, id: i64, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.exec_for_task(
            "UPDATE tasks SET last_modified = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), id],
            id,
            "set_last_modified",
        )
        .await
    }

    async fn mark_notified(&self, id: i64) -> Result<(), DatabaseError> {
        self.exec_for_task(
            "UPDATE tasks SET notified = 1, last_modified = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
            id,
            "mark_notified",
        )
        .await
    }

    async fn list_due_unnotified(
        &self,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    ) -> Result<Vec<Task>, DatabaseError> {
        // RFC 3339 strings with varying fractional digits don't sort
        // lexicographically, so the window is applied after parsing.
        let tasks = self
            .query_tasks(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE deleted = 0 AND completed = 0 AND notified = 0 AND due IS NOT NULL
                     ORDER BY due"
                ),
                (),
                "list_due_unnotified",
            )
            .await?;
        Ok(tasks
            .into_iter()
            .filter(|t| t.due.is_some_and(|due| due >= min && due <= max))
            .collect())
    }

    async fn get_external_id(
        &self,
        id: i64,
        service: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT json_extract(external_ids, ?1) FROM tasks WHERE id = ?2",
                params![service_path(service), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_external_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok().filter(|s| !s.is_empty())),
            Ok(None) => Err(DatabaseError::task_not_found(id)),
            Err(e) => Err(DatabaseError::Query(format!("get_external_id row: {e}"))),
        }
    }

    async fn set_external_id(
        &self,
        id: i64,
        service: &str,
        external_id: &str,
    ) -> Result<(), DatabaseError> {
        self.exec_for_task(
            "UPDATE tasks SET external_ids = json_set(external_ids, ?1, ?2) WHERE id = ?3",
            params![service_path(service), external_id, id],
            id,
            "set_external_id",
        )
        .await
    }

    async fn remove_external_id(&self, id: i64, service: &str) -> Result<(), DatabaseError> {
        self.exec_for_task(
            "UPDATE tasks SET external_ids = json_remove(external_ids, ?1) WHERE id = ?2",
            params![service_path(service), id],
            id,
            "remove_external_id",
        )
        .await
    }

    async fn record_snapshot(
        &self,
        service: &str,
        external_ids: &[String],
    ) -> Result<(), DatabaseError> {
        let ids_json = serde_json::to_string(external_ids)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "INSERT INTO snapshots (service, taken_at, external_ids) VALUES (?1, ?2, ?3)",
                params![service, Utc::now().to_rfc3339(), ids_json],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_snapshot: {e}")))?;
        self.conn()
            .execute(
                "DELETE FROM snapshots WHERE service = ?1 AND id NOT IN
                 (SELECT id FROM snapshots WHERE service = ?1 ORDER BY id DESC LIMIT ?2)",
                params![service, SNAPSHOT_RETENTION],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("prune snapshots: {e}")))?;
        Ok(())
    }

    async fn last_snapshot(&self, service: &str) -> Result<Option<Snapshot>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT taken_at, external_ids FROM snapshots WHERE service = ?1 ORDER BY id DESC LIMIT 1",
                params![service],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("last_snapshot: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("last_snapshot row: {e}"))),
        };

        let taken_at_str: String = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("snapshot.taken_at: {e}")))?;
        let ids_raw: String = row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("snapshot.external_ids: {e}")))?;
        let external_ids: Vec<String> = serde_json::from_str(&ids_raw)
            .map_err(|e| DatabaseError::Serialization(format!("snapshot ids: {e}")))?;

        Ok(Some(Snapshot {
            service: service.to_string(),
            taken_at: parse_datetime(&taken_at_str).unwrap_or(DateTime::<Utc>::MIN_UTC),
            external_ids,
        }))
    }
}
