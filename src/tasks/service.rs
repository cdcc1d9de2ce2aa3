//! Task service: local mutation first, remote propagation through the pool.
//!
//! Every mutating call writes the local store synchronously and then submits
//! the matching job. A submission failure is returned, but the local write
//! stays; the next sync picks the change up.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::Limits;
use crate::error::{DatabaseError, Error};
use crate::store::TaskRepository;
use crate::tasks::model::{NewTask, Task};
use crate::worker::{Job, WorkerPool};

/// Field changes for `TaskService::edit`. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct TaskEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due: Option<DateTime<Utc>>,
}

impl TaskEdit {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_due(mut self, due: DateTime<Utc>) -> Self {
        self.due = Some(due);
        self
    }

    fn apply(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(desc) = self.description {
            task.description = Some(desc).filter(|d| !d.is_empty());
        }
        if let Some(due) = self.due {
            task.due = Some(due);
        }
    }
}

/// Front door for task mutations.
pub struct TaskService {
    repo: Arc<dyn TaskRepository>,
    pool: Arc<WorkerPool>,
    limits: Limits,
}

impl TaskService {
    pub fn new(repo: Arc<dyn TaskRepository>, pool: Arc<WorkerPool>, limits: Limits) -> Self {
        Self { repo, pool, limits }
    }

    pub async fn list(&self) -> Result<Vec<Task>, Error> {
        Ok(self.repo.list_tasks().await?)
    }

    pub async fn get(&self, id: i64) -> Result<Task, Error> {
        self.repo
            .get_task(id)
            .await?
            .filter(|t| !t.deleted)
            .ok_or_else(|| DatabaseError::task_not_found(id).into())
    }

    /// Store a new task and queue its creation on every service.
    pub async fn add(&self, task: NewTask) -> Result<Task, Error> {
        task.validate(&self.limits)?;
        let created = self.repo.create_task(&task).await?;
        debug!(task_id = created.id, "Task created locally");
        self.pool.submit(Job::create(created.clone())).await?;
        Ok(created)
    }

    /// Change a task's fields and queue the update.
    pub async fn edit(&self, id: i64, edit: TaskEdit) -> Result<Task, Error> {
        let mut task = self.get(id).await?;
        edit.apply(&mut task);
        task.validate(&self.limits)?;
        task.last_modified = Utc::now();
        self.repo.update_task(&task).await?;
        self.pool.submit(Job::update(task.clone())).await?;
        Ok(task)
    }

    /// Mark a task done or not done and queue the change.
    pub async fn complete(&self, id: i64, completed: bool) -> Result<(), Error> {
        self.get(id).await?;
        self.repo.set_completed(id, completed).await?;
        self.pool.submit(Job::set_completed(id, completed)).await?;
        Ok(())
    }

    /// Soft-delete a task and queue its remote deletion.
    pub async fn remove(&self, id: i64) -> Result<(), Error> {
        self.get(id).await?;
        self.repo.soft_delete_task(id).await?;
        self.pool.submit(Job::delete(id)).await?;
        Ok(())
    }

    /// Queue a full reconciliation.
    pub async fn sync(&self) -> Result<(), Error> {
        self.pool.submit(Job::sync()).await?;
        Ok(())
    }
}
