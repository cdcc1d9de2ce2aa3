//! In-process remote service: keeps tombstones so it can list deleted items.
//!
//! Used by tests and for local development without network access.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::RemoteError;
use crate::remote::traits::RemoteTaskApi;
use crate::tasks::model::{RemoteTask, Task};

/// Remote task store held in memory.
pub struct MemoryRemote {
    name: String,
    tasks: RwLock<BTreeMap<String, RemoteTask>>,
    next_id: AtomicU64,
    mutations: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryRemote {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            mutations: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Seed a task directly, bypassing the counters.
    pub async fn insert(&self, task: RemoteTask) {
        self.tasks
            .write()
            .await
            .insert(task.external_id.clone(), task);
    }

    /// Look up a task, tombstones included.
    pub async fn get(&self, external_id: &str) -> Option<RemoteTask> {
        self.tasks.read().await.get(external_id).cloned()
    }

    /// Every stored task, tombstones included.
    pub async fn all(&self) -> Vec<RemoteTask> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// Number of create/update/complete/delete calls served so far.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with `RequestFailed`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RemoteError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::request_failed(&self.name, "service unavailable"));
        }
        Ok(())
    }

    fn not_found(&self, external_id: &str) -> RemoteError {
        RemoteError::NotFound {
            service: self.name.clone(),
            id: external_id.to_string(),
        }
    }
}

#[async_trait]
impl RemoteTaskApi for MemoryRemote {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_task(&self, task: &Task) -> Result<RemoteTask, RemoteError> {
        self.check()?;
        self.mutations.fetch_add(1, Ordering::SeqCst);

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let created = RemoteTask {
            external_id: format!("{}-{n}", self.name),
            title: task.title.clone(),
            description: task.description.clone(),
            due: task.due,
            completed: task.completed,
            deleted: false,
            last_modified: task.last_modified,
        };
        self.insert(created.clone()).await;
        Ok(created)
    }

    async fn list_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        self.check()?;
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| !t.deleted)
            .cloned()
            .collect())
    }

    async fn list_tasks_with_deleted(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        self.check()?;
        Ok(self.all().await)
    }

    async fn get_task(&self, external_id: &str) -> Result<RemoteTask, RemoteError> {
        self.check()?;
        self.get(external_id)
            .await
            .filter(|t| !t.deleted)
            .ok_or_else(|| self.not_found(external_id))
    }

    async fn update_task(&self, external_id: &str, task: &Task) -> Result<RemoteTask, RemoteError> {
        self.check()?;
        self.mutations.fetch_add(1, Ordering::SeqCst);

        let mut tasks = self.tasks.write().await;
        let existing = tasks
            .get_mut(external_id)
            .filter(|t| !t.deleted)
            .ok_or_else(|| self.not_found(external_id))?;
        existing.title = task.title.clone();
        existing.description = task.description.clone();
        existing.due = task.due;
        existing.completed = task.completed;
        existing.last_modified = task.last_modified;
        Ok(existing.clone())
    }

    async fn set_completed(
        &self,
        external_id: &str,
        completed: bool,
    ) -> Result<RemoteTask, RemoteError> {
        self.check()?;
        self.mutations.fetch_add(1, Ordering::SeqCst);

        let mut tasks = self.tasks.write().await;
        let existing = tasks
            .get_mut(external_id)
            .filter(|t| !t.deleted)
            .ok_or_else(|| self.not_found(external_id))?;
        existing.completed = completed;
        existing.last_modified = Utc::now();
        Ok(existing.clone())
    }

    async fn delete_task(&self, external_id: &str) -> Result<(), RemoteError> {
        self.check()?;
        self.mutations.fetch_add(1, Ordering::SeqCst);

        let mut tasks = self.tasks.write().await;
        let existing = tasks
            .get_mut(external_id)
            .ok_or_else(|| self.not_found(external_id))?;
        existing.deleted = true;
        existing.last_modified = Utc::now();
        Ok(())
    }
}
