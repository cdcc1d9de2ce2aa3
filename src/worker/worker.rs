//! Worker loop and per-operation job handlers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{DatabaseError, JobError};
use crate::remote::RemoteSet;
use crate::store::TaskRepository;
use crate::tasks::model::Task;
use crate::worker::job::{Job, JobOperation, JobResult};
use crate::worker::sync::{Reconciler, adopt_remote_timestamp};

/// Shared dependencies for job execution.
#[derive(Clone)]
pub struct WorkerDeps {
    pub repo: Arc<dyn TaskRepository>,
    pub remotes: RemoteSet,
    pub sync: SyncConfig,
    /// How long a finished job may wait for room in the result queue once
    /// the pool is stopping.
    pub result_grace: Duration,
}

/// One long-lived job consumer.
pub struct Worker {
    id: usize,
    deps: WorkerDeps,
}

impl Worker {
    pub fn new(id: usize, deps: WorkerDeps) -> Self {
        Self { id, deps }
    }

    fn repo(&self) -> &Arc<dyn TaskRepository> {
        &self.deps.repo
    }

    fn remotes(&self) -> &RemoteSet {
        &self.deps.remotes
    }

    /// Pull jobs until the queue is closed and drained.
    ///
    /// Cancellation does not interrupt the loop: jobs still buffered when the
    /// pool stops are executed, and the loop ends once the sender is dropped.
    pub async fn run(
        self,
        jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
        results: mpsc::Sender<JobResult>,
        cancel: CancellationToken,
    ) {
        debug!(worker = self.id, "API worker started");
        loop {
            let next = jobs.lock().await.recv().await;
            let Some(job) = next else { break };

            debug!(worker = self.id, job_id = %job.id, kind = %job.kind(), "Processing job");
            let outcome = self.execute(&job).await;
            if let Err(e) = &outcome {
                warn!(worker = self.id, job_id = %job.id, kind = %job.kind(), error = %e, "Job failed");
            }
            self.publish(JobResult::from_outcome(&job, outcome), &results, &cancel)
                .await;
        }
        debug!(worker = self.id, "API worker stopped");
    }

    /// Hand a result to the consumer.
    ///
    /// While running this waits for queue space. Once the pool is stopping,
    /// it waits at most `result_grace`, so an undrained queue cannot block
    /// shutdown.
    async fn publish(
        &self,
        result: JobResult,
        results: &mpsc::Sender<JobResult>,
        cancel: &CancellationToken,
    ) {
        let permit = tokio::select! {
            biased;
            permit = results.reserve() => permit.ok(),
            _ = cancel.cancelled() => {
                tokio::time::timeout(self.deps.result_grace, results.reserve())
                    .await
                    .ok()
                    .and_then(Result::ok)
            }
        };
        match permit {
            Some(permit) => permit.send(result),
            None => warn!(
                worker = self.id,
                job_id = %result.job_id,
                kind = %result.kind,
                "Result queue unavailable during shutdown, dropping job result"
            ),
        }
    }

    /// Run one job's handler to completion.
    pub async fn execute(&self, job: &Job) -> Result<(), JobError> {
        match &job.operation {
            JobOperation::CreateTask(task) => self.create_task(task.id).await,
            JobOperation::UpdateTask(task) => self.update_task(task.id).await,
            JobOperation::DeleteTask { task_id } => self.delete_task(*task_id).await,
            JobOperation::SetCompleted { task_id, completed } => {
                self.set_completed(*task_id, *completed).await
            }
            JobOperation::SyncTasks => {
                let report = Reconciler::new(
                    self.repo().clone(),
                    self.remotes().clone(),
                    self.deps.sync.clone(),
                )
                .run()
                .await?;
                info!(
                    pushed = report.pushed,
                    pulled = report.pulled,
                    updated_local = report.updated_local,
                    updated_remote = report.updated_remote,
                    deleted_local = report.deleted_local,
                    deleted_remote = report.deleted_remote,
                    purged = report.purged,
                    "Sync finished"
                );
                Ok(())
            }
        }
    }

    /// Create the task on every service that has no id for it yet.
    async fn create_task(&self, task_id: i64) -> Result<(), JobError> {
        let task = self.current_task(task_id).await?;
        for api in self.remotes().iter() {
            let service = api.name();
            if task.external_id(service).is_some() {
                debug!(task_id, service, "Task already exists remotely, skipping create");
                continue;
            }
            let created = api.create_task(&task).await?;
            self.repo()
                .set_external_id(task_id, service, &created.external_id)
                .await?;
            adopt_remote_timestamp(self.repo(), &task, &created).await?;
            info!(task_id, service, external_id = %created.external_id, "Task created remotely");
        }
        Ok(())
    }

    /// Push the task's current fields to every service.
    ///
    /// The row is read when the job runs, not when it was submitted, so a
    /// job that runs late never sends an edit older than the store's.
    async fn update_task(&self, task_id: i64) -> Result<(), JobError> {
        let task = self.current_task(task_id).await?;
        for api in self.remotes().iter() {
            let service = api.name();
            let external_id = require(&task, service)?;
            let updated = api.update_task(&external_id, &task).await?;
            adopt_remote_timestamp(self.repo(), &task, &updated).await?;
            debug!(task_id, service, "Task updated remotely");
        }
        Ok(())
    }

    /// Delete the task from every service that has an id for it.
    ///
    /// A service without an id never saw the task, so there is nothing to
    /// delete there.
    async fn delete_task(&self, task_id: i64) -> Result<(), JobError> {
        for api in self.remotes().iter() {
            let service = api.name();
            let Some(external_id) = self.external_id(task_id, service).await? else {
                debug!(task_id, service, "No remote id, nothing to delete");
                continue;
            };
            api.delete_task(&external_id).await?;
            self.repo().remove_external_id(task_id, service).await?;
            info!(task_id, service, "Task deleted remotely");
        }
        Ok(())
    }

    async fn set_completed(&self, task_id: i64, completed: bool) -> Result<(), JobError> {
        let task = self.current_task(task_id).await?;
        for api in self.remotes().iter() {
            let service = api.name();
            let external_id = require(&task, service)?;
            let remote = api.set_completed(&external_id, completed).await?;
            adopt_remote_timestamp(self.repo(), &task, &remote).await?;
            debug!(task_id, service, completed, "Completion pushed");
        }
        Ok(())
    }

    /// The stored row for a live task.
    async fn current_task(&self, task_id: i64) -> Result<Task, JobError> {
        self.repo()
            .get_task(task_id)
            .await?
            .filter(|t| !t.deleted)
            .ok_or(JobError::MissingTask { task_id })
    }

    /// The task's id on `service`; a task missing from the store is a job error.
    async fn external_id(&self, task_id: i64, service: &str) -> Result<Option<String>, JobError> {
        match self.repo().get_external_id(task_id, service).await {
            Ok(id) => Ok(id),
            Err(DatabaseError::NotFound { .. }) => Err(JobError::MissingTask { task_id }),
            Err(e) => Err(e.into()),
        }
    }
}

/// The task's id on `service`, which update and completion jobs cannot do without.
fn require(task: &Task, service: &str) -> Result<String, JobError> {
    task.external_id(service)
        .map(str::to_string)
        .ok_or_else(|| JobError::MissingExternalId {
            task_id: task.id,
            service: service.to_string(),
        })
}
