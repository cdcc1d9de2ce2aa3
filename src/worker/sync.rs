//! Reconciliation of the local store with every remote service.
//!
//! Each service gets its own pass over a fresh copy of the local tasks:
//!
//! 1. **Push missing-remote.** Live local tasks the service has no record of
//!    are created there and the new id is stored locally.
//! 2. **Resolve pairs.** Every remote task is matched by external id. Unknown
//!    live remote tasks are pulled in. A deletion on either side is carried
//!    over to the other. Otherwise the newer `last_modified` wins outright.
//!
//! Corrective calls inside a phase run concurrently, bounded by
//! `SyncConfig::concurrency`. A failure is reported once every call of the
//! phase has finished; work already applied is not rolled back.
//!
//! After all services, soft-deleted tasks no integrated service still knows
//! about are removed from the store.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{JobError, SyncError};
use crate::remote::{RemoteSet, RemoteTaskApi};
use crate::store::TaskRepository;
use crate::tasks::model::{NewTask, RemoteTask, Task};

/// Counts of corrective actions taken by one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Local tasks created remotely.
    pub pushed: usize,
    /// Remote tasks created locally.
    pub pulled: usize,
    pub updated_local: usize,
    pub updated_remote: usize,
    /// Local tasks soft-deleted because the remote copy was deleted.
    pub deleted_local: usize,
    /// Remote tasks deleted because the local copy was deleted.
    pub deleted_remote: usize,
    /// Soft-deleted rows removed from the store.
    pub purged: usize,
}

impl SyncReport {
    /// Whether the run changed nothing on either side.
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    fn record(&mut self, action: Action) {
        match action {
            Action::Pushed => self.pushed += 1,
            Action::Pulled => self.pulled += 1,
            Action::UpdatedLocal => self.updated_local += 1,
            Action::UpdatedRemote => self.updated_remote += 1,
            Action::DeletedLocal => self.deleted_local += 1,
            Action::DeletedRemote => self.deleted_remote += 1,
            Action::Unlinked | Action::None => {}
        }
    }
}

/// What a single corrective step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Pushed,
    Pulled,
    UpdatedLocal,
    UpdatedRemote,
    DeletedLocal,
    DeletedRemote,
    /// A stale external id was dropped from a local task.
    Unlinked,
    None,
}

/// Local and remote state of one service, loaded at the start of its pass.
struct ServiceState {
    live: Vec<Task>,
    deleted: Vec<Task>,
    remote: Vec<RemoteTask>,
}

/// Runs one reconciliation over every integrated service.
pub struct Reconciler {
    repo: Arc<dyn TaskRepository>,
    remotes: RemoteSet,
    limit: Arc<Semaphore>,
}

impl Reconciler {
    pub fn new(repo: Arc<dyn TaskRepository>, remotes: RemoteSet, config: SyncConfig) -> Self {
        Self {
            repo,
            remotes,
            limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
        }
    }

    /// Reconcile every service in order, then purge.
    ///
    /// Stops at the first service whose pass fails.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        for api in self.remotes.iter() {
            self.sync_service(api, &mut report).await?;
        }
        report.purged = self.purge().await?;
        Ok(report)
    }

    async fn sync_service(
        &self,
        api: &Arc<dyn RemoteTaskApi>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let service = api.name().to_string();
        let state = self.load(api).await?;
        info!(
            service = %service,
            local = state.live.len(),
            local_deleted = state.deleted.len(),
            remote = state.remote.len(),
            "Reconciling service"
        );

        let remote_ids: HashSet<&str> =
            state.remote.iter().map(|r| r.external_id.as_str()).collect();

        self.push_missing_remote(api, &state, &remote_ids, report)
            .await
            .map_err(|e| SyncError::PushMissingRemote {
                service: service.clone(),
                source: Box::new(e),
            })?;

        self.resolve_pairs(api, &state, &remote_ids, report)
            .await
            .map_err(|e| SyncError::ResolvePairs {
                service: service.clone(),
                source: Box::new(e),
            })?;

        self.snapshot(&service, &state.remote).await;
        Ok(())
    }

    /// Local (live and deleted) and remote tasks, fetched concurrently.
    async fn load(&self, api: &Arc<dyn RemoteTaskApi>) -> Result<ServiceState, SyncError> {
        let fetch_err = |reason: String| SyncError::Fetch {
            service: api.name().to_string(),
            reason,
        };
        let (live, deleted, remote) = futures::try_join!(
            async { self.repo.list_tasks().await.map_err(|e| fetch_err(e.to_string())) },
            async {
                self.repo
                    .list_deleted_tasks()
                    .await
                    .map_err(|e| fetch_err(e.to_string()))
            },
            async {
                api.list_tasks_with_deleted()
                    .await
                    .map_err(|e| fetch_err(e.to_string()))
            },
        )?;
        Ok(ServiceState {
            live,
            deleted,
            remote,
        })
    }

    /// Create every live local task the service has no record of.
    async fn push_missing_remote(
        &self,
        api: &Arc<dyn RemoteTaskApi>,
        state: &ServiceState,
        remote_ids: &HashSet<&str>,
        report: &mut SyncReport,
    ) -> Result<(), JobError> {
        let mut set = JoinSet::new();
        for task in &state.live {
            let known = task
                .external_id(api.name())
                .is_some_and(|id| remote_ids.contains(id));
            if known {
                continue;
            }
            let (repo, api, task) = (self.repo.clone(), api.clone(), task.clone());
            self.spawn(&mut set, async move { push(repo, api, task).await });
        }
        self.fan_in(set, report).await
    }

    /// Match remote tasks to local ones and fix whichever side is behind.
    async fn resolve_pairs(
        &self,
        api: &Arc<dyn RemoteTaskApi>,
        state: &ServiceState,
        remote_ids: &HashSet<&str>,
        report: &mut SyncReport,
    ) -> Result<(), JobError> {
        let service = api.name();
        let by_external_id: HashMap<&str, &Task> = state
            .live
            .iter()
            .chain(&state.deleted)
            .filter_map(|t| t.external_id(service).map(|id| (id, t)))
            .collect();

        let mut set = JoinSet::new();
        for remote in &state.remote {
            let local = by_external_id.get(remote.external_id.as_str()).copied();
            let (repo, api) = (self.repo.clone(), api.clone());
            let (local, remote) = (local.cloned(), remote.clone());
            self.spawn(&mut set, async move {
                match local {
                    Some(local) => resolve(repo, api, local, remote).await,
                    None => pull(repo, api.name(), remote).await,
                }
            });
        }

        // Deleted local tasks whose remote copy is gone entirely.
        for task in &state.deleted {
            let Some(id) = task.external_id(service) else {
                continue;
            };
            if remote_ids.contains(id) {
                continue;
            }
            let (repo, service, task_id) = (self.repo.clone(), service.to_string(), task.id);
            self.spawn(&mut set, async move {
                repo.remove_external_id(task_id, &service).await?;
                debug!(task_id, service = %service, "Dropped id of remote task that no longer exists");
                Ok(Action::Unlinked)
            });
        }

        self.fan_in(set, report).await
    }

    /// Spawn one corrective step, gated on the concurrency limit.
    fn spawn<F>(&self, set: &mut JoinSet<Result<Action, JobError>>, step: F)
    where
        F: Future<Output = Result<Action, JobError>> + Send + 'static,
    {
        let limit = self.limit.clone();
        set.spawn(async move {
            // The semaphore is never closed, so acquire only fails if it is.
            let _permit = limit
                .acquire_owned()
                .await
                .map_err(|e| JobError::Panicked(e.to_string()))?;
            step.await
        });
    }

    /// Wait for every step, tally the actions and return the first failure.
    async fn fan_in(
        &self,
        mut set: JoinSet<Result<Action, JobError>>,
        report: &mut SyncReport,
    ) -> Result<(), JobError> {
        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            let outcome = joined.unwrap_or_else(|e| Err(JobError::Panicked(e.to_string())));
            match outcome {
                Ok(action) => report.record(action),
                Err(e) => {
                    warn!(error = %e, "Sync step failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Hard-delete soft-deleted tasks no integrated service still has an id for.
    async fn purge(&self) -> Result<usize, SyncError> {
        let deleted = self.repo.list_deleted_tasks().await.map_err(SyncError::Purge)?;
        let mut purged = 0;
        for task in deleted {
            let linked = self
                .remotes
                .iter()
                .any(|api| task.external_id(api.name()).is_some());
            if linked {
                continue;
            }
            self.repo.delete_task(task.id).await.map_err(SyncError::Purge)?;
            purged += 1;
        }
        if purged > 0 {
            info!(purged, "Purged deleted tasks");
        }
        Ok(purged)
    }

    /// Record the service's live ids and log those gone since the last pass.
    ///
    /// Nothing is inferred from vanished ids; services that cannot list
    /// deleted tasks simply show up here.
    async fn snapshot(&self, service: &str, remote: &[RemoteTask]) {
        let live: Vec<String> = remote
            .iter()
            .filter(|r| !r.deleted)
            .map(|r| r.external_id.clone())
            .collect();

        match self.repo.last_snapshot(service).await {
            Ok(Some(previous)) => {
                let vanished = previous.vanished_from(&live);
                if !vanished.is_empty() {
                    info!(service, count = vanished.len(), ids = ?vanished, "Remote tasks vanished since last sync");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(service, error = %e, "Failed to read last snapshot"),
        }
        if let Err(e) = self.repo.record_snapshot(service, &live).await {
            warn!(service, error = %e, "Failed to record snapshot");
        }
    }
}

/// Create a local task remotely and keep the timestamp the service reports.
async fn push(
    repo: Arc<dyn TaskRepository>,
    api: Arc<dyn RemoteTaskApi>,
    task: Task,
) -> Result<Action, JobError> {
    let service = api.name();
    let created = api.create_task(&task).await?;
    repo.set_external_id(task.id, service, &created.external_id)
        .await?;
    adopt_remote_timestamp(&repo, &task, &created).await?;
    info!(task_id = task.id, service, external_id = %created.external_id, "Pushed task");
    Ok(Action::Pushed)
}

/// Create a local copy of a live remote task.
async fn pull(
    repo: Arc<dyn TaskRepository>,
    service: &str,
    remote: RemoteTask,
) -> Result<Action, JobError> {
    if remote.deleted {
        return Ok(Action::None);
    }
    let task = repo.create_task(&NewTask::from_remote(service, &remote)).await?;
    info!(task_id = task.id, service, external_id = %remote.external_id, "Pulled task");
    Ok(Action::Pulled)
}

/// Settle one matched pair.
async fn resolve(
    repo: Arc<dyn TaskRepository>,
    api: Arc<dyn RemoteTaskApi>,
    mut local: Task,
    remote: RemoteTask,
) -> Result<Action, JobError> {
    let service = api.name();
    match (local.deleted, remote.deleted) {
        (true, true) => {
            repo.remove_external_id(local.id, service).await?;
            Ok(Action::Unlinked)
        }
        (false, true) => {
            repo.soft_delete_task(local.id).await?;
            repo.remove_external_id(local.id, service).await?;
            info!(task_id = local.id, service, "Remote deletion applied locally");
            Ok(Action::DeletedLocal)
        }
        (true, false) => {
            api.delete_task(&remote.external_id).await?;
            repo.remove_external_id(local.id, service).await?;
            info!(task_id = local.id, service, "Local deletion applied remotely");
            Ok(Action::DeletedRemote)
        }
        (false, false) if remote.last_modified > local.last_modified => {
            local.apply_remote(&remote);
            repo.update_task(&local).await?;
            debug!(task_id = local.id, service, "Local task updated from remote");
            Ok(Action::UpdatedLocal)
        }
        (false, false) if local.last_modified > remote.last_modified => {
            let updated = api.update_task(&remote.external_id, &local).await?;
            adopt_remote_timestamp(&repo, &local, &updated).await?;
            debug!(task_id = local.id, service, "Remote task updated from local");
            Ok(Action::UpdatedRemote)
        }
        (false, false) => {
            if !local.same_content(&remote) {
                debug!(task_id = local.id, service, "Equal timestamps with differing content, left as is");
            }
            Ok(Action::None)
        }
    }
}

/// Settle the local timestamp of `sent` after the service stored it as `remote`.
///
/// If the local row still holds what was sent, it takes the service's
/// `last_modified`; otherwise the service's own write time would look newer
/// on the next pass and the task would be pulled back for no reason.
///
/// If the row was edited while the call was in flight, the service now holds
/// an older edit. The row is then moved just past the service's time so the
/// next pass pushes it again instead of pulling the stale copy.
pub(crate) async fn adopt_remote_timestamp(
    repo: &Arc<dyn TaskRepository>,
    sent: &Task,
    remote: &RemoteTask,
) -> Result<(), JobError> {
    let Some(current) = repo.get_task(sent.id).await?.filter(|t| !t.deleted) else {
        return Ok(());
    };
    let at = if current.same_fields(sent) {
        remote.last_modified
    } else if current.last_modified <= remote.last_modified {
        debug!(task_id = sent.id, "Task changed during remote write, keeping local edit newer");
        remote.last_modified + chrono::Duration::milliseconds(1)
    } else {
        return Ok(());
    };
    if at != current.last_modified {
        repo.set_last_modified(sent.id, at).await?;
    }
    Ok(())
}
