//! API worker pool: bounded job queue, N workers, one result stream.
//!
//! Lifecycle is `Idle → Running → Stopped`. A stopped pool cannot be
//! restarted; build a new one instead. Jobs still queued when the process
//! exits are lost: nothing is persisted.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::worker::job::{Job, JobResult};
use crate::worker::worker::{Worker, WorkerDeps};

/// Externally visible lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    Idle,
    Running,
    Stopped,
}

enum PoolState {
    Idle {
        result_tx: mpsc::Sender<JobResult>,
    },
    Running {
        job_tx: mpsc::Sender<Job>,
        cancel: CancellationToken,
        workers: Vec<JoinHandle<()>>,
    },
    Stopped,
}

/// Fixed-size pool executing remote-facing jobs off the caller's path.
pub struct WorkerPool {
    config: PoolConfig,
    deps: WorkerDeps,
    state: RwLock<PoolState>,
    results: Mutex<Option<mpsc::Receiver<JobResult>>>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, deps: WorkerDeps) -> Self {
        let (result_tx, result_rx) = mpsc::channel(config.queue_size.max(1));
        Self {
            config,
            deps,
            state: RwLock::new(PoolState::Idle { result_tx }),
            results: Mutex::new(Some(result_rx)),
        }
    }

    pub async fn status(&self) -> PoolStatus {
        match &*self.state.read().await {
            PoolState::Idle { .. } => PoolStatus::Idle,
            PoolState::Running { .. } => PoolStatus::Running,
            PoolState::Stopped => PoolStatus::Stopped,
        }
    }

    /// Take the result stream. Only the first caller gets it.
    ///
    /// The stream ends after `stop` once every worker has exited.
    pub async fn take_results(&self) -> Option<mpsc::Receiver<JobResult>> {
        self.results.lock().await.take()
    }

    /// Spawn the workers. Calling it on a running or stopped pool does nothing.
    pub async fn start(&self) {
        let mut state = self.state.write().await;
        let result_tx = match std::mem::replace(&mut *state, PoolState::Stopped) {
            PoolState::Idle { result_tx } => result_tx,
            running @ PoolState::Running { .. } => {
                *state = running;
                debug!("API worker pool already running");
                return;
            }
            PoolState::Stopped => {
                warn!("API worker pool was stopped and cannot be restarted");
                return;
            }
        };

        let (job_tx, job_rx) = mpsc::channel(self.config.queue_size.max(1));
        let job_rx = Arc::new(Mutex::new(job_rx));
        let cancel = CancellationToken::new();

        let workers = (0..self.config.workers)
            .map(|id| {
                let worker = Worker::new(id, self.deps.clone());
                tokio::spawn(worker.run(job_rx.clone(), result_tx.clone(), cancel.clone()))
            })
            .collect();

        *state = PoolState::Running {
            job_tx,
            cancel,
            workers,
        };
        info!(
            workers = self.config.workers,
            queue_size = self.config.queue_size,
            "API worker pool started"
        );
    }

    /// Stop accepting jobs, let workers drain the queue and wait for them.
    ///
    /// Calling it on a pool that is not running does nothing.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        let (job_tx, cancel, workers) = match std::mem::replace(&mut *state, PoolState::Stopped) {
            PoolState::Running {
                job_tx,
                cancel,
                workers,
            } => (job_tx, cancel, workers),
            idle @ PoolState::Idle { .. } => {
                *state = idle;
                debug!("API worker pool not running, nothing to stop");
                return;
            }
            PoolState::Stopped => return,
        };

        info!("Stopping API worker pool");
        cancel.cancel();
        drop(job_tx);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "API worker exited abnormally");
            }
        }
        info!("API worker pool stopped");
    }

    /// Queue a job.
    ///
    /// Waits up to `submit_timeout` for queue space. A job is only reported
    /// accepted once it is in the queue.
    pub async fn submit(&self, job: Job) -> Result<(), PoolError> {
        let (job_tx, cancel) = match &*self.state.read().await {
            PoolState::Running { job_tx, cancel, .. } => (job_tx.clone(), cancel.clone()),
            _ => return Err(PoolError::NotStarted),
        };

        let job_id = job.id;
        let kind = job.kind();
        let timeout = self.config.submit_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PoolError::Cancelled),
            sent = tokio::time::timeout(timeout, job_tx.send(job)) => match sent {
                Ok(Ok(())) => {
                    debug!(job_id = %job_id, kind = %kind, "Job submitted");
                    Ok(())
                }
                // Receiver gone: every worker has exited.
                Ok(Err(_)) => Err(PoolError::Cancelled),
                Err(_) => {
                    warn!(job_id = %job_id, kind = %kind, ?timeout, "Job queue full, submission timed out");
                    Err(PoolError::SubmissionTimeout(timeout))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SyncConfig;
    use crate::remote::{MemoryRemote, RemoteSet};
    use crate::store::{LibSqlBackend, TaskRepository};
    use crate::tasks::model::NewTask;

    async fn pool(workers: usize, queue_size: usize) -> (WorkerPool, Arc<LibSqlBackend>) {
        let repo = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let deps = WorkerDeps {
            repo: repo.clone(),
            remotes: RemoteSet::new().with(Arc::new(MemoryRemote::new("memory"))),
            sync: SyncConfig::default(),
            result_grace: Duration::from_millis(100),
        };
        let config = PoolConfig {
            workers,
            queue_size,
            submit_timeout: Duration::from_millis(200),
        };
        (WorkerPool::new(config, deps), repo)
    }

    #[tokio::test]
    async fn submit_before_start_is_rejected() {
        let (pool, _) = pool(1, 4).await;
        assert_eq!(pool.submit(Job::sync()).await, Err(PoolError::NotStarted));
        assert_eq!(pool.status().await, PoolStatus::Idle);
    }

    #[tokio::test]
    async fn lifecycle_is_idempotent() {
        let (pool, _) = pool(2, 4).await;
        pool.stop().await;
        assert_eq!(pool.status().await, PoolStatus::Idle);

        pool.start().await;
        pool.start().await;
        assert_eq!(pool.status().await, PoolStatus::Running);

        pool.stop().await;
        pool.stop().await;
        assert_eq!(pool.status().await, PoolStatus::Stopped);

        pool.start().await;
        assert_eq!(pool.status().await, PoolStatus::Stopped);
        assert_eq!(pool.submit(Job::sync()).await, Err(PoolError::NotStarted));
    }

    #[tokio::test]
    async fn results_are_taken_once() {
        let (pool, _) = pool(1, 4).await;
        assert!(pool.take_results().await.is_some());
        assert!(pool.take_results().await.is_none());
    }

    #[tokio::test]
    async fn every_job_yields_one_result() {
        let (pool, repo) = pool(3, 16).await;
        let mut results = pool.take_results().await.unwrap();
        pool.start().await;

        let mut ids = Vec::new();
        for i in 0..8 {
            let task = repo
                .create_task(&NewTask::new(format!("task {i}")))
                .await
                .unwrap();
            let job = Job::create(task);
            ids.push(job.id);
            pool.submit(job).await.unwrap();
        }
        pool.stop().await;

        let mut seen = Vec::new();
        while let Some(result) = results.recv().await {
            assert!(result.success, "{:?}", result.error_message());
            seen.push(result.job_id);
        }
        seen.sort();
        ids.sort();
        assert_eq!(seen, ids);
    }

    #[tokio::test]
    async fn stop_closes_result_stream() {
        let (pool, _) = pool(2, 4).await;
        let mut results = pool.take_results().await.unwrap();
        pool.start().await;
        pool.stop().await;
        assert!(results.recv().await.is_none());
    }
}
