//! Integration tests for the API worker pool.
//!
//! A gated remote service holds workers inside `create_task` until the test
//! opens the gate, which makes queue backpressure observable.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;

use tasksync::config::{PoolConfig, SyncConfig};
use tasksync::error::{PoolError, RemoteError};
use tasksync::remote::{MemoryRemote, RemoteSet, RemoteTaskApi};
use tasksync::store::{LibSqlBackend, TaskRepository};
use tasksync::tasks::{NewTask, RemoteTask, Task};
use tasksync::worker::{Job, JobKind, JobResult, WorkerDeps, WorkerPool};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Memory remote whose `create_task` waits on a gate and counts calls per task.
struct GatedRemote {
    inner: MemoryRemote,
    gate: Semaphore,
    entered: AtomicUsize,
    creates: Mutex<HashMap<i64, usize>>,
}

impl GatedRemote {
    fn new(open: bool) -> Self {
        Self {
            inner: MemoryRemote::new("gated"),
            gate: Semaphore::new(if open { Semaphore::MAX_PERMITS } else { 0 }),
            entered: AtomicUsize::new(0),
            creates: Mutex::new(HashMap::new()),
        }
    }

    fn open(&self) {
        self.gate.add_permits(1024);
    }

    async fn wait_entered(&self, n: usize) {
        while self.entered.load(Ordering::SeqCst) < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl RemoteTaskApi for GatedRemote {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn create_task(&self, task: &Task) -> Result<RemoteTask, RemoteError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| RemoteError::request_failed("gated", e))?;
        *self.creates.lock().await.entry(task.id).or_default() += 1;
        self.inner.create_task(task).await
    }

    async fn list_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        self.inner.list_tasks().await
    }

    async fn list_tasks_with_deleted(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        self.inner.list_tasks_with_deleted().await
    }

    async fn get_task(&self, external_id: &str) -> Result<RemoteTask, RemoteError> {
        self.inner.get_task(external_id).await
    }

    async fn update_task(&self, external_id: &str, task: &Task) -> Result<RemoteTask, RemoteError> {
        self.inner.update_task(external_id, task).await
    }

    async fn set_completed(
        &self,
        external_id: &str,
        completed: bool,
    ) -> Result<RemoteTask, RemoteError> {
        self.inner.set_completed(external_id, completed).await
    }

    async fn delete_task(&self, external_id: &str) -> Result<(), RemoteError> {
        self.inner.delete_task(external_id).await
    }
}

/// Remote that stamps its own write time on every write, like a real
/// service, and holds updates carrying `slow_title` for a while.
struct StampingRemote {
    tasks: Mutex<HashMap<String, RemoteTask>>,
    next_id: AtomicUsize,
    slow_title: String,
    slow_entered: AtomicUsize,
}

impl StampingRemote {
    fn new(slow_title: &str) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            slow_title: slow_title.to_string(),
            slow_entered: AtomicUsize::new(0),
        }
    }

    async fn wait_slow_entered(&self) {
        while self.slow_entered.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn only_task(&self) -> RemoteTask {
        let tasks = self.tasks.lock().await;
        assert_eq!(tasks.len(), 1);
        tasks.values().next().cloned().unwrap()
    }

    fn missing(id: &str) -> RemoteError {
        RemoteError::NotFound {
            service: "stamping".into(),
            id: id.into(),
        }
    }
}

#[async_trait]
impl RemoteTaskApi for StampingRemote {
    fn name(&self) -> &str {
        "stamping"
    }

    async fn create_task(&self, task: &Task) -> Result<RemoteTask, RemoteError> {
        let id = format!("s-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let created = RemoteTask {
            external_id: id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            due: task.due,
            completed: task.completed,
            deleted: false,
            last_modified: Utc::now(),
        };
        self.tasks.lock().await.insert(id, created.clone());
        Ok(created)
    }

    async fn list_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        Ok(self.tasks.lock().await.values().cloned().collect())
    }

    async fn get_task(&self, external_id: &str) -> Result<RemoteTask, RemoteError> {
        self.tasks
            .lock()
            .await
            .get(external_id)
            .cloned()
            .ok_or_else(|| Self::missing(external_id))
    }

    async fn update_task(&self, external_id: &str, task: &Task) -> Result<RemoteTask, RemoteError> {
        if task.title == self.slow_title {
            self.slow_entered.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let mut tasks = self.tasks.lock().await;
        let existing = tasks
            .get_mut(external_id)
            .ok_or_else(|| Self::missing(external_id))?;
        existing.title = task.title.clone();
        existing.description = task.description.clone();
        existing.due = task.due;
        existing.completed = task.completed;
        existing.last_modified = Utc::now();
        Ok(existing.clone())
    }

    async fn set_completed(
        &self,
        external_id: &str,
        completed: bool,
    ) -> Result<RemoteTask, RemoteError> {
        let mut tasks = self.tasks.lock().await;
        let existing = tasks
            .get_mut(external_id)
            .ok_or_else(|| Self::missing(external_id))?;
        existing.completed = completed;
        existing.last_modified = Utc::now();
        Ok(existing.clone())
    }

    async fn delete_task(&self, external_id: &str) -> Result<(), RemoteError> {
        self.tasks
            .lock()
            .await
            .remove(external_id)
            .map(|_| ())
            .ok_or_else(|| Self::missing(external_id))
    }
}

struct Harness {
    repo: Arc<LibSqlBackend>,
    pool: Arc<WorkerPool>,
    results: tokio::sync::mpsc::Receiver<JobResult>,
}

async fn harness(remote: Arc<dyn RemoteTaskApi>, config: PoolConfig) -> Harness {
    let repo = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let deps = WorkerDeps {
        repo: repo.clone(),
        remotes: RemoteSet::new().with(remote),
        sync: SyncConfig::default(),
        result_grace: Duration::from_millis(200),
    };
    let pool = Arc::new(WorkerPool::new(config, deps));
    let results = pool.take_results().await.unwrap();
    Harness {
        repo,
        pool,
        results,
    }
}

async fn collect(mut results: tokio::sync::mpsc::Receiver<JobResult>) -> Vec<JobResult> {
    let mut all = Vec::new();
    while let Some(result) = results.recv().await {
        all.push(result);
    }
    all
}

async fn new_task(repo: &LibSqlBackend, title: &str) -> Task {
    repo.create_task(&NewTask::new(title)).await.unwrap()
}

#[tokio::test]
async fn each_job_runs_once_and_yields_one_result() {
    timeout(TEST_TIMEOUT, async {
        let remote = Arc::new(GatedRemote::new(true));
        let config = PoolConfig {
            workers: 4,
            queue_size: 64,
            submit_timeout: Duration::from_secs(1),
        };
        let mut h = harness(remote.clone(), config).await;
        h.pool.start().await;

        let mut submitted = HashMap::new();
        for i in 0..20 {
            let task = new_task(&h.repo, &format!("task {i}")).await;
            let job = Job::create(task.clone());
            submitted.insert(job.id, task.id);
            h.pool.submit(job).await.unwrap();
        }
        h.pool.stop().await;

        let mut seen = HashMap::new();
        while let Some(result) = h.results.recv().await {
            assert_eq!(result.kind, JobKind::CreateTask);
            assert!(result.success, "{:?}", result.error_message());
            *seen.entry(result.job_id).or_insert(0) += 1;
            assert_eq!(result.task_id, submitted.get(&result.job_id).copied());
        }
        assert_eq!(seen.len(), submitted.len());
        assert!(seen.values().all(|&n| n == 1));

        let creates = remote.creates.lock().await;
        assert_eq!(creates.len(), 20);
        assert!(creates.values().all(|&n| n == 1));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn full_queue_times_out_without_enqueueing() {
    timeout(TEST_TIMEOUT, async {
        let remote = Arc::new(GatedRemote::new(false));
        let config = PoolConfig {
            workers: 1,
            queue_size: 1,
            submit_timeout: Duration::from_millis(100),
        };
        let h = harness(remote.clone(), config).await;
        // Drain concurrently: the result queue holds a single entry.
        let collector = tokio::spawn(collect(h.results));
        h.pool.start().await;

        let first = new_task(&h.repo, "first").await;
        let second = new_task(&h.repo, "second").await;
        let third = new_task(&h.repo, "third").await;

        // The only worker picks up the first job and blocks at the gate.
        h.pool.submit(Job::create(first)).await.unwrap();
        remote.wait_entered(1).await;
        // The second fills the queue.
        h.pool.submit(Job::create(second)).await.unwrap();
        // The third has nowhere to go.
        let err = h.pool.submit(Job::create(third.clone())).await.unwrap_err();
        assert_eq!(err, PoolError::SubmissionTimeout(Duration::from_millis(100)));

        remote.open();
        h.pool.stop().await;

        let results = collector.await.unwrap();
        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(result.success);
            assert_ne!(result.task_id, Some(third.id));
        }
        assert!(!remote.creates.lock().await.contains_key(&third.id));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn stop_cancels_waiting_submission() {
    timeout(TEST_TIMEOUT, async {
        let remote = Arc::new(GatedRemote::new(false));
        let config = PoolConfig {
            workers: 1,
            queue_size: 1,
            submit_timeout: Duration::from_secs(30),
        };
        let h = harness(remote.clone(), config).await;
        h.pool.start().await;

        h.pool
            .submit(Job::create(new_task(&h.repo, "a").await))
            .await
            .unwrap();
        remote.wait_entered(1).await;
        h.pool
            .submit(Job::create(new_task(&h.repo, "b").await))
            .await
            .unwrap();

        let waiting = {
            let pool = h.pool.clone();
            let task = new_task(&h.repo, "c").await;
            tokio::spawn(async move { pool.submit(Job::create(task)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopping = {
            let pool = h.pool.clone();
            tokio::spawn(async move { pool.stop().await })
        };
        assert_eq!(waiting.await.unwrap(), Err(PoolError::Cancelled));

        remote.open();
        stopping.await.unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn submission_before_start_enqueues_nothing() {
    let remote = Arc::new(MemoryRemote::new("memory"));
    let mut h = harness(remote.clone(), PoolConfig::default()).await;
    let task = new_task(&h.repo, "early").await;

    assert_eq!(
        h.pool.submit(Job::create(task)).await,
        Err(PoolError::NotStarted)
    );

    h.pool.start().await;
    h.pool.stop().await;
    assert!(h.results.recv().await.is_none());
    assert_eq!(remote.mutation_count(), 0);
}

#[tokio::test]
async fn repeated_start_and_stop_are_safe() {
    let remote = Arc::new(MemoryRemote::new("memory"));
    let mut h = harness(remote, PoolConfig::default()).await;

    h.pool.start().await;
    h.pool.start().await;
    h.pool.submit(Job::sync()).await.unwrap();
    h.pool.stop().await;
    h.pool.stop().await;

    let result = h.results.recv().await.unwrap();
    assert_eq!(result.kind, JobKind::SyncTasks);
    assert!(h.results.recv().await.is_none());
}

#[tokio::test]
async fn failing_job_does_not_affect_others() {
    timeout(TEST_TIMEOUT, async {
        let remote = Arc::new(MemoryRemote::new("memory"));
        let mut h = harness(remote.clone(), PoolConfig::default()).await;
        h.pool.start().await;

        let never_pushed = new_task(&h.repo, "local only").await;
        let fine = new_task(&h.repo, "fine").await;
        h.pool.submit(Job::update(never_pushed.clone())).await.unwrap();
        h.pool.submit(Job::create(fine.clone())).await.unwrap();
        h.pool.stop().await;

        let mut by_task = HashMap::new();
        while let Some(result) = h.results.recv().await {
            by_task.insert(result.task_id, result);
        }
        let failed = &by_task[&Some(never_pushed.id)];
        assert!(!failed.success);
        let message = failed.error_message().unwrap();
        assert!(message.starts_with(&format!(
            "failed to process 'update_task' operation on task ID {}",
            never_pushed.id
        )));
        assert!(message.contains("run sync"));
        assert!(by_task[&Some(fine.id)].success);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn late_update_does_not_revert_newer_edit() {
    timeout(TEST_TIMEOUT, async {
        let remote = Arc::new(StampingRemote::new("edit1"));
        let config = PoolConfig {
            workers: 2,
            queue_size: 16,
            submit_timeout: Duration::from_secs(1),
        };
        let mut h = harness(remote.clone(), config).await;
        h.pool.start().await;

        let task = new_task(&h.repo, "draft").await;
        h.pool.submit(Job::create(task.clone())).await.unwrap();
        assert!(h.results.recv().await.unwrap().success);

        let mut edit = h.repo.get_task(task.id).await.unwrap().unwrap();
        edit.title = "edit1".into();
        edit.last_modified = Utc::now();
        h.repo.update_task(&edit).await.unwrap();
        h.pool.submit(Job::update(edit.clone())).await.unwrap();
        // The first update is now in flight on one worker.
        remote.wait_slow_entered().await;

        edit.title = "edit2".into();
        edit.last_modified = Utc::now();
        h.repo.update_task(&edit).await.unwrap();
        h.pool.submit(Job::update(edit.clone())).await.unwrap();

        for _ in 0..2 {
            let result = h.results.recv().await.unwrap();
            assert!(result.success, "{:?}", result.error_message());
        }

        h.pool.submit(Job::sync()).await.unwrap();
        let synced = h.results.recv().await.unwrap();
        assert!(synced.success, "{:?}", synced.error_message());
        h.pool.stop().await;

        let stored = h.repo.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "edit2");
        assert_eq!(remote.only_task().await.title, "edit2");
    })
    .await
    .expect("test timed out");
}
