//! Error types for tasksync.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Invalid task: {0}")]
    InvalidTask(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    pub(crate) fn task_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "task".to_string(),
            id: id.to_string(),
        }
    }
}

/// Errors from a remote task service.
///
/// Callers only need `RequestFailed`; the other variants exist so log lines
/// say what actually went wrong.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("{service} request failed: {reason}")]
    RequestFailed { service: String, reason: String },

    #[error("{service} task {id} not found")]
    NotFound { service: String, id: String },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },
}

impl RemoteError {
    pub fn request_failed(service: impl Into<String>, reason: impl ToString) -> Self {
        Self::RequestFailed {
            service: service.into(),
            reason: reason.to_string(),
        }
    }
}

/// Job submission errors, returned synchronously from `WorkerPool::submit`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("API worker pool not started")]
    NotStarted,

    #[error("Job submission timed out after {0:?}")]
    SubmissionTimeout(Duration),

    #[error("Job submission cancelled: pool is stopping")]
    Cancelled,
}

/// Failure of a single job's handler, reported through a `JobResult`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Task {task_id} not found")]
    MissingTask { task_id: i64 },

    #[error("Task {task_id} has no {service} id, run sync to add it to {service}")]
    MissingExternalId { task_id: i64, service: String },

    #[error("Sync sub-task panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Reconciliation failures. The variant names the phase that failed first.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to fetch tasks for {service}: {reason}")]
    Fetch { service: String, reason: String },

    #[error("Failed to push missing {service} tasks: {source}")]
    PushMissingRemote {
        service: String,
        #[source]
        source: Box<JobError>,
    },

    #[error("Failed to resolve matched {service} tasks: {source}")]
    ResolvePairs {
        service: String,
        #[source]
        source: Box<JobError>,
    },

    #[error("Failed to purge deleted local tasks: {0}")]
    Purge(DatabaseError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
