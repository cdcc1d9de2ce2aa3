//! Job and JobResult: the unit of deferred remote work and its outcome.

use std::fmt;

use uuid::Uuid;

use crate::error::JobError;
use crate::tasks::model::Task;

/// What a job does, with the payload that operation needs.
#[derive(Debug, Clone)]
pub enum JobOperation {
    /// Create the task on every service that has no id for it yet.
    CreateTask(Task),
    /// Push the task's current fields to every service.
    UpdateTask(Task),
    /// Delete the task from every service that knows it.
    DeleteTask { task_id: i64 },
    SetCompleted { task_id: i64, completed: bool },
    /// Full reconciliation of every service.
    SyncTasks,
}

/// Operation tag, carried into results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    CreateTask,
    UpdateTask,
    DeleteTask,
    SetCompleted,
    SyncTasks,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTask => "create_task",
            Self::UpdateTask => "update_task",
            Self::DeleteTask => "delete_task",
            Self::SetCompleted => "set_task_completed",
            Self::SyncTasks => "sync_tasks",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JobOperation {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::CreateTask(_) => JobKind::CreateTask,
            Self::UpdateTask(_) => JobKind::UpdateTask,
            Self::DeleteTask { .. } => JobKind::DeleteTask,
            Self::SetCompleted { .. } => JobKind::SetCompleted,
            Self::SyncTasks => JobKind::SyncTasks,
        }
    }

    /// The local task this operation affects, if any.
    pub fn task_id(&self) -> Option<i64> {
        match self {
            Self::CreateTask(task) | Self::UpdateTask(task) => Some(task.id),
            Self::DeleteTask { task_id } | Self::SetCompleted { task_id, .. } => Some(*task_id),
            Self::SyncTasks => None,
        }
    }
}

/// A submitted unit of work. Immutable once built.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub operation: JobOperation,
}

impl Job {
    pub fn new(operation: JobOperation) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
        }
    }

    pub fn create(task: Task) -> Self {
        Self::new(JobOperation::CreateTask(task))
    }

    pub fn update(task: Task) -> Self {
        Self::new(JobOperation::UpdateTask(task))
    }

    pub fn delete(task_id: i64) -> Self {
        Self::new(JobOperation::DeleteTask { task_id })
    }

    pub fn set_completed(task_id: i64, completed: bool) -> Self {
        Self::new(JobOperation::SetCompleted { task_id, completed })
    }

    pub fn sync() -> Self {
        Self::new(JobOperation::SyncTasks)
    }

    pub fn kind(&self) -> JobKind {
        self.operation.kind()
    }

    pub fn task_id(&self) -> Option<i64> {
        self.operation.task_id()
    }
}

/// Outcome of one consumed job. Exactly one is published per job.
#[derive(Debug)]
pub struct JobResult {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub task_id: Option<i64>,
    pub success: bool,
    pub error: Option<JobError>,
}

impl JobResult {
    pub(crate) fn from_outcome(job: &Job, outcome: Result<(), JobError>) -> Self {
        let error = outcome.err();
        Self {
            job_id: job.id,
            kind: job.kind(),
            task_id: job.task_id(),
            success: error.is_none(),
            error,
        }
    }

    /// User-facing description of a failure, naming the operation and task.
    pub fn error_message(&self) -> Option<String> {
        let err = self.error.as_ref()?;
        Some(match self.task_id {
            Some(id) => format!("failed to process '{}' operation on task ID {id}: {err}", self.kind),
            None => format!("failed to process '{}' operation: {err}", self.kind),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::tasks::model::NewTask;

    #[test]
    fn job_ids_are_unique() {
        let a = Job::sync();
        let b = Job::sync();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn kind_and_task_id_follow_operation() {
        let task = NewTask::new("Buy milk").into_task(3);
        assert_eq!(Job::create(task.clone()).kind(), JobKind::CreateTask);
        assert_eq!(Job::update(task).task_id(), Some(3));
        assert_eq!(Job::set_completed(5, true).kind().as_str(), "set_task_completed");
        assert_eq!(Job::delete(9).task_id(), Some(9));
        assert_eq!(Job::sync().task_id(), None);
    }

    #[test]
    fn success_result_has_no_message() {
        let job = Job::delete(1);
        let result = JobResult::from_outcome(&job, Ok(()));
        assert!(result.success);
        assert_eq!(result.job_id, job.id);
        assert!(result.error_message().is_none());
    }

    #[test]
    fn failure_message_names_operation_and_task() {
        let job = Job::set_completed(4, true);
        let err = JobError::Remote(RemoteError::request_failed("todoist", "HTTP 500"));
        let result = JobResult::from_outcome(&job, Err(err));
        assert!(!result.success);
        let msg = result.error_message().unwrap();
        assert!(msg.starts_with("failed to process 'set_task_completed' operation on task ID 4: "));
        assert!(msg.contains("HTTP 500"));
    }

    #[test]
    fn sync_failure_message_has_no_task() {
        let job = Job::sync();
        let err = JobError::MissingTask { task_id: 1 };
        let msg = JobResult::from_outcome(&job, Err(err)).error_message().unwrap();
        assert_eq!(msg, "failed to process 'sync_tasks' operation: Task 1 not found");
    }
}
