//! Due-task reminder loop.
//!
//! Every `ReminderConfig::interval` the loop looks for open tasks due within
//! `window` of now that were never reminded, broadcasts a [`TaskReminder`]
//! for each and marks it notified so it fires once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReminderConfig;
use crate::store::TaskRepository;

/// A task that just came due.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReminder {
    pub task_id: i64,
    pub title: String,
    pub due: DateTime<Utc>,
}

/// Spawn the reminder loop. The first check runs immediately.
pub fn spawn_reminder_loop(
    repo: Arc<dyn TaskRepository>,
    config: ReminderConfig,
    reminder_tx: broadcast::Sender<TaskReminder>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval = ?config.interval, window = ?config.window, "Reminder loop started");
        let mut tick = tokio::time::interval(config.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    run_reminder_cycle(&repo, &config, &reminder_tx, Utc::now()).await;
                }
            }
        }
        info!("Reminder loop stopped");
    })
}

/// One check. Returns how many reminders were sent.
pub async fn run_reminder_cycle(
    repo: &Arc<dyn TaskRepository>,
    config: &ReminderConfig,
    reminder_tx: &broadcast::Sender<TaskReminder>,
    now: DateTime<Utc>,
) -> usize {
    let window = chrono::Duration::from_std(config.window).unwrap_or(chrono::Duration::zero());
    let due = match repo.list_due_unnotified(now - window, now + window).await {
        Ok(tasks) => tasks,
        Err(e) => {
            warn!(error = %e, "Failed to list due tasks");
            return 0;
        }
    };
    if due.is_empty() {
        debug!("No tasks due");
        return 0;
    }

    let mut sent = 0;
    for task in due {
        let Some(due_at) = task.due else { continue };
        if let Err(e) = repo.mark_notified(task.id).await {
            warn!(task_id = task.id, error = %e, "Failed to mark task notified");
            continue;
        }
        info!(task_id = task.id, title = %task.title, due = %due_at, "Task due");
        // No subscribers is fine; the log line above still records it.
        let _ = reminder_tx.send(TaskReminder {
            task_id: task.id,
            title: task.title,
            due: due_at,
        });
        sent += 1;
    }
    sent
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::LibSqlBackend;
    use crate::tasks::model::NewTask;

    fn config() -> ReminderConfig {
        ReminderConfig {
            interval: Duration::from_millis(20),
            window: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn reminds_once_per_task() {
        let repo: Arc<dyn TaskRepository> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let now = Utc::now();
        let task = repo
            .create_task(&NewTask::new("Call mum").with_due(now))
            .await
            .unwrap();
        repo.create_task(&NewTask::new("Later").with_due(now + chrono::Duration::hours(2)))
            .await
            .unwrap();

        let (tx, mut rx) = broadcast::channel(8);
        assert_eq!(run_reminder_cycle(&repo, &config(), &tx, now).await, 1);
        let reminder = rx.recv().await.unwrap();
        assert_eq!(reminder.task_id, task.id);
        assert_eq!(reminder.title, "Call mum");

        assert_eq!(run_reminder_cycle(&repo, &config(), &tx, now).await, 0);
    }

    #[tokio::test]
    async fn loop_stops_on_cancel() {
        let repo: Arc<dyn TaskRepository> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        repo.create_task(&NewTask::new("Now").with_due(Utc::now()))
            .await
            .unwrap();
        let (tx, mut rx) = broadcast::channel(8);
        let cancel = CancellationToken::new();

        let handle = spawn_reminder_loop(repo, config(), tx, cancel.clone());
        let reminder = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reminder.title, "Now");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
