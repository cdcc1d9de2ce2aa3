use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use tasksync::cli;
use tasksync::config::Config;
use tasksync::reminders::{self, TaskReminder};
use tasksync::remote::{GoogleTasksClient, MemoryRemote, RemoteSet, TodoistClient};
use tasksync::store::{LibSqlBackend, TaskRepository};
use tasksync::tasks::TaskService;
use tasksync::worker::{Job, WorkerDeps, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    eprintln!("tasksync v{}", env!("CARGO_PKG_VERSION"));

    // ── Database ─────────────────────────────────────────────────────────
    let repo: Arc<dyn TaskRepository> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Remote services ──────────────────────────────────────────────────
    let mut remotes = RemoteSet::new();
    if let Some(google) = config.google_tasks.clone() {
        let client = GoogleTasksClient::new(google.token, google.list_id);
        check_google_list(&client).await;
        remotes = remotes.with(Arc::new(client));
    }
    if let Some(token) = config.todoist_token.clone() {
        remotes = remotes.with(Arc::new(TodoistClient::new(token)));
    }
    if config.memory_remote {
        remotes = remotes.with(Arc::new(MemoryRemote::new("memory")));
    }
    if remotes.is_empty() {
        eprintln!("   Services: none (set GOOGLE_TASKS_TOKEN or TODOIST_API_TOKEN)");
    } else {
        eprintln!("   Services: {}", remotes.names().join(", "));
    }

    // ── Worker pool ──────────────────────────────────────────────────────
    let pool = Arc::new(WorkerPool::new(
        config.pool.clone(),
        WorkerDeps {
            repo: Arc::clone(&repo),
            remotes,
            sync: config.sync.clone(),
            result_grace: config.pool.submit_timeout,
        },
    ));
    let mut results = pool
        .take_results()
        .await
        .context("worker pool result stream already taken")?;
    pool.start().await;

    let results_handle = tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            if let Some(message) = result.error_message() {
                eprintln!("\nError: {message}");
            }
        }
    });

    if config.sync_on_startup {
        if let Err(e) = pool.submit(Job::sync()).await {
            tracing::warn!(error = %e, "Failed to queue startup sync");
        }
    }

    // ── Reminders ────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let (reminder_tx, mut reminder_rx) = broadcast::channel::<TaskReminder>(64);
    let reminder_handle = reminders::spawn_reminder_loop(
        Arc::clone(&repo),
        config.reminders.clone(),
        reminder_tx,
        cancel.clone(),
    );
    tokio::spawn(async move {
        while let Ok(reminder) = reminder_rx.recv().await {
            eprintln!("\nDue: {} (task {})", reminder.title, reminder.task_id);
        }
    });

    // ── Ctrl-C ───────────────────────────────────────────────────────────
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    eprintln!("   Type `help` for commands.\n");
    let service = TaskService::new(Arc::clone(&repo), Arc::clone(&pool), config.limits);
    cli::run_repl(&service, cancel.clone()).await;

    // ── Shutdown ─────────────────────────────────────────────────────────
    cancel.cancel();
    pool.stop().await;
    let _ = reminder_handle.await;
    let _ = results_handle.await;
    Ok(())
}

/// Print the user's Google task lists and warn if the configured one is not
/// among them. Sync still runs; its calls fail with the service's error.
async fn check_google_list(client: &GoogleTasksClient) {
    match client.task_lists().await {
        Ok(lists) => {
            for list in &lists {
                eprintln!("   Google list: {} ({})", list.title, list.id);
            }
            let wanted = client.list_id();
            if wanted != "@default" && !lists.iter().any(|l| l.id == wanted) {
                tracing::warn!(list_id = wanted, "GOOGLE_TASKS_LIST_ID is not one of your task lists");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not list Google task lists"),
    }
}
