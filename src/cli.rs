//! Line-oriented stdin REPL.

use chrono::{DateTime, NaiveDate, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::tasks::model::{NewTask, Task};
use crate::tasks::service::{TaskEdit, TaskService};

pub const HELP: &str = "\
Commands:
  add <title> [| <due>]   create a task (due: RFC 3339 or YYYY-MM-DD)
  list                    show open and completed tasks
  done <id>               mark a task completed
  undo <id>               mark a task not completed
  edit <id> <title>       change a task's title
  rm <id>                 delete a task
  sync                    reconcile with remote services
  quit                    exit";

/// One parsed REPL line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add {
        title: String,
        due: Option<DateTime<Utc>>,
    },
    List,
    Done(i64),
    Undo(i64),
    Edit {
        id: i64,
        title: String,
    },
    Remove(i64),
    Sync,
    Help,
    Quit,
}

/// Parse a due date given as RFC 3339 or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_due(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_id(arg: &str) -> Result<i64, String> {
    arg.trim()
        .parse()
        .map_err(|_| format!("not a task id: {:?}", arg.trim()))
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match verb {
        "add" => {
            let (title, due) = match rest.split_once('|') {
                Some((title, due)) => {
                    let due = parse_due(due)
                        .ok_or_else(|| format!("unrecognised due date: {:?}", due.trim()))?;
                    (title.trim(), Some(due))
                }
                None => (rest, None),
            };
            if title.is_empty() {
                return Err("usage: add <title> [| <due>]".into());
            }
            Ok(Command::Add {
                title: title.to_string(),
                due,
            })
        }
        "list" | "ls" => Ok(Command::List),
        "done" => parse_id(rest).map(Command::Done),
        "undo" => parse_id(rest).map(Command::Undo),
        "edit" => {
            let (id, title) = rest
                .split_once(' ')
                .ok_or_else(|| "usage: edit <id> <title>".to_string())?;
            Ok(Command::Edit {
                id: parse_id(id)?,
                title: title.trim().to_string(),
            })
        }
        "rm" | "delete" => parse_id(rest).map(Command::Remove),
        "sync" => Ok(Command::Sync),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "/quit" => Ok(Command::Quit),
        other => Err(format!("unknown command {other:?}, try `help`")),
    }
}

/// One task as a list row.
pub fn format_task(task: &Task) -> String {
    let mark = if task.completed { "x" } else { " " };
    let due = task
        .due
        .map(|d| format!("  (due {})", d.format("%Y-%m-%d %H:%M")))
        .unwrap_or_default();
    let services = if task.external_ids.is_empty() {
        String::new()
    } else {
        let names: Vec<&str> = task.external_ids.keys().map(String::as_str).collect();
        format!("  [{}]", names.join(", "))
    };
    format!("{:>4} [{mark}] {}{due}{services}", task.id, task.title)
}

/// Execute one command. Returns `false` when the REPL should exit.
pub async fn execute(service: &TaskService, command: Command) -> bool {
    let outcome = match command {
        Command::Quit => return false,
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::List => service.list().await.map(|tasks| {
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in &tasks {
                println!("{}", format_task(task));
            }
        }),
        Command::Add { title, due } => {
            let mut task = NewTask::new(title);
            if let Some(due) = due {
                task = task.with_due(due);
            }
            service
                .add(task)
                .await
                .map(|t| println!("Added task {}", t.id))
        }
        Command::Done(id) => service.complete(id, true).await,
        Command::Undo(id) => service.complete(id, false).await,
        Command::Edit { id, title } => service.edit(id, TaskEdit::title(title)).await.map(|_| ()),
        Command::Remove(id) => service.remove(id).await,
        Command::Sync => service
            .sync()
            .await
            .map(|()| println!("Sync queued")),
    };
    if let Err(e) = outcome {
        eprintln!("Error: {e}");
    }
    true
}

/// Read commands from stdin until EOF, `quit` or cancellation.
pub async fn run_repl(service: &TaskService, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("> ");
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    eprint!("> ");
                    continue;
                }
                match parse_command(&line) {
                    Ok(command) => {
                        if !execute(service, command).await {
                            break;
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                }
                eprint!("> ");
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Error reading stdin: {}", e);
                break;
            }
        }
    }
}
