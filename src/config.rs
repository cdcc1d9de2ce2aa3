//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of long-lived worker tasks.
    pub workers: usize,
    /// Capacity of both the job queue and the result queue.
    pub queue_size: usize,
    /// How long `submit` waits on a full queue before giving up.
    pub submit_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 64,
            submit_timeout: Duration::from_secs(5),
        }
    }
}

/// Reconciliation configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum simultaneous in-flight corrective calls per phase.
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { concurrency: 3 }
    }
}

/// Field length limits applied to local mutations.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub title_max_len: usize,
    pub description_max_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            title_max_len: 256,
            description_max_len: 4096,
        }
    }
}

/// Due-task reminder loop configuration.
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    pub interval: Duration,
    /// Tasks due within this distance of "now" (either side) are reminded.
    pub window: Duration,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            window: Duration::from_secs(60),
        }
    }
}

/// Google Tasks access: an OAuth bearer token and the task list to sync.
#[derive(Debug, Clone)]
pub struct GoogleTasksConfig {
    pub token: SecretString,
    /// `@default` is the user's primary list.
    pub list_id: String,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub pool: PoolConfig,
    pub sync: SyncConfig,
    pub limits: Limits,
    pub reminders: ReminderConfig,
    /// Run a full sync as soon as the pool starts.
    pub sync_on_startup: bool,
    /// Google Tasks is integrated only when a token is set.
    pub google_tasks: Option<GoogleTasksConfig>,
    /// Todoist API token. The Todoist service is integrated only when set.
    pub todoist_token: Option<SecretString>,
    /// Integrate the in-process memory remote (local development).
    pub memory_remote: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/tasksync.db"),
            pool: PoolConfig::default(),
            sync: SyncConfig::default(),
            limits: Limits::default(),
            reminders: ReminderConfig::default(),
            sync_on_startup: false,
            google_tasks: None,
            todoist_token: None,
            memory_remote: false,
        }
    }
}

impl Config {
    /// Load configuration from `TASKSYNC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let parse_u64 = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };
        let parse_bool = |key: &str| -> bool {
            lookup(key)
                .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false)
        };

        let workers = parse_u64("TASKSYNC_WORKERS", defaults.pool.workers as u64) as usize;
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TASKSYNC_WORKERS".into(),
                message: "must be at least 1".into(),
            });
        }

        let queue_size = parse_u64("TASKSYNC_QUEUE_SIZE", defaults.pool.queue_size as u64) as usize;
        if queue_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TASKSYNC_QUEUE_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }

        let concurrency =
            parse_u64("TASKSYNC_SYNC_CONCURRENCY", defaults.sync.concurrency as u64).max(1) as usize;

        let secret = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .map(SecretString::from)
        };
        let todoist_token = secret("TODOIST_API_TOKEN");
        let google_tasks = secret("GOOGLE_TASKS_TOKEN").map(|token| GoogleTasksConfig {
            token,
            list_id: lookup("GOOGLE_TASKS_LIST_ID")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "@default".to_string()),
        });

        Ok(Self {
            db_path: lookup("TASKSYNC_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            pool: PoolConfig {
                workers,
                queue_size,
                submit_timeout: Duration::from_secs(parse_u64(
                    "TASKSYNC_SUBMIT_TIMEOUT_SECS",
                    defaults.pool.submit_timeout.as_secs(),
                )),
            },
            sync: SyncConfig { concurrency },
            limits: Limits {
                title_max_len: parse_u64(
                    "TASKSYNC_TITLE_MAX_LEN",
                    defaults.limits.title_max_len as u64,
                ) as usize,
                description_max_len: parse_u64(
                    "TASKSYNC_DESCRIPTION_MAX_LEN",
                    defaults.limits.description_max_len as u64,
                ) as usize,
            },
            reminders: ReminderConfig {
                interval: Duration::from_secs(
                    parse_u64(
                        "TASKSYNC_REMINDER_INTERVAL_SECS",
                        defaults.reminders.interval.as_secs(),
                    )
                    .max(1),
                ),
                window: Duration::from_secs(parse_u64(
                    "TASKSYNC_REMINDER_WINDOW_SECS",
                    defaults.reminders.window.as_secs(),
                )),
            },
            sync_on_startup: parse_bool("TASKSYNC_SYNC_ON_STARTUP"),
            google_tasks,
            todoist_token,
            memory_remote: parse_bool("TASKSYNC_MEMORY_REMOTE"),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.pool.workers, 4);
        assert_eq!(cfg.pool.queue_size, 64);
        assert_eq!(cfg.pool.submit_timeout, Duration::from_secs(5));
        assert_eq!(cfg.sync.concurrency, 3);
        assert!(!cfg.sync_on_startup);
        assert!(cfg.todoist_token.is_none());
        assert!(cfg.google_tasks.is_none());
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("TASKSYNC_WORKERS", "2"),
            ("TASKSYNC_QUEUE_SIZE", "8"),
            ("TASKSYNC_SYNC_ON_STARTUP", "true"),
            ("TASKSYNC_DB_PATH", "/tmp/t.db"),
            ("TODOIST_API_TOKEN", "tok"),
        ]))
        .unwrap();
        assert_eq!(cfg.pool.workers, 2);
        assert_eq!(cfg.pool.queue_size, 8);
        assert!(cfg.sync_on_startup);
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/t.db"));
        assert_eq!(cfg.todoist_token.unwrap().expose_secret(), "tok");
    }

    #[test]
    fn google_tasks_needs_token_and_defaults_list() {
        let cfg = Config::from_lookup(lookup_from(&[("GOOGLE_TASKS_LIST_ID", "abc")])).unwrap();
        assert!(cfg.google_tasks.is_none());

        let cfg = Config::from_lookup(lookup_from(&[("GOOGLE_TASKS_TOKEN", "ya29")])).unwrap();
        let google = cfg.google_tasks.unwrap();
        assert_eq!(google.token.expose_secret(), "ya29");
        assert_eq!(google.list_id, "@default");

        let cfg = Config::from_lookup(lookup_from(&[
            ("GOOGLE_TASKS_TOKEN", "ya29"),
            ("GOOGLE_TASKS_LIST_ID", "MTIzNDU"),
        ]))
        .unwrap();
        assert_eq!(cfg.google_tasks.unwrap().list_id, "MTIzNDU");
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let cfg = Config::from_lookup(lookup_from(&[("TASKSYNC_SUBMIT_TIMEOUT_SECS", "soon")]))
            .unwrap();
        assert_eq!(cfg.pool.submit_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_workers_rejected() {
        let err = Config::from_lookup(lookup_from(&[("TASKSYNC_WORKERS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
