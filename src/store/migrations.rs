//! Schema versions of the task store.
//!
//! The `_migrations` table records every applied version; opening a store
//! applies whatever is newer than its highest recorded version.

use libsql::Connection;

use crate::error::DatabaseError;

/// One schema version.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Versions in ascending order.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_ids TEXT NOT NULL DEFAULT '{}',
                title TEXT NOT NULL,
                description TEXT,
                due TEXT,
                completed INTEGER NOT NULL DEFAULT 0,
                notified INTEGER NOT NULL DEFAULT 0,
                deleted INTEGER NOT NULL DEFAULT 0,
                last_modified TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_deleted ON tasks(deleted);
        "#,
    },
    Migration {
        version: 2,
        name: "service_snapshots",
        sql: r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                service TEXT NOT NULL,
                taken_at TEXT NOT NULL,
                external_ids TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_service ON snapshots(service, id);
        "#,
    },
];

/// Bring the schema behind `conn` up to the latest version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Cannot create version table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(version = migration.version, name = migration.name, "Upgrading task schema");
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Schema version {} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Task schema up to date");

    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Cannot query schema version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Cannot read schema version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Invalid schema version: {e}"))
        }),
        None => Ok(0),
    }
}

async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Cannot record schema version {version}: {e}")))?;
    Ok(())
}
