//! Embedded demo fixtures.
//!
//! Fixture scripts are embedded at compile time and applied in order, tracked
//! by the `_vocalis_migrations` table so each runs exactly once per database.
//! The tracking table is hidden from the assistant's table listing.

use rusqlite::Connection;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    name: "000_demo_schema",
    sql: include_str!("fixtures/000_demo_schema.sql"),
}];

/// Errors that can occur while seeding the demo database.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The database file could not be opened for writing.
    #[error("failed to open database '{path}': {source}")]
    Open {
        path: String,
        source: rusqlite::Error,
    },

    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Opens `path` with a plain read-write connection and applies the demo
/// fixtures.
///
/// This must run before the read-only pool is built: pooled connections
/// refuse DDL.
pub fn seed_demo(path: &str) -> Result<usize, MigrationError> {
    let conn = Connection::open(path).map_err(|e| MigrationError::Open {
        path: path.to_string(),
        source: e,
    })?;
    let applied = seed_demo_schema(&conn)?;
    tracing::info!(path, applied, "demo database ready");
    Ok(applied)
}

/// Applies pending demo fixtures to `conn`, returning how many ran.
pub fn seed_demo_schema(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _vocalis_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| MigrationError::ExecutionFailed {
        name: "_vocalis_migrations_bootstrap".to_string(),
        source: e,
    })?;

    let mut applied = 0;

    for migration in migrations {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _vocalis_migrations WHERE name = ?1",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;

        if already_applied {
            tracing::debug!(migration = migration.name, "fixture already applied");
            continue;
        }

        tracing::info!(migration = migration.name, "applying fixture");

        let failed = |e| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source: e,
        };

        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO _vocalis_migrations (name) VALUES (?1)",
            [migration.name],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;

        applied += 1;
    }

    Ok(applied)
}
