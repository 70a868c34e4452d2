//! Error types for database access.

use vocalis_types::ToolErrorKind;

/// Errors returned by the [`AccessClient`](crate::AccessClient).
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The statement shape is not allowed under the current policy.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A table name that does not exist in the live schema.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// A column name that does not exist on the table.
    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// No pooled connection became available in time.
    #[error("no database connection available after waiting {waited_ms} ms")]
    PoolExhausted { waited_ms: u64 },

    /// The underlying SQLite call failed.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl DbError {
    /// Maps the error onto the tool failure taxonomy.
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            DbError::Permission(_) => ToolErrorKind::Permission,
            DbError::Validation(_) | DbError::UnknownTable(_) | DbError::UnknownColumn { .. } => {
                ToolErrorKind::Validation
            }
            DbError::PoolExhausted { .. } => ToolErrorKind::PoolExhausted,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                ToolErrorKind::Timeout
            }
            DbError::Sqlite(_) => ToolErrorKind::Execution,
        }
    }
}
