//! The access client: the only path from the assistant to the store.

use crate::error::DbError;
use crate::plan::{is_valid_identifier, to_sql_value, Ident, QueryPlan, SelectRequest};
use crate::pool::DbPool;
use crate::statement::{classify, StatementKind};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, Row, Statement};
use serde_json::{Number, Value};
use std::sync::Arc;
use std::time::Duration;
use vocalis_types::{ColumnInfo, RowSet};

/// Access rules fixed at start-up.
///
/// There is no setter: a client's policy cannot change for the lifetime of
/// the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Permit statements other than reads.
    pub allow_write: bool,
    /// Maximum number of rows returned by any query.
    pub max_rows: usize,
    /// Maximum wait for a pooled connection.
    pub acquire_timeout: Duration,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            allow_write: false,
            max_rows: 100,
            acquire_timeout: Duration::from_secs(2),
        }
    }
}

/// A query to run through [`AccessClient::run_query`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryRequest {
    /// Free-form SQL, subject to statement classification. `params` are
    /// bound positionally.
    Sql { sql: String, params: Vec<Value> },
    /// A structured read compiled into a [`QueryPlan`].
    Select(SelectRequest),
}

impl QueryRequest {
    pub fn sql(sql: impl Into<String>) -> Self {
        Self::Sql {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Result of [`AccessClient::run_query`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(RowSet),
    /// Number of rows changed by a permitted write.
    Affected(usize),
}

type Conn = PooledConnection<SqliteConnectionManager>;

/// Read-only, identifier-safe access to a pooled SQLite store.
///
/// Every method is blocking; async callers should run them on
/// `tokio::task::spawn_blocking`. Connections are acquired per call and
/// returned to the pool when the guard drops, on every exit path.
#[derive(Debug, Clone)]
pub struct AccessClient {
    pool: DbPool,
    policy: Arc<AccessPolicy>,
}

impl AccessClient {
    pub fn new(pool: DbPool, policy: AccessPolicy) -> Self {
        Self {
            pool,
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    fn connection(&self) -> Result<Conn, DbError> {
        self.pool
            .get_timeout(self.policy.acquire_timeout)
            .map_err(|e| {
                tracing::warn!(
                    waited_ms = self.policy.acquire_timeout.as_millis() as u64,
                    "database pool exhausted: {}",
                    e
                );
                DbError::PoolExhausted {
                    waited_ms: self.policy.acquire_timeout.as_millis() as u64,
                }
            })
    }

    /// Lists user tables and views, sorted by name.
    pub fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let conn = self.connection()?;
        live_tables(&conn)
    }

    /// Returns the column layout of a table.
    ///
    /// # Errors
    ///
    /// `DbError::Validation` if the name is not an identifier,
    /// `DbError::UnknownTable` if it is not in the live schema.
    pub fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>, DbError> {
        check_grammar(table)?;
        let conn = self.connection()?;
        let table = resolve_table(&conn, table)?;
        table_columns(&conn, &table)
    }

    /// Counts the rows of a table.
    pub fn count_rows(&self, table: &str) -> Result<i64, DbError> {
        check_grammar(table)?;
        let conn = self.connection()?;
        let table = resolve_table(&conn, table)?;
        let plan = QueryPlan::count(&table);
        let count = conn.query_row(plan.sql(), [], |row| row.get(0))?;
        Ok(count)
    }

    /// Runs a query under the access policy.
    ///
    /// Free-form SQL is classified before a connection is acquired; rejected
    /// shapes never reach the store.
    pub fn run_query(&self, request: &QueryRequest) -> Result<QueryOutput, DbError> {
        match request {
            QueryRequest::Sql { sql, params } => self.run_sql(sql, params),
            QueryRequest::Select(select) => self.run_select(select),
        }
    }

    fn run_sql(&self, sql: &str, params: &[Value]) -> Result<QueryOutput, DbError> {
        let kind = classify(sql)?;
        if let StatementKind::Write(keyword) = &kind {
            if !self.policy.allow_write {
                tracing::warn!(keyword = %keyword, "rejected non-read statement");
                return Err(DbError::Permission(format!(
                    "only read queries are allowed; '{}' is not authorized",
                    keyword
                )));
            }
        }
        let bound = params
            .iter()
            .map(to_sql_value)
            .collect::<Result<Vec<_>, _>>()?;

        let conn = self.connection()?;
        let mut stmt = conn.prepare(sql)?;

        // SQLite's own verdict; catches writes hidden behind a read keyword,
        // e.g. `WITH ... DELETE`.
        if !stmt.readonly() && !self.policy.allow_write {
            tracing::warn!("rejected statement that SQLite reports as writing");
            return Err(DbError::Permission(
                "statement would modify the database".to_string(),
            ));
        }

        if stmt.column_count() == 0 {
            let affected = stmt.execute(params_from_iter(bound.iter()))?;
            return Ok(QueryOutput::Affected(affected));
        }
        let rows = collect_rows(&mut stmt, &bound, self.policy.max_rows)?;
        Ok(QueryOutput::Rows(rows))
    }

    fn run_select(&self, request: &SelectRequest) -> Result<QueryOutput, DbError> {
        check_grammar(&request.table)?;
        for name in request
            .columns
            .iter()
            .chain(request.filters.iter().map(|f| &f.column))
        {
            check_grammar(name)?;
        }
        let bound = request
            .filters
            .iter()
            .map(|f| to_sql_value(&f.value))
            .collect::<Result<Vec<_>, _>>()?;

        let conn = self.connection()?;
        let table = resolve_table(&conn, &request.table)?;
        let known = table_columns(&conn, &table)?;

        let columns = request
            .columns
            .iter()
            .map(|c| resolve_column(&table, &known, c))
            .collect::<Result<Vec<_>, _>>()?;
        let filters = request
            .filters
            .iter()
            .zip(bound)
            .map(|(f, v)| resolve_column(&table, &known, &f.column).map(|c| (c, v)))
            .collect::<Result<Vec<_>, _>>()?;

        let cap = request
            .limit
            .unwrap_or(self.policy.max_rows)
            .clamp(1, self.policy.max_rows.max(1));
        let plan = QueryPlan::select(&table, &columns, filters, cap);
        tracing::debug!(sql = plan.sql(), "running structured select");

        let mut stmt = conn.prepare(plan.sql())?;
        let mut rows = collect_rows(&mut stmt, plan.params(), plan.row_cap())?;
        // A caller-requested limit is not truncation.
        if request.limit.is_some_and(|l| l <= self.policy.max_rows) {
            rows.truncated = false;
        }
        Ok(QueryOutput::Rows(rows))
    }
}

fn check_grammar(name: &str) -> Result<(), DbError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(DbError::Validation(format!("invalid identifier: {:?}", name)))
    }
}

fn live_tables(conn: &Connection) -> Result<Vec<String>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type IN ('table', 'view')
           AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
           AND name NOT LIKE '\\_vocalis\\_%' ESCAPE '\\'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Looks a table up in the live schema. SQLite identifiers are
/// case-insensitive; the canonical spelling is returned.
fn resolve_table(conn: &Connection, name: &str) -> Result<Ident, DbError> {
    live_tables(conn)?
        .into_iter()
        .find(|t| t.eq_ignore_ascii_case(name))
        .filter(|t| is_valid_identifier(t))
        .map(Ident::checked)
        .ok_or_else(|| DbError::UnknownTable(name.to_string()))
}

fn resolve_column(table: &Ident, known: &[ColumnInfo], name: &str) -> Result<Ident, DbError> {
    known
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .filter(|c| is_valid_identifier(&c.name))
        .map(|c| Ident::checked(c.name.clone()))
        .ok_or_else(|| DbError::UnknownColumn {
            table: table.as_str().to_string(),
            column: name.to_string(),
        })
}

fn table_columns(conn: &Connection, table: &Ident) -> Result<Vec<ColumnInfo>, DbError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table.as_str()))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                data_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                nullable: row.get::<_, i64>(3)? == 0,
                default_value: row.get(4)?,
                primary_key: row.get::<_, i64>(5)? > 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Reads at most `cap` rows, flagging truncation if more were available.
fn collect_rows(
    stmt: &mut Statement<'_>,
    params: &[SqlValue],
    cap: usize,
) -> Result<RowSet, DbError> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next()? {
        if out.len() == cap {
            truncated = true;
            break;
        }
        out.push(row_values(row, width)?);
    }

    Ok(RowSet {
        columns,
        rows: out,
        truncated,
    })
}

fn row_values(row: &Row<'_>, width: usize) -> Result<Vec<Value>, DbError> {
    (0..width)
        .map(|i| {
            let value = match row.get_ref(i)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(n) => Value::from(n),
                ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
                ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
                ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
            };
            Ok(value)
        })
        .collect()
}
