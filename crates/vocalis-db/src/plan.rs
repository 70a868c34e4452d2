//! Structured query requests and validated query plans.
//!
//! A [`QueryPlan`] can only be assembled from [`Ident`]s, and an `Ident` can
//! only be minted by the access client after checking the name against the
//! live schema. Values never enter the SQL text; they ride along as bound
//! parameters.

use crate::error::DbError;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// Longest identifier accepted.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Returns `true` if `name` matches `^[A-Za-z_][A-Za-z0-9_]*$` and is at most
/// [`MAX_IDENTIFIER_LEN`] bytes long.
pub fn is_valid_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A table or column name that exists in the live schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident(String);

impl Ident {
    /// Wraps a name already checked against the schema.
    pub(crate) fn checked(name: String) -> Self {
        debug_assert!(is_valid_identifier(&name));
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

/// An equality filter `column = value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

/// A structured read request: no free-form SQL involved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectRequest {
    pub table: String,
    /// Columns to project. Empty means all columns.
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    /// Requested row limit; never exceeds the policy's row cap.
    pub limit: Option<usize>,
}

/// A validated, parameterised statement ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    sql: String,
    params: Vec<SqlValue>,
    row_cap: usize,
}

impl QueryPlan {
    /// Builds a `SELECT` over checked identifiers.
    ///
    /// The SQL `LIMIT` is one past `row_cap` so the runner can tell whether
    /// the result was truncated.
    pub(crate) fn select(
        table: &Ident,
        columns: &[Ident],
        filters: Vec<(Ident, SqlValue)>,
        row_cap: usize,
    ) -> Self {
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(Ident::quoted)
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", projection, table.quoted());
        let mut params = Vec::with_capacity(filters.len());
        for (i, (column, value)) in filters.into_iter().enumerate() {
            let joiner = if i == 0 { " WHERE " } else { " AND " };
            sql.push_str(&format!("{}{} = ?{}", joiner, column.quoted(), i + 1));
            params.push(value);
        }
        sql.push_str(&format!(" LIMIT {}", row_cap + 1));

        Self {
            sql,
            params,
            row_cap,
        }
    }

    /// Builds `SELECT COUNT(*)` over a checked table.
    pub(crate) fn count(table: &Ident) -> Self {
        Self {
            sql: format!("SELECT COUNT(*) AS count FROM {}", table.quoted()),
            params: Vec::new(),
            row_cap: 1,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn row_cap(&self) -> usize {
        self.row_cap
    }
}

/// Converts a JSON scalar into a bindable SQLite value.
pub(crate) fn to_sql_value(value: &Value) -> Result<SqlValue, DbError> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(SqlValue::Integer(i)),
            (None, Some(f)) => Ok(SqlValue::Real(f)),
            _ => Err(DbError::Validation(format!("unsupported number: {}", n))),
        },
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => Err(DbError::Validation(
            "filter values must be scalars".to_string(),
        )),
    }
}
