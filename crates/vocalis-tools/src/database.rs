//! Database tools backed by the [`AccessClient`].
//!
//! Every call runs on the blocking pool. Transient failures (pool pressure,
//! busy database) are retried once after [`RETRY_BACKOFF`].

use crate::error::ToolError;
use crate::tool::Tool;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use vocalis_db::{AccessClient, DbError, Filter, QueryOutput, QueryRequest, SelectRequest};
use vocalis_types::{ParamSpec, ParamType, ToolDescriptor, ToolPayload};

/// Delay before the single retry of a transient failure.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Registration order of the database tools.
pub const DEFAULT_TOOL_NAMES: &[&str] = &[
    "list_database_tables",
    "describe_table",
    "query_database",
    "get_table_count",
    "select_rows",
];

/// Builds every database tool, in [`DEFAULT_TOOL_NAMES`] order.
pub fn database_tools(client: &AccessClient) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ListTablesTool::new(client.clone())),
        Arc::new(DescribeTableTool::new(client.clone())),
        Arc::new(QueryDatabaseTool::new(client.clone())),
        Arc::new(TableCountTool::new(client.clone())),
        Arc::new(SelectRowsTool::new(client.clone())),
    ]
}

async fn run_blocking<T, F>(client: &AccessClient, op: F) -> Result<T, ToolError>
where
    T: Send + 'static,
    F: Fn(&AccessClient) -> Result<T, DbError> + Clone + Send + 'static,
{
    match attempt(client.clone(), op.clone()).await {
        Err(err) if err.kind.is_transient() => {
            tracing::warn!(kind = err.kind.as_str(), "transient database failure, retrying once");
            tokio::time::sleep(RETRY_BACKOFF).await;
            attempt(client.clone(), op).await
        }
        other => other,
    }
}

async fn attempt<T, F>(client: AccessClient, op: F) -> Result<T, ToolError>
where
    T: Send + 'static,
    F: FnOnce(&AccessClient) -> Result<T, DbError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&client))
        .await
        .map_err(|e| ToolError::execution(format!("database task failed: {}", e)))?
        .map_err(ToolError::from)
}

fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::validation(format!("missing required parameter '{}'", key)))
}

fn optional_str<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str)
}

fn table_param(description: &str) -> ParamSpec {
    ParamSpec::required("table_name", ParamType::String, description)
}

pub struct ListTablesTool {
    client: AccessClient,
    descriptor: ToolDescriptor,
}

impl ListTablesTool {
    pub fn new(client: AccessClient) -> Self {
        Self {
            client,
            descriptor: ToolDescriptor::new(
                "list_database_tables",
                "List all available tables in the database. Use this tool to know which \
                 tables exist before making queries.",
            ),
        }
    }
}

#[async_trait]
impl Tool for ListTablesTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _arguments: &Value) -> Result<ToolPayload, ToolError> {
        let tables = run_blocking(&self.client, |c| c.list_tables()).await?;
        Ok(ToolPayload::Tables { tables })
    }
}

pub struct DescribeTableTool {
    client: AccessClient,
    descriptor: ToolDescriptor,
}

impl DescribeTableTool {
    pub fn new(client: AccessClient) -> Self {
        Self {
            client,
            descriptor: ToolDescriptor::new(
                "describe_table",
                "Get the structure (columns, data types) of a specific table. Use this to \
                 understand what columns a table has before making queries. You need to \
                 provide the exact table name.",
            )
            .param(table_param(
                "Name of the table to describe (e.g., 'usuarios', 'pedidos')",
            )),
        }
    }
}

#[async_trait]
impl Tool for DescribeTableTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolPayload, ToolError> {
        let table = required_str(arguments, "table_name")?.to_string();
        let name = table.clone();
        let columns = run_blocking(&self.client, move |c| c.describe_table(&name)).await?;
        Ok(ToolPayload::Columns { table, columns })
    }
}

pub struct QueryDatabaseTool {
    client: AccessClient,
    descriptor: ToolDescriptor,
}

impl QueryDatabaseTool {
    pub fn new(client: AccessClient) -> Self {
        Self {
            client,
            descriptor: ToolDescriptor::new(
                "query_database",
                "Execute a SQL SELECT query on the database. Use this tool when the user asks \
                 for specific data. IMPORTANT: Only read queries (SELECT) are allowed. First \
                 use 'list_database_tables' to see available tables and 'describe_table' to \
                 know the structure before making complex queries.",
            )
            .param(ParamSpec::required(
                "query",
                ParamType::String,
                "The SQL SELECT query to execute. Example: 'SELECT * FROM usuarios LIMIT 10'",
            )),
        }
    }
}

#[async_trait]
impl Tool for QueryDatabaseTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolPayload, ToolError> {
        let request = QueryRequest::sql(required_str(arguments, "query")?);
        let output = run_blocking(&self.client, move |c| c.run_query(&request)).await?;
        Ok(match output {
            QueryOutput::Rows(rows) => ToolPayload::Rows(rows),
            QueryOutput::Affected(rows) => ToolPayload::Affected { rows },
        })
    }
}

pub struct TableCountTool {
    client: AccessClient,
    descriptor: ToolDescriptor,
}

impl TableCountTool {
    pub fn new(client: AccessClient) -> Self {
        Self {
            client,
            descriptor: ToolDescriptor::new(
                "get_table_count",
                "Get the total number of records (rows) in a table. Use this tool when the \
                 user asks 'how many?' about a specific entity.",
            )
            .param(table_param(
                "Name of the table to count (e.g., 'usuarios', 'pedidos')",
            )),
        }
    }
}

#[async_trait]
impl Tool for TableCountTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolPayload, ToolError> {
        let table = required_str(arguments, "table_name")?.to_string();
        let name = table.clone();
        let count = run_blocking(&self.client, move |c| c.count_rows(&name)).await?;
        Ok(ToolPayload::Count { table, count })
    }
}

/// Structured reads: no SQL text comes from the model.
pub struct SelectRowsTool {
    client: AccessClient,
    descriptor: ToolDescriptor,
}

impl SelectRowsTool {
    pub fn new(client: AccessClient) -> Self {
        let max_rows = client.policy().max_rows.max(1) as i64;
        Self {
            client,
            descriptor: ToolDescriptor::new(
                "select_rows",
                "Read rows from a table without writing SQL. Optionally pick columns and \
                 filter on one column being equal to a value.",
            )
            .param(table_param("Name of the table to read"))
            .param(ParamSpec::optional(
                "columns",
                ParamType::StringList,
                "Columns to return; all columns when omitted",
            ))
            .param(ParamSpec::optional(
                "where_column",
                ParamType::String,
                "Column to filter on",
            ))
            .param(ParamSpec::optional(
                "where_value",
                ParamType::String,
                "Value the filter column must equal",
            ))
            .param(
                ParamSpec::optional("limit", ParamType::Integer, "Maximum rows to return")
                    .with_range(1, max_rows),
            ),
        }
    }

    fn request(arguments: &Value) -> Result<SelectRequest, ToolError> {
        let columns = arguments
            .get("columns")
            .and_then(Value::as_array)
            .map(|cols| {
                cols.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let filters = match (
            optional_str(arguments, "where_column"),
            arguments.get("where_value").filter(|v| !v.is_null()),
        ) {
            (Some(column), Some(value)) => vec![Filter {
                column: column.to_string(),
                value: value.clone(),
            }],
            (None, None) => Vec::new(),
            _ => {
                return Err(ToolError::validation(
                    "'where_column' and 'where_value' must be given together",
                ))
            }
        };

        let limit = arguments
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize);

        Ok(SelectRequest {
            table: required_str(arguments, "table_name")?.to_string(),
            columns,
            filters,
            limit,
        })
    }
}

#[async_trait]
impl Tool for SelectRowsTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolPayload, ToolError> {
        let request = QueryRequest::Select(Self::request(arguments)?);
        let output = run_blocking(&self.client, move |c| c.run_query(&request)).await?;
        match output {
            QueryOutput::Rows(rows) => Ok(ToolPayload::Rows(rows)),
            QueryOutput::Affected(_) => Err(ToolError::execution("select produced no rows")),
        }
    }
}
