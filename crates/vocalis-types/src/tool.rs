//! Tool contract: descriptors, invocations and results.
//!
//! A [`ToolDescriptor`] is what the model sees; a [`ToolInvocation`] is what
//! the model sends back; a [`ToolResult`] is what the model reads next. The
//! model never sees a raw error: every failure is folded into a
//! [`ToolResult::Failure`] with a [`ToolErrorKind`] tag.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Maximum number of rows rendered into model-facing text.
pub const MAX_ROWS_SHOWN: usize = 15;

// =============================================================================
// Parameters
// =============================================================================

/// Declared type of a tool parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    StringList,
    Enum(Vec<String>),
}

impl ParamType {
    /// Checks a JSON value against this type.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            ParamType::String if value.is_string() => Ok(()),
            ParamType::Integer if value.is_i64() || value.is_u64() => Ok(()),
            ParamType::Number if value.is_number() => Ok(()),
            ParamType::Boolean if value.is_boolean() => Ok(()),
            ParamType::StringList => match value.as_array() {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if !item.is_string() {
                            return Err(format!(
                                "expected string at index {}, got {}",
                                i,
                                value_type_name(item)
                            ));
                        }
                    }
                    Ok(())
                }
                None => Err(format!("expected array, got {}", value_type_name(value))),
            },
            ParamType::Enum(variants) => match value.as_str() {
                Some(s) if variants.iter().any(|v| v == s) => Ok(()),
                Some(s) => Err(format!(
                    "invalid value '{}', expected one of: {}",
                    s,
                    variants.join(", ")
                )),
                None => Err(format!(
                    "expected string for enum, got {}",
                    value_type_name(value)
                )),
            },
            other => Err(format!(
                "expected {}, got {}",
                other.json_type(),
                value_type_name(value)
            )),
        }
    }

    fn json_type(&self) -> &'static str {
        match self {
            ParamType::String | ParamType::Enum(_) => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::StringList => "array",
        }
    }

    fn json_schema(&self) -> Value {
        match self {
            ParamType::StringList => json!({ "type": "array", "items": { "type": "string" } }),
            ParamType::Enum(variants) => json!({ "type": "string", "enum": variants }),
            other => json!({ "type": other.json_type() }),
        }
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A single parameter declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    /// Inclusive bounds for integer parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<(i64, i64)>,
}

impl ParamSpec {
    pub fn required(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            range: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.range = Some((min, max));
        self
    }

    fn check(&self, value: &Value) -> Result<(), ArgumentError> {
        self.param_type
            .check(value)
            .map_err(|reason| ArgumentError::Invalid {
                param: self.name.clone(),
                reason,
            })?;

        if let Some((min, max)) = self.range {
            // Integers beyond i64 cannot fall inside any i64 range.
            let in_range = value.as_i64().is_some_and(|n| n >= min && n <= max);
            if !in_range {
                return Err(ArgumentError::Invalid {
                    param: self.name.clone(),
                    reason: format!("{} is outside the allowed range {}..={}", value, min, max),
                });
            }
        }
        Ok(())
    }
}

/// Why a set of arguments does not satisfy a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("arguments must be a JSON object")]
    NotAnObject,

    #[error("missing required parameter '{0}'")]
    Missing(String),

    #[error("unknown parameter '{0}'")]
    Unknown(String),

    #[error("invalid parameter '{param}': {reason}")]
    Invalid { param: String, reason: String },
}

// =============================================================================
// Descriptor
// =============================================================================

/// Declarative description of a tool, as offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    /// Tool names are lowercase snake case: `^[a-z][a-z0-9_]*$`.
    pub fn is_valid_name(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_lowercase() => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }

    /// Validates arguments against the declared parameters.
    ///
    /// `null` is accepted for optional parameters and treated as absent. An
    /// empty or null argument value is accepted when the tool declares no
    /// parameters.
    pub fn validate(&self, arguments: &Value) -> Result<(), ArgumentError> {
        let empty = Map::new();
        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(ArgumentError::NotAnObject),
        };

        for key in args.keys() {
            if !self.parameters.iter().any(|p| &p.name == key) {
                return Err(ArgumentError::Unknown(key.clone()));
            }
        }

        for spec in &self.parameters {
            match args.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(ArgumentError::Missing(spec.name.clone()))
                }
                None | Some(Value::Null) => {}
                Some(value) => spec.check(value)?,
            }
        }
        Ok(())
    }

    /// Renders the function-calling schema understood by the model service.
    pub fn to_model_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for spec in &self.parameters {
            let mut schema = spec.param_type.json_schema();
            if let Value::Object(ref mut obj) = schema {
                obj.insert("description".to_string(), json!(spec.description));
                if let Some((min, max)) = spec.range {
                    obj.insert("minimum".to_string(), json!(min));
                    obj.insert("maximum".to_string(), json!(max));
                }
            }
            properties.insert(spec.name.clone(), schema);
            if spec.required {
                required.push(spec.name.clone());
            }
        }

        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Returns a string argument, if present.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

// =============================================================================
// Results
// =============================================================================

/// Failure taxonomy for tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Arguments did not satisfy the tool's schema.
    Validation,
    /// The statement shape or identifier is not allowed.
    Permission,
    /// The model asked for a tool that is not registered.
    UnknownTool,
    /// No pooled connection became available in time.
    PoolExhausted,
    /// The tool did not finish within its time bound.
    Timeout,
    /// Any other failure raised while executing.
    Execution,
}

impl ToolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::Permission => "permission_error",
            Self::UnknownTool => "unknown_tool",
            Self::PoolExhausted => "pool_exhausted",
            Self::Timeout => "timeout",
            Self::Execution => "execution_error",
        }
    }

    /// Transient kinds are worth one retry.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::PoolExhausted | Self::Timeout)
    }
}

/// Column metadata from schema introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub default_value: Option<String>,
}

/// A bounded, row-oriented query result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Set when more rows matched than the row cap allowed through.
    pub truncated: bool,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the only value of a 1x1 result.
    pub fn scalar(&self) -> Option<&Value> {
        match (self.columns.len(), self.rows.as_slice()) {
            (1, [row]) => row.first(),
            _ => None,
        }
    }

    fn row_object(&self, row: &[Value]) -> Value {
        let map: Map<String, Value> = self
            .columns
            .iter()
            .cloned()
            .zip(row.iter().cloned())
            .collect();
        Value::Object(map)
    }
}

/// Successful tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolPayload {
    Tables { tables: Vec<String> },
    Columns { table: String, columns: Vec<ColumnInfo> },
    Rows(RowSet),
    Count { table: String, count: i64 },
    Affected { rows: usize },
}

/// Outcome of a tool dispatch as fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success(ToolPayload),
    Failure { kind: ToolErrorKind, message: String },
}

impl ToolResult {
    pub fn failure(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match self {
            Self::Failure { kind, .. } => Some(*kind),
            Self::Success(_) => None,
        }
    }

    /// Renders the result as the text appended to the conversation.
    pub fn to_model_text(&self) -> String {
        match self {
            Self::Failure { kind, message } => format!("error ({}): {}", kind.as_str(), message),
            Self::Success(payload) => render_payload(payload),
        }
    }
}

fn render_payload(payload: &ToolPayload) -> String {
    match payload {
        ToolPayload::Tables { tables } if tables.is_empty() => {
            "The database has no tables.".to_string()
        }
        ToolPayload::Tables { tables } => {
            format!("Available tables ({}): {}", tables.len(), tables.join(", "))
        }
        ToolPayload::Columns { table, columns } => {
            let mut lines = vec![format!("Structure of table '{}':", table)];
            for col in columns {
                let null = if col.nullable { "NULL" } else { "NOT NULL" };
                let key = if col.primary_key { " (PRI)" } else { "" };
                lines.push(format!("  - {}: {} {}{}", col.name, col.data_type, null, key));
            }
            lines.join("\n")
        }
        ToolPayload::Rows(set) => render_rows(set),
        ToolPayload::Count { table, count } => {
            format!("Table '{}' has {} records.", table, count)
        }
        ToolPayload::Affected { rows } => format!("Statement affected {} rows.", rows),
    }
}

fn render_rows(set: &RowSet) -> String {
    if set.is_empty() {
        return "The query returned no results.".to_string();
    }
    if let Some(value) = set.scalar() {
        return render_scalar(value);
    }
    if set.len() == 1 {
        return set.row_object(&set.rows[0]).to_string();
    }

    let mut lines = vec![format!("Found {} results:", set.len())];
    for (i, row) in set.rows.iter().take(MAX_ROWS_SHOWN).enumerate() {
        lines.push(format!("  {}. {}", i + 1, set.row_object(row)));
    }
    if set.len() > MAX_ROWS_SHOWN {
        lines.push(format!(
            "  ... and {} more results.",
            set.len() - MAX_ROWS_SHOWN
        ));
    }
    if set.truncated {
        lines.push(format!("(result capped at {} rows)", set.len()));
    }
    lines.join("\n")
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn describe() -> ToolDescriptor {
        ToolDescriptor::new("describe_table", "Describe a table")
            .param(ParamSpec::required(
                "table_name",
                ParamType::String,
                "Table to describe",
            ))
            .param(
                ParamSpec::optional("limit", ParamType::Integer, "Row limit").with_range(1, 100),
            )
    }

    #[test]
    fn validate_accepts_well_formed_arguments() {
        let d = describe();
        assert!(d.validate(&json!({ "table_name": "usuarios" })).is_ok());
        assert!(d
            .validate(&json!({ "table_name": "usuarios", "limit": 10 }))
            .is_ok());
        assert!(d
            .validate(&json!({ "table_name": "usuarios", "limit": null }))
            .is_ok());
    }

    #[test]
    fn validate_rejects_missing_unknown_and_mistyped() {
        let d = describe();
        assert_eq!(
            d.validate(&json!({})),
            Err(ArgumentError::Missing("table_name".to_string()))
        );
        assert_eq!(
            d.validate(&json!({ "table_name": "x", "drop": true })),
            Err(ArgumentError::Unknown("drop".to_string()))
        );
        assert!(matches!(
            d.validate(&json!({ "table_name": 42 })),
            Err(ArgumentError::Invalid { ref param, .. }) if param == "table_name"
        ));
        assert!(matches!(
            d.validate(&json!({ "table_name": "x", "limit": 1000 })),
            Err(ArgumentError::Invalid { ref param, .. }) if param == "limit"
        ));
        assert_eq!(d.validate(&json!("x")), Err(ArgumentError::NotAnObject));
    }

    #[test]
    fn range_rejects_integers_beyond_i64() {
        let d = describe();
        let huge = json!({ "table_name": "x", "limit": u64::MAX });
        assert!(matches!(
            d.validate(&huge),
            Err(ArgumentError::Invalid { ref param, ref reason })
                if param == "limit" && reason.contains("18446744073709551615")
        ));
    }

    #[test]
    fn enum_and_list_types_are_checked() {
        let t = ParamType::Enum(vec!["asc".to_string(), "desc".to_string()]);
        assert!(t.check(&json!("asc")).is_ok());
        assert!(t.check(&json!("sideways")).is_err());

        let l = ParamType::StringList;
        assert!(l.check(&json!(["a", "b"])).is_ok());
        assert!(l.check(&json!(["a", 1])).is_err());
    }

    #[test]
    fn model_schema_lists_required_parameters() {
        let schema = describe().to_model_schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "describe_table");
        assert_eq!(
            schema["function"]["parameters"]["required"],
            json!(["table_name"])
        );
        assert_eq!(
            schema["function"]["parameters"]["properties"]["limit"]["maximum"],
            100
        );
    }

    #[test]
    fn tool_names_are_snake_case() {
        assert!(ToolDescriptor::is_valid_name("query_database"));
        assert!(ToolDescriptor::is_valid_name("get_table_count2"));
        assert!(!ToolDescriptor::is_valid_name("QueryDatabase"));
        assert!(!ToolDescriptor::is_valid_name("_hidden"));
        assert!(!ToolDescriptor::is_valid_name(""));
        assert!(!ToolDescriptor::is_valid_name("drop table"));
    }

    #[test]
    fn single_cell_result_renders_as_scalar() {
        let result = ToolResult::Success(ToolPayload::Rows(RowSet {
            columns: vec!["count".to_string()],
            rows: vec![vec![json!(10)]],
            truncated: false,
        }));
        assert_eq!(result.to_model_text(), "10");
    }

    #[test]
    fn long_result_is_elided() {
        let rows = (0..20).map(|i| vec![json!(i), json!("x")]).collect();
        let result = ToolResult::Success(ToolPayload::Rows(RowSet {
            columns: vec!["id".to_string(), "name".to_string()],
            rows,
            truncated: true,
        }));
        let text = result.to_model_text();
        assert!(text.starts_with("Found 20 results:"));
        assert!(text.contains("... and 5 more results."));
        assert!(text.contains("capped at 20 rows"));
    }

    #[test]
    fn failure_renders_kind_tag() {
        let result = ToolResult::failure(ToolErrorKind::Permission, "only reads are allowed");
        assert_eq!(
            result.to_model_text(),
            "error (permission_error): only reads are allowed"
        );
        assert_eq!(result.error_kind(), Some(ToolErrorKind::Permission));
    }
}
