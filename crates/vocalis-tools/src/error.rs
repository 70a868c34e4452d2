use vocalis_db::DbError;
use vocalis_types::{ArgumentError, ToolErrorKind};

/// A failed tool execution, tagged with its place in the failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Validation, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Execution, message)
    }
}

impl From<DbError> for ToolError {
    fn from(err: DbError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<ArgumentError> for ToolError {
    fn from(err: ArgumentError) -> Self {
        Self::validation(err.to_string())
    }
}

/// Errors raised while assembling the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid tool name '{0}': expected lowercase snake case")]
    InvalidName(String),

    #[error("tool '{0}' is already registered")]
    Duplicate(String),
}
