//! Shared types for the Vocalis assistant.
//!
//! This crate holds the data model every other crate speaks: the tool
//! contract (descriptors, invocations, results), conversation turns, and
//! voice settings. It has no runtime dependencies beyond `serde` so that the
//! database, tool, completion and server crates can all share it without
//! pulling each other in.

pub mod conversation;
pub mod tool;
pub mod voice;

pub use conversation::{ConversationTurn, Role};
pub use tool::{
    ArgumentError, ColumnInfo, ParamSpec, ParamType, RowSet, ToolDescriptor, ToolErrorKind,
    ToolInvocation, ToolPayload, ToolResult, MAX_ROWS_SHOWN,
};
pub use voice::{VoiceModel, VoiceSettings};
