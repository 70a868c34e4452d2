//! Callable tools and the registry that dispatches them.
//!
//! Tools are registered once at start-up. The registry is immutable
//! afterwards and shared by every session behind an `Arc`.

pub mod database;
mod error;
mod registry;
mod tool;

pub use database::{database_tools, DEFAULT_TOOL_NAMES};
pub use error::{RegistryError, ToolError};
pub use registry::{build_registry, ToolRegistry, DEFAULT_TOOL_TIMEOUT};
pub use tool::Tool;
