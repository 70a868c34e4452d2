use crate::error::ToolError;
use async_trait::async_trait;
use serde_json::Value;
use vocalis_types::{ToolDescriptor, ToolPayload};

/// A capability the model can invoke.
///
/// The registry validates arguments against [`Tool::descriptor`] before
/// calling [`Tool::execute`], so implementations may assume the declared
/// types are present. Checks that span several parameters remain the
/// tool's job and must happen before any side effect.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn execute(&self, arguments: &Value) -> Result<ToolPayload, ToolError>;

    fn name(&self) -> &str {
        &self.descriptor().name
    }
}
