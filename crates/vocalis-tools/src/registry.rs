use crate::database::{database_tools, DEFAULT_TOOL_NAMES};
use crate::error::RegistryError;
use crate::tool::Tool;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vocalis_db::AccessClient;
use vocalis_types::{ToolDescriptor, ToolErrorKind, ToolInvocation, ToolResult};

/// Upper bound on a single tool execution when none is configured.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Name-indexed set of tools, in registration order.
///
/// Dispatch never fails: every outcome, including panics and timeouts
/// inside a tool, comes back as a [`ToolResult`].
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
    timeout: Duration,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_TIMEOUT)
    }
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            timeout,
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if !ToolDescriptor::is_valid_name(&name) {
            return Err(RegistryError::InvalidName(name));
        }
        if self.index.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        tracing::debug!(tool = %name, "registered tool");
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn descriptors(&self) -> Vec<&ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    /// Function-calling schemas for the model, in registration order.
    pub fn schema_for_model(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| t.descriptor().to_model_schema())
            .collect()
    }

    /// Looks up, validates and runs one invocation under the time bound.
    pub async fn dispatch(&self, invocation: &ToolInvocation) -> ToolResult {
        let started = Instant::now();
        let result = self.dispatch_inner(invocation).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            ToolResult::Success(_) => {
                tracing::info!(tool = %invocation.name, elapsed_ms, "tool succeeded")
            }
            ToolResult::Failure { kind, message } => tracing::warn!(
                tool = %invocation.name,
                elapsed_ms,
                kind = kind.as_str(),
                "tool failed: {}",
                message
            ),
        }
        result
    }

    async fn dispatch_inner(&self, invocation: &ToolInvocation) -> ToolResult {
        let Some(tool) = self.index.get(&invocation.name).map(|&i| &self.tools[i]) else {
            return ToolResult::failure(
                ToolErrorKind::UnknownTool,
                format!(
                    "no tool named '{}'; available tools: {}",
                    invocation.name,
                    self.tool_names().join(", ")
                ),
            );
        };

        if let Err(err) = tool.descriptor().validate(&invocation.arguments) {
            return ToolResult::failure(ToolErrorKind::Validation, err.to_string());
        }

        // Run on its own task so a panic inside the tool is contained. A
        // timed-out task is detached; its result is dropped on completion.
        let tool = Arc::clone(tool);
        let arguments = invocation.arguments.clone();
        let handle = tokio::spawn(async move { tool.execute(&arguments).await });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(Ok(payload))) => ToolResult::Success(payload),
            Ok(Ok(Err(err))) => ToolResult::failure(err.kind, err.message),
            Ok(Err(join_err)) => ToolResult::failure(
                ToolErrorKind::Execution,
                format!("tool '{}' crashed: {}", invocation.name, join_err),
            ),
            Err(_) => ToolResult::failure(
                ToolErrorKind::Timeout,
                format!(
                    "tool '{}' did not finish within {} ms",
                    invocation.name,
                    self.timeout.as_millis()
                ),
            ),
        }
    }
}

/// Builds the registry of database tools, keeping only names listed in
/// `available` (all of them when the list is empty).
pub fn build_registry(
    client: &AccessClient,
    available: &[String],
    timeout: Duration,
) -> Result<ToolRegistry, RegistryError> {
    for name in available {
        if !DEFAULT_TOOL_NAMES.contains(&name.as_str()) {
            tracing::warn!(tool = %name, "configured tool does not exist, ignoring");
        }
    }

    let mut registry = ToolRegistry::new(timeout);
    for tool in database_tools(client) {
        if available.is_empty() || available.iter().any(|n| n == tool.name()) {
            registry.register(tool)?;
        }
    }
    tracing::info!(tools = ?registry.tool_names(), "tool registry ready");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use async_trait::async_trait;
    use serde_json::json;
    use vocalis_types::{ParamSpec, ParamType, ToolPayload};

    struct EchoCount {
        descriptor: ToolDescriptor,
    }

    impl EchoCount {
        fn new(name: &str) -> Self {
            Self {
                descriptor: ToolDescriptor::new(name, "Echoes n back as a count").param(
                    ParamSpec::required("n", ParamType::Integer, "value").with_range(0, 100),
                ),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoCount {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(&self, arguments: &Value) -> Result<ToolPayload, ToolError> {
            Ok(ToolPayload::Count {
                table: "echo".to_string(),
                count: arguments["n"].as_i64().unwrap_or_default(),
            })
        }
    }

    struct Misbehaving {
        descriptor: ToolDescriptor,
        sleep: Option<Duration>,
    }

    #[async_trait]
    impl Tool for Misbehaving {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(&self, _arguments: &Value) -> Result<ToolPayload, ToolError> {
            match self.sleep {
                Some(d) => {
                    tokio::time::sleep(d).await;
                    Ok(ToolPayload::Tables { tables: vec![] })
                }
                None => panic!("tool exploded"),
            }
        }
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new(Duration::from_millis(100));
        reg.register(Arc::new(EchoCount::new("echo_count"))).unwrap();
        reg.register(Arc::new(Misbehaving {
            descriptor: ToolDescriptor::new("slow_tool", "sleeps"),
            sleep: Some(Duration::from_secs(5)),
        }))
        .unwrap();
        reg.register(Arc::new(Misbehaving {
            descriptor: ToolDescriptor::new("panicking_tool", "panics"),
            sleep: None,
        }))
        .unwrap();
        reg
    }

    #[test]
    fn register_rejects_duplicates_and_bad_names() {
        let mut reg = ToolRegistry::default();
        reg.register(Arc::new(EchoCount::new("echo_count"))).unwrap();
        assert_eq!(
            reg.register(Arc::new(EchoCount::new("echo_count"))),
            Err(RegistryError::Duplicate("echo_count".to_string()))
        );
        assert_eq!(
            reg.register(Arc::new(EchoCount::new("Echo-Count"))),
            Err(RegistryError::InvalidName("Echo-Count".to_string()))
        );
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn schema_follows_registration_order() {
        let reg = registry();
        let names: Vec<String> = reg
            .schema_for_model()
            .iter()
            .map(|s| s["function"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["echo_count", "slow_tool", "panicking_tool"]);
    }

    #[tokio::test]
    async fn dispatch_success() {
        let reg = registry();
        let result = reg
            .dispatch(&ToolInvocation::new("echo_count", json!({"n": 7})))
            .await;
        assert_eq!(
            result,
            ToolResult::Success(ToolPayload::Count {
                table: "echo".to_string(),
                count: 7
            })
        );
    }

    #[tokio::test]
    async fn unknown_tool_is_a_structured_failure() {
        let reg = registry();
        let result = reg
            .dispatch(&ToolInvocation::new("drop_everything", json!({})))
            .await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::UnknownTool));
        assert!(result.to_model_text().contains("echo_count"));
    }

    #[tokio::test]
    async fn invalid_arguments_fail_before_execution() {
        let reg = registry();
        for args in [json!({}), json!({"n": "seven"}), json!({"n": 500}), json!({"n": 1, "x": 2})] {
            let result = reg
                .dispatch(&ToolInvocation::new("echo_count", args.clone()))
                .await;
            assert_eq!(result.error_kind(), Some(ToolErrorKind::Validation), "{args}");
        }
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let reg = registry();
        let result = reg
            .dispatch(&ToolInvocation::new("slow_tool", Value::Null))
            .await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::Timeout));
    }

    #[tokio::test]
    async fn panicking_tool_is_contained() {
        let reg = registry();
        let result = reg
            .dispatch(&ToolInvocation::new("panicking_tool", json!({})))
            .await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::Execution));
    }
}
