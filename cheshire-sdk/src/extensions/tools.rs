//! Tool Registry
//!
//! Tools are callable capabilities exposed to agents. They are stored in a
//! priority registry keyed by tool name, so an extension can shadow a tool
//! of the same name by registering it with a higher priority. Unloading the
//! extension brings the shadowed tool back.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::priority::PriorityRegistry;
use crate::session::SessionContext;
use crate::{SDKError, SDKResult};

/// Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (unique key in the registry)
    pub name: String,
    /// Description shown to planners
    pub description: String,
    /// Example user messages that should trigger this tool
    #[serde(default)]
    pub examples: Vec<String>,
    /// Whether the observation is returned to the user as-is
    #[serde(default)]
    pub return_direct: bool,
    /// Input schema (JSON Schema)
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
}

/// Tool input
#[derive(Debug, Clone)]
pub struct ToolInput {
    /// Raw tool input chosen by the planner
    pub input: String,
    /// Caller identity
    pub session: SessionContext,
}

/// Tool output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Observation returned by the tool
    pub observation: String,
    /// Copied from the definition
    pub return_direct: bool,
    /// Execution duration in milliseconds
    pub duration_ms: u64,
}

/// Boxed future returned by tool handlers
pub type ToolFuture = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>;

/// Tool handler callback type
pub type ToolHandler = Arc<dyn Fn(ToolInput) -> ToolFuture + Send + Sync>;

/// A tool with its handler, as declared by an extension.
#[derive(Clone)]
pub struct Tool {
    pub definition: ToolDefinition,
    /// Priority among tools of the same name (default 1)
    pub priority: i32,
    pub handler: ToolHandler,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("definition", &self.definition)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Priority registry of tools
#[derive(Default)]
pub struct ToolRegistry {
    registry: PriorityRegistry<Tool>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool contributed by `source`
    pub async fn register(&self, tool: &Tool, source: &str) -> SDKResult<u64> {
        let order = self
            .registry
            .register(&tool.definition.name, source, tool.priority, tool.clone())
            .await?;
        tracing::debug!(tool = %tool.definition.name, source, "Registered tool");
        Ok(order)
    }

    /// Remove every tool contributed by `source`
    pub async fn unregister_source(&self, source: &str) -> usize {
        self.registry.unregister_source(source).await
    }

    /// The winning tool for `name`
    pub async fn get(&self, name: &str) -> Option<Tool> {
        self.registry.head(name).await.map(|h| h.payload)
    }

    /// Check if a tool exists
    pub async fn has_tool(&self, name: &str) -> bool {
        self.registry.head(name).await.is_some()
    }

    /// Winning definition of every tool, sorted by name
    pub async fn list(&self) -> Vec<ToolDefinition> {
        let mut tools = Vec::new();
        for name in self.registry.points().await {
            if let Some(tool) = self.get(&name).await {
                tools.push(tool.definition);
            }
        }
        tools
    }

    /// Names of all available tools, sorted
    pub async fn names(&self) -> Vec<String> {
        self.registry.points().await
    }

    /// Extension that provides the winning tool for `name`
    pub async fn provider(&self, name: &str) -> Option<String> {
        self.registry.head(name).await.map(|h| h.source)
    }

    /// Call a tool by name
    pub async fn call(&self, name: &str, input: ToolInput) -> SDKResult<ToolOutput> {
        let tool = self
            .get(name)
            .await
            .ok_or_else(|| SDKError::not_found("Tool", name))?;

        let start = std::time::Instant::now();
        let observation = (tool.handler)(input)
            .await
            .map_err(|e| SDKError::extension(format!("tool '{}' failed: {:#}", name, e)))?;

        Ok(ToolOutput {
            observation,
            return_direct: tool.definition.return_direct,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, priority: i32, reply: &'static str) -> Tool {
        Tool {
            definition: ToolDefinition {
                name: name.to_string(),
                description: format!("{} tool", name),
                examples: vec![format!("what is the {}", name)],
                return_direct: false,
                input_schema: None,
            },
            priority,
            handler: Arc::new(move |input: ToolInput| {
                Box::pin(async move { Ok::<_, anyhow::Error>(format!("{}:{}", reply, input.input)) })
            }),
        }
    }

    fn input(text: &str) -> ToolInput {
        ToolInput {
            input: text.to_string(),
            session: SessionContext::new("c1"),
        }
    }

    #[tokio::test]
    async fn test_call_tool() {
        let tools = ToolRegistry::new();
        tools.register(&tool("time", 1, "core"), "core").await.unwrap();

        let out = tools.call("time", input("now")).await.unwrap();
        assert_eq!(out.observation, "core:now");
        assert!(!out.return_direct);
    }

    #[tokio::test]
    async fn test_override_by_priority_and_restore_on_unregister() {
        let tools = ToolRegistry::new();
        tools.register(&tool("time", 1, "core"), "core").await.unwrap();
        tools.register(&tool("time", 5, "better"), "better-time").await.unwrap();

        assert_eq!(tools.provider("time").await.as_deref(), Some("better-time"));
        assert_eq!(tools.call("time", input("x")).await.unwrap().observation, "better:x");

        tools.unregister_source("better-time").await;
        assert_eq!(tools.call("time", input("x")).await.unwrap().observation, "core:x");
        assert_eq!(tools.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_failing_tools() {
        let tools = ToolRegistry::new();
        let err = tools.call("nope", input("")).await.unwrap_err();
        assert!(err.is_not_found());

        let mut broken = tool("broken", 1, "");
        broken.handler = Arc::new(|_| Box::pin(async { Err::<String, _>(anyhow::anyhow!("no network")) }));
        tools.register(&broken, "ext").await.unwrap();

        let err = tools.call("broken", input("")).await.unwrap_err();
        assert!(err.to_string().contains("no network"));
    }

    #[tokio::test]
    async fn test_list_sorted_by_name() {
        let tools = ToolRegistry::new();
        tools.register(&tool("weather", 1, "w"), "a").await.unwrap();
        tools.register(&tool("clock", 1, "c"), "b").await.unwrap();

        let names: Vec<String> = tools.list().await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["clock", "weather"]);
        assert!(tools.has_tool("clock").await);
        assert_eq!(tools.names().await, vec!["clock", "weather"]);
    }
}
