use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object, as advertised by the tool provider.
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
        }
    }

    pub fn with_input_schema(mut self, input_schema: Value) -> Self {
        self.input_schema = input_schema;
        self
    }

    /// Names listed under the schema's `required` key.
    pub fn required_arguments(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|required| required.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Name of the tool provider that owns this tool.
    fn provider(&self) -> &str;

    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, Error>;
}

/// Flat, name-keyed tool set handed to the agent.
///
/// Iteration follows registration order so the model sees tools in
/// configuration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, returning the tool it replaced when the name was taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        self.tools.insert(tool.name().to_string(), tool)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Tool names grouped by owning provider, in registration order.
    pub fn by_provider(&self) -> IndexMap<String, Vec<String>> {
        let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
        for tool in self.tools.values() {
            grouped
                .entry(tool.provider().to_string())
                .or_default()
                .push(tool.name().to_string());
        }
        grouped
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticTool {
        name: &'static str,
        provider: &'static str,
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn name(&self) -> &str {
            self.name
        }

        fn provider(&self) -> &str {
            self.provider
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(self.name, "static")
        }

        async fn execute(&self, _arguments: Value) -> Result<ToolOutput, Error> {
            Ok(ToolOutput::success(self.provider))
        }
    }

    #[test]
    fn test_tool_definition_required_arguments() {
        let def = ToolDefinition::new("get_weather", "Get the weather").with_input_schema(
            serde_json::json!({
                "type": "object",
                "properties": { "location": { "type": "string" } },
                "required": ["location"]
            }),
        );

        assert_eq!(def.name, "get_weather");
        assert_eq!(def.required_arguments(), vec!["location"]);
    }

    #[test]
    fn test_tool_output() {
        let success = ToolOutput::success("done");
        assert!(!success.is_error);

        let error = ToolOutput::error("failed");
        assert!(error.is_error);
    }

    #[tokio::test]
    async fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        assert!(registry
            .register(Arc::new(StaticTool { name: "lookup", provider: "a" }))
            .is_none());
        let replaced = registry.register(Arc::new(StaticTool { name: "lookup", provider: "b" }));

        assert_eq!(replaced.map(|t| t.provider().to_string()), Some("a".to_string()));
        assert_eq!(registry.len(), 1);

        let output = registry
            .get("lookup")
            .unwrap()
            .execute(Value::Null)
            .await
            .unwrap();
        assert_eq!(output.content, "b");
    }

    #[test]
    fn test_by_provider_preserves_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool { name: "get_weather", provider: "weather" }));
        registry.register(Arc::new(StaticTool { name: "get_time", provider: "time" }));
        registry.register(Arc::new(StaticTool { name: "get_forecast", provider: "weather" }));

        let grouped = registry.by_provider();
        let providers: Vec<&String> = grouped.keys().collect();
        assert_eq!(providers, vec!["weather", "time"]);
        assert_eq!(grouped["weather"], vec!["get_weather", "get_forecast"]);
        assert_eq!(registry.names(), vec!["get_weather", "get_time", "get_forecast"]);
    }
}
