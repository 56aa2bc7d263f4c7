//! A live connection to one MCP server.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use mc_core::{Connection, Error, ToolDefinition, ToolOutput};
use rmcp::model::{CallToolRequestParams, CallToolResult, Tool};
use rmcp::service::{Peer, RoleClient, RunningService};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

pub struct RmcpConnection {
    provider: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
    closed: AtomicBool,
    process_id: Option<u32>,
}

impl RmcpConnection {
    /// Wrap an initialized client service.
    pub fn new(provider: impl Into<String>, service: RunningService<RoleClient, ()>) -> Self {
        Self {
            provider: provider.into(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            closed: AtomicBool::new(false),
            process_id: None,
        }
    }

    pub fn with_process_id(mut self, pid: Option<u32>) -> Self {
        self.process_id = pid;
        self
    }

    /// Pid of the server subprocess, for stdio connections.
    pub fn process_id(&self) -> Option<u32> {
        self.process_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for RmcpConnection {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, Error> {
        if self.is_closed() {
            return Err(Error::connection(&self.provider, "connection is closed"));
        }
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(|e| Error::connection(&self.provider, format!("tools/list failed: {e}")))?;

        debug!(provider = %self.provider, count = tools.len(), "Listed MCP tools");
        Ok(tools.iter().map(to_definition).collect())
    }

    async fn invoke(&self, tool: &str, arguments: Value) -> Result<ToolOutput, Error> {
        if self.is_closed() {
            return Err(Error::invocation(tool, "connection is closed"));
        }

        let arguments = match arguments {
            Value::Object(map) => Value::Object(map),
            Value::Null => Value::Null,
            other => {
                return Err(Error::invocation(
                    tool,
                    format!("arguments must be a JSON object, got {other}"),
                ))
            }
        };
        let params: CallToolRequestParams =
            serde_json::from_value(json!({ "name": tool, "arguments": arguments }))
                .map_err(|e| Error::invocation(tool, format!("invalid call parameters: {e}")))?;

        trace!(provider = %self.provider, tool, "Calling MCP tool");
        let result = self
            .peer
            .call_tool(params)
            .await
            .map_err(|e| Error::invocation(tool, e.to_string()))?;

        Ok(to_output(result))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let Some(service) = self.service.lock().await.take() else {
            return;
        };
        match service.cancel().await {
            Ok(reason) => debug!(provider = %self.provider, ?reason, "MCP connection closed"),
            Err(e) => warn!(provider = %self.provider, error = %e, "MCP connection did not shut down cleanly"),
        }
    }
}

fn to_definition(tool: &Tool) -> ToolDefinition {
    ToolDefinition::new(
        tool.name.to_string(),
        tool.description.as_deref().unwrap_or_default(),
    )
    .with_input_schema(Value::Object((*tool.input_schema).clone()))
}

fn to_output(result: CallToolResult) -> ToolOutput {
    let mut text: Vec<String> = result
        .content
        .iter()
        .map(|content| match content.raw.as_text() {
            Some(t) => t.text.clone(),
            None => "[non-text content]".to_string(),
        })
        .collect();

    if text.is_empty() {
        if let Some(structured) = &result.structured_content {
            text.push(structured.to_string());
        }
    }

    let text = text.join("\n");
    if result.is_error.unwrap_or(false) {
        ToolOutput::error(text)
    } else {
        ToolOutput::success(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::handler::server::{router::tool::ToolRouter, wrapper::Parameters};
    use rmcp::model::{Content, ServerCapabilities, ServerInfo};
    use rmcp::schemars;
    use rmcp::{tool, tool_handler, tool_router, ErrorData, ServerHandler, ServiceExt};

    #[derive(Debug, Clone)]
    struct WeatherServer {
        tool_router: ToolRouter<WeatherServer>,
    }

    #[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
    struct WeatherRequest {
        #[schemars(description = "City or region")]
        location: String,
    }

    impl WeatherServer {
        fn new() -> Self {
            Self {
                tool_router: Self::tool_router(),
            }
        }
    }

    #[tool_router]
    impl WeatherServer {
        #[tool(description = "Get current weather information for a location")]
        async fn get_weather(
            &self,
            Parameters(WeatherRequest { location }): Parameters<WeatherRequest>,
        ) -> Result<CallToolResult, ErrorData> {
            Ok(CallToolResult::success(vec![Content::text(format!(
                "It's always Sunny in {location}"
            ))]))
        }

        #[tool(description = "Always reports a tool-level error")]
        async fn broken_sensor(&self) -> Result<CallToolResult, ErrorData> {
            Ok(CallToolResult::error(vec![Content::text("sensor offline")]))
        }
    }

    #[tool_handler]
    impl ServerHandler for WeatherServer {
        fn get_info(&self) -> ServerInfo {
            let mut info = ServerInfo::default();
            info.capabilities = ServerCapabilities::builder().enable_tools().build();
            info
        }
    }

    async fn connect() -> RmcpConnection {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            if let Ok(server) = WeatherServer::new().serve(server_io).await {
                let _ = server.waiting().await;
            }
        });
        let service = ().serve(client_io).await.unwrap();
        RmcpConnection::new("weather", service)
    }

    #[tokio::test]
    async fn test_list_tools_maps_schema() {
        let connection = connect().await;

        let tools = connection.list_tools().await.unwrap();
        let weather = tools.iter().find(|t| t.name == "get_weather").unwrap();

        assert_eq!(tools.len(), 2);
        assert_eq!(weather.description, "Get current weather information for a location");
        assert_eq!(weather.required_arguments(), vec!["location"]);
        connection.close().await;
    }

    #[tokio::test]
    async fn test_invoke_returns_text() {
        let connection = connect().await;

        let output = connection
            .invoke("get_weather", json!({"location": "Seoul"}))
            .await
            .unwrap();

        assert!(!output.is_error);
        assert_eq!(output.content, "It's always Sunny in Seoul");
        connection.close().await;
    }

    #[tokio::test]
    async fn test_tool_error_flag_is_preserved() {
        let connection = connect().await;

        let output = connection.invoke("broken_sensor", json!({})).await.unwrap();

        assert!(output.is_error);
        assert_eq!(output.content, "sensor offline");
        connection.close().await;
    }

    #[tokio::test]
    async fn test_non_object_arguments_rejected() {
        let connection = connect().await;

        let err = connection.invoke("get_weather", json!(["Seoul"])).await.unwrap_err();

        assert!(matches!(err, Error::Invocation { ref tool, .. } if tool == "get_weather"));
        connection.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let connection = connect().await;

        connection.close().await;
        connection.close().await;

        assert!(connection.is_closed());
        assert!(matches!(
            connection.invoke("get_weather", json!({"location": "Seoul"})).await,
            Err(Error::Invocation { .. })
        ));
        assert!(matches!(connection.list_tools().await, Err(Error::Connection { .. })));
    }
}
