//! Local MCP weather server speaking over stdio.
//!
//! Exposes a single `get_weather` tool with a fixed answer. Useful as a
//! dependency-free `command` entry in `mcp.json` and as a real subprocess for
//! the stdio transport tests.

use anyhow::Result;
use rmcp::handler::server::{router::tool::ToolRouter, wrapper::Parameters};
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData, ServerHandler, ServiceExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct WeatherServer {
    tool_router: ToolRouter<WeatherServer>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct WeatherRequest {
    #[schemars(description = "The name of the location (city, region, etc.)")]
    location: String,
}

#[tool_router]
impl WeatherServer {
    fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Get current weather information for the specified location")]
    async fn get_weather(
        &self,
        Parameters(WeatherRequest { location }): Parameters<WeatherRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(CallToolResult::success(vec![Content::text(format!(
            "It's always Sunny in {location}"
        ))]))
    }
}

#[tool_handler]
impl ServerHandler for WeatherServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.instructions = Some(
            "You are a weather assistant that can answer questions about the weather in a given location."
                .to_string(),
        );
        info
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let service = WeatherServer::new().serve(rmcp::transport::stdio()).await?;
    info!("Weather server ready on stdio");
    let reason = service.waiting().await?;
    info!(?reason, "Weather server stopped");
    Ok(())
}
