//! Transport-neutral contract for talking to a tool provider.
//!
//! A [`Connector`] opens one [`Connection`] per configured provider. The
//! MCP implementation lives in `mc-mcp`; tests use the mocks in `testing`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::tool::{ToolDefinition, ToolOutput};
use crate::tool_config::ToolProviderConfig;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to the named provider.
    ///
    /// May start an external process. Fails with [`Error::Connection`]
    /// carrying the provider name.
    async fn open(
        &self,
        name: &str,
        config: &ToolProviderConfig,
    ) -> Result<Arc<dyn Connection>, Error>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Provider name this connection was opened for.
    fn provider(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, Error>;

    /// Fails with [`Error::Invocation`] when the call cannot be completed.
    async fn invoke(&self, tool: &str, arguments: Value) -> Result<ToolOutput, Error>;

    /// Release the connection. Idempotent; never fails.
    async fn close(&self);
}
