//! Opens MCP connections over a child-process pipe or a streamable HTTP endpoint.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use mc_core::{Connection, Connector, Error, Launch, ToolProviderConfig};
use rmcp::transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess};
use rmcp::ServiceExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, info};

use crate::client::RmcpConnection;

/// Default time allowed for the MCP initialize handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RmcpConnector {
    handshake_timeout: Duration,
}

impl RmcpConnector {
    pub fn new() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Spawn `command` and complete the MCP handshake over its stdio.
    pub async fn open_stdio(
        &self,
        name: &str,
        command: &str,
        args: &[String],
        env: &IndexMap<String, String>,
    ) -> Result<RmcpConnection, Error> {
        debug!(provider = %name, command = %command, ?args, "Starting MCP server process");

        let (transport, stderr) = TokioChildProcess::builder(Command::new(command).configure(|cmd| {
            cmd.args(args).envs(env);
        }))
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::connection(name, format!("failed to start `{command}`: {e}")))?;

        let pid = transport.id();
        debug!(provider = %name, ?pid, "MCP server process started");
        if let Some(stderr) = stderr {
            forward_stderr(name.to_string(), stderr);
        }

        let service = tokio::time::timeout(self.handshake_timeout, ().serve(transport))
            .await
            .map_err(|_| self.handshake_timed_out(name))?
            .map_err(|e| Error::connection(name, format!("MCP handshake failed: {e}")))?;

        Ok(RmcpConnection::new(name, service).with_process_id(pid))
    }

    pub async fn open_endpoint(&self, name: &str, url: &str) -> Result<RmcpConnection, Error> {
        debug!(provider = %name, url = %url, "Connecting to MCP endpoint");

        let transport = StreamableHttpClientTransport::from_uri(url.to_string());
        let service = tokio::time::timeout(self.handshake_timeout, ().serve(transport))
            .await
            .map_err(|_| self.handshake_timed_out(name))?
            .map_err(|e| Error::connection(name, format!("failed to connect to {url}: {e}")))?;

        Ok(RmcpConnection::new(name, service))
    }

    fn handshake_timed_out(&self, name: &str) -> Error {
        Error::connection(
            name,
            format!("MCP handshake timed out after {:?}", self.handshake_timeout),
        )
    }
}

impl Default for RmcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn open(
        &self,
        name: &str,
        config: &ToolProviderConfig,
    ) -> Result<Arc<dyn Connection>, Error> {
        let connection = match &config.launch {
            Launch::Command { command, args, env } => {
                self.open_stdio(name, command, args, env).await?
            }
            Launch::Endpoint { url } => self.open_endpoint(name, url).await?,
        };

        info!(provider = %name, transport = %config.transport, "Connected to MCP server");
        Ok(Arc::new(connection))
    }
}

/// Forward a server's stderr lines into tracing.
fn forward_stderr(provider: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "mcp_server", provider = %provider, "{}", line.trim_end());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_command_is_connection_error() {
        let connector = RmcpConnector::new();
        let config = ToolProviderConfig::stdio("mcpchat-test-no-such-binary", Vec::<String>::new());

        let err = connector.open("ghost", &config).await.err().unwrap();

        match err {
            Error::Connection { provider, message } => {
                assert_eq!(provider, "ghost");
                assert!(message.contains("mcpchat-test-no-such-binary"));
            }
            other => panic!("expected connection error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        let connector = RmcpConnector::new().with_handshake_timeout(Duration::from_secs(5));
        let config = ToolProviderConfig::endpoint("http://127.0.0.1:9/mcp");

        let err = connector.open("remote", &config).await.err().unwrap();

        assert!(matches!(err, Error::Connection { ref provider, .. } if provider == "remote"));
    }
}
