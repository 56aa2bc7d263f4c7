//! mc-mcp: MCP tool transport adapters for mcpchat
//!
//! Implements the `mc_core::Connector` contract on top of `rmcp`. Local
//! providers are spawned as child processes speaking MCP over stdio; network
//! providers are reached over MCP streamable HTTP. The `sse` transport name in
//! provider configuration selects the streamable HTTP client.
//!
//! The `mcp-weather-server` binary is a small stdio server with a single
//! `get_weather` tool.

mod client;
mod connector;

pub use client::RmcpConnection;
pub use connector::{RmcpConnector, DEFAULT_HANDSHAKE_TIMEOUT};
