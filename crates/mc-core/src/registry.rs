//! Multi-provider tool registry.
//!
//! Owns one connection per configured provider and exposes their tools as a
//! single flat [`ToolRegistry`]. The registry is rebuilt wholesale on every
//! configuration change: all previous connections are closed before any new
//! one is opened.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connection::{Connection, Connector};
use crate::error::Error;
use crate::tool::{Tool, ToolDefinition, ToolOutput, ToolRegistry};
use crate::tool_config::{ToolProviderConfig, ToolProviderConfigs};

/// A tool exposed by a provider connection.
struct ProviderTool {
    definition: ToolDefinition,
    connection: Arc<dyn Connection>,
}

#[async_trait]
impl Tool for ProviderTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn provider(&self) -> &str {
        self.connection.provider()
    }

    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, Error> {
        self.connection.invoke(&self.definition.name, arguments).await
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    connections: Vec<Arc<dyn Connection>>,
    tools: ToolRegistry,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Open every configured provider, in configuration order.
    ///
    /// If any provider fails to open (or to list its tools) the already
    /// opened connections are closed and the whole build fails with
    /// [`Error::Registry`] wrapping that provider's error.
    pub async fn build(
        connector: &dyn Connector,
        configs: &ToolProviderConfigs,
    ) -> Result<Self, Error> {
        let mut registry = Self::empty();

        for (name, config) in configs.iter() {
            match open_provider(connector, name, config).await {
                Ok((connection, definitions)) => {
                    debug!(
                        provider = %name,
                        transport = %config.transport,
                        tools = definitions.len(),
                        "Tool provider opened"
                    );
                    registry.add(connection, definitions);
                }
                Err(err) => {
                    warn!(provider = %name, error = %err, "Tool provider failed to open, rolling back");
                    registry.close().await;
                    return Err(Error::registry(name, err));
                }
            }
        }

        info!(
            providers = registry.connections.len(),
            tools = registry.tools.len(),
            "Tool registry built"
        );
        Ok(registry)
    }

    /// Close the current connections, then build a fresh registry in place.
    ///
    /// On failure the registry is left empty.
    pub async fn rebuild(
        &mut self,
        connector: &dyn Connector,
        configs: &ToolProviderConfigs,
    ) -> Result<(), Error> {
        self.close().await;
        *self = Self::build(connector, configs).await?;
        Ok(())
    }

    fn add(&mut self, connection: Arc<dyn Connection>, definitions: Vec<ToolDefinition>) {
        for definition in definitions {
            let tool = Arc::new(ProviderTool {
                definition,
                connection: Arc::clone(&connection),
            });
            if let Some(previous) = self.tools.register(tool) {
                warn!(
                    tool = %previous.name(),
                    replaced_provider = %previous.provider(),
                    provider = %connection.provider(),
                    "Tool name collision, later provider wins"
                );
            }
        }
        self.connections.push(connection);
    }

    /// Close every connection. Each close is attempted regardless of the others.
    pub async fn close(&mut self) {
        if self.connections.is_empty() {
            return;
        }
        let count = self.connections.len();
        for connection in self.connections.drain(..) {
            connection.close().await;
        }
        self.tools = ToolRegistry::new();
        info!(providers = count, "Tool registry closed");
    }

    /// Snapshot of the flat tool set.
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names().into_iter().map(str::to_string).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.definitions()
    }

    /// Tool names grouped by the provider that currently owns them.
    pub fn providers(&self) -> IndexMap<String, Vec<String>> {
        self.tools.by_provider()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

async fn open_provider(
    connector: &dyn Connector,
    name: &str,
    config: &ToolProviderConfig,
) -> Result<(Arc<dyn Connection>, Vec<ToolDefinition>), Error> {
    let connection = connector.open(name, config).await?;
    match connection.list_tools().await {
        Ok(definitions) => Ok((connection, definitions)),
        Err(err) => {
            connection.close().await;
            Err(Error::connection(name, format!("failed to list tools: {err}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LifecycleEvent, MockConnector};

    fn configs(names: &[&str]) -> ToolProviderConfigs {
        let mut configs = ToolProviderConfigs::new();
        for name in names {
            configs.insert(*name, ToolProviderConfig::stdio("python", [format!("{name}.py")]));
        }
        configs
    }

    #[tokio::test]
    async fn test_build_exposes_union_of_tools() {
        let connector = MockConnector::new()
            .with_tools("weather", &["get_weather", "get_forecast"])
            .with_tools("time", &["get_current_time"])
            .with_tools("docs", &["retrieve"]);

        let registry = ProviderRegistry::build(&connector, &configs(&["weather", "time", "docs"]))
            .await
            .unwrap();

        assert_eq!(registry.len(), 4);
        assert_eq!(registry.connection_count(), 3);
        assert_eq!(
            registry.tool_names(),
            vec!["get_weather", "get_forecast", "get_current_time", "retrieve"]
        );
        assert_eq!(registry.providers()["weather"], vec!["get_weather", "get_forecast"]);
    }

    #[tokio::test]
    async fn test_tools_invoke_through_owning_connection() {
        let connector = MockConnector::new()
            .with_tools("weather", &["get_weather"])
            .with_tools("time", &["get_current_time"]);
        let registry = ProviderRegistry::build(&connector, &configs(&["weather", "time"]))
            .await
            .unwrap();

        let output = registry
            .tools()
            .get("get_current_time")
            .unwrap()
            .execute(serde_json::json!({"timezone": "Asia/Seoul"}))
            .await
            .unwrap();

        assert_eq!(output.content, r#"time/get_current_time({"timezone":"Asia/Seoul"})"#);
    }

    #[tokio::test]
    async fn test_failed_provider_rolls_back_whole_build() {
        let connector = MockConnector::new()
            .with_tools("weather", &["get_weather"])
            .with_tools("time", &["get_current_time"])
            .failing("broken");

        let err = ProviderRegistry::build(&connector, &configs(&["weather", "time", "broken"]))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, Error::Registry { ref provider, .. } if provider == "broken"));
        assert_eq!(connector.open_connections(), 0);
        assert_eq!(
            connector.log(),
            vec![
                LifecycleEvent::Opened("weather".into()),
                LifecycleEvent::Opened("time".into()),
                LifecycleEvent::OpenFailed("broken".into()),
                LifecycleEvent::Closed("weather".into()),
                LifecycleEvent::Closed("time".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_tools_failure_counts_as_connection_error() {
        let connector = MockConnector::new()
            .with_tools("weather", &["get_weather"])
            .failing_list("flaky");

        let err = ProviderRegistry::build(&connector, &configs(&["weather", "flaky"]))
            .await
            .err()
            .unwrap();

        let Error::Registry { provider, source } = err else {
            panic!("expected registry error");
        };
        assert_eq!(provider, "flaky");
        assert!(matches!(*source, Error::Connection { .. }));
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_rebuild_closes_previous_set_before_opening() {
        let connector = MockConnector::new()
            .with_tools("weather", &["get_weather"])
            .with_tools("time", &["get_current_time"]);

        let mut registry = ProviderRegistry::build(&connector, &configs(&["weather"]))
            .await
            .unwrap();
        registry
            .rebuild(&connector, &configs(&["time"]))
            .await
            .unwrap();

        assert_eq!(registry.tool_names(), vec!["get_current_time"]);
        assert_eq!(connector.max_concurrent_open(), 1);
        assert_eq!(
            connector.log(),
            vec![
                LifecycleEvent::Opened("weather".into()),
                LifecycleEvent::Closed("weather".into()),
                LifecycleEvent::Opened("time".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_name_collision_last_provider_wins() {
        let connector = MockConnector::new()
            .with_tools("first", &["lookup"])
            .with_tools("second", &["lookup"]);

        let registry = ProviderRegistry::build(&connector, &configs(&["first", "second"]))
            .await
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.tools().get("lookup").unwrap().provider(), "second");
    }

    #[tokio::test]
    async fn test_close_is_repeatable() {
        let connector = MockConnector::new().with_tools("weather", &["get_weather"]);
        let mut registry = ProviderRegistry::build(&connector, &configs(&["weather"]))
            .await
            .unwrap();

        registry.close().await;
        registry.close().await;

        assert!(registry.is_empty());
        assert_eq!(connector.open_connections(), 0);
        assert_eq!(
            connector.log(),
            vec![
                LifecycleEvent::Opened("weather".into()),
                LifecycleEvent::Closed("weather".into()),
            ]
        );
    }
}
