//! Stdio transport against a real MCP server subprocess.
#![cfg(target_os = "linux")]

use std::time::Duration;

use indexmap::IndexMap;
use mc_core::{Connection, Connector, ToolProviderConfig};
use mc_mcp::RmcpConnector;
use serde_json::json;

const WEATHER_SERVER: &str = env!("CARGO_BIN_EXE_mcp-weather-server");

/// Gone from the process table, or a zombie waiting to be reaped.
fn has_exited(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return true;
    };
    // The state letter follows the parenthesised command name.
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.trim_start().chars().next())
        .is_some_and(|state| state == 'Z' || state == 'X')
}

async fn wait_for_exit(pid: u32) -> bool {
    for _ in 0..200 {
        if has_exited(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_stdio_server_lists_invokes_and_exits_on_close() {
    let connector = RmcpConnector::new();
    let connection = connector
        .open_stdio("get_weather", WEATHER_SERVER, &[], &IndexMap::new())
        .await
        .unwrap();
    let pid = connection.process_id().unwrap();
    assert!(!has_exited(pid));

    let tools = connection.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "get_weather");
    assert_eq!(tools[0].required_arguments(), vec!["location"]);

    let output = connection
        .invoke("get_weather", json!({"location": "Seoul"}))
        .await
        .unwrap();
    assert!(!output.is_error);
    assert_eq!(output.content, "It's always Sunny in Seoul");

    connection.close().await;

    assert!(wait_for_exit(pid).await, "server process {pid} outlived close()");
    assert!(connection.invoke("get_weather", json!({"location": "Seoul"})).await.is_err());
}

#[tokio::test]
async fn test_stdio_config_opens_through_connector() {
    let config = ToolProviderConfig::stdio(WEATHER_SERVER, Vec::<String>::new())
        .with_env("RUST_LOG", "debug");

    let connection = RmcpConnector::new().open("weather", &config).await.unwrap();

    assert_eq!(connection.provider(), "weather");
    let names: Vec<String> = connection
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["get_weather"]);
    connection.close().await;
}
