//! Tool-provider configuration.
//!
//! The JSON form maps provider names to launch descriptors:
//!
//! ```json
//! {
//!   "get_weather": { "command": "python", "args": ["./mcp_server_local.py"], "transport": "stdio" },
//!   "retriever":   { "url": "http://localhost:8005/mcp", "transport": "sse" }
//! }
//! ```
//!
//! A top-level `"mcpServers"` wrapper is accepted and unwrapped.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::Error;

const WRAPPER_KEY: &str = "mcpServers";

/// How the client talks to a tool provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Local subprocess speaking over stdin/stdout.
    Stdio,
    /// Persistent streaming HTTP connection to an endpoint URL.
    Sse,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "stdio" => Some(TransportKind::Stdio),
            "sse" | "streamable_http" => Some(TransportKind::Sse),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Launch descriptor: exactly one of a command line or an endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    Command {
        command: String,
        args: Vec<String>,
        env: IndexMap<String, String>,
    },
    Endpoint {
        url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolProviderConfig {
    pub launch: Launch,
    pub transport: TransportKind,
}

impl ToolProviderConfig {
    pub fn stdio<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            launch: Launch::Command {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                env: IndexMap::new(),
            },
            transport: TransportKind::Stdio,
        }
    }

    pub fn endpoint(url: impl Into<String>) -> Self {
        Self {
            launch: Launch::Endpoint { url: url.into() },
            transport: TransportKind::Sse,
        }
    }

    /// Add an environment variable for a command launch. No-op for endpoints.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Launch::Command { env, .. } = &mut self.launch {
            env.insert(key.into(), value.into());
        }
        self
    }

    /// Validate one JSON entry.
    pub fn from_value(name: &str, value: &Value) -> Result<Self, Error> {
        let entry = value.as_object().ok_or_else(|| {
            Error::config(format!(
                "tool provider '{name}' must be a JSON object with either `command` and `args` or `url`"
            ))
        })?;

        // A url always means the network transport, whatever the input claimed.
        if let Some(url) = optional_string(name, entry, "url")? {
            return Ok(Self::endpoint(url));
        }

        let command = optional_string(name, entry, "command")?;
        let transport = match optional_string(name, entry, "transport")? {
            Some(raw) => Some(TransportKind::parse(&raw).ok_or_else(|| {
                Error::config(format!(
                    "tool provider '{name}': unknown transport '{raw}', expected \"stdio\" or \"sse\""
                ))
            })?),
            None => None,
        };

        let Some(command) = command else {
            return Err(Error::config(format!(
                "tool provider '{name}' must have either `command` (with `args`) or `url`"
            )));
        };

        if transport == Some(TransportKind::Sse) {
            return Err(Error::config(format!(
                "tool provider '{name}': transport \"sse\" requires a `url`"
            )));
        }

        let args = match entry.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        Error::config(format!(
                            "tool provider '{name}': `args` must be an array of strings"
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(Error::config(format!(
                    "tool provider '{name}': `args` must be an array of strings"
                )))
            }
        };

        let env = match entry.get("env") {
            None | Some(Value::Null) => IndexMap::new(),
            Some(Value::Object(vars)) => vars
                .iter()
                .map(|(key, value)| {
                    value
                        .as_str()
                        .map(|v| (key.clone(), v.to_string()))
                        .ok_or_else(|| {
                            Error::config(format!(
                                "tool provider '{name}': `env` values must be strings"
                            ))
                        })
                })
                .collect::<Result<IndexMap<_, _>, _>>()?,
            Some(_) => {
                return Err(Error::config(format!(
                    "tool provider '{name}': `env` must be an object of strings"
                )))
            }
        };

        Ok(Self {
            launch: Launch::Command { command, args, env },
            transport: TransportKind::Stdio,
        })
    }

    pub fn to_value(&self) -> Value {
        match &self.launch {
            Launch::Command { command, args, env } => {
                let mut entry = json!({
                    "command": command,
                    "args": args,
                    "transport": self.transport.as_str(),
                });
                if !env.is_empty() {
                    entry["env"] = json!(env);
                }
                entry
            }
            Launch::Endpoint { url } => json!({
                "url": url,
                "transport": self.transport.as_str(),
            }),
        }
    }

    /// Short human-readable launch description for logs and listings.
    pub fn describe(&self) -> String {
        match &self.launch {
            Launch::Command { command, args, .. } if args.is_empty() => command.clone(),
            Launch::Command { command, args, .. } => format!("{} {}", command, args.join(" ")),
            Launch::Endpoint { url } => url.clone(),
        }
    }
}

fn optional_string(
    name: &str,
    entry: &Map<String, Value>,
    key: &str,
) -> Result<Option<String>, Error> {
    match entry.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::config(format!(
            "tool provider '{name}': `{key}` must be a string"
        ))),
    }
}

/// Ordered set of named tool-provider configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolProviderConfigs {
    entries: IndexMap<String, ToolProviderConfig>,
}

impl ToolProviderConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration used when no file exists yet: the local weather server.
    pub fn default_config() -> Self {
        let mut configs = Self::new();
        configs.insert(
            "get_weather",
            ToolProviderConfig::stdio("python", ["./mcp_server_local.py"]),
        );
        configs
    }

    pub fn from_json_str(raw: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(raw).map_err(|e| {
            Error::config(format!(
                "tool provider configuration is not valid JSON ({e}); expected an object such as \
                 {{\"name\": {{\"command\": \"python\", \"args\": [\"server.py\"]}}}}"
            ))
        })?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let mut root = value.as_object().ok_or_else(|| {
            Error::config(
                "tool provider configuration must be a JSON object mapping provider names to entries",
            )
        })?;

        if let Some(wrapped) = root.get(WRAPPER_KEY) {
            if root.len() > 1 {
                let others: Vec<&str> = root
                    .keys()
                    .map(String::as_str)
                    .filter(|key| *key != WRAPPER_KEY)
                    .collect();
                return Err(Error::config(format!(
                    "`{WRAPPER_KEY}` cannot be mixed with top-level provider entries ({}); \
                     move them inside `{WRAPPER_KEY}`",
                    others.join(", ")
                )));
            }
            root = wrapped.as_object().ok_or_else(|| {
                Error::config(format!("`{WRAPPER_KEY}` must be a JSON object"))
            })?;
        }

        if root.is_empty() {
            return Err(Error::config(
                "tool provider configuration is empty; add at least one provider entry",
            ));
        }

        let entries = root
            .iter()
            .map(|(name, entry)| Ok((name.clone(), ToolProviderConfig::from_value(name, entry)?)))
            .collect::<Result<IndexMap<_, _>, Error>>()?;

        Ok(Self { entries })
    }

    pub fn to_json_value(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(name, config)| (name.clone(), config.to_value()))
                .collect(),
        )
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.to_json_value()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Load from a JSON file, falling back to [`Self::default_config`] when it does not exist.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            return Ok(Self::default_config());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::config(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        std::fs::write(path, self.to_json_pretty())
            .map_err(|e| Error::config(format!("failed to write {}: {e}", path.display())))
    }

    /// Parse a JSON fragment and add (or replace) its entries.
    ///
    /// Nothing changes when the fragment is invalid.
    pub fn merge_json(&mut self, raw: &str) -> Result<Vec<String>, Error> {
        let parsed = Self::from_json_str(raw)?;
        let names = parsed.names();
        self.entries.extend(parsed.entries);
        Ok(names)
    }

    pub fn insert(&mut self, name: impl Into<String>, config: ToolProviderConfig) {
        self.entries.insert(name.into(), config);
    }

    pub fn remove(&mut self, name: &str) -> Option<ToolProviderConfig> {
        self.entries.shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ToolProviderConfig> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ToolProviderConfig)> {
        self.entries.iter().map(|(name, config)| (name.as_str(), config))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
