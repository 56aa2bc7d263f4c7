use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mc_core::{ProviderRegistry, ReactAgentFactory, Session, ToolProviderConfigs};
use mc_mcp::RmcpConnector;
use mc_providers::AnthropicProvider;

mod chat;
mod config;
mod display;
mod setup;

use chat::{format_tools, ChatApp};
use config::Config;

/// Log level for tracing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Most verbose: raw stream payloads and MCP server stderr
    Trace,
    /// Verbose: requests, tool invocations, MCP server stderr
    Debug,
    /// Standard: connections and session lifecycle
    Info,
    /// Quiet: only warnings and errors
    Warn,
    /// Minimal: only errors
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser)]
#[command(name = "mcpchat")]
#[command(author, version, about = "Chat with an LLM agent that uses MCP tool servers", long_about = None)]
pub struct Cli {
    /// Configuration file (layered over ~/.config/mcpchat/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Tool provider JSON file (overrides config)
    #[arg(long)]
    pub mcp_config: Option<String>,

    /// Model to use (overrides config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Response timeout in seconds (60-300)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Reasoning-step budget per question (10-200)
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,

    /// Enable debug logging (shorthand for --log-level debug)
    #[arg(short, long)]
    pub debug: bool,

    /// Write logs to file (JSON-lines format)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive chat mode (default)
    Chat,
    /// Connect to every tool provider and list its tools
    Tools,
    /// Show current configuration
    Config,
    /// Initialize configuration files in ~/.config/mcpchat
    Setup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Resolve log level: --debug overrides --log-level
    let log_level = if cli.debug {
        LogLevel::Debug
    } else {
        cli.log_level
    };
    let filter = EnvFilter::new(log_level.as_filter());

    if let Some(log_path) = &cli.log_file {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("Failed to create log file: {:?}", log_path))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::sync::Mutex::new(file)))
            .init();
    } else {
        // Chat output owns stdout
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    // Handle setup before config is required
    if matches!(&cli.command, Some(Commands::Setup)) {
        return setup::run();
    }

    let mut config = Config::load(cli.config.as_deref())?;
    apply_overrides(&cli, &mut config);

    match &cli.command {
        Some(Commands::Tools) => list_tools(&config).await,
        Some(Commands::Config) => show_config(&config),
        Some(Commands::Setup) => unreachable!(),
        Some(Commands::Chat) | None => chat_mode(&config).await,
    }
}

/// Command-line flags win over every config layer.
fn apply_overrides(cli: &Cli, config: &mut Config) {
    if let Some(path) = &cli.mcp_config {
        config.mcp_config = Some(path.clone());
    }
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(secs) = cli.timeout {
        config.session.timeout_secs = secs;
    }
    if let Some(steps) = cli.max_steps {
        config.session.max_steps = steps;
    }
}

fn load_tool_configs(config: &Config) -> Result<(ToolProviderConfigs, PathBuf)> {
    let path = config.mcp_config_path()?;
    let configs = ToolProviderConfigs::load(&path)
        .with_context(|| format!("Failed to load tool providers from {}", path.display()))?;
    Ok((configs, path))
}

fn build_provider(config: &Config) -> Result<AnthropicProvider> {
    let api_key = config.api_key().context(
        "No API key configured. Set ANTHROPIC_API_KEY or provider.api_key in config.toml",
    )?;

    let mut provider = AnthropicProvider::new(api_key).with_default_model(&config.provider.model);
    if let Some(base_url) = &config.provider.base_url {
        provider = provider.with_base_url(base_url);
    }
    Ok(provider)
}

async fn chat_mode(config: &Config) -> Result<()> {
    let provider = build_provider(config)?;
    let (tool_configs, mcp_path) = load_tool_configs(config)?;

    let factory = ReactAgentFactory::new(Arc::new(provider), config.generation_options());
    let session = Session::new(
        Arc::new(RmcpConnector::new()),
        Arc::new(factory),
        config.session_settings(),
    );

    chat::run_chat(ChatApp::new(session, tool_configs, mcp_path)).await
}

async fn list_tools(config: &Config) -> Result<()> {
    let (tool_configs, mcp_path) = load_tool_configs(config)?;
    println!("Tool providers from {}:\n", mcp_path.display());

    let connector = RmcpConnector::new();
    let mut registry = ProviderRegistry::build(&connector, &tool_configs)
        .await
        .context("Failed to connect to tool providers")?;

    print!("{}", format_tools(&registry.providers()));
    registry.close().await;
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    if let Some(key) = shown.provider.api_key.as_mut() {
        *key = mask_key(key);
    }

    println!("Configuration:\n");
    println!("{}", toml::to_string_pretty(&shown).context("Failed to render configuration")?);
    println!(
        "API key: {}",
        config
            .api_key()
            .map(|k| mask_key(&k))
            .unwrap_or_else(|| "(not set)".to_string())
    );

    let (tool_configs, mcp_path) = load_tool_configs(config)?;
    let origin = if mcp_path.exists() { "" } else { " (not found, using default)" };
    println!("\nTool providers ({}{}):", mcp_path.display(), origin);
    for (name, provider) in tool_configs.iter() {
        println!("  {name} [{}] {}", provider.transport, provider.describe());
    }
    Ok(())
}

fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(7).collect();
    if key.chars().count() <= 7 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}
