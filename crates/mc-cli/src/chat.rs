//! Interactive chat mode with readline support.

use std::path::PathBuf;

use anyhow::Result;
use crossterm::style::Color;
use indexmap::IndexMap;
use rustyline::error::ReadlineError;
use rustyline::history::FileHistory;
use rustyline::{Config, Editor};

use mc_core::{Session, ToolProviderConfigs, Turn, TurnResult, MAX_STEPS_RANGE, TIMEOUT_RANGE_SECS};

use crate::display::{print_colored, TerminalSink};

/// Chat commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Quit,
    Help,
    Reset,
    History,
    Tools,
    Status,
    Apply,
    Add(String),
    Remove(String),
    Timeout(Option<u64>),
    Steps(Option<usize>),
    /// A command with a bad or missing argument; carries the usage hint.
    Invalid(String),
    Unknown(String),
    Message(String),
    Empty,
}

pub fn parse_command(input: &str) -> ChatCommand {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return ChatCommand::Empty;
    }

    if !trimmed.starts_with('/') {
        return ChatCommand::Message(trimmed.to_string());
    }

    let (cmd, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd.to_lowercase(), arg.trim()),
        None => (trimmed.to_lowercase(), ""),
    };

    match cmd.as_str() {
        "/quit" | "/exit" | "/q" => ChatCommand::Quit,
        "/help" | "/?" => ChatCommand::Help,
        "/reset" | "/clear" => ChatCommand::Reset,
        "/history" | "/h" => ChatCommand::History,
        "/tools" | "/t" => ChatCommand::Tools,
        "/status" => ChatCommand::Status,
        "/apply" => ChatCommand::Apply,
        "/add" if arg.is_empty() => ChatCommand::Invalid("Usage: /add <json>".to_string()),
        "/add" => ChatCommand::Add(arg.to_string()),
        "/remove" if arg.is_empty() => ChatCommand::Invalid("Usage: /remove <name>".to_string()),
        "/remove" => ChatCommand::Remove(arg.to_string()),
        "/timeout" => match parse_optional(arg) {
            Ok(secs) => ChatCommand::Timeout(secs),
            Err(()) => ChatCommand::Invalid("Usage: /timeout [seconds]".to_string()),
        },
        "/steps" => match parse_optional(arg) {
            Ok(steps) => ChatCommand::Steps(steps),
            Err(()) => ChatCommand::Invalid("Usage: /steps [count]".to_string()),
        },
        _ => ChatCommand::Unknown(cmd),
    }
}

fn parse_optional<T: std::str::FromStr>(arg: &str) -> std::result::Result<Option<T>, ()> {
    if arg.is_empty() {
        Ok(None)
    } else {
        arg.parse().map(Some).map_err(|_| ())
    }
}

fn print_help() {
    println!(
        r#"
Chat Commands:
  /help, /?          Show this help message
  /quit, /exit       Exit chat mode
  /reset, /clear     Start a new conversation thread
  /history, /h       Show the conversation so far
  /tools, /t         List tools per provider
  /status            Show session state and limits
  /add <json>        Add tool providers to the pending configuration
  /remove <name>     Remove a tool provider from the pending configuration
  /apply             Save the pending configuration and reconnect
  /timeout [secs]    Show or set the response timeout ({}-{} seconds)
  /steps [n]         Show or set the reasoning-step budget ({}-{})

Example:
  /add {{"time": {{"command": "python", "args": ["./mcp_server_time.py"], "transport": "stdio"}}}}

Tips:
  - Press Ctrl+D to exit
  - Up/Down arrows navigate history
"#,
        TIMEOUT_RANGE_SECS.start(),
        TIMEOUT_RANGE_SECS.end(),
        MAX_STEPS_RANGE.start(),
        MAX_STEPS_RANGE.end(),
    );
}

/// Render committed turns for `/history`.
pub fn format_history(turns: &[Turn]) -> String {
    if turns.is_empty() {
        return "No messages yet.\n".to_string();
    }
    let mut out = String::new();
    for turn in turns {
        match turn {
            Turn::User(text) => out.push_str(&format!("you> {text}\n")),
            Turn::Assistant(text) => out.push_str(&format!("assistant> {text}\n")),
            Turn::ToolTrace(text) => {
                for line in text.lines().filter(|l| !l.is_empty()) {
                    out.push_str(&format!("  │ {line}\n"));
                }
            }
        }
    }
    out
}

/// Render the per-provider tool listing for `/tools`.
pub fn format_tools(providers: &IndexMap<String, Vec<String>>) -> String {
    if providers.is_empty() {
        return "No tools available.\n".to_string();
    }
    let mut out = String::new();
    for (provider, tools) in providers {
        out.push_str(&format!("{provider} ({})\n", tools.len()));
        for tool in tools {
            out.push_str(&format!("  - {tool}\n"));
        }
    }
    out
}

/// What the loop should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct ChatApp {
    session: Session,
    /// Provider configuration edited by /add and /remove, applied by /apply.
    pending: ToolProviderConfigs,
    mcp_config_path: PathBuf,
}

impl ChatApp {
    pub fn new(session: Session, pending: ToolProviderConfigs, mcp_config_path: PathBuf) -> Self {
        Self {
            session,
            pending,
            mcp_config_path,
        }
    }

    /// Connect to the configured tool providers.
    pub async fn start(&mut self) {
        match self.session.initialize(&self.pending).await {
            Ok(()) => println!("{}", connection_summary(&self.session)),
            Err(e) => {
                print_colored(Color::Red, &format!("Failed to initialize tools: {e}"));
                println!("Fix the configuration with /add or /remove, then /apply.");
            }
        }
    }

    pub async fn handle(&mut self, command: ChatCommand) -> Flow {
        match command {
            ChatCommand::Quit => return Flow::Quit,
            ChatCommand::Empty => {}
            ChatCommand::Help => print_help(),
            ChatCommand::Reset => {
                self.session.reset();
                println!("Conversation reset (thread {}).\n", self.session.thread_id());
            }
            ChatCommand::History => print!("{}", format_history(self.session.history())),
            ChatCommand::Tools => print!("{}", format_tools(&self.session.provider_tools())),
            ChatCommand::Status => self.print_status(),
            ChatCommand::Add(json) => match self.pending.merge_json(&json) {
                Ok(added) => println!(
                    "Added {}. Run /apply to connect.",
                    added.join(", ")
                ),
                Err(e) => print_colored(Color::Red, &format!("Invalid provider configuration: {e}")),
            },
            ChatCommand::Remove(name) => match self.pending.remove(&name) {
                Some(_) => println!("Removed {name}. Run /apply to reconnect."),
                None => println!("No tool provider named {name}."),
            },
            ChatCommand::Apply => self.apply().await,
            ChatCommand::Timeout(None) => {
                println!("Timeout: {}s", self.session.settings().timeout.as_secs())
            }
            ChatCommand::Timeout(Some(secs)) => {
                let applied = self.session.set_timeout_secs(secs);
                println!("Timeout set to {applied}s.");
            }
            ChatCommand::Steps(None) => println!("Step budget: {}", self.session.settings().max_steps),
            ChatCommand::Steps(Some(steps)) => {
                let applied = self.session.set_max_steps(steps);
                println!("Step budget set to {applied}.");
            }
            ChatCommand::Invalid(usage) => println!("{usage}"),
            ChatCommand::Unknown(cmd) => {
                eprintln!("Unknown command: {cmd}. Type /help for available commands.")
            }
            ChatCommand::Message(text) => self.submit(&text).await,
        }
        Flow::Continue
    }

    async fn apply(&mut self) {
        if self.pending.is_empty() {
            println!("The pending configuration has no tool providers.");
            return;
        }
        match self.session.initialize(&self.pending).await {
            Ok(()) => {
                if let Err(e) = self.pending.save(&self.mcp_config_path) {
                    print_colored(Color::Yellow, &format!("Connected, but saving failed: {e}"));
                }
                println!("Applied. {}", connection_summary(&self.session));
            }
            Err(e) => print_colored(Color::Red, &format!("Failed to apply configuration: {e}")),
        }
    }

    async fn submit(&mut self, text: &str) {
        let mut sink = TerminalSink::stdout();
        let result = self.session.submit_turn(text, &mut sink).await;
        sink.finish();

        if let TurnResult::Failure { kind, message } = result {
            print_colored(Color::Red, &format!("[{kind}] {message}\n"));
        }
    }

    fn print_status(&self) {
        let settings = self.session.settings();
        println!("State:     {:?}", self.session.state());
        println!("Thread:    {}", self.session.thread_id());
        println!("Turns:     {}", self.session.history().len());
        println!("Timeout:   {}s", settings.timeout.as_secs());
        println!("Steps:     {}", settings.max_steps);
        println!("Providers: {}", self.session.provider_count());
        println!("Tools:     {}", self.session.tool_names().len());
        println!("Pending:   {}", self.pending.names().join(", "));
        println!("Config:    {}\n", self.mcp_config_path.display());
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn pending(&self) -> &ToolProviderConfigs {
        &self.pending
    }

    pub async fn shutdown(&mut self) {
        self.session.shutdown().await;
    }
}

/// Run interactive chat mode
pub async fn run_chat(mut app: ChatApp) -> Result<()> {
    let config = Config::builder()
        .history_ignore_space(true)
        .history_ignore_dups(true)?
        .build();

    let history_path = get_history_path();
    let mut rl: Editor<(), FileHistory> = Editor::with_config(config)?;

    if let Some(path) = &history_path {
        let _ = rl.load_history(path);
    }

    app.start().await;
    println!("Chat mode started. Type /help for commands, /quit to exit.\n");

    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let _ = rl.add_history_entry(&line);
                if app.handle(parse_command(&line)).await == Flow::Quit {
                    println!("Goodbye!");
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &history_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = rl.save_history(path);
    }

    app.shutdown().await;
    Ok(())
}

fn get_history_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mcpchat").join("chat_history"))
}

fn connection_summary(session: &Session) -> String {
    format!(
        "Connected to {} tool provider(s), {} tool(s) available.",
        session.provider_count(),
        session.tool_names().len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mc_core::testing::{AgentScript, MockConnector, ScriptedAgentFactory};
    use mc_core::{SessionSettings, SessionState, StreamEvent, ToolProviderConfig};

    #[test]
    fn test_parse_plain_message_and_empty() {
        assert_eq!(
            parse_command("  What's the weather in Seoul?  "),
            ChatCommand::Message("What's the weather in Seoul?".to_string())
        );
        assert_eq!(parse_command("   "), ChatCommand::Empty);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("/quit"), ChatCommand::Quit);
        assert_eq!(parse_command("/EXIT"), ChatCommand::Quit);
        assert_eq!(parse_command("/reset"), ChatCommand::Reset);
        assert_eq!(parse_command("/remove time"), ChatCommand::Remove("time".to_string()));
        assert_eq!(
            parse_command(r#"/add {"time": {"url": "http://localhost:8005/mcp"}}"#),
            ChatCommand::Add(r#"{"time": {"url": "http://localhost:8005/mcp"}}"#.to_string())
        );
        assert_eq!(parse_command("/bogus"), ChatCommand::Unknown("/bogus".to_string()));
    }

    #[test]
    fn test_parse_numeric_arguments() {
        assert_eq!(parse_command("/timeout"), ChatCommand::Timeout(None));
        assert_eq!(parse_command("/timeout 180"), ChatCommand::Timeout(Some(180)));
        assert_eq!(parse_command("/steps 50"), ChatCommand::Steps(Some(50)));
        assert!(matches!(parse_command("/steps many"), ChatCommand::Invalid(_)));
        assert!(matches!(parse_command("/add"), ChatCommand::Invalid(_)));
    }

    #[test]
    fn test_format_history_indents_tool_trace() {
        let turns = vec![
            Turn::User("Weather?".to_string()),
            Turn::Assistant("Sunny.".to_string()),
            Turn::ToolTrace("\n**Tool result** `get_weather`\n".to_string()),
        ];

        assert_eq!(
            format_history(&turns),
            "you> Weather?\nassistant> Sunny.\n  │ **Tool result** `get_weather`\n"
        );
        assert_eq!(format_history(&[]), "No messages yet.\n");
    }

    #[test]
    fn test_format_tools() {
        let mut providers = IndexMap::new();
        providers.insert("weather".to_string(), vec!["get_weather".to_string()]);

        assert_eq!(format_tools(&providers), "weather (1)\n  - get_weather\n");
    }

    fn app(path: PathBuf) -> (ChatApp, Arc<ScriptedAgentFactory>) {
        let connector = MockConnector::new()
            .with_tools("get_weather", &["get_weather"])
            .with_tools("time", &["get_current_time"]);
        let factory = Arc::new(ScriptedAgentFactory::new());
        let session = Session::new(Arc::new(connector), factory.clone(), SessionSettings::default());
        (
            ChatApp::new(session, ToolProviderConfigs::default_config(), path),
            factory,
        )
    }

    #[tokio::test]
    async fn test_add_then_apply_saves_and_reconnects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        let (mut app, _) = app(path.clone());
        app.start().await;

        app.handle(parse_command(
            r#"/add {"time": {"command": "python", "args": ["./mcp_server_time.py"]}}"#,
        ))
        .await;
        assert_eq!(app.pending().names(), vec!["get_weather", "time"]);
        assert_eq!(app.session().tool_names(), vec!["get_weather"]);

        app.handle(ChatCommand::Apply).await;

        assert_eq!(app.session().tool_names(), vec!["get_weather", "get_current_time"]);
        let saved = ToolProviderConfigs::load(&path).unwrap();
        assert_eq!(
            saved.get("time"),
            Some(&ToolProviderConfig::stdio("python", ["./mcp_server_time.py"]))
        );
    }

    #[tokio::test]
    async fn test_summary_counts_providers_without_tools() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _) = app(dir.path().join("mcp.json"));
        app.handle(parse_command(r#"/add {"silent": {"command": "python", "args": ["silent.py"]}}"#))
            .await;
        app.handle(ChatCommand::Apply).await;

        assert_eq!(
            connection_summary(app.session()),
            "Connected to 2 tool provider(s), 1 tool(s) available."
        );
    }

    #[tokio::test]
    async fn test_invalid_add_leaves_pending_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _) = app(dir.path().join("mcp.json"));

        app.handle(parse_command(r#"/add {"broken": {"args": "nope"}}"#)).await;

        assert_eq!(app.pending().names(), vec!["get_weather"]);
    }

    #[tokio::test]
    async fn test_message_and_reset_flow() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, factory) = app(dir.path().join("mcp.json"));
        app.start().await;

        factory.queue(AgentScript::Events(vec![StreamEvent::text("Sunny.")]));
        app.handle(parse_command("Weather in Seoul?")).await;
        assert_eq!(app.session().history().len(), 2);

        let before = app.session().thread_id().clone();
        app.handle(ChatCommand::Reset).await;
        assert!(app.session().history().is_empty());
        assert_ne!(app.session().thread_id(), &before);

        assert_eq!(app.handle(ChatCommand::Quit).await, Flow::Quit);
        app.shutdown().await;
        assert_eq!(app.session().state(), &SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_limits_are_clamped_through_commands() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _) = app(dir.path().join("mcp.json"));

        app.handle(parse_command("/timeout 9999")).await;
        app.handle(parse_command("/steps 1")).await;

        assert_eq!(app.session().settings().timeout.as_secs(), 300);
        assert_eq!(app.session().settings().max_steps, 10);
    }
}
