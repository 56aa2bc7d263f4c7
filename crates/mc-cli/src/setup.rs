use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use mc_core::ToolProviderConfigs;

use crate::config::Config;

const CONFIG_TEMPLATE: &str = r#"# mcpchat configuration
#
# The API key is read from ANTHROPIC_API_KEY by default.
# Any setting can be overridden with MCPCHAT_<SECTION>__<KEY>, e.g.
#   MCPCHAT_SESSION__TIMEOUT_SECS=180

# Tool provider file (supports ~ and $VAR)
# mcp_config = "~/.config/mcpchat/mcp.json"

[provider]
# api_key = "sk-ant-..."          # or set ANTHROPIC_API_KEY env var
model = "claude-sonnet-4-20250514"
# max_tokens = 4096
# temperature = 0.7

[session]
# Seconds before an unfinished response is abandoned (60-300)
timeout_secs = 120
# Reasoning steps the agent may take per question (10-200)
max_steps = 100
# Extra instructions appended to the built-in system prompt
# system_prompt = "Answer in Korean."
"#;

pub fn run() -> Result<()> {
    let config_dir = Config::config_dir()?;
    run_in(&config_dir, confirm_overwrite)
}

/// Write the templates into `config_dir`, asking `confirm` before replacing existing files.
fn run_in(config_dir: &Path, confirm: impl FnOnce(&[PathBuf]) -> Result<bool>) -> Result<()> {
    let config_path = config_dir.join("config.toml");
    let mcp_path = config_dir.join("mcp.json");

    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;

    let existing: Vec<PathBuf> = [&config_path, &mcp_path]
        .into_iter()
        .filter(|p| p.exists())
        .cloned()
        .collect();

    if !existing.is_empty() {
        if !confirm(&existing)? {
            println!("Setup cancelled.");
            return Ok(());
        }
        for path in &existing {
            backup_file(path)?;
        }
    }

    std::fs::write(&config_path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("Created {}", config_path.display());

    std::fs::write(&mcp_path, ToolProviderConfigs::default_config().to_json_pretty())
        .with_context(|| format!("Failed to write {}", mcp_path.display()))?;
    println!("Created {}", mcp_path.display());

    println!("\nNext steps:");
    println!("  1. Set your API key:    export ANTHROPIC_API_KEY=\"sk-ant-...\"");
    println!("  2. Edit tool providers: {}", mcp_path.display());
    println!("  3. Check the tools:     mcpchat tools");
    println!("  4. Start chatting:      mcpchat");

    Ok(())
}

fn confirm_overwrite(existing: &[PathBuf]) -> Result<bool> {
    println!("Existing config files found:");
    for path in existing {
        println!("  {}", path.display());
    }
    print!("\nOverwrite? (Existing files will be backed up) [y/N] ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Back up a file to <name>.bak, appending a timestamp if .bak already exists.
fn backup_file(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut backup = path.with_file_name(format!("{file_name}.bak"));

    if backup.exists() {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        backup = path.with_file_name(format!("{file_name}.bak.{timestamp}"));
    }

    std::fs::rename(path, &backup)
        .with_context(|| format!("Failed to back up {} to {}", path.display(), backup.display()))?;
    println!("  Backed up to {}", backup.display());

    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_parse() {
        let config: Config = toml::from_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.session.timeout_secs, 120);
        assert_eq!(config.session.max_steps, 100);
        assert!(config.provider.api_key.is_none());
    }

    #[test]
    fn test_fresh_setup_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();

        run_in(dir.path(), |_| panic!("nothing to confirm")).unwrap();

        let mcp = ToolProviderConfigs::load(&dir.path().join("mcp.json")).unwrap();
        assert_eq!(mcp, ToolProviderConfigs::default_config());
        assert!(dir.path().join("config.toml").exists());
    }

    #[test]
    fn test_declined_overwrite_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "# mine\n").unwrap();

        run_in(dir.path(), |existing| {
            assert_eq!(existing, [config_path.clone()]);
            Ok(false)
        })
        .unwrap();

        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "# mine\n");
        assert!(!dir.path().join("mcp.json").exists());
    }

    #[test]
    fn test_overwrite_backs_up_existing() {
        let dir = tempfile::tempdir().unwrap();
        let mcp_path = dir.path().join("mcp.json");
        std::fs::write(&mcp_path, "{}").unwrap();
        std::fs::write(dir.path().join("mcp.json.bak"), "{}").unwrap();

        run_in(dir.path(), |_| Ok(true)).unwrap();

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("mcp.json.bak."))
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(
            ToolProviderConfigs::load(&mcp_path).unwrap(),
            ToolProviderConfigs::default_config()
        );
    }
}
