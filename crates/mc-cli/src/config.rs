use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use regex::Regex;
use serde::{Deserialize, Serialize};

use mc_core::{GenerationOptions, SessionSettings, DEFAULT_PREAMBLE};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const ENV_PREFIX: &str = "MCPCHAT_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderSection,

    pub session: SessionSection,

    /// Path to the tool-provider JSON file (supports ~, $VAR, ${VAR})
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_config: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// Falls back to ANTHROPIC_API_KEY
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Response timeout in seconds (60-300)
    pub timeout_secs: u64,

    /// Reasoning-step budget per turn (10-200)
    pub max_steps: usize,

    /// Extra instructions appended to the built-in preamble
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            timeout_secs: mc_core::DEFAULT_TIMEOUT_SECS,
            max_steps: mc_core::DEFAULT_MAX_STEPS,
            system_prompt: None,
        }
    }
}

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("environment variable pattern is valid")
});

/// Expand environment variables in a path string
/// Supports: $VAR, ${VAR}, ~
pub fn expand_path(path: &str) -> PathBuf {
    let mut result = path.to_string();

    // Expand ~ at the start
    if result.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            result = format!("{}{}", home.display(), &result[1..]);
        }
    } else if result == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }

    // Unset variables are left as written
    let expanded = ENV_VAR.replace_all(&result, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });

    PathBuf::from(expanded.to_string())
}

impl Config {
    /// Load configuration.
    ///
    /// Priority (highest to lowest):
    /// 1. `MCPCHAT_*` environment variables (`__` separates nested keys)
    /// 2. Explicit config path (must exist)
    /// 3. `~/.config/mcpchat/config.toml`
    /// 4. Default values
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }

        let global = Self::config_path().ok().filter(|p| p.exists());
        Self::layered(global.as_deref(), explicit)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Invalid configuration")
    }

    /// File layers only, without the environment.
    fn layered(global: Option<&Path>, explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = global {
            figment = figment.merge(Toml::file(path));
        }
        if let Some(path) = explicit {
            figment = figment.merge(Toml::file(path));
        }
        figment
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("mcpchat"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Location of the tool-provider JSON file.
    pub fn mcp_config_path(&self) -> Result<PathBuf> {
        match &self.mcp_config {
            Some(path) => Ok(expand_path(path)),
            None => Ok(Self::config_dir()?.join("mcp.json")),
        }
    }

    pub fn api_key(&self) -> Option<String> {
        self.provider
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .filter(|key| !key.is_empty())
    }

    /// Session limits, clamped to their allowed ranges, and the agent preamble.
    pub fn session_settings(&self) -> SessionSettings {
        let preamble = match &self.session.system_prompt {
            Some(extra) if !extra.trim().is_empty() => format!("{DEFAULT_PREAMBLE}\n\n{}", extra.trim()),
            _ => DEFAULT_PREAMBLE.to_string(),
        };
        SessionSettings::new(self.session.timeout_secs, self.session.max_steps, preamble)
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: Some(self.provider.model.clone()),
            temperature: self.provider.temperature,
            max_tokens: self.provider.max_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_config() {
        let toml = r#"
            mcp_config = "/etc/mcpchat/servers.json"

            [provider]
            api_key = "sk-ant-test"
            model = "claude-opus-4-20250514"
            max_tokens = 4096

            [session]
            timeout_secs = 90
            max_steps = 30
            system_prompt = "Prefer metric units."
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.provider.model, "claude-opus-4-20250514");
        assert_eq!(config.provider.max_tokens, Some(4096));
        assert_eq!(config.api_key().as_deref(), Some("sk-ant-test"));
        assert_eq!(
            config.mcp_config_path().unwrap(),
            PathBuf::from("/etc/mcpchat/servers.json")
        );

        let settings = config.session_settings();
        assert_eq!(settings.timeout, Duration::from_secs(90));
        assert_eq!(settings.max_steps, 30);
        assert!(settings.preamble.starts_with(DEFAULT_PREAMBLE));
        assert!(settings.preamble.ends_with("Prefer metric units."));
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.provider.model, DEFAULT_MODEL);
        assert_eq!(config.session.timeout_secs, 120);
        assert_eq!(config.session.max_steps, 100);
        assert_eq!(config.session_settings().preamble, DEFAULT_PREAMBLE);
        assert_eq!(
            config.generation_options().model.as_deref(),
            Some(DEFAULT_MODEL)
        );
    }

    #[test]
    fn test_session_limits_are_clamped() {
        let config: Config = toml::from_str(
            r#"
            [session]
            timeout_secs = 5
            max_steps = 999
        "#,
        )
        .unwrap();

        let settings = config.session_settings();
        assert_eq!(settings.timeout, Duration::from_secs(60));
        assert_eq!(settings.max_steps, 200);
    }

    #[test]
    fn test_explicit_file_overrides_global() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global.toml");
        let explicit = dir.path().join("explicit.toml");
        std::fs::write(
            &global,
            "[provider]\nmodel = \"global-model\"\n[session]\nmax_steps = 40\n",
        )
        .unwrap();
        std::fs::write(&explicit, "[provider]\nmodel = \"explicit-model\"\n").unwrap();

        let config: Config = Config::layered(Some(&global), Some(&explicit))
            .extract()
            .unwrap();

        assert_eq!(config.provider.model, "explicit-model");
        assert_eq!(config.session.max_steps, 40);
        assert_eq!(config.session.timeout_secs, 120);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_expand_path() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_path("~"), home);
        assert_eq!(expand_path("~/mcp.json"), home.join("mcp.json"));

        std::env::set_var("MCPCHAT_TEST_EXPAND_DIR", "/srv/tools");
        assert_eq!(
            expand_path("$MCPCHAT_TEST_EXPAND_DIR/mcp.json"),
            PathBuf::from("/srv/tools/mcp.json")
        );
        assert_eq!(
            expand_path("${MCPCHAT_TEST_EXPAND_DIR}/x.json"),
            PathBuf::from("/srv/tools/x.json")
        );
        assert_eq!(
            expand_path("$MCPCHAT_TEST_UNSET_VAR/x"),
            PathBuf::from("$MCPCHAT_TEST_UNSET_VAR/x")
        );
    }
}
