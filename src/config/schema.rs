use crate::providers::compatible::{CompletionConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level configuration, loaded from `~/.chatrelay/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the file this config was read from. Not serialized.
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Completion endpoint key. Prefer the `CHATRELAY_API_KEY` env var.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Stream replies fragment by fragment. Default: `true`.
    #[serde(default = "default_true")]
    pub streaming: bool,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_api_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_model() -> String {
    DEFAULT_MODEL.into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    120
}

/// WebSocket gateway configuration (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway port (default: 21048)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Seconds before a plain HTTP request is abandoned. WebSocket turns are not limited.
    #[serde(default = "default_gateway_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gateway_port() -> u16 {
    21048
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_request_timeout_secs() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            request_timeout_secs: default_gateway_request_timeout_secs(),
        }
    }
}

/// Turn loop configuration (`[agent]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model invocations per user turn. Default: `10`.
    /// Setting to `0` falls back to the safe default of `10`.
    #[serde(default = "default_agent_max_tool_iterations")]
    pub max_tool_iterations: usize,
    /// Number of most recent history messages sent as context. Default: `10`.
    #[serde(default = "default_agent_context_window")]
    pub context_window: usize,
}

fn default_agent_max_tool_iterations() -> usize {
    10
}

fn default_agent_context_window() -> usize {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_agent_max_tool_iterations(),
            context_window: default_agent_context_window(),
        }
    }
}

/// Conversation log configuration (`[log]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Append-only conversation log. Default: `webchat.log`.
    #[serde(default = "default_log_output")]
    pub output: PathBuf,
}

fn default_log_output() -> PathBuf {
    PathBuf::from("webchat.log")
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: default_log_output(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            streaming: true,
            request_timeout_secs: default_request_timeout_secs(),
            gateway: GatewayConfig::default(),
            agent: AgentConfig::default(),
            log: LogConfig::default(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".chatrelay"))
}

impl Config {
    /// Load `config.toml` from `config_dir` (default `~/.chatrelay`), writing
    /// a default file first when none exists.
    pub async fn load_or_init(config_dir: Option<&Path>) -> Result<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir.to_path_buf(),
            None => default_config_dir()?,
        };
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        fs::create_dir_all(&config_dir)
            .await
            .with_context(|| format!("Failed to create config directory {}", config_dir.display()))?;

        if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path;
            return Ok(config);
        }

        let mut config = Config::default();
        config.config_path = config_path;
        config.save().await?;
        tracing::info!(path = %config.config_path.display(), "Wrote default config");
        Ok(config)
    }

    pub async fn save(&self) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, contents)
            .await
            .with_context(|| format!("Failed to write {}", self.config_path.display()))
    }

    /// Environment overrides: `CHATRELAY_*`, then the generic names.
    pub fn apply_env_overrides(&mut self) {
        for var in ["CHATRELAY_API_KEY", "DEEPSEEK_API_KEY", "API_KEY"] {
            if let Ok(key) = std::env::var(var) {
                if !key.is_empty() {
                    self.api_key = Some(key);
                    break;
                }
            }
        }

        if let Ok(url) = std::env::var("CHATRELAY_API_URL") {
            if !url.is_empty() {
                self.api_url = url;
            }
        }

        if let Ok(model) = std::env::var("CHATRELAY_MODEL") {
            if !model.is_empty() {
                self.model = model;
            }
        }

        if let Ok(temp_str) = std::env::var("CHATRELAY_TEMPERATURE") {
            if let Ok(temp) = temp_str.parse::<f64>() {
                if (0.0..=2.0).contains(&temp) {
                    self.temperature = temp;
                }
            }
        }

        if let Ok(port_str) =
            std::env::var("CHATRELAY_GATEWAY_PORT").or_else(|_| std::env::var("PORT"))
        {
            if let Ok(port) = port_str.parse::<u16>() {
                self.gateway.port = port;
            }
        }

        if let Ok(host) = std::env::var("CHATRELAY_GATEWAY_HOST").or_else(|_| std::env::var("HOST"))
        {
            if !host.is_empty() {
                self.gateway.host = host;
            }
        }
    }

    /// Iteration cap with `0` mapped to the default.
    pub fn effective_max_tool_iterations(&self) -> usize {
        if self.agent.max_tool_iterations == 0 {
            default_agent_max_tool_iterations()
        } else {
            self.agent.max_tool_iterations
        }
    }

    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            name: "deepseek".into(),
            base_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            timeout_secs: self.request_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.api_url, "https://api.deepseek.com");
        assert_eq!(config.model, "deepseek-chat");
        assert!(config.streaming);
        assert_eq!(config.gateway.port, 21048);
        assert_eq!(config.agent.max_tool_iterations, 10);
        assert_eq!(config.agent.context_window, 10);
        assert_eq!(config.log.output, PathBuf::from("webchat.log"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
model = "deepseek-reasoner"

[gateway]
port = 9000
"#,
        )
        .unwrap();
        assert_eq!(config.model, "deepseek-reasoner");
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.agent.max_tool_iterations, 10);
    }

    #[test]
    fn zero_iterations_falls_back_to_default() {
        let mut config = Config::default();
        config.agent.max_tool_iterations = 0;
        assert_eq!(config.effective_max_tool_iterations(), 10);
    }

    #[tokio::test]
    async fn load_or_init_writes_then_reads_config() {
        let dir = tempfile::tempdir().unwrap();

        let created = Config::load_or_init(Some(dir.path())).await.unwrap();
        assert!(dir.path().join("config.toml").exists());
        assert_eq!(created.model, "deepseek-chat");

        let mut edited = created.clone();
        edited.model = "other".into();
        edited.save().await.unwrap();

        let loaded = Config::load_or_init(Some(dir.path())).await.unwrap();
        assert_eq!(loaded.model, "other");
        assert_eq!(loaded.config_path, dir.path().join("config.toml"));
    }

    #[tokio::test]
    async fn load_or_init_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "model = [").unwrap();

        let err = Config::load_or_init(Some(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn env_overrides_apply() {
        let _guard = env_lock();
        std::env::set_var("CHATRELAY_API_KEY", "sk-env");
        std::env::set_var("CHATRELAY_MODEL", "env-model");
        std::env::set_var("CHATRELAY_TEMPERATURE", "1.5");
        std::env::set_var("CHATRELAY_GATEWAY_PORT", "8088");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("CHATRELAY_API_KEY");
        std::env::remove_var("CHATRELAY_MODEL");
        std::env::remove_var("CHATRELAY_TEMPERATURE");
        std::env::remove_var("CHATRELAY_GATEWAY_PORT");

        assert_eq!(config.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.model, "env-model");
        assert_eq!(config.temperature, 1.5);
        assert_eq!(config.gateway.port, 8088);
    }

    #[test]
    fn out_of_range_temperature_is_ignored() {
        let _guard = env_lock();
        std::env::set_var("CHATRELAY_TEMPERATURE", "9.0");
        let mut config = Config::default();
        config.apply_env_overrides();
        std::env::remove_var("CHATRELAY_TEMPERATURE");

        assert_eq!(config.temperature, 0.7);
    }
}
