use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QuillError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "quill.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub gemini: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            temperature: None,
            gemini: ProviderConfig::default(),
            openai: ProviderConfig::default(),
        }
    }
}

fn default_provider() -> String {
    "gemini".into()
}

fn default_model() -> String {
    "gemini-2.5-flash".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_memory_enabled")]
    pub memory_enabled: bool,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Replaces the built-in blog writer prompt when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            memory_enabled: default_memory_enabled(),
            tool_timeout_secs: default_tool_timeout_secs(),
            system_prompt: None,
        }
    }
}

fn default_max_steps() -> usize {
    15
}

fn default_memory_enabled() -> bool {
    true
}

fn default_tool_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// Registers exa_search, scrape_webpage and scrape_wikipedia.
    #[serde(default = "default_builtin")]
    pub builtin: bool,
    #[serde(default)]
    pub exa_api_key: Option<String>,
    #[serde(default = "default_exa_endpoint")]
    pub exa_endpoint: String,
    #[serde(default = "default_search_window_days")]
    pub search_window_days: i64,
    #[serde(default = "default_num_results")]
    pub default_num_results: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    #[serde(default = "default_wikipedia_endpoint")]
    pub wikipedia_endpoint: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            builtin: default_builtin(),
            exa_api_key: None,
            exa_endpoint: default_exa_endpoint(),
            search_window_days: default_search_window_days(),
            default_num_results: default_num_results(),
            user_agent: default_user_agent(),
            max_content_chars: default_max_content_chars(),
            wikipedia_endpoint: default_wikipedia_endpoint(),
        }
    }
}

fn default_builtin() -> bool {
    true
}

fn default_exa_endpoint() -> String {
    "https://api.exa.ai".into()
}

fn default_search_window_days() -> i64 {
    10
}

fn default_num_results() -> u64 {
    5
}

fn default_user_agent() -> String {
    "Mozilla/5.0".into()
}

fn default_max_content_chars() -> usize {
    20_000
}

fn default_wikipedia_endpoint() -> String {
    "https://en.wikipedia.org".into()
}

/// An MCP server whose tools are registered with the agent. Either `command`
/// (stdio transport) or `url` (HTTP transport) must be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "quill=info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(raw)
            .map_err(|err| QuillError::Config(format!("Failed to parse configuration: {err}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults plus environment overrides, for runs without a config file.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads `path` when given, else `quill.toml` from the working directory
    /// if it exists, else defaults. Environment overrides apply in every case.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_env_or_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_env_or_file(DEFAULT_CONFIG_FILE)
            }
            None => Self::from_env(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.max_steps == 0 {
            return Err(QuillError::Config("agent.max_steps must be at least 1".into()));
        }
        for server in &self.mcp_servers {
            if server.command.is_none() == server.url.is_none() {
                return Err(QuillError::Config(format!(
                    "MCP server `{}` needs exactly one of `command` or `url`",
                    server.name
                )));
            }
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(host) = env::var("QUILL_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parsed_var("QUILL_PORT") {
            self.server.port = port;
        }
        if let Ok(provider) = env::var("QUILL_PROVIDER") {
            self.model.provider = provider;
        }
        if let Ok(model) = env::var("QUILL_MODEL") {
            self.model.model = model;
        }
        if let Ok(key) = env::var("QUILL_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(key) = first_var(&["QUILL_GEMINI_API_KEY", "GEMINI_API_KEY"]) {
            self.model.gemini.api_key = Some(key);
        }
        if let Ok(endpoint) = env::var("QUILL_GEMINI_ENDPOINT") {
            self.model.gemini.endpoint = Some(endpoint);
        }
        if let Some(key) = first_var(&["QUILL_OPENAI_API_KEY", "OPENAI_API_KEY"]) {
            self.model.openai.api_key = Some(key);
        }
        if let Ok(endpoint) = env::var("QUILL_OPENAI_ENDPOINT") {
            self.model.openai.endpoint = Some(endpoint);
        }
        if let Some(key) = first_var(&["QUILL_EXA_API_KEY", "EXA_API_KEY"]) {
            self.tools.exa_api_key = Some(key);
        }
        if let Some(steps) = parsed_var("QUILL_MAX_STEPS") {
            self.agent.max_steps = steps;
        }
        if let Some(enabled) = parsed_var("QUILL_MEMORY_ENABLED") {
            self.agent.memory_enabled = enabled;
        }
        if let Some(secs) = parsed_var("QUILL_TOOL_TIMEOUT_SECS") {
            self.agent.tool_timeout_secs = secs;
        }
        if let Ok(format) = env::var("QUILL_LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            };
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}

fn first_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| env::var(name).ok().filter(|value| !value.is_empty()))
}
