//! Configuration management
//!
//! This module handles loading and validation of the Neko configuration.
//! Configuration is stored in TOML format at ~/.neko/config.toml and is
//! read-only after process start: it is loaded once and handed into the
//! orchestrator's construction, never consulted through globals.
//!
//! # Configuration Sections
//!
//! - **core**: Log level and sandbox root
//! - **memory**: Conversation capacity and system preamble
//! - **llm**: Model, endpoint, API key env var, timeout and retry budget
//! - **actions**: Allow/deny/confirm lists, aliases, shortcut tables
//!
//! Paths support ~ expansion. Validation failures are startup-fatal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::AssistantError;
use crate::policy::PolicyRules;

/// Instruction preamble handed to the model as the pinned system turn
const DEFAULT_SYSTEM_PROMPT: &str = "You are Neko, a desktop assistant. Answer \
conversationally. When the user asks you to act on their system, reply with \
exactly one directive of the form {\"action\": \"<name>\", \"args\": {...}} \
and nothing else. Available actions: open_url{url}, launch_app{app}, \
write_file{path, content}, delete_path{path}, run_command{command, args}. \
If you are not sure which action fits, ask instead of guessing.";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Conversation memory settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// LLM client settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Action policy and execution settings
    #[serde(default)]
    pub actions: ActionsConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Filesystem boundary for write/delete actions (supports ~ expansion)
    #[serde(default = "default_sandbox_root")]
    pub sandbox_root: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            sandbox_root: default_sandbox_root(),
        }
    }
}

/// Conversation memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of non-system turns retained
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// System preamble pinned at the start of every snapshot
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// LLM client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Chat-completions endpoint base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable the API key is read from
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempt budget for transient failures (including the first try)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Reply used when the model is unavailable
    #[serde(default = "default_degraded_reply")]
    pub degraded_reply: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            degraded_reply: default_degraded_reply(),
        }
    }
}

/// Action policy and execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsConfig {
    /// Action names that are always denied
    #[serde(default)]
    pub deny: Vec<String>,

    /// Action names forced to confirmation even when otherwise allowed
    #[serde(default)]
    pub confirm: Vec<String>,

    /// Applications that may be launched without confirmation
    #[serde(default = "default_allowed_apps")]
    pub allowed_apps: Vec<String>,

    /// Aliases resolved before app checks ("vs code" -> "vscode")
    #[serde(default = "default_app_aliases")]
    pub app_aliases: BTreeMap<String, String>,

    /// URL hosts that may be opened without confirmation
    #[serde(default = "default_allowed_url_hosts")]
    pub allowed_url_hosts: Vec<String>,

    /// Bare site names resolved to full URLs ("youtube" -> https)
    #[serde(default = "default_url_shortcuts")]
    pub url_shortcuts: BTreeMap<String, String>,

    /// Commands permitted for the run_command action
    #[serde(default = "default_command_allowlist")]
    pub command_allowlist: Vec<String>,

    /// Wall-clock bound for one action execution, in seconds
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time_secs: u64,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            deny: Vec::new(),
            confirm: Vec::new(),
            allowed_apps: default_allowed_apps(),
            app_aliases: default_app_aliases(),
            allowed_url_hosts: default_allowed_url_hosts(),
            url_shortcuts: default_url_shortcuts(),
            command_allowlist: default_command_allowlist(),
            max_execution_time_secs: default_max_execution_time(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from("~/NekoAI")
}

fn default_capacity() -> usize {
    50
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_degraded_reply() -> String {
    "I couldn't complete that right now. Let's try again in a moment.".to_string()
}

fn default_allowed_apps() -> Vec<String> {
    ["safari", "finder", "terminal", "calculator", "notes", "vscode", "chrome"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_app_aliases() -> BTreeMap<String, String> {
    [
        ("visual studio code", "vscode"),
        ("vs code", "vscode"),
        ("code", "vscode"),
        ("google chrome", "chrome"),
        ("web browser", "safari"),
        ("browser", "safari"),
        ("file manager", "finder"),
        ("calc", "calculator"),
        ("notepad", "notes"),
        ("text editor", "notes"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_allowed_url_hosts() -> Vec<String> {
    [
        "amazon.com",
        "google.com",
        "youtube.com",
        "github.com",
        "stackoverflow.com",
        "reddit.com",
        "netflix.com",
        "spotify.com",
        "gmail.com",
        "maps.google.com",
        "linkedin.com",
        "chat.openai.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_url_shortcuts() -> BTreeMap<String, String> {
    [
        ("amazon", "https://amazon.com"),
        ("google", "https://google.com"),
        ("youtube", "https://youtube.com"),
        ("github", "https://github.com"),
        ("stackoverflow", "https://stackoverflow.com"),
        ("reddit", "https://reddit.com"),
        ("netflix", "https://netflix.com"),
        ("spotify", "https://spotify.com"),
        ("gmail", "https://gmail.com"),
        ("maps", "https://maps.google.com"),
        ("linkedin", "https://linkedin.com"),
        ("chatgpt", "https://chat.openai.com"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_command_allowlist() -> Vec<String> {
    ["ls", "cat", "grep", "find", "head", "tail", "wc", "echo", "date", "uname"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_execution_time() -> u64 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            memory: MemoryConfig::default(),
            llm: LlmConfig::default(),
            actions: ActionsConfig::default(),
        }
    }
}

impl Config {
    /// Default configuration file path (~/.neko/config.toml)
    pub fn default_path() -> Result<PathBuf, AssistantError> {
        let home = dirs::home_dir()
            .ok_or_else(|| AssistantError::Config("could not determine home directory".to_string()))?;
        Ok(home.join(".neko").join("config.toml"))
    }

    /// Load the configuration, writing defaults on first run
    pub fn load_or_create() -> Result<Self, AssistantError> {
        let path = Self::default_path()?;
        if !path.exists() {
            let config = Config::default();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| AssistantError::Config(format!("could not render defaults: {e}")))?;
            fs::write(&path, rendered)?;
            tracing::info!("wrote default configuration to {}", path.display());
        }
        Self::load_from_path(&path)
    }

    /// Load the configuration from an explicit path
    pub fn load_from_path(path: &Path) -> Result<Self, AssistantError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AssistantError::Config(format!("could not read {}: {e}", path.display()))
        })?;
        let mut config: Config = toml::from_str(&raw).map_err(|e| {
            AssistantError::Config(format!("could not parse {}: {e}", path.display()))
        })?;
        config.core.sandbox_root = expand_tilde(&config.core.sandbox_root)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that must hold before the engine starts
    pub fn validate(&self) -> Result<(), AssistantError> {
        if self.memory.capacity == 0 {
            return Err(AssistantError::Config(
                "memory.capacity must be greater than zero".to_string(),
            ));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(AssistantError::Config(
                "llm.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.llm.max_retries == 0 {
            return Err(AssistantError::Config(
                "llm.max_retries must be at least 1".to_string(),
            ));
        }
        if self.actions.max_execution_time_secs == 0 {
            return Err(AssistantError::Config(
                "actions.max_execution_time_secs must be greater than zero".to_string(),
            ));
        }
        if self.core.sandbox_root.as_os_str().is_empty() {
            return Err(AssistantError::Config(
                "core.sandbox_root must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the immutable policy rule table from this configuration
    pub fn policy_rules(&self) -> PolicyRules {
        PolicyRules {
            deny: self.actions.deny.iter().cloned().collect(),
            confirm: self.actions.confirm.iter().cloned().collect(),
            allowed_apps: self.actions.allowed_apps.iter().cloned().collect(),
            app_aliases: self.actions.app_aliases.clone(),
            allowed_url_hosts: self.actions.allowed_url_hosts.iter().cloned().collect(),
            sandbox_root: self.core.sandbox_root.clone(),
        }
    }
}

/// Expand a leading ~ to the user's home directory
fn expand_tilde(path: &Path) -> Result<PathBuf, AssistantError> {
    let Some(s) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| AssistantError::Config("could not determine home directory".to_string()))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir()
            .ok_or_else(|| AssistantError::Config("could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
