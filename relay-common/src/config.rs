//! Configuration management for the chat relay.
//!
//! The relay reads an optional configuration file at `~/.chat-relay/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `OPENAI_API_KEY` → upstream.api_key
//! - `RELAY_UPSTREAM_URL` → upstream.base_url
//! - `RELAY_MODEL` → upstream.default_model
//! - `RELAY_SHARED_SECRET` → auth.shared_secret
//! - `PORT` / `RELAY_PORT` → network.port (`RELAY_PORT` wins)
//! - `RELAY_BIND_ADDRESS` → network.bind
//! - `RELAY_SYSTEM_PROMPT` → session.system_prompt (empty disables seeding)
//! - `RELAY_MAX_HISTORY` → session.max_history
//! - `RELAY_MAX_SESSIONS` → session.max_sessions
//! - `RELAY_STATIC_DIR` → ui.static_dir
//! - `RELAY_LOG_LEVEL` / `RELAY_LOG_FORMAT` → observability.*

use crate::validation::{ValidationError, ValidationResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".chat-relay"),
        |dirs| dirs.home_dir().join(".chat-relay"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Defaults
// ============================================================================

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    3000
}

fn default_base_url() -> String {
    "https://api.openai.com".into()
}

fn default_model() -> String {
    "gpt-5".into()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_system_prompt() -> Option<String> {
    Some("You are a helpful assistant.".into())
}

fn default_max_history() -> usize {
    20
}

fn default_max_sessions() -> usize {
    1000
}

fn default_auth_header() -> String {
    "x-relay-token".into()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_index_file() -> String {
    "chat.html".into()
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Sections
// ============================================================================

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Listening port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Upstream completion API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// API key for the completion API
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API (without `/v1/...`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used when a request does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Client-side request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            default_model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl UpstreamConfig {
    /// Whether a non-empty API key is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Length of the configured API key (0 when absent).
    pub fn api_key_len(&self) -> usize {
        self.api_key.as_deref().map_or(0, str::len)
    }
}

/// Session store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Leading system message seeded into every new session.
    /// `null` disables seeding.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: Option<String>,

    /// Maximum number of stored messages per session
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Maximum number of live sessions before LRU eviction
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_history: default_max_history(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Shared-secret access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret. When unset, every request is allowed.
    #[serde(default)]
    pub shared_secret: Option<String>,

    /// Header carrying the shared secret
    #[serde(default = "default_auth_header")]
    pub header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            shared_secret: None,
            header: default_auth_header(),
        }
    }
}

/// Static chat UI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// Directory holding the chat page and its assets
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Page served at `/`
    #[serde(default = "default_index_file")]
    pub index_file: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            static_dir: default_static_dir(),
            index_file: default_index_file(),
        }
    }
}

impl UiConfig {
    /// Full path of the page served at `/`.
    pub fn index_path(&self) -> PathBuf {
        self.static_dir.join(&self.index_file)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets pinned to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure for the relay.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub ui: UiConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Fails if an override cannot be parsed.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config
            .apply_env_overrides()
            .context("Invalid environment override")?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) -> ValidationResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Every parseable value is applied. Unparseable numeric values leave
    /// their field unchanged and are reported together.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ValidationResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut rejected = Vec::new();

        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.upstream.api_key = Some(key);
        }
        if let Some(url) = lookup("RELAY_UPSTREAM_URL") {
            self.upstream.base_url = url;
        }
        if let Some(model) = lookup("RELAY_MODEL") {
            self.upstream.default_model = model;
        }

        if let Some(secret) = lookup("RELAY_SHARED_SECRET") {
            self.auth.shared_secret = Some(secret);
        }

        for key in ["PORT", "RELAY_PORT"] {
            if let Some(port) = lookup(key) {
                match port.parse() {
                    Ok(p) => self.network.port = p,
                    Err(_) => rejected.push(unparseable(key, &port)),
                }
            }
        }
        if let Some(bind) = lookup("RELAY_BIND_ADDRESS") {
            self.network.bind = bind;
        }

        if let Some(prompt) = lookup("RELAY_SYSTEM_PROMPT") {
            self.session.system_prompt = if prompt.is_empty() { None } else { Some(prompt) };
        }
        if let Some(value) = lookup("RELAY_MAX_HISTORY") {
            match value.parse() {
                Ok(n) => self.session.max_history = n,
                Err(_) => rejected.push(unparseable("RELAY_MAX_HISTORY", &value)),
            }
        }
        if let Some(value) = lookup("RELAY_MAX_SESSIONS") {
            match value.parse() {
                Ok(n) => self.session.max_sessions = n,
                Err(_) => rejected.push(unparseable("RELAY_MAX_SESSIONS", &value)),
            }
        }

        if let Some(dir) = lookup("RELAY_STATIC_DIR") {
            self.ui.static_dir = PathBuf::from(dir);
        }

        if let Some(level) = lookup("RELAY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("RELAY_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        ValidationError::collect(rejected)
    }

    /// Socket address string the server binds to.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.bind, self.network.port)
    }
}

fn unparseable(key: &str, value: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: key.to_string(),
        reason: format!("cannot parse '{}' as a number", value),
    }
}
