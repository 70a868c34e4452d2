//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;
use vocalis_db::{AccessPolicy, DbRuntimeSettings};
use vocalis_llm::EngineSettings;
use vocalis_types::{VoiceModel, VoiceSettings};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional directory served under `/static`.
    #[serde(default)]
    pub static_dir: Option<String>,
}

/// Model service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the Ollama-compatible model service.
    #[serde(default = "default_llm_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Committed turns kept per session, excluding the system prompt.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Longest silence tolerated between two streamed chunks.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `piper` or `system` (espeak-ng).
    #[serde(default)]
    pub engine: VoiceModel,

    #[serde(default = "default_piper_binary")]
    pub piper_binary: String,

    #[serde(default = "default_voices_dir")]
    pub voices_dir: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    /// Speaking rate multiplier, clamped to 0.5..=2.0.
    #[serde(default = "default_speed")]
    pub speed: f32,

    #[serde(default)]
    pub speaker_id: Option<u32>,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_tts_timeout_secs")]
    pub timeout_secs: u64,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Read once at start-up; the access policy is immutable afterwards.
    #[serde(default)]
    pub allow_write: bool,

    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Apply the bundled example schema on start-up.
    #[serde(default)]
    pub seed_demo: bool,
}

/// Tool system configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tool names to register. Empty registers every tool.
    #[serde(default)]
    pub available: Vec<String>,

    /// Tool-call/resume cycles allowed per turn.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "default_tool_timeout_ms")]
    pub timeout_ms: u64,
}

/// Per-connection session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Silent keepalive intervals tolerated before the connection is closed.
    #[serde(default = "default_max_missed_keepalives")]
    pub max_missed_keepalives: u32,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Messages shorter than this, after trimming, are ignored.
    #[serde(default = "default_min_message_chars")]
    pub min_message_chars: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "vocalis_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_true() -> bool {
    true
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_llm_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_llm_model() -> String {
    "llama3.1".to_string()
}

fn default_system_prompt() -> String {
    "You are Vocalis, a voice assistant with access to tools. \
     Answer in Spanish, briefly and conversationally. \
     When the user asks about data, use the database tools: list the tables, \
     describe a table if you need its columns, then run the query. \
     Keep every answer under 50 words."
        .to_string()
}

fn default_max_history() -> usize {
    50
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_piper_binary() -> String {
    "piper".to_string()
}

fn default_voices_dir() -> String {
    "voices".to_string()
}

fn default_voice() -> String {
    VoiceSettings::default().voice
}

fn default_speed() -> f32 {
    VoiceSettings::default().speed
}

fn default_sample_rate() -> u32 {
    22_050
}

fn default_tts_timeout_secs() -> u64 {
    30
}

fn default_db_path() -> String {
    "vocalis.db".to_string()
}

fn default_max_rows() -> usize {
    AccessPolicy::default().max_rows
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_acquire_timeout_ms() -> u64 {
    DbRuntimeSettings::default().acquire_timeout_ms
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_max_depth() -> usize {
    EngineSettings::default().max_tool_depth
}

fn default_tool_timeout_ms() -> u64 {
    vocalis_tools::DEFAULT_TOOL_TIMEOUT.as_millis() as u64
}

fn default_keepalive_interval_secs() -> u64 {
    30
}

fn default_max_missed_keepalives() -> u32 {
    3
}

fn default_max_message_bytes() -> usize {
    16 * 1024
}

fn default_min_message_chars() -> usize {
    EngineSettings::default().min_input_chars
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            model: default_llm_model(),
            system_prompt: default_system_prompt(),
            max_history: default_max_history(),
            request_timeout_secs: default_request_timeout_secs(),
            temperature: None,
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engine: VoiceModel::default(),
            piper_binary: default_piper_binary(),
            voices_dir: default_voices_dir(),
            voice: default_voice(),
            speed: default_speed(),
            speaker_id: None,
            sample_rate: default_sample_rate(),
            timeout_secs: default_tts_timeout_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_db_path(),
            allow_write: false,
            max_rows: default_max_rows(),
            pool_max_size: default_pool_max_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            seed_demo: false,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            available: Vec::new(),
            max_depth: default_max_depth(),
            timeout_ms: default_tool_timeout_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: default_keepalive_interval_secs(),
            max_missed_keepalives: default_max_missed_keepalives(),
            max_message_bytes: default_max_message_bytes(),
            min_message_chars: default_min_message_chars(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Voice used for every synthesis call.
    pub fn voice_settings(&self) -> VoiceSettings {
        let voice = VoiceSettings {
            model: self.tts.engine,
            voice: self.tts.voice.clone(),
            speed: self.tts.speed,
            speaker_id: self.tts.speaker_id,
        };
        VoiceSettings {
            speed: voice.clamped_speed(),
            ..voice
        }
    }

    pub fn db_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.database.busy_timeout_ms,
            pool_max_size: self.database.pool_max_size.max(1),
            acquire_timeout_ms: self.database.acquire_timeout_ms,
            read_only: !self.database.allow_write,
        }
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy {
            allow_write: self.database.allow_write,
            max_rows: self.database.max_rows.max(1),
            acquire_timeout: Duration::from_millis(self.database.acquire_timeout_ms),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            model: self.llm.model.clone(),
            max_tool_depth: self.tools.max_depth,
            min_input_chars: self.session.min_message_chars,
            temperature: self.llm.temperature,
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tools.timeout_ms)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `VOCALIS_HOST` / `VOCALIS_PORT` override `server.host` / `server.port`
/// - `VOCALIS_LLM_URL` / `VOCALIS_LLM_MODEL` override `llm.base_url` / `llm.model`
/// - `VOCALIS_DB_PATH`, `VOCALIS_DB_ENABLED`, `VOCALIS_DB_ALLOW_WRITE`
/// - `VOCALIS_TOOLS_ENABLED` overrides `tools.enabled`
/// - `VOCALIS_TTS_VOICE` overrides `tts.voice`
/// - `VOCALIS_LOG_LEVEL` / `VOCALIS_LOG_JSON` override `logging`
///
/// Boolean variables accept `true/1/yes/on` and `false/0/no/off`. Values
/// that do not parse are ignored.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `VOCALIS_*` overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("VOCALIS_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = host;
    }
    if let Some(port) = lookup("VOCALIS_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = port;
    }
    if let Some(url) = lookup("VOCALIS_LLM_URL") {
        config.llm.base_url = url;
    }
    if let Some(model) = lookup("VOCALIS_LLM_MODEL") {
        config.llm.model = model;
    }
    if let Some(path) = lookup("VOCALIS_DB_PATH") {
        config.database.path = path;
    }
    if let Some(enabled) = lookup("VOCALIS_DB_ENABLED").and_then(|v| parse_bool(&v)) {
        config.database.enabled = enabled;
    }
    if let Some(allow) = lookup("VOCALIS_DB_ALLOW_WRITE").and_then(|v| parse_bool(&v)) {
        config.database.allow_write = allow;
    }
    if let Some(enabled) = lookup("VOCALIS_TOOLS_ENABLED").and_then(|v| parse_bool(&v)) {
        config.tools.enabled = enabled;
    }
    if let Some(voice) = lookup("VOCALIS_TTS_VOICE") {
        config.tts.voice = voice;
    }
    if let Some(level) = lookup("VOCALIS_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("VOCALIS_LOG_JSON").and_then(|v| parse_bool(&v)) {
        config.logging.json = json;
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
