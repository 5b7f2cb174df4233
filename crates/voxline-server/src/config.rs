//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use thiserror::Error;
use voxline_voice::{CallConfig, LlmConfig, RecordingConfig, SegmenterConfig, SttConfig, TtsConfig};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Speech-to-text service.
    #[serde(default)]
    pub stt: SttConfig,

    /// Text-to-speech service.
    #[serde(default)]
    pub tts: TtsConfig,

    /// Chat completion service for replies and post-call analysis.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Turn-taking and per-stage timing.
    #[serde(default)]
    pub call: CallConfig,

    /// Utterance boundary detection.
    #[serde(default)]
    pub segmenter: SegmenterConfig,

    /// Inbound audio capture.
    #[serde(default)]
    pub recording: RecordingConfig,
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

    /// Host name the telephony provider reaches us at, used in the
    /// media-stream URL. Falls back to the request `Host` header.
    #[serde(default)]
    pub public_host: Option<String>,

    /// Seconds to wait on shutdown for live calls and post-call analysis.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "voxline_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    5050
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_db_path() -> String {
    "voxline.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_host: None,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
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
/// Environment variables are applied on top; see [`apply_env_overrides`].
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

/// Applies environment overrides using `var` as the lookup.
///
/// - `VOXLINE_HOST`, `VOXLINE_PORT`, `VOXLINE_PUBLIC_HOST` override `server.*`
/// - `VOXLINE_DB_PATH` overrides `database.path`
/// - `VOXLINE_LOG_LEVEL`, `VOXLINE_LOG_JSON` override `logging.*`
/// - `IBM_STT_APIKEY`, `IBM_STT_URL` override `stt.api_key`, `stt.url`
/// - `IBM_TTS_APIKEY`, `IBM_TTS_URL` override `tts.api_key`, `tts.url`
/// - `GROQ_API_KEY` overrides `llm.api_key`
/// - `VOXLINE_RECORDINGS_DIR` overrides `recording.dir` and enables recording
///
/// Unparseable values for typed fields are ignored.
pub fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

    if let Some(host) = var("VOXLINE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("VOXLINE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(public_host) = var("VOXLINE_PUBLIC_HOST") {
        config.server.public_host = Some(public_host);
    }
    if let Some(db_path) = var("VOXLINE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("VOXLINE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("VOXLINE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(key) = var("IBM_STT_APIKEY") {
        config.stt.api_key = key;
    }
    if let Some(url) = var("IBM_STT_URL") {
        config.stt.url = url;
    }
    if let Some(key) = var("IBM_TTS_APIKEY") {
        config.tts.api_key = key;
    }
    if let Some(url) = var("IBM_TTS_URL") {
        config.tts.url = url;
    }
    if let Some(key) = var("GROQ_API_KEY") {
        config.llm.api_key = key;
    }
    if let Some(dir) = var("VOXLINE_RECORDINGS_DIR") {
        config.recording.dir = PathBuf::from(dir);
        config.recording.enabled = true;
    }
}
