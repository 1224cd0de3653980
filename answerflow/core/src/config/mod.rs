//! TOML Configuration File Support
//!
//! Engine configuration lives at `$XDG_CONFIG_HOME/answerflow/engine.toml`
//! (typically `~/.config/answerflow/engine.toml`).
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller)
//! 2. Environment variables (`ANSWERFLOW_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [transports]
//! preference = ["push", "socket", "local"]
//! push_endpoint = "http://localhost:8000/stream"
//! socket_endpoint = "ws://localhost:8000/ws"
//! connect_timeout_ms = 5000
//!
//! [pacing]
//! adaptive_window_ms = 120
//! chunk_delay_ms = 45
//! tokens_per_chunk = 3
//!
//! [cache]
//! enabled = true
//! directory = "/var/cache/answerflow"
//!
//! [kernel]
//! endpoint = "http://localhost:8000/answer"
//! timeout_ms = 30000
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunk::TransportKind;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line argument
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Default values
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[transports]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportsToml {
    /// Ordered transport names (`push`, `socket`, `peer`, `local`)
    pub preference: Option<Vec<String>>,
    /// Push channel (SSE) endpoint
    pub push_endpoint: Option<String>,
    /// Socket channel (WebSocket) endpoint
    pub socket_endpoint: Option<String>,
    /// Peer data channel signaling endpoint
    pub peer_signaling_endpoint: Option<String>,
    /// Establishment timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// `[pacing]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingToml {
    /// Text delivery window at playback rate 1.0
    pub adaptive_window_ms: Option<u64>,
    /// Fallback synthesizer tick interval
    pub chunk_delay_ms: Option<u64>,
    /// Fallback synthesizer units per tick
    pub tokens_per_chunk: Option<usize>,
}

/// `[cache]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Whether completed answers are persisted
    pub enabled: Option<bool>,
    /// Replay store directory
    pub directory: Option<String>,
}

/// `[kernel]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelToml {
    /// Inference endpoint
    pub endpoint: Option<String>,
    /// Bearer token
    pub api_key: Option<String>,
    /// Request timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineToml {
    /// Transport settings
    pub transports: TransportsToml,
    /// Pacing settings
    pub pacing: PacingToml,
    /// Replay cache settings
    pub cache: CacheToml,
    /// Answer kernel settings
    pub kernel: KernelToml,
}

// =============================================================================
// Effective Configuration
// =============================================================================

/// Transport negotiation settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportSettings {
    /// Strategies in the order they are tried
    pub preference: Vec<TransportKind>,
    /// Push channel endpoint
    pub push_endpoint: Option<String>,
    /// Socket channel endpoint
    pub socket_endpoint: Option<String>,
    /// Peer signaling endpoint
    pub peer_signaling_endpoint: Option<String>,
    /// Establishment timeout per strategy
    pub connect_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            preference: TransportKind::DEFAULT_PREFERENCE.to_vec(),
            push_endpoint: None,
            socket_endpoint: None,
            peer_signaling_endpoint: None,
            connect_timeout: Duration::from_millis(5000),
        }
    }
}

/// Pacing settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacingSettings {
    /// Text delivery window at playback rate 1.0
    pub adaptive_window: Duration,
    /// Fallback synthesizer tick interval
    pub chunk_delay: Duration,
    /// Fallback synthesizer units per tick
    pub tokens_per_chunk: usize,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            adaptive_window: Duration::from_millis(120),
            chunk_delay: Duration::from_millis(45),
            tokens_per_chunk: 3,
        }
    }
}

/// Replay cache settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSettings {
    /// Whether completed answers are persisted and replayable
    pub enabled: bool,
    /// Replay store directory; `None` keeps records in memory
    pub directory: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_cache_dir(),
        }
    }
}

/// Answer kernel settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelSettings {
    /// Inference endpoint; `None` means no HTTP kernel
    pub endpoint: Option<String>,
    /// Bearer token
    pub api_key: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout: Duration::from_millis(30_000),
        }
    }
}

/// Effective engine configuration
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Transport negotiation
    pub transports: TransportSettings,
    /// Pacing
    pub pacing: PacingSettings,
    /// Replay cache
    pub cache: CacheSettings,
    /// Answer kernel
    pub kernel: KernelSettings,
    /// The file this configuration was read from, if any
    pub config_file_path: Option<PathBuf>,
    /// Highest-priority source that contributed a value
    pub source: ConfigSource,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transports: TransportSettings::default(),
            pacing: PacingSettings::default(),
            cache: CacheSettings::default(),
            kernel: KernelSettings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl EngineConfig {
    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an empty preference list,
    /// a zero adaptive window or zero tokens per chunk.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transports.preference.is_empty() {
            return Err(ConfigError::ValidationError(
                "transports.preference must name at least one transport".into(),
            ));
        }
        if self.pacing.adaptive_window.is_zero() {
            return Err(ConfigError::ValidationError(
                "pacing.adaptive_window_ms must be at least 1".into(),
            ));
        }
        if self.pacing.tokens_per_chunk == 0 {
            return Err(ConfigError::ValidationError(
                "pacing.tokens_per_chunk must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Highest-priority values supplied on the command line
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Transport preference override
    pub preference: Option<Vec<TransportKind>>,
    /// Push endpoint override
    pub push_endpoint: Option<String>,
    /// Socket endpoint override
    pub socket_endpoint: Option<String>,
    /// Cache enabled override
    pub cache_enabled: Option<bool>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set transport preference override
    #[must_use]
    pub fn with_preference(mut self, preference: Vec<TransportKind>) -> Self {
        self.preference = Some(preference);
        self
    }

    /// Set push endpoint override
    #[must_use]
    pub fn with_push_endpoint(mut self, endpoint: String) -> Self {
        self.push_endpoint = Some(endpoint);
        self
    }

    /// Set socket endpoint override
    #[must_use]
    pub fn with_socket_endpoint(mut self, endpoint: String) -> Self {
        self.socket_endpoint = Some(endpoint);
        self
    }

    /// Set cache enabled override
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    /// Apply overrides on top of a loaded configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the result is invalid.
    pub fn apply(self, config: &mut EngineConfig) -> Result<(), ConfigError> {
        let mut applied = false;
        if let Some(preference) = self.preference {
            config.transports.preference = preference;
            applied = true;
        }
        if let Some(endpoint) = self.push_endpoint {
            config.transports.push_endpoint = Some(endpoint);
            applied = true;
        }
        if let Some(endpoint) = self.socket_endpoint {
            config.transports.socket_endpoint = Some(endpoint);
            applied = true;
        }
        if let Some(enabled) = self.cache_enabled {
            config.cache.enabled = enabled;
            applied = true;
        }
        if applied {
            config.source = ConfigSource::Cli;
        }
        config.validate()
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Default configuration file path
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("answerflow").join("engine.toml"))
}

/// Default replay store directory
#[must_use]
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("answerflow").join("replay"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the merged configuration is invalid. A missing config file is not an
/// error.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the process environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the merged
/// configuration is invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<EngineConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env(
    path: Option<PathBuf>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<EngineConfig, ConfigError> {
    let mut config = EngineConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: EngineToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, lookup)?;
    config.validate()?;
    Ok(config)
}

/// Parse a list of transport names (`push,socket,local`)
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] naming the first unknown entry.
pub fn parse_preference<S: AsRef<str>>(names: &[S]) -> Result<Vec<TransportKind>, ConfigError> {
    names
        .iter()
        .map(|name| {
            name.as_ref()
                .trim()
                .parse::<TransportKind>()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))
        })
        .collect()
}

fn apply_toml_config(config: &mut EngineConfig, toml: &EngineToml) -> Result<(), ConfigError> {
    // Transport settings
    if let Some(names) = &toml.transports.preference {
        config.transports.preference = parse_preference(names)?;
    }
    if toml.transports.push_endpoint.is_some() {
        config.transports.push_endpoint.clone_from(&toml.transports.push_endpoint);
    }
    if toml.transports.socket_endpoint.is_some() {
        config.transports.socket_endpoint.clone_from(&toml.transports.socket_endpoint);
    }
    if toml.transports.peer_signaling_endpoint.is_some() {
        config
            .transports
            .peer_signaling_endpoint
            .clone_from(&toml.transports.peer_signaling_endpoint);
    }
    if let Some(ms) = toml.transports.connect_timeout_ms {
        config.transports.connect_timeout = Duration::from_millis(ms);
    }

    // Pacing settings
    if let Some(ms) = toml.pacing.adaptive_window_ms {
        config.pacing.adaptive_window = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.pacing.chunk_delay_ms {
        config.pacing.chunk_delay = Duration::from_millis(ms);
    }
    if let Some(n) = toml.pacing.tokens_per_chunk {
        config.pacing.tokens_per_chunk = n;
    }

    // Cache settings
    if let Some(enabled) = toml.cache.enabled {
        config.cache.enabled = enabled;
    }
    if let Some(dir) = &toml.cache.directory {
        config.cache.directory = Some(PathBuf::from(dir));
    }

    // Kernel settings
    if toml.kernel.endpoint.is_some() {
        config.kernel.endpoint.clone_from(&toml.kernel.endpoint);
    }
    if toml.kernel.api_key.is_some() {
        config.kernel.api_key.clone_from(&toml.kernel.api_key);
    }
    if let Some(ms) = toml.kernel.timeout_ms {
        config.kernel.timeout = Duration::from_millis(ms);
    }
    Ok(())
}

fn parse_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false") && !value.eq_ignore_ascii_case("off")
}

fn apply_env_config(
    config: &mut EngineConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    // Transport settings from environment
    if let Some(list) = lookup("ANSWERFLOW_TRANSPORTS") {
        let names: Vec<&str> = list.split(',').filter(|s| !s.trim().is_empty()).collect();
        config.transports.preference = parse_preference(&names)?;
        config.source = ConfigSource::Env;
    }
    if let Some(endpoint) = lookup("ANSWERFLOW_PUSH_ENDPOINT") {
        config.transports.push_endpoint = Some(endpoint);
        config.source = ConfigSource::Env;
    }
    if let Some(endpoint) = lookup("ANSWERFLOW_SOCKET_ENDPOINT") {
        config.transports.socket_endpoint = Some(endpoint);
        config.source = ConfigSource::Env;
    }
    if let Some(endpoint) = lookup("ANSWERFLOW_PEER_ENDPOINT") {
        config.transports.peer_signaling_endpoint = Some(endpoint);
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = lookup("ANSWERFLOW_CONNECT_TIMEOUT") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.transports.connect_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }

    // Pacing settings from environment
    if let Some(window) = lookup("ANSWERFLOW_ADAPTIVE_WINDOW_MS") {
        if let Ok(ms) = window.parse::<u64>() {
            config.pacing.adaptive_window = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(delay) = lookup("ANSWERFLOW_CHUNK_DELAY_MS") {
        if let Ok(ms) = delay.parse::<u64>() {
            config.pacing.chunk_delay = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(tokens) = lookup("ANSWERFLOW_TOKENS_PER_CHUNK") {
        if let Ok(n) = tokens.parse::<usize>() {
            config.pacing.tokens_per_chunk = n;
            config.source = ConfigSource::Env;
        }
    }

    // Cache settings from environment
    if let Some(enabled) = lookup("ANSWERFLOW_CACHE") {
        config.cache.enabled = parse_flag(&enabled);
        config.source = ConfigSource::Env;
    }
    if let Some(dir) = lookup("ANSWERFLOW_CACHE_DIR") {
        config.cache.directory = Some(PathBuf::from(dir));
        config.source = ConfigSource::Env;
    }

    // Kernel settings from environment
    if let Some(endpoint) = lookup("ANSWERFLOW_KERNEL_URL") {
        config.kernel.endpoint = Some(endpoint);
        config.source = ConfigSource::Env;
    }
    if let Some(key) = lookup("ANSWERFLOW_KERNEL_API_KEY") {
        config.kernel.api_key = Some(key);
        config.source = ConfigSource::Env;
    }
    Ok(())
}
