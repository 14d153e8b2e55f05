//! TOML Configuration File Support
//!
//! Centralized configuration loading for the broker, supporting a TOML file at
//! `~/.config/docchat/broker.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! host = "localhost"
//! port = 11434
//! request_timeout_secs = 300
//! probe_timeout_secs = 60
//!
//! [health]
//! timeout_secs = 5
//! staleness_secs = 30
//! tracked_models = ["llama3.2-vision:latest", "mistral:latest"]
//!
//! [models]
//! chat_model = "llama3.2-vision:latest"
//! analysis_model = "mistral:latest"
//! document_model = "mistral:latest"
//!
//! [sessions]
//! max_turns = 200
//!
//! [documents]
//! analysis_window_chars = 5000
//! question_window_chars = 3000
//!
//! [storage]
//! upload_dir = "uploads"
//! document_dir = "documents"
//! max_upload_bytes = 52428800
//!
//! [server]
//! host = "127.0.0.1"
//! port = 5000
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

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

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
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

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Ollama host
    pub host: Option<String>,
    /// Ollama port
    pub port: Option<u16>,
    /// Upper bound for any single backend call, in seconds
    pub request_timeout_secs: Option<u64>,
    /// Timeout for a model probe, in seconds
    pub probe_timeout_secs: Option<u64>,
}

/// Health section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthToml {
    /// Timeout for the model listing call, in seconds
    pub timeout_secs: Option<u64>,
    /// Age after which cached health is refreshed, in seconds
    pub staleness_secs: Option<u64>,
    /// Models whose state is tracked from startup
    pub tracked_models: Option<Vec<String>>,
}

/// Models section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsToml {
    /// Default model for chat
    pub chat_model: Option<String>,
    /// Model used for document analysis
    pub analysis_model: Option<String>,
    /// Default model for document questions
    pub document_model: Option<String>,
}

/// Sessions section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsToml {
    /// Maximum turns kept per session (0 = unlimited)
    pub max_turns: Option<usize>,
}

/// Documents section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsToml {
    /// Characters of the document sent for analysis
    pub analysis_window_chars: Option<usize>,
    /// Characters per window for document questions
    pub question_window_chars: Option<usize>,
}

/// Storage section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageToml {
    /// Directory for chat image attachments
    pub upload_dir: Option<PathBuf>,
    /// Directory for uploaded documents
    pub document_dir: Option<PathBuf>,
    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: Option<usize>,
}

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen address
    pub host: Option<String>,
    /// Listen port
    pub port: Option<u16>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerToml {
    /// Backend configuration section
    pub backend: BackendToml,
    /// Health configuration section
    pub health: HealthToml,
    /// Models configuration section
    pub models: ModelsToml,
    /// Sessions configuration section
    pub sessions: SessionsToml,
    /// Documents configuration section
    pub documents: DocumentsToml,
    /// Storage configuration section
    pub storage: StorageToml,
    /// Server configuration section
    pub server: ServerToml,
}

// =============================================================================
// Effective Configuration
// =============================================================================

/// Connection settings for the inference backend
#[derive(Clone, Debug)]
pub struct BackendSettings {
    /// Ollama host
    pub host: String,
    /// Ollama port
    pub port: u16,
    /// Upper bound for any single backend call
    pub request_timeout: Duration,
    /// Timeout for a model probe
    pub probe_timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            request_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(60),
        }
    }
}

/// Health monitoring settings
#[derive(Clone, Debug)]
pub struct HealthSettings {
    /// Timeout for the model listing call
    pub timeout: Duration,
    /// Age after which cached health is refreshed on read
    pub staleness: Duration,
    /// Models whose state is tracked from startup
    pub tracked_models: Vec<String>,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            staleness: Duration::from_secs(30),
            tracked_models: vec![
                "llama3.2-vision:latest".to_string(),
                "mistral:latest".to_string(),
            ],
        }
    }
}

/// Which model serves which kind of request
#[derive(Clone, Debug)]
pub struct ModelSettings {
    /// Default model for chat
    pub chat_model: String,
    /// Model used for document analysis
    pub analysis_model: String,
    /// Default model for document questions
    pub document_model: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            chat_model: "llama3.2-vision:latest".to_string(),
            analysis_model: "mistral:latest".to_string(),
            document_model: "mistral:latest".to_string(),
        }
    }
}

/// Prompt window sizes for document flows
#[derive(Clone, Copy, Debug)]
pub struct DocumentSettings {
    /// Characters of the document sent for analysis
    pub analysis_window_chars: usize,
    /// Characters per window for document questions
    pub question_window_chars: usize,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            analysis_window_chars: 5000,
            question_window_chars: 3000,
        }
    }
}

/// Where uploaded files are written
#[derive(Clone, Debug)]
pub struct StorageSettings {
    /// Directory for chat image attachments
    pub upload_dir: PathBuf,
    /// Directory for uploaded documents
    pub document_dir: PathBuf,
    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            document_dir: PathBuf::from("documents"),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

/// HTTP listen address
#[derive(Clone, Debug)]
pub struct ServerSettings {
    /// Listen address
    pub host: String,
    /// Listen port
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

/// Centralized configuration for the broker
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Backend connection
    pub backend: BackendSettings,
    /// Health monitoring
    pub health: HealthSettings,
    /// Model selection
    pub models: ModelSettings,
    /// Maximum turns kept per session (0 = unlimited)
    pub max_turns: usize,
    /// Document prompt windows
    pub documents: DocumentSettings,
    /// Upload storage
    pub storage: StorageSettings,
    /// HTTP listen address
    pub server: ServerSettings,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    /// Source of configuration values
    source: ConfigSource,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BackendSettings::default(),
            health: HealthSettings::default(),
            models: ModelSettings::default(),
            max_turns: DEFAULT_MAX_TURNS,
            documents: DocumentSettings::default(),
            storage: StorageSettings::default(),
            server: ServerSettings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl BrokerConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that would make the broker unusable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.documents.analysis_window_chars == 0 || self.documents.question_window_chars == 0 {
            return Err(ConfigError::ValidationError(
                "document window sizes must be greater than zero".to_string(),
            ));
        }
        if self.health.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "health.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.models.chat_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "models.chat_model must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default cap on turns kept per session
pub const DEFAULT_MAX_TURNS: usize = 200;

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/docchat/broker.toml` or
/// `~/.config/docchat/broker.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("docchat").join("broker.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<BrokerConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<BrokerConfig, ConfigError> {
    let mut config = BrokerConfig::new();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: BrokerToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
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

    apply_env_config(&mut config, |key| std::env::var(key).ok());

    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut BrokerConfig, toml: &BrokerToml) {
    // Backend
    if let Some(ref host) = toml.backend.host {
        config.backend.host = host.clone();
    }
    if let Some(port) = toml.backend.port {
        config.backend.port = port;
    }
    if let Some(secs) = toml.backend.request_timeout_secs {
        config.backend.request_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.backend.probe_timeout_secs {
        config.backend.probe_timeout = Duration::from_secs(secs);
    }

    // Health
    if let Some(secs) = toml.health.timeout_secs {
        config.health.timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.health.staleness_secs {
        config.health.staleness = Duration::from_secs(secs);
    }
    if let Some(ref models) = toml.health.tracked_models {
        config.health.tracked_models = models.clone();
    }

    // Models
    if let Some(ref model) = toml.models.chat_model {
        config.models.chat_model = model.clone();
    }
    if let Some(ref model) = toml.models.analysis_model {
        config.models.analysis_model = model.clone();
    }
    if let Some(ref model) = toml.models.document_model {
        config.models.document_model = model.clone();
    }

    // Sessions
    if let Some(max_turns) = toml.sessions.max_turns {
        config.max_turns = max_turns;
    }

    // Documents
    if let Some(chars) = toml.documents.analysis_window_chars {
        config.documents.analysis_window_chars = chars;
    }
    if let Some(chars) = toml.documents.question_window_chars {
        config.documents.question_window_chars = chars;
    }

    // Storage
    if let Some(ref dir) = toml.storage.upload_dir {
        config.storage.upload_dir = dir.clone();
    }
    if let Some(ref dir) = toml.storage.document_dir {
        config.storage.document_dir = dir.clone();
    }
    if let Some(bytes) = toml.storage.max_upload_bytes {
        config.storage.max_upload_bytes = bytes;
    }

    // Server
    if let Some(ref host) = toml.server.host {
        config.server.host = host.clone();
    }
    if let Some(port) = toml.server.port {
        config.server.port = port;
    }
}

/// Apply environment variable overrides to the config
///
/// `lookup` resolves a variable name to its value; production code passes
/// `std::env::var`.
fn apply_env_config(config: &mut BrokerConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("OLLAMA_HOST") {
        config.backend.host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = lookup("OLLAMA_PORT").and_then(|p| p.parse::<u16>().ok()) {
        config.backend.port = port;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = lookup("DOCCHAT_CHAT_MODEL") {
        config.models.chat_model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = lookup("DOCCHAT_ANALYSIS_MODEL") {
        config.models.analysis_model = model.clone();
        config.models.document_model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = lookup("DOCCHAT_STALENESS_SECS").and_then(|s| s.parse::<u64>().ok()) {
        config.health.staleness = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(max_turns) = lookup("DOCCHAT_MAX_TURNS").and_then(|s| s.parse::<usize>().ok()) {
        config.max_turns = max_turns;
        config.source = ConfigSource::Env;
    }
    if let Some(dir) = lookup("DOCCHAT_UPLOAD_DIR") {
        config.storage.upload_dir = PathBuf::from(dir);
        config.source = ConfigSource::Env;
    }
    if let Some(dir) = lookup("DOCCHAT_DOCUMENT_DIR") {
        config.storage.document_dir = PathBuf::from(dir);
        config.source = ConfigSource::Env;
    }
    if let Some(host) = lookup("DOCCHAT_HOST") {
        config.server.host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = lookup("DOCCHAT_PORT").and_then(|p| p.parse::<u16>().ok()) {
        config.server.port = port;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listen host override
    pub host: Option<String>,
    /// Listen port override
    pub port: Option<u16>,
    /// Ollama host override
    pub ollama_host: Option<String>,
    /// Ollama port override
    pub ollama_port: Option<u16>,
    /// Chat model override
    pub chat_model: Option<String>,
    /// Analysis and document model override
    pub analysis_model: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set chat model override
    #[must_use]
    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = Some(model.into());
        self
    }

    /// Set Ollama endpoint override
    #[must_use]
    pub fn with_ollama(mut self, host: impl Into<String>, port: u16) -> Self {
        self.ollama_host = Some(host.into());
        self.ollama_port = Some(port);
        self
    }

    fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.port.is_none()
            && self.ollama_host.is_none()
            && self.ollama_port.is_none()
            && self.chat_model.is_none()
            && self.analysis_model.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut BrokerConfig) {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref host) = self.ollama_host {
            config.backend.host = host.clone();
        }
        if let Some(port) = self.ollama_port {
            config.backend.port = port;
        }
        if let Some(ref model) = self.chat_model {
            config.models.chat_model = model.clone();
        }
        if let Some(ref model) = self.analysis_model {
            config.models.analysis_model = model.clone();
            config.models.document_model = model.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
