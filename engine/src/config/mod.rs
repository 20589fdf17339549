//! Configuration management
//!
//! This module handles loading, validation, and management of the Stepwise configuration.
//! Configuration is stored in TOML format at ~/.stepwise/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **llm**: Generative provider endpoint, model, and credential lookup
//! - **workflow**: Orchestrator tuning (step pause, plan size, context limits, retention)
//! - **progress**: Progress feed polling
//!
//! Every section and field has a default, so a partial file is valid.
//!
//! # Examples
//!
//! ```no_run
//! use stepwise_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Model: {}", config.llm.model);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Generative provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Workflow orchestration tuning
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Progress feed settings
    #[serde(default)]
    pub progress: ProgressConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Generative provider configuration
///
/// The API key is never stored here. It is read from the environment
/// variable named by `api_key_env`, then from the OS keychain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Set to false to always run handlers in fallback mode
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature (0.0-2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Keychain service name used when the environment variable is unset
    #[serde(default = "default_keyring_service")]
    pub keyring_service: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Workflow orchestration tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Pause between consecutive subtasks, in milliseconds
    #[serde(default = "default_step_pause_ms")]
    pub step_pause_ms: u64,

    /// Longest plan accepted from the provider; longer plans are truncated
    #[serde(default = "default_max_subtasks")]
    pub max_subtasks: usize,

    /// Completed tasks included in a context bundle
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,

    /// Relevant memories included in a context bundle
    #[serde(default = "default_relevant_memory_limit")]
    pub relevant_memory_limit: i64,

    /// Importance given to stored context memories (1-10)
    #[serde(default = "default_importance")]
    pub default_importance: i64,

    /// Context key used when loading context at the start of a run
    #[serde(default = "default_context_key")]
    pub context_key: String,

    /// Age in days after which terminal tasks are removed by cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Maximum number of queued workflow runs
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Progress feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Seconds between progress broadcasts
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Execution records included in a snapshot's recent activity
    #[serde(default = "default_recent_activity_limit")]
    pub recent_activity_limit: i64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.stepwise")
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_keyring_service() -> String {
    "stepwise".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_step_pause_ms() -> u64 {
    1000
}

fn default_max_subtasks() -> usize {
    10
}

fn default_history_limit() -> i64 {
    5
}

fn default_relevant_memory_limit() -> i64 {
    10
}

fn default_importance() -> i64 {
    5
}

fn default_context_key() -> String {
    "general".to_string()
}

fn default_retention_days() -> i64 {
    30
}

fn default_queue_capacity() -> usize {
    64
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_recent_activity_limit() -> i64 {
    5
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            api_key_env: default_api_key_env(),
            keyring_service: default_keyring_service(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            step_pause_ms: default_step_pause_ms(),
            max_subtasks: default_max_subtasks(),
            history_limit: default_history_limit(),
            relevant_memory_limit: default_relevant_memory_limit(),
            default_importance: default_importance(),
            context_key: default_context_key(),
            retention_days: default_retention_days(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            recent_activity_limit: default_recent_activity_limit(),
        }
    }
}

impl WorkflowConfig {
    pub fn step_pause(&self) -> Duration {
        Duration::from_millis(self.step_pause_ms)
    }
}

impl ProgressConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Config {
    /// Load configuration from the default location (~/.stepwise/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Load configuration from `path`, writing defaults there first if it is missing
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Written before processing so the file keeps the portable ~ form
        let defaults = Self::default();
        let toml_string = toml::to_string_pretty(&defaults)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = defaults;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.stepwise/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".stepwise").join("config.toml"))
    }

    /// Path of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("stepwise.db")
    }

    /// Validate and process configuration
    ///
    /// Checks value ranges, expands ~ in the data directory, and creates the
    /// data directory if it doesn't exist.
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(EngineError::Config(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if self.llm.timeout_secs == 0 {
            return Err(EngineError::Config(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(EngineError::Config("llm.base_url must not be empty".to_string()));
        }

        if self.workflow.max_subtasks == 0 {
            return Err(EngineError::Config(
                "max_subtasks must be greater than 0".to_string(),
            ));
        }
        if !(1..=10).contains(&self.workflow.default_importance) {
            return Err(EngineError::Config(
                "default_importance must be between 1 and 10".to_string(),
            ));
        }
        if self.workflow.history_limit < 0 || self.workflow.relevant_memory_limit < 0 {
            return Err(EngineError::Config(
                "history_limit and relevant_memory_limit must not be negative".to_string(),
            ));
        }
        if self.workflow.retention_days < 0 {
            return Err(EngineError::Config(
                "retention_days must not be negative".to_string(),
            ));
        }
        if self.workflow.queue_capacity == 0 {
            return Err(EngineError::Config(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.progress.poll_interval_secs == 0 {
            return Err(EngineError::Config(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.progress.recent_activity_limit < 0 {
            return Err(EngineError::Config(
                "recent_activity_limit must not be negative".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
