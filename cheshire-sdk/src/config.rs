//! SDK Configuration
//!
//! Defines configuration options for the Cheshire host.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// SDK configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SDKConfig {
    /// Path to the SQLite database holding extension state
    pub database_path: PathBuf,

    /// Directories scanned for extension manifests (`plugin.json`)
    pub extension_dirs: Vec<PathBuf>,

    /// Conversation id used when a request carries none
    pub default_conversation_id: String,

    /// Hook bus configuration
    pub hooks: HookConfig,

    /// Working memory configuration
    pub memory: WorkingMemoryConfig,
}

impl Default for SDKConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("cheshire.db"),
            extension_dirs: Vec::new(),
            default_conversation_id: "default".to_string(),
            hooks: HookConfig::default(),
            memory: WorkingMemoryConfig::default(),
        }
    }
}

/// Hook bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Timeout for a single hook handler or extension endpoint call, in
    /// milliseconds (default: 5000)
    pub handler_timeout_ms: u64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 5_000,
        }
    }
}

impl HookConfig {
    /// Handler timeout as a `Duration`
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

/// Working memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingMemoryConfig {
    /// Number of most recent turns rendered in a conversation snapshot
    /// (default: 200); the log itself keeps every turn
    pub max_history: usize,

    /// Number of recalled memories handed to the generator (default: 3)
    pub recall_k: usize,

    /// Collection searched on recall (default: "episodic")
    pub recall_collection: String,
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self {
            max_history: 200,
            recall_k: 3,
            recall_collection: "episodic".to_string(),
        }
    }
}

impl SDKConfig {
    /// Create a new SDK config with the given database path
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Default::default()
        }
    }

    /// Add an extension directory
    pub fn with_extension_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extension_dirs.push(dir.into());
        self
    }

    /// Set hook configuration
    pub fn with_hooks(mut self, hooks: HookConfig) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set working memory configuration
    pub fn with_memory(mut self, memory: WorkingMemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.default_conversation_id.is_empty() {
            return Err(ConfigValidationError::InvalidValue {
                field: "default_conversation_id".into(),
                message: "must not be empty".into(),
            });
        }

        if self.hooks.handler_timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "hooks.handler_timeout_ms".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.memory.max_history == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "memory.max_history".into(),
                message: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
