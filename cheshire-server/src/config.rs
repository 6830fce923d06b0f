//! Server configuration.

use std::path::{Path, PathBuf};

use cheshire_sdk::SDKConfig;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "CHESHIRE_DIR";

/// Embedder used by the vector memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Token hashing; no model download
    Hash,
    /// Local `fastembed` model (requires the `embeddings` feature)
    Fastembed,
}

/// Vector memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub enabled: bool,
    pub embedder: EmbedderKind,
    /// Dimensions of the hashing embedder
    pub dimensions: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            embedder: EmbedderKind::Hash,
            dimensions: 256,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server listens on
    pub bind: String,
    /// Vector memory
    pub vectors: VectorConfig,
    /// Host configuration
    pub sdk: SDKConfig,
    /// Data directory (database, extensions)
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// File the configuration was read from
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            bind: "127.0.0.1:1865".to_string(),
            vectors: VectorConfig::default(),
            sdk: SDKConfig::default(),
            config_path: data_dir.join("config.toml"),
            data_dir,
        }
    }
}

fn default_data_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".cheshire")
}

impl Config {
    /// Load configuration from `path`, or from the data directory.
    ///
    /// Standard directory structure:
    /// ```text
    /// ~/.cheshire/
    /// ├── config.toml           # Main configuration
    /// ├── cheshire.db           # Extension state
    /// └── plugins/              # Extension manifests
    ///     └── <id>/plugin.json
    /// ```
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        // Use CHESHIRE_DIR env var if set, otherwise ~/.cheshire
        let data_dir = std::env::var(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        Self::load_from(&data_dir, path)
    }

    /// Load configuration rooted at `data_dir`
    pub fn load_from(data_dir: &Path, path: Option<&Path>) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config: Config = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("invalid config {}: {}", config_path.display(), e))?
        } else {
            Config::default()
        };

        config.data_dir = data_dir.to_path_buf();
        config.config_path = config_path;

        // Relative paths are relative to the data directory
        if config.sdk.database_path.is_relative() {
            config.sdk.database_path = data_dir.join(&config.sdk.database_path);
        }
        config.sdk.extension_dirs = config
            .sdk
            .extension_dirs
            .iter()
            .map(|dir| {
                if dir.is_relative() {
                    data_dir.join(dir)
                } else {
                    dir.clone()
                }
            })
            .collect();

        let plugins_dir = data_dir.join("plugins");
        if !config.sdk.extension_dirs.contains(&plugins_dir) {
            config.sdk.extension_dirs.push(plugins_dir);
        }

        config.sdk.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.bind, "127.0.0.1:1865");
        assert!(config.config_path.ends_with("config.toml"));
        assert!(config.sdk.database_path.ends_with("cheshire.db"));
        assert!(config.vectors.enabled);
        assert_eq!(config.vectors.embedder, EmbedderKind::Hash);
    }

    #[test]
    fn test_load_without_file_uses_data_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data_dir = temp_dir.path().join("cheshire");

        let config = Config::load_from(&data_dir, None).unwrap();

        assert!(data_dir.exists());
        assert_eq!(config.config_path, data_dir.join("config.toml"));
        assert_eq!(config.sdk.database_path, data_dir.join("cheshire.db"));
        assert_eq!(config.sdk.extension_dirs, vec![data_dir.join("plugins")]);
    }

    #[test]
    fn test_load_toml_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
bind = "0.0.0.0:9000"

[vectors]
enabled = false

[sdk]
database_path = "state.db"
extension_dirs = ["extra"]
default_conversation_id = "lobby"

[sdk.hooks]
handler_timeout_ms = 250
"#,
        )
        .unwrap();

        let config = Config::load_from(temp_dir.path(), Some(&path)).unwrap();

        assert_eq!(config.bind, "0.0.0.0:9000");
        assert!(!config.vectors.enabled);
        assert_eq!(config.sdk.database_path, temp_dir.path().join("state.db"));
        assert_eq!(config.sdk.default_conversation_id, "lobby");
        assert_eq!(config.sdk.hooks.handler_timeout_ms, 250);
        assert_eq!(
            config.sdk.extension_dirs,
            vec![temp_dir.path().join("extra"), temp_dir.path().join("plugins")]
        );
        // Unspecified sections keep their defaults
        assert_eq!(config.sdk.memory.max_history, 200);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[sdk.memory]\nmax_history = 0\n").unwrap();

        assert!(Config::load_from(temp_dir.path(), Some(&path)).is_err());

        std::fs::write(&path, "bind = [").unwrap();
        assert!(Config::load_from(temp_dir.path(), Some(&path)).is_err());
    }
}
