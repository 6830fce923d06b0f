//! Extension Loader
//!
//! Discovers extensions on the filesystem and validates their manifests.
//! Each extension lives in its own directory holding a `plugin.json`
//! manifest and an optional `settings.json`.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;

use super::types::ExtensionManifest;
use crate::{SDKError, SDKResult};

/// Manifest file name
pub const MANIFEST_FILE: &str = "plugin.json";
/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Extension loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Extension directories to scan
    pub directories: Vec<PathBuf>,
    /// Require `major.minor[.patch]` numeric versions
    pub strict_validation: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            directories: vec![],
            strict_validation: true,
        }
    }
}

/// An extension found on disk
#[derive(Debug, Clone)]
pub struct DiscoveredExtension {
    pub manifest: ExtensionManifest,
    /// Contents of `settings.json`, or an empty object
    pub settings: Value,
    pub path: PathBuf,
}

/// Extension loader
pub struct ExtensionLoader {
    config: LoaderConfig,
}

impl ExtensionLoader {
    /// Create a new extension loader
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    /// Load an extension from a directory
    pub async fn load_from_dir(&self, path: &Path) -> SDKResult<DiscoveredExtension> {
        let manifest_path = path.join(MANIFEST_FILE);

        if !manifest_path.exists() {
            return Err(SDKError::extension(format!(
                "No {} found in {:?}",
                MANIFEST_FILE, path
            )));
        }

        let manifest_content = fs::read_to_string(&manifest_path).await?;
        let manifest: ExtensionManifest = serde_json::from_str(&manifest_content)
            .map_err(|e| SDKError::extension(format!("Invalid {}: {}", MANIFEST_FILE, e)))?;

        self.validate_manifest(&manifest)?;

        let settings = self.load_settings(path).await?;

        Ok(DiscoveredExtension {
            manifest,
            settings,
            path: path.to_path_buf(),
        })
    }

    /// Scan directories for extensions.
    ///
    /// Missing directories are skipped; each extension directory yields one
    /// result, so one broken manifest does not hide the others.
    pub async fn scan(&self) -> Vec<SDKResult<DiscoveredExtension>> {
        let mut results = Vec::new();

        for dir in &self.config.directories {
            if !dir.exists() {
                tracing::debug!("Extension directory {:?} does not exist", dir);
                continue;
            }

            let Ok(mut entries) = fs::read_dir(dir).await else {
                tracing::warn!("Cannot read extension directory {:?}", dir);
                continue;
            };

            let mut paths = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.is_dir() && path.join(MANIFEST_FILE).exists() {
                    paths.push(path);
                }
            }
            paths.sort();

            for path in paths {
                results.push(self.load_from_dir(&path).await);
            }
        }

        results
    }

    /// Validate a manifest
    pub fn validate_manifest(&self, manifest: &ExtensionManifest) -> SDKResult<()> {
        if manifest.id.is_empty() {
            return Err(SDKError::extension("Missing extension ID"));
        }

        if manifest.name.trim().is_empty() {
            return Err(SDKError::extension(format!(
                "Extension '{}' is missing a name",
                manifest.id
            )));
        }

        if manifest.version.is_empty() {
            return Err(SDKError::extension(format!(
                "Extension '{}' is missing a version",
                manifest.id
            )));
        }

        // Lowercase, alphanumeric, hyphens and underscores
        if !manifest
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(SDKError::extension(format!(
                "Extension ID '{}' must be lowercase alphanumeric with hyphens",
                manifest.id
            )));
        }

        let version_parts: Vec<&str> = manifest.version.split('.').collect();
        if self.config.strict_validation
            && (version_parts.len() < 2
                || version_parts
                    .iter()
                    .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())))
        {
            return Err(SDKError::extension(format!(
                "Extension '{}' version must be semver format (e.g., 1.0.0)",
                manifest.id
            )));
        }

        Ok(())
    }

    async fn load_settings(&self, path: &Path) -> SDKResult<Value> {
        let settings_path = path.join(SETTINGS_FILE);

        if !settings_path.exists() {
            return Ok(Value::Object(Default::default()));
        }

        let content = fs::read_to_string(&settings_path).await?;
        let settings: Value = serde_json::from_str(&content)
            .map_err(|e| SDKError::extension(format!("Invalid {}: {}", SETTINGS_FILE, e)))?;

        if !settings.is_object() {
            return Err(SDKError::extension(format!(
                "{} in {:?} must be a JSON object",
                SETTINGS_FILE, path
            )));
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn valid() -> ExtensionManifest {
        ExtensionManifest {
            id: "pirate-cat".into(),
            name: "Pirate Cat".into(),
            version: "1.0.0".into(),
            description: "Arr".into(),
            author: None,
            tags: vec![],
        }
    }

    fn write_extension(dir: &Path, name: &str, manifest: Value, settings: Option<Value>) {
        let ext = dir.join(name);
        std::fs::create_dir_all(&ext).unwrap();
        std::fs::write(ext.join(MANIFEST_FILE), manifest.to_string()).unwrap();
        if let Some(settings) = settings {
            std::fs::write(ext.join(SETTINGS_FILE), settings.to_string()).unwrap();
        }
    }

    #[test]
    fn test_manifest_validation() {
        let loader = ExtensionLoader::new(LoaderConfig::default());
        assert_ok!(loader.validate_manifest(&valid()));

        let invalid_id = ExtensionManifest {
            id: "Pirate Cat".into(),
            ..valid()
        };
        assert_err!(loader.validate_manifest(&invalid_id));

        let no_name = ExtensionManifest {
            name: " ".into(),
            ..valid()
        };
        assert_err!(loader.validate_manifest(&no_name));

        let bad_version = ExtensionManifest {
            version: "one".into(),
            ..valid()
        };
        assert_err!(loader.validate_manifest(&bad_version));

        let lenient = ExtensionLoader::new(LoaderConfig {
            strict_validation: false,
            ..Default::default()
        });
        assert_ok!(lenient.validate_manifest(&bad_version));
    }

    #[tokio::test]
    async fn test_scan_reads_manifests_and_settings() {
        let dir = TempDir::new().unwrap();
        write_extension(
            dir.path(),
            "pirate",
            json!({"id": "pirate-cat", "name": "Pirate Cat", "version": "1.0.0"}),
            Some(json!({"greeting": "Ahoy"})),
        );
        write_extension(
            dir.path(),
            "plain",
            json!({"id": "plain", "name": "Plain", "version": "0.2"}),
            None,
        );
        std::fs::create_dir_all(dir.path().join("not-an-extension")).unwrap();

        let loader = ExtensionLoader::new(LoaderConfig {
            directories: vec![dir.path().to_path_buf(), dir.path().join("missing")],
            ..Default::default()
        });
        let found: Vec<DiscoveredExtension> = loader
            .scan()
            .await
            .into_iter()
            .collect::<SDKResult<_>>()
            .unwrap();

        assert_eq!(found.len(), 2);
        let plain = found.iter().find(|e| e.manifest.id == "plain").unwrap();
        assert_eq!(plain.settings, json!({}));
        let pirate = found.iter().find(|e| e.manifest.id == "pirate-cat").unwrap();
        assert_eq!(pirate.settings["greeting"], "Ahoy");
    }

    #[tokio::test]
    async fn test_broken_manifest_reported_alongside_good_ones() {
        let dir = TempDir::new().unwrap();
        write_extension(
            dir.path(),
            "good",
            json!({"id": "good", "name": "Good", "version": "1.0"}),
            None,
        );
        write_extension(dir.path(), "bad", json!({"id": "bad"}), None);
        write_extension(
            dir.path(),
            "bad-settings",
            json!({"id": "bad-settings", "name": "B", "version": "1.0"}),
            Some(json!([1, 2])),
        );

        let loader = ExtensionLoader::new(LoaderConfig {
            directories: vec![dir.path().to_path_buf()],
            ..Default::default()
        });
        let results = loader.scan().await;
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }
}
