//! Extension Type Definitions

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::endpoints::CustomEndpoint;
use super::hooks::HookDeclaration;
use super::options::OptionDeclaration;
use super::tools::Tool;
use crate::agents::FormDefinition;

/// Extension state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionState {
    /// Declarations are registered
    Active,
    /// Known but switched off
    Disabled,
    /// Loading failed; see the recorded error
    Failed,
    /// Known and enabled, not loaded yet
    Unloaded,
}

/// Extension manifest (`plugin.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Unique extension ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Version string (semver)
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ExtensionManifest {
    /// Minimal manifest for a compiled plugin with no `plugin.json`
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: "0.1.0".into(),
            description: String::new(),
            author: None,
            tags: Vec::new(),
        }
    }
}

/// Everything an extension contributes when loaded
#[derive(Debug, Clone, Default)]
pub struct PluginDeclarations {
    pub hooks: Vec<HookDeclaration>,
    pub tools: Vec<Tool>,
    pub options: Vec<OptionDeclaration>,
    pub forms: Vec<FormDefinition>,
    pub endpoints: Vec<CustomEndpoint>,
}

impl PluginDeclarations {
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
            && self.tools.is_empty()
            && self.options.is_empty()
            && self.forms.is_empty()
            && self.endpoints.is_empty()
    }
}

/// Extension code compiled into the host.
///
/// `declare` is called on every load, so a reload picks up changed settings.
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    fn manifest(&self) -> ExtensionManifest {
        ExtensionManifest::new(self.id())
    }

    /// Produce the declarations for this load
    fn declare(&self, settings: &serde_json::Value) -> anyhow::Result<PluginDeclarations>;
}

/// A catalog entry: compiled plugin plus whatever was discovered on disk
#[derive(Clone)]
pub struct CatalogEntry {
    pub plugin: Arc<dyn Plugin>,
    pub manifest: ExtensionManifest,
    pub settings: serde_json::Value,
    pub path: Option<PathBuf>,
}

impl std::fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("manifest", &self.manifest)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Extension status as reported by the manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub manifest: ExtensionManifest,
    pub state: ExtensionState,
    /// Persisted enabled flag
    pub enabled: bool,
    /// Directory the manifest was discovered in
    pub path: Option<PathBuf>,
    pub loaded_at: Option<DateTime<Utc>>,
    /// Error message if failed
    pub error: Option<String>,
}

impl ExtensionInfo {
    pub fn is_active(&self) -> bool {
        self.state == ExtensionState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manifest_optional_fields() {
        let manifest: ExtensionManifest = serde_json::from_value(json!({
            "id": "pirate",
            "name": "Pirate Cat",
            "version": "1.0.0"
        }))
        .unwrap();
        assert_eq!(manifest.description, "");
        assert!(manifest.tags.is_empty());
        assert_eq!(manifest.author, None);
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_value(ExtensionState::Unloaded).unwrap(),
            json!("unloaded")
        );
        assert!(PluginDeclarations::default().is_empty());
    }
}
