//! Extension Manager
//!
//! Owns the catalog of compiled plugins and drives their lifecycle. Loading
//! an extension registers every declaration it makes (hooks, tools, options,
//! forms, endpoints) tagged with the extension id; unloading removes
//! whatever that id currently owns. A load that fails part way is rolled
//! back, so an extension is either fully registered or not at all.
//!
//! When procedural memory is attached, it is refreshed after every load and
//! unload so the embedded tools and forms follow the registries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use super::endpoints::EndpointActivator;
use super::hooks::HookBus;
use super::loader::{DiscoveredExtension, ExtensionLoader};
use super::options::OptionResolver;
use super::store::ExtensionStateStore;
use super::tools::ToolRegistry;
use super::types::{
    CatalogEntry, ExtensionInfo, ExtensionManifest, ExtensionState, Plugin, PluginDeclarations,
};
use crate::agents::FormRegistry;
use crate::memory::ProceduralMemory;
use crate::{SDKError, SDKResult};

/// Id of the always-present core extension
pub const CORE_EXTENSION_ID: &str = "core";

struct ManagedExtension {
    entry: CatalogEntry,
    state: ExtensionState,
    loaded_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl ManagedExtension {
    fn info(&self, enabled: bool) -> ExtensionInfo {
        ExtensionInfo {
            manifest: self.entry.manifest.clone(),
            state: self.state,
            enabled,
            path: self.entry.path.clone(),
            loaded_at: self.loaded_at,
            error: self.error.clone(),
        }
    }
}

/// The registries an extension's declarations go into
#[derive(Clone)]
pub struct ExtensionTargets {
    pub hooks: Arc<HookBus>,
    pub tools: Arc<ToolRegistry>,
    pub options: Arc<OptionResolver>,
    pub forms: Arc<FormRegistry>,
    pub endpoints: Arc<EndpointActivator>,
}

/// Extension lifecycle manager
pub struct ExtensionManager {
    targets: ExtensionTargets,
    store: Option<ExtensionStateStore>,
    procedural: Option<Arc<ProceduralMemory>>,
    /// Catalog in insertion order; load order decides priority ties
    extensions: RwLock<Vec<ManagedExtension>>,
    /// Serializes load/unload
    lifecycle: Mutex<()>,
}

impl ExtensionManager {
    pub fn new(targets: ExtensionTargets) -> Self {
        Self {
            targets,
            store: None,
            procedural: None,
            extensions: RwLock::new(Vec::new()),
            lifecycle: Mutex::new(()),
        }
    }

    /// Persist enabled flags and load errors in `store`
    pub fn with_store(mut self, store: ExtensionStateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Keep `procedural` in sync with the registered tools and forms
    pub fn with_procedural_memory(mut self, procedural: Arc<ProceduralMemory>) -> Self {
        self.procedural = Some(procedural);
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Catalog
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a compiled plugin to the catalog (not loaded yet)
    pub async fn add_plugin(&self, plugin: Arc<dyn Plugin>) -> SDKResult<()> {
        let manifest = plugin.manifest();
        if manifest.id != plugin.id() {
            return Err(SDKError::invalid_registration(format!(
                "plugin '{}' declares manifest id '{}'",
                plugin.id(),
                manifest.id
            )));
        }

        let mut extensions = self.extensions.write().await;
        if extensions.iter().any(|e| e.entry.manifest.id == manifest.id) {
            return Err(SDKError::invalid_registration(format!(
                "extension already in catalog: {}",
                manifest.id
            )));
        }

        tracing::debug!(extension = %manifest.id, "Added extension to catalog");
        extensions.push(ManagedExtension {
            entry: CatalogEntry {
                plugin,
                manifest,
                settings: serde_json::Value::Object(Default::default()),
                path: None,
            },
            state: ExtensionState::Unloaded,
            loaded_at: None,
            error: None,
        });
        Ok(())
    }

    /// Attach manifests and settings found on disk to catalog entries.
    ///
    /// Returns the ids of discovered extensions with no compiled plugin.
    pub async fn attach_discovered(&self, discovered: Vec<DiscoveredExtension>) -> Vec<String> {
        let mut extensions = self.extensions.write().await;
        let mut unmatched = Vec::new();

        for found in discovered {
            match extensions
                .iter_mut()
                .find(|e| e.entry.manifest.id == found.manifest.id)
            {
                Some(managed) => {
                    tracing::debug!(
                        extension = %found.manifest.id,
                        path = ?found.path,
                        "Attached manifest"
                    );
                    managed.entry.manifest = found.manifest;
                    managed.entry.settings = found.settings;
                    managed.entry.path = Some(found.path);
                }
                None => {
                    tracing::warn!(
                        extension = %found.manifest.id,
                        path = ?found.path,
                        "Extension has no compiled plugin, skipping"
                    );
                    unmatched.push(found.manifest.id);
                }
            }
        }

        unmatched
    }

    /// Scan the loader's directories and attach what it finds
    pub async fn discover(&self, loader: &ExtensionLoader) -> Vec<String> {
        let mut discovered = Vec::new();
        for result in loader.scan().await {
            match result {
                Ok(found) => discovered.push(found),
                Err(e) => tracing::warn!("Skipping extension: {}", e),
            }
        }
        self.attach_discovered(discovered).await
    }

    /// Status of every catalog entry, in catalog order
    pub async fn list(&self) -> Vec<ExtensionInfo> {
        let extensions = self.extensions.read().await;
        let mut infos = Vec::with_capacity(extensions.len());
        for managed in extensions.iter() {
            let enabled = self.is_enabled(&managed.entry.manifest.id).await;
            infos.push(managed.info(enabled));
        }
        infos
    }

    /// Status of one extension
    pub async fn get(&self, id: &str) -> Option<ExtensionInfo> {
        let extensions = self.extensions.read().await;
        let managed = extensions.iter().find(|e| e.entry.manifest.id == id)?;
        Some(managed.info(self.is_enabled(id).await))
    }

    /// Manifest of one extension
    pub async fn manifest(&self, id: &str) -> Option<ExtensionManifest> {
        self.get(id).await.map(|info| info.manifest)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Register everything `id` declares. Loading an active extension is a no-op.
    pub async fn load(&self, id: &str) -> SDKResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.load_locked(id).await
    }

    /// Remove everything `id` currently has registered
    pub async fn unload(&self, id: &str) -> SDKResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.unload_locked(id, ExtensionState::Unloaded).await
    }

    /// Unload then load, picking up changed declarations
    pub async fn reload(&self, id: &str) -> SDKResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.unload_locked(id, ExtensionState::Unloaded).await?;
        self.load_locked(id).await
    }

    /// Persist the enabled flag and load
    pub async fn enable(&self, id: &str) -> SDKResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.entry(id).await?;
        if let Some(store) = &self.store {
            store.set_enabled(id, true).await?;
        }
        tracing::info!(extension = id, "Enabled extension");
        self.load_locked(id).await
    }

    /// Persist the disabled flag and unload. The core extension cannot be disabled.
    pub async fn disable(&self, id: &str) -> SDKResult<()> {
        if id == CORE_EXTENSION_ID {
            return Err(SDKError::extension("the core extension cannot be disabled"));
        }

        let _guard = self.lifecycle.lock().await;
        self.entry(id).await?;
        if let Some(store) = &self.store {
            store.set_enabled(id, false).await?;
        }
        tracing::info!(extension = id, "Disabled extension");
        self.unload_locked(id, ExtensionState::Disabled).await
    }

    /// Load every enabled extension in catalog order.
    ///
    /// Failures are recorded and returned; they never stop the others.
    pub async fn load_enabled(&self) -> Vec<(String, SDKError)> {
        let _guard = self.lifecycle.lock().await;
        let ids: Vec<String> = {
            let extensions = self.extensions.read().await;
            extensions
                .iter()
                .map(|e| e.entry.manifest.id.clone())
                .collect()
        };

        let mut failures = Vec::new();
        for id in ids {
            if id != CORE_EXTENSION_ID && !self.is_enabled(&id).await {
                self.set_state(&id, ExtensionState::Disabled, None).await;
                continue;
            }
            if let Err(e) = self.load_locked(&id).await {
                failures.push((id, e));
            }
        }
        failures
    }

    /// Unload every active extension, most recently added first
    pub async fn unload_all(&self) {
        let _guard = self.lifecycle.lock().await;
        let ids: Vec<String> = {
            let extensions = self.extensions.read().await;
            extensions
                .iter()
                .rev()
                .filter(|e| e.state == ExtensionState::Active)
                .map(|e| e.entry.manifest.id.clone())
                .collect()
        };

        for id in ids {
            if let Err(e) = self.unload_locked(&id, ExtensionState::Unloaded).await {
                tracing::warn!(extension = %id, "Unload failed: {}", e);
            }
        }
    }

    /// Re-embed every available procedure; returns how many points were stored.
    pub async fn refresh_procedural_memory(&self) -> SDKResult<usize> {
        let _guard = self.lifecycle.lock().await;
        match &self.procedural {
            Some(procedural) => procedural.refresh().await,
            None => Ok(0),
        }
    }

    async fn sync_procedures(&self, id: &str) {
        if let Some(procedural) = &self.procedural {
            if let Err(e) = procedural.refresh().await {
                tracing::warn!(extension = id, "Cannot refresh procedural memory: {}", e);
            }
        }
    }

    async fn load_locked(&self, id: &str) -> SDKResult<()> {
        let (entry, state) = self.entry(id).await?;
        if state == ExtensionState::Active {
            tracing::debug!(extension = id, "Extension already loaded");
            return Ok(());
        }

        let result = match entry.plugin.declare(&entry.settings) {
            Ok(declarations) => self.register_all(id, &declarations).await,
            Err(e) => Err(SDKError::extension(format!(
                "extension '{}' failed to declare: {:#}",
                id, e
            ))),
        };

        match result {
            Ok(()) => {
                self.set_state(id, ExtensionState::Active, None).await;
                self.persist_error(id, None).await;
                self.sync_procedures(id).await;
                tracing::info!(extension = id, "Loaded extension");
                Ok(())
            }
            Err(e) => {
                self.remove_registrations(id).await;
                let message = e.to_string();
                self.set_state(id, ExtensionState::Failed, Some(message.clone()))
                    .await;
                self.persist_error(id, Some(&message)).await;
                tracing::error!(extension = id, "Failed to load extension: {}", message);
                Err(e)
            }
        }
    }

    async fn unload_locked(&self, id: &str, next: ExtensionState) -> SDKResult<()> {
        self.entry(id).await?;
        let removed = self.remove_registrations(id).await;
        self.set_state(id, next, None).await;
        if removed > 0 {
            self.sync_procedures(id).await;
        }
        tracing::info!(extension = id, removed, "Unloaded extension");
        Ok(())
    }

    async fn register_all(&self, id: &str, declarations: &PluginDeclarations) -> SDKResult<()> {
        let targets = &self.targets;

        for hook in &declarations.hooks {
            targets
                .hooks
                .register(&hook.name, id, hook.priority, hook.handler.clone())
                .await?;
        }
        for tool in &declarations.tools {
            targets.tools.register(tool, id).await?;
        }
        for option in &declarations.options {
            targets.options.register(option, id).await?;
        }
        for form in &declarations.forms {
            targets.forms.register(form, id).await?;
        }
        for endpoint in &declarations.endpoints {
            targets.endpoints.activate(endpoint, id).await?;
        }

        Ok(())
    }

    /// Remove what `id` currently owns everywhere; returns how many entries went
    async fn remove_registrations(&self, id: &str) -> usize {
        let targets = &self.targets;
        let mut removed = targets.hooks.unregister_source(id).await
            + targets.tools.unregister_source(id).await
            + targets.options.unregister_source(id).await
            + targets.forms.unregister_source(id).await;

        match targets.endpoints.deactivate_source(id).await {
            Ok(n) => removed += n,
            Err(e) => tracing::warn!(extension = id, "Endpoint deactivation failed: {}", e),
        }
        removed
    }

    async fn entry(&self, id: &str) -> SDKResult<(CatalogEntry, ExtensionState)> {
        let extensions = self.extensions.read().await;
        extensions
            .iter()
            .find(|e| e.entry.manifest.id == id)
            .map(|e| (e.entry.clone(), e.state))
            .ok_or_else(|| SDKError::not_found("Extension", id))
    }

    async fn set_state(&self, id: &str, state: ExtensionState, error: Option<String>) {
        let mut extensions = self.extensions.write().await;
        if let Some(managed) = extensions.iter_mut().find(|e| e.entry.manifest.id == id) {
            managed.state = state;
            managed.error = error;
            if state == ExtensionState::Active {
                managed.loaded_at = Some(Utc::now());
            }
        }
    }

    async fn is_enabled(&self, id: &str) -> bool {
        match &self.store {
            Some(store) => store.is_enabled(id).await.unwrap_or_else(|e| {
                tracing::warn!(extension = id, "Cannot read extension state: {}", e);
                true
            }),
            None => true,
        }
    }

    async fn persist_error(&self, id: &str, error: Option<&str>) {
        if let Some(store) = &self.store {
            if let Err(e) = store.record_error(id, error).await {
                tracing::warn!(extension = id, "Cannot persist extension state: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentServices, FormDefinition, SlotSpec};
    use crate::config::SDKConfig;
    use crate::extensions::builders::{FnPlugin, SDK};
    use crate::extensions::endpoints::{CustomEndpoint, InMemoryRouteTable, RouteTable};
    use crate::extensions::hooks::{HookDeclaration, sync_hook};
    use crate::extensions::options::OptionDeclaration;
    use serde_json::json;

    struct Fixture {
        manager: ExtensionManager,
        targets: ExtensionTargets,
        table: Arc<InMemoryRouteTable>,
    }

    fn fixture() -> Fixture {
        let services = Arc::new(AgentServices::new(SDKConfig::default()));
        let table = Arc::new(InMemoryRouteTable::new());
        let targets = ExtensionTargets {
            hooks: services.hooks.clone(),
            tools: services.tools.clone(),
            options: Arc::new(OptionResolver::new(services.clone())),
            forms: services.forms.clone(),
            endpoints: Arc::new(EndpointActivator::new(table.clone())),
        };
        Fixture {
            manager: ExtensionManager::new(targets.clone()),
            targets,
            table,
        }
    }

    fn full_plugin(id: &str) -> Arc<dyn Plugin> {
        SDK::plugin(id)
            .hook(HookDeclaration::new(
                "before_cat_sends_message",
                sync_hook(|v, _| Ok(v)),
            ))
            .tool(SDK::tool("clock").handler(|_| async { Ok::<_, anyhow::Error>("noon".to_string()) }))
            .form(FormDefinition {
                slots: vec![SlotSpec::required("destination", "")],
                ..FormDefinition::new("book_flight")
            })
            .endpoint(CustomEndpoint::get("/hello", |_| async { Ok::<_, anyhow::Error>(json!("hi")) }))
            .build()
    }

    #[tokio::test]
    async fn test_load_registers_everything_and_unload_removes_it() {
        let f = fixture();
        f.manager.add_plugin(full_plugin("travel")).await.unwrap();
        f.manager.load("travel").await.unwrap();

        assert_eq!(f.targets.hooks.handlers("before_cat_sends_message").await.len(), 1);
        assert!(f.targets.tools.has_tool("clock").await);
        assert!(f.targets.forms.get("book_flight").await.is_some());
        assert!(f.table.contains("/custom/hello").await);
        assert_eq!(
            f.manager.get("travel").await.unwrap().state,
            ExtensionState::Active
        );

        f.manager.unload("travel").await.unwrap();
        assert!(f.targets.hooks.handlers("before_cat_sends_message").await.is_empty());
        assert!(!f.targets.tools.has_tool("clock").await);
        assert!(f.targets.forms.get("book_flight").await.is_none());
        assert!(!f.table.contains("/custom/hello").await);
        assert_eq!(
            f.manager.get("travel").await.unwrap().state,
            ExtensionState::Unloaded
        );
    }

    #[tokio::test]
    async fn test_double_load_is_single_registration() {
        let f = fixture();
        f.manager.add_plugin(full_plugin("travel")).await.unwrap();
        f.manager.load("travel").await.unwrap();
        f.manager.load("travel").await.unwrap();

        assert_eq!(f.targets.hooks.handlers("before_cat_sends_message").await.len(), 1);
        assert_eq!(f.table.routes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_rolls_back() {
        let f = fixture();
        let plugin = SDK::plugin("broken")
            .hook(HookDeclaration::new("agent_fast_reply", sync_hook(|v, _| Ok(v))))
            .tool(SDK::tool("clock").handler(|_| async { Ok::<_, anyhow::Error>("noon".to_string()) }))
            .form(FormDefinition::new(""))
            .build();
        f.manager.add_plugin(plugin).await.unwrap();

        let err = f.manager.load("broken").await.unwrap_err();
        assert!(matches!(err, SDKError::InvalidRegistration { .. }));
        assert!(!f.targets.tools.has_tool("clock").await);
        assert!(f.targets.hooks.handlers("agent_fast_reply").await.is_empty());

        let info = f.manager.get("broken").await.unwrap();
        assert_eq!(info.state, ExtensionState::Failed);
        assert!(info.error.is_some());
    }

    #[tokio::test]
    async fn test_declare_failure_marks_failed() {
        let f = fixture();
        let plugin = FnPlugin::new("needs-key", |settings: &serde_json::Value| {
            if settings.get("api_key").is_none() {
                anyhow::bail!("api_key missing");
            }
            Ok(PluginDeclarations::default())
        });
        f.manager.add_plugin(Arc::new(plugin)).await.unwrap();

        let err = f.manager.load("needs-key").await.unwrap_err();
        assert!(err.to_string().contains("api_key missing"));
        assert_eq!(
            f.manager.get("needs-key").await.unwrap().state,
            ExtensionState::Failed
        );
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_settings() {
        let f = fixture();
        let plugin = FnPlugin::new("greeter", |settings: &serde_json::Value| {
            let name = settings["tool"].as_str().unwrap_or("greet").to_string();
            Ok(PluginDeclarations {
                tools: vec![SDK::tool(name).handler(|_| async { Ok::<_, anyhow::Error>("hi".to_string()) })],
                ..Default::default()
            })
        });
        f.manager.add_plugin(Arc::new(plugin)).await.unwrap();
        f.manager.load("greeter").await.unwrap();
        assert!(f.targets.tools.has_tool("greet").await);

        let dir = tempfile::TempDir::new().unwrap();
        f.manager
            .attach_discovered(vec![DiscoveredExtension {
                manifest: ExtensionManifest::new("greeter"),
                settings: json!({"tool": "wave"}),
                path: dir.path().to_path_buf(),
            }])
            .await;
        f.manager.reload("greeter").await.unwrap();

        assert!(!f.targets.tools.has_tool("greet").await);
        assert!(f.targets.tools.has_tool("wave").await);
    }

    #[tokio::test]
    async fn test_enable_disable_persist() {
        let f = fixture();
        let store = ExtensionStateStore::open_in_memory().unwrap();
        let manager = ExtensionManager::new(f.targets.clone()).with_store(store.clone());
        manager.add_plugin(full_plugin("travel")).await.unwrap();

        manager.disable("travel").await.unwrap();
        assert!(!store.is_enabled("travel").await.unwrap());
        assert!(manager.load_enabled().await.is_empty());
        assert_eq!(
            manager.get("travel").await.unwrap().state,
            ExtensionState::Disabled
        );
        assert!(!f.targets.tools.has_tool("clock").await);

        manager.enable("travel").await.unwrap();
        assert!(store.is_enabled("travel").await.unwrap());
        assert!(f.targets.tools.has_tool("clock").await);
        assert!(manager.get("travel").await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_core_cannot_be_disabled() {
        let f = fixture();
        f.manager
            .add_plugin(SDK::plugin(CORE_EXTENSION_ID).build())
            .await
            .unwrap();
        assert!(f.manager.disable(CORE_EXTENSION_ID).await.is_err());
    }

    #[tokio::test]
    async fn test_catalog_errors() {
        let f = fixture();
        f.manager.add_plugin(full_plugin("travel")).await.unwrap();
        assert!(f.manager.add_plugin(full_plugin("travel")).await.is_err());
        assert!(f.manager.load("nope").await.unwrap_err().is_not_found());

        let unmatched = f
            .manager
            .attach_discovered(vec![DiscoveredExtension {
                manifest: ExtensionManifest::new("orphan"),
                settings: json!({}),
                path: "/tmp/orphan".into(),
            }])
            .await;
        assert_eq!(unmatched, vec!["orphan"]);
    }

    #[tokio::test]
    async fn test_unload_all() {
        let f = fixture();
        f.manager.add_plugin(full_plugin("travel")).await.unwrap();
        f.manager
            .add_plugin(
                SDK::plugin("opt")
                    .option(OptionDeclaration::new::<str, _>("motto", 1, |_| {
                        Ok(Arc::from("meow"))
                    }))
                    .build(),
            )
            .await
            .unwrap();
        assert!(f.manager.load_enabled().await.is_empty());
        assert_eq!(f.targets.options.winning_source("motto").await.as_deref(), Some("opt"));

        f.manager.unload_all().await;
        assert!(f.targets.options.winning_source("motto").await.is_none());
        assert!(f.manager.list().await.iter().all(|e| !e.is_active()));
    }
}
