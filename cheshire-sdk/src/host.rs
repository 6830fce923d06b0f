//! Host
//!
//! Owns every registry and runs conversation turns. Nothing is global: a
//! `Host` is built at startup, shared behind an `Arc`, and shut down by
//! unloading every extension.
//!
//! # Example
//!
//! ```rust,no_run
//! use cheshire_sdk::{Host, SDKConfig, SessionContext};
//!
//! async fn example() -> cheshire_sdk::SDKResult<()> {
//!     let host = Host::builder(SDKConfig::default()).bootstrap().await?;
//!
//!     let reply = host
//!         .handle_turn(&SessionContext::new("conv-1"), "book a flight")
//!         .await;
//!     println!("{:?}", reply.output);
//!
//!     host.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use serde_json::{Map, json};

use crate::agents::procedures::hook_context;
use crate::agents::{
    Agent, AgentOutput, AgentServices, FormInterpreter, Generator, MAIN_AGENT_SLOT, MainAgent,
    ToolPlanner,
};
use crate::config::SDKConfig;
use crate::extensions::endpoints::{EndpointActivator, InMemoryRouteTable, RouteTable};
use crate::extensions::hooks::{HookBus, points};
use crate::extensions::loader::{ExtensionLoader, LoaderConfig};
use crate::extensions::manager::{ExtensionManager, ExtensionTargets};
use crate::extensions::options::OptionResolver;
use crate::extensions::store::ExtensionStateStore;
use crate::extensions::tools::ToolRegistry;
use crate::extensions::{CorePlugin, Plugin};
use crate::memory::{ProceduralMemory, VectorMemory, WorkingMemoryStore};
use crate::session::SessionContext;
use crate::SDKResult;

/// Collection the user's messages are stored in
pub const EPISODIC_COLLECTION: &str = "episodic";

/// Builder for [`Host`]
pub struct HostBuilder {
    config: SDKConfig,
    route_table: Option<Arc<dyn RouteTable>>,
    generator: Option<Arc<dyn Generator>>,
    planner: Option<Arc<dyn ToolPlanner>>,
    interpreter: Option<Arc<dyn FormInterpreter>>,
    vectors: Option<Arc<dyn VectorMemory>>,
    store: Option<ExtensionStateStore>,
    persist_state: bool,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl HostBuilder {
    /// Route table custom endpoints are attached to (default: in memory)
    pub fn route_table(mut self, table: Arc<dyn RouteTable>) -> Self {
        self.route_table = Some(table);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn planner(mut self, planner: Arc<dyn ToolPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn interpreter(mut self, interpreter: Arc<dyn FormInterpreter>) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    /// Enable recall and episodic storage
    pub fn vector_memory(mut self, vectors: Arc<dyn VectorMemory>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    /// Persist extension state in an already open store
    pub fn state_store(mut self, store: ExtensionStateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Persist extension state at `config.database_path`
    pub fn persist_state(mut self) -> Self {
        self.persist_state = true;
        self
    }

    /// Add a compiled plugin to the catalog
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Build the host with every plugin in the catalog and nothing loaded
    pub async fn build(self) -> SDKResult<Host> {
        self.config.validate()?;

        let mut services = AgentServices::new(self.config.clone());
        if let Some(generator) = self.generator {
            services = services.with_generator(generator);
        }
        if let Some(planner) = self.planner {
            services = services.with_planner(planner);
        }
        if let Some(interpreter) = self.interpreter {
            services = services.with_interpreter(interpreter);
        }
        if let Some(vectors) = self.vectors {
            services = services.with_vector_memory(vectors);
        }
        let services = Arc::new(services);

        let options = Arc::new(OptionResolver::new(services.clone()));
        options
            .set_default::<dyn Agent, _>(MAIN_AGENT_SLOT, |args| {
                Ok(Arc::new(MainAgent::new(args.services.clone())) as Arc<dyn Agent>)
            })
            .await;

        let route_table = self
            .route_table
            .unwrap_or_else(|| Arc::new(InMemoryRouteTable::new()));
        let endpoints = Arc::new(EndpointActivator::new(route_table));

        let store = match (self.store, self.persist_state) {
            (Some(store), _) => Some(store),
            (None, true) => Some(ExtensionStateStore::open(&self.config.database_path)?),
            (None, false) => None,
        };

        let mut manager = ExtensionManager::new(ExtensionTargets {
            hooks: services.hooks.clone(),
            tools: services.tools.clone(),
            options: options.clone(),
            forms: services.forms.clone(),
            endpoints: endpoints.clone(),
        });
        if let Some(store) = store {
            manager = manager.with_store(store);
        }
        if let Some(vectors) = &services.vectors {
            manager = manager.with_procedural_memory(Arc::new(ProceduralMemory::new(
                services.tools.clone(),
                services.forms.clone(),
                vectors.clone(),
            )));
        }

        manager.add_plugin(Arc::new(CorePlugin)).await?;
        for plugin in self.plugins {
            manager.add_plugin(plugin).await?;
        }

        Ok(Host {
            services,
            options,
            endpoints,
            extensions: Arc::new(manager),
        })
    }

    /// Build, discover extensions on disk, and load every enabled one.
    ///
    /// Extensions that fail to load are recorded as failed; the host still starts.
    pub async fn bootstrap(self) -> SDKResult<Host> {
        let extension_dirs = self.config.extension_dirs.clone();
        let host = self.build().await?;

        let loader = ExtensionLoader::new(LoaderConfig {
            directories: extension_dirs,
            ..Default::default()
        });
        host.extensions.discover(&loader).await;

        for (id, e) in host.extensions.load_enabled().await {
            tracing::warn!(extension = %id, "Extension not loaded: {}", e);
        }

        tracing::info!(
            extensions = host.extensions.list().await.len(),
            "Host started"
        );
        Ok(host)
    }
}

/// Conversational agent host
pub struct Host {
    services: Arc<AgentServices>,
    options: Arc<OptionResolver>,
    endpoints: Arc<EndpointActivator>,
    extensions: Arc<ExtensionManager>,
}

impl Host {
    pub fn builder(config: SDKConfig) -> HostBuilder {
        HostBuilder {
            config,
            route_table: None,
            generator: None,
            planner: None,
            interpreter: None,
            vectors: None,
            store: None,
            persist_state: false,
            plugins: Vec::new(),
        }
    }

    pub fn config(&self) -> &SDKConfig {
        &self.services.config
    }

    pub fn services(&self) -> &Arc<AgentServices> {
        &self.services
    }

    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.services.hooks
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.services.tools
    }

    pub fn memory(&self) -> &Arc<WorkingMemoryStore> {
        &self.services.memory
    }

    pub fn vectors(&self) -> Option<&Arc<dyn VectorMemory>> {
        self.services.vectors.as_ref()
    }

    pub fn options(&self) -> &Arc<OptionResolver> {
        &self.options
    }

    pub fn endpoints(&self) -> &Arc<EndpointActivator> {
        &self.endpoints
    }

    pub fn extensions(&self) -> &Arc<ExtensionManager> {
        &self.extensions
    }

    /// Run one conversation turn.
    ///
    /// Failures inside the turn never surface here: a turn that cannot
    /// produce anything yields an empty output.
    pub async fn handle_turn(&self, session: &SessionContext, message: &str) -> AgentOutput {
        let ctx = hook_context(session);
        let hooks = &self.services.hooks;

        let read = hooks
            .run_hook(
                points::BEFORE_CAT_READS_MESSAGE,
                json!({ "text": message }),
                &ctx,
            )
            .await;
        let text = read
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or(message)
            .to_string();

        {
            let memory = self.services.memory.get(&session.conversation_id).await;
            memory.lock().await.record_user(text.clone());
        }

        let agent = match self
            .options
            .resolve_or_retain::<dyn Agent>(MAIN_AGENT_SLOT)
            .await
        {
            Ok(agent) => agent,
            Err(e) => {
                tracing::error!(
                    conversation_id = %session.conversation_id,
                    "No main agent available: {}",
                    e
                );
                return AgentOutput::empty();
            }
        };

        let output = agent.execute(session).await;
        let output = match hooks
            .run_hook_as(points::BEFORE_CAT_SENDS_MESSAGE, output.clone(), &ctx)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("before_cat_sends_message hook failed: {}", e);
                output
            }
        };

        if let Some(reply) = &output.output {
            let memory = self.services.memory.get(&session.conversation_id).await;
            memory.lock().await.record_assistant(
                reply.clone(),
                Some(json!({
                    "agent": agent.name(),
                    "intermediate_steps": output.intermediate_steps,
                })),
            );
        }

        self.store_episodic(session, &text).await;
        output
    }

    /// Forget a conversation's working memory
    pub async fn reset_conversation(&self, conversation_id: &str) -> bool {
        self.services.memory.reset(conversation_id).await
    }

    /// Unload every extension
    pub async fn shutdown(&self) {
        self.extensions.unload_all().await;
        tracing::info!("Host stopped");
    }

    async fn store_episodic(&self, session: &SessionContext, text: &str) {
        let Some(vectors) = &self.services.vectors else {
            return;
        };

        let mut metadata = Map::new();
        metadata.insert(
            "source".into(),
            json!(session.user_id.as_deref().unwrap_or("user")),
        );
        metadata.insert("conversation_id".into(), json!(session.conversation_id));

        let stored = async {
            let vector = vectors.embed(text).await?;
            vectors
                .upsert(EPISODIC_COLLECTION, text.to_string(), vector, metadata)
                .await
        }
        .await;

        if let Err(e) = stored {
            tracing::warn!("Failed to store episodic memory: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::builders::SDK;
    use crate::extensions::hooks::sync_hook;
    use crate::memory::{HashEmbedder, InMemoryVectorMemory, PROCEDURAL_COLLECTION, Role};

    #[tokio::test]
    async fn test_turn_records_history() {
        let host = Host::builder(SDKConfig::default()).bootstrap().await.unwrap();
        let session = SessionContext::new("c1");

        let out = host.handle_turn(&session, "hello").await;
        assert_eq!(out.output.as_deref(), Some("You said: hello"));

        let memory = host.memory().get("c1").await;
        let memory = memory.lock().await;
        assert_eq!(memory.history.len(), 2);
        assert_eq!(memory.history[0].role, Role::User);
        assert_eq!(memory.history[1].role, Role::Assistant);
        assert_eq!(memory.history[1].why.as_ref().unwrap()["agent"], "main_agent");
    }

    #[tokio::test]
    async fn test_message_hooks_wrap_the_turn() {
        let host = Host::builder(SDKConfig::default()).bootstrap().await.unwrap();
        host.hooks()
            .register(
                points::BEFORE_CAT_READS_MESSAGE,
                "polite",
                1,
                sync_hook(|mut msg, _| {
                    let text = format!("{} please", msg["text"].as_str().unwrap_or_default());
                    msg["text"] = json!(text);
                    Ok(msg)
                }),
            )
            .await
            .unwrap();
        host.hooks()
            .register(
                points::BEFORE_CAT_SENDS_MESSAGE,
                "shout",
                1,
                sync_hook(|mut out, _| {
                    let text = out["output"].as_str().unwrap_or_default().to_uppercase();
                    out["output"] = json!(text);
                    Ok(out)
                }),
            )
            .await
            .unwrap();

        let out = host.handle_turn(&SessionContext::new("c1"), "tea").await;
        assert_eq!(out.output.as_deref(), Some("YOU SAID: TEA PLEASE"));
    }

    #[tokio::test]
    async fn test_user_messages_become_episodic_memories() {
        let vectors: Arc<dyn VectorMemory> = Arc::new(InMemoryVectorMemory::new(
            Arc::new(HashEmbedder::default()),
            "HashEmbedder",
        ));
        let host = Host::builder(SDKConfig::default())
            .vector_memory(vectors.clone())
            .bootstrap()
            .await
            .unwrap();

        let session = SessionContext::new("c1").with_user_id("alice");
        host.handle_turn(&session, "my cat is called Dinah").await;
        let out = host.handle_turn(&session, "what is my cat called").await;
        assert!(out.output.unwrap().contains("my cat is called Dinah"));

        let stored = vectors.scroll(EPISODIC_COLLECTION, None, 10).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].metadata["source"], "alice");
    }

    #[tokio::test]
    async fn test_procedural_memory_follows_extensions() {
        let vectors: Arc<dyn VectorMemory> = Arc::new(InMemoryVectorMemory::new(
            Arc::new(HashEmbedder::default()),
            "HashEmbedder",
        ));
        let clock = SDK::plugin("clock")
            .tool(
                SDK::tool("time")
                    .description("Tells the current time")
                    .example("what time is it")
                    .handler(|_| async { Ok::<_, anyhow::Error>("noon".to_string()) }),
            )
            .build();
        let host = Host::builder(SDKConfig::default())
            .vector_memory(vectors.clone())
            .plugin(clock)
            .bootstrap()
            .await
            .unwrap();

        let mut from_clock = Map::new();
        from_clock.insert("extension".into(), json!("clock"));
        let embedded = vectors
            .scroll(PROCEDURAL_COLLECTION, Some(&from_clock), 10)
            .await
            .unwrap();
        assert_eq!(embedded.len(), 2);
        assert!(embedded.iter().all(|p| p.metadata["source"] == "time"));

        host.extensions().disable("clock").await.unwrap();
        let embedded = vectors
            .scroll(PROCEDURAL_COLLECTION, Some(&from_clock), 10)
            .await
            .unwrap();
        assert!(embedded.is_empty());
    }

    #[tokio::test]
    async fn test_reset_and_shutdown() {
        let host = Host::builder(SDKConfig::default()).bootstrap().await.unwrap();
        host.handle_turn(&SessionContext::new("c1"), "hi").await;
        assert!(host.reset_conversation("c1").await);
        assert!(!host.reset_conversation("c1").await);

        assert!(host.extensions().get("core").await.unwrap().is_active());
        host.shutdown().await;
        assert!(!host.extensions().get("core").await.unwrap().is_active());

        // The default main agent still answers after every extension is gone
        let out = host.handle_turn(&SessionContext::new("c2"), "still here").await;
        assert_eq!(out.output.as_deref(), Some("You said: still here"));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = SDKConfig {
            default_conversation_id: String::new(),
            ..Default::default()
        };
        assert!(Host::builder(config).build().await.is_err());
    }
}
