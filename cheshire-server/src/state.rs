//! Application state.

use std::sync::Arc;
use std::time::Instant;

use cheshire_sdk::extensions::InMemoryRouteTable;
use cheshire_sdk::memory::{HashEmbedder, InMemoryVectorMemory, VectorMemory};
use cheshire_sdk::{Host, SessionContext};

use crate::config::{Config, EmbedderKind, VectorConfig};

/// Shared state handed to every route
pub struct AppState {
    pub host: Arc<Host>,
    /// Live table of extension routes, served by the fallback handler
    pub route_table: Arc<InMemoryRouteTable>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(host: Arc<Host>, route_table: Arc<InMemoryRouteTable>) -> Self {
        Self {
            host,
            route_table,
            start_time: Instant::now(),
        }
    }

    /// Build the host from configuration and load every enabled extension
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let route_table = Arc::new(InMemoryRouteTable::new());

        let mut builder = Host::builder(config.sdk.clone())
            .route_table(route_table.clone())
            .persist_state();
        if let Some(vectors) = vector_memory(&config.vectors)? {
            builder = builder.vector_memory(vectors);
        }

        let host = builder.bootstrap().await?;
        Ok(Self::new(Arc::new(host), route_table))
    }

    /// Session for a request; falls back to the default conversation
    pub fn session(&self, conversation_id: Option<&str>, user_id: Option<&str>) -> SessionContext {
        let conversation_id = conversation_id
            .filter(|id| !id.is_empty())
            .unwrap_or(self.host.config().default_conversation_id.as_str());

        let session = SessionContext::new(conversation_id);
        match user_id.filter(|id| !id.is_empty()) {
            Some(user_id) => session.with_user_id(user_id),
            None => session,
        }
    }
}

fn vector_memory(config: &VectorConfig) -> anyhow::Result<Option<Arc<dyn VectorMemory>>> {
    if !config.enabled {
        return Ok(None);
    }

    let memory: Arc<dyn VectorMemory> = match config.embedder {
        EmbedderKind::Hash => Arc::new(InMemoryVectorMemory::new(
            Arc::new(HashEmbedder::new(config.dimensions)),
            "hash",
        )),
        EmbedderKind::Fastembed => fastembed_memory()?,
    };
    Ok(Some(memory))
}

#[cfg(feature = "embeddings")]
fn fastembed_memory() -> anyhow::Result<Arc<dyn VectorMemory>> {
    use cheshire_sdk::memory::FastEmbedder;

    Ok(Arc::new(InMemoryVectorMemory::new(
        Arc::new(FastEmbedder::new()),
        "all-MiniLM-L6-v2",
    )))
}

#[cfg(not(feature = "embeddings"))]
fn fastembed_memory() -> anyhow::Result<Arc<dyn VectorMemory>> {
    anyhow::bail!("the fastembed embedder requires the `embeddings` feature")
}
