//! Vector Memory
//!
//! Long-term memory consumed through the [`VectorMemory`] trait: named
//! collections of embedded points searched by cosine similarity. The host
//! only needs embed/search/upsert/delete/scroll, so any vector database can
//! sit behind it. [`InMemoryVectorMemory`] keeps everything in process.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::embeddings::{Embedder, cosine_similarity};
use crate::{SDKError, SDKResult};

/// Collections every vector memory starts with
pub const DEFAULT_COLLECTIONS: [&str; 3] = ["episodic", "declarative", "procedural"];

/// Metadata filter: every key must be present with an equal value
pub type MetadataFilter = Map<String, Value>;

/// A stored memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPoint {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl MemoryPoint {
    fn matches(&self, filter: Option<&MetadataFilter>) -> bool {
        filter.is_none_or(|filter| {
            filter
                .iter()
                .all(|(key, value)| self.metadata.get(key) == Some(value))
        })
    }
}

/// A memory returned by similarity search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPoint {
    #[serde(flatten)]
    pub point: MemoryPoint,
    pub score: f32,
}

/// Collection summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub vectors_count: usize,
}

/// Long-term vector memory
#[async_trait]
pub trait VectorMemory: Send + Sync {
    /// Embed a text with the memory's embedder
    async fn embed(&self, text: &str) -> SDKResult<Vec<f32>>;

    /// Name of the embedder in use
    fn embedder_name(&self) -> String;

    /// Existing collections
    async fn collections(&self) -> Vec<CollectionInfo>;

    /// Up to `k` points closest to `vector`, best first
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> SDKResult<Vec<ScoredPoint>>;

    /// Store a point, returning it with its assigned id
    async fn upsert(
        &self,
        collection: &str,
        content: String,
        vector: Vec<f32>,
        metadata: Map<String, Value>,
    ) -> SDKResult<MemoryPoint>;

    /// Delete points by id; returns how many existed
    async fn delete(&self, collection: &str, ids: &[String]) -> SDKResult<usize>;

    /// Points matching `filter`, oldest first
    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&MetadataFilter>,
        limit: usize,
    ) -> SDKResult<Vec<MemoryPoint>>;

    /// Delete every point matching `filter`; returns how many were removed
    async fn delete_by_filter(&self, collection: &str, filter: &MetadataFilter) -> SDKResult<usize>;

    /// Merge `update` into the metadata of every point matching `filter`.
    ///
    /// Returns the updated points.
    async fn update_metadata(
        &self,
        collection: &str,
        filter: &MetadataFilter,
        update: Map<String, Value>,
    ) -> SDKResult<Vec<MemoryPoint>>;

    /// Remove every point of a collection; returns how many were removed
    async fn wipe(&self, collection: &str) -> SDKResult<usize>;
}

/// Vector memory held in process
pub struct InMemoryVectorMemory {
    embedder: Arc<dyn Embedder>,
    embedder_name: String,
    collections: RwLock<BTreeMap<String, Vec<MemoryPoint>>>,
}

impl InMemoryVectorMemory {
    /// Create a memory with the default collections
    pub fn new(embedder: Arc<dyn Embedder>, embedder_name: impl Into<String>) -> Self {
        let collections = DEFAULT_COLLECTIONS
            .iter()
            .map(|name| (name.to_string(), Vec::new()))
            .collect();

        Self {
            embedder,
            embedder_name: embedder_name.into(),
            collections: RwLock::new(collections),
        }
    }

    fn missing(collection: &str) -> SDKError {
        SDKError::not_found("Collection", collection)
    }
}

#[async_trait]
impl VectorMemory for InMemoryVectorMemory {
    async fn embed(&self, text: &str) -> SDKResult<Vec<f32>> {
        self.embedder.embed(text).await
    }

    fn embedder_name(&self) -> String {
        self.embedder_name.clone()
    }

    async fn collections(&self) -> Vec<CollectionInfo> {
        let collections = self.collections.read().await;
        collections
            .iter()
            .map(|(name, points)| CollectionInfo {
                name: name.clone(),
                vectors_count: points.len(),
            })
            .collect()
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> SDKResult<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let points = collections
            .get(collection)
            .ok_or_else(|| Self::missing(collection))?;

        let mut scored: Vec<ScoredPoint> = points
            .iter()
            .filter(|p| p.matches(filter))
            .map(|p| ScoredPoint {
                score: cosine_similarity(vector, &p.vector),
                point: p.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn upsert(
        &self,
        collection: &str,
        content: String,
        vector: Vec<f32>,
        metadata: Map<String, Value>,
    ) -> SDKResult<MemoryPoint> {
        let mut collections = self.collections.write().await;
        let points = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;

        let point = MemoryPoint {
            id: Uuid::new_v4().to_string(),
            content,
            metadata,
            vector,
            created_at: Utc::now(),
        };
        points.push(point.clone());
        Ok(point)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> SDKResult<usize> {
        let mut collections = self.collections.write().await;
        let points = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;

        let before = points.len();
        points.retain(|p| !ids.contains(&p.id));
        Ok(before - points.len())
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&MetadataFilter>,
        limit: usize,
    ) -> SDKResult<Vec<MemoryPoint>> {
        let collections = self.collections.read().await;
        let points = collections
            .get(collection)
            .ok_or_else(|| Self::missing(collection))?;

        Ok(points
            .iter()
            .filter(|p| p.matches(filter))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_by_filter(&self, collection: &str, filter: &MetadataFilter) -> SDKResult<usize> {
        let mut collections = self.collections.write().await;
        let points = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;

        let before = points.len();
        points.retain(|p| !p.matches(Some(filter)));
        Ok(before - points.len())
    }

    async fn update_metadata(
        &self,
        collection: &str,
        filter: &MetadataFilter,
        update: Map<String, Value>,
    ) -> SDKResult<Vec<MemoryPoint>> {
        let mut collections = self.collections.write().await;
        let points = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;

        let mut updated = Vec::new();
        for point in points.iter_mut().filter(|p| p.matches(Some(filter))) {
            point
                .metadata
                .extend(update.iter().map(|(k, v)| (k.clone(), v.clone())));
            updated.push(point.clone());
        }
        Ok(updated)
    }

    async fn wipe(&self, collection: &str) -> SDKResult<usize> {
        let mut collections = self.collections.write().await;
        let points = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;

        let removed = points.len();
        points.clear();
        Ok(removed)
    }
}
