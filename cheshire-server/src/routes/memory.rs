//! Memory management routes.
//!
//! Working memory of the request's conversation and the long-term vector
//! memory:
//! - GET/DELETE /memory/conversation - Inspect or reset the conversation
//! - GET /memory/working - Conversations held in working memory
//! - GET/DELETE /memory/working/{id} - One conversation
//! - GET /memory/recall - Similarity search across collections
//! - GET/DELETE /memory/collections - Collections and their sizes, or wipe all
//! - DELETE /memory/collections/{name} - Wipe a collection
//! - GET/POST/DELETE /memory/collections/{name}/points - Browse, store, or
//!   forget memories matching a metadata filter
//! - PATCH /memory/collections/{name}/points/metadata - Merge metadata into
//!   matching memories
//! - DELETE /memory/collections/{name}/points/{id} - Forget one memory
//!
//! Wiping the procedural collection re-embeds the available tools and forms.

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, patch},
    Extension, Json, Router,
};
use cheshire_sdk::memory::{
    CollectionInfo, MemoryPoint, MetadataFilter, PROCEDURAL_COLLECTION, ScoredPoint,
    VectorMemory, WorkingMemory,
};
use cheshire_sdk::memory::working::WorkingMemorySnapshot;
use cheshire_sdk::{EPISODIC_COLLECTION, SessionContext};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Collection filled from tool and form declarations; not writable over HTTP
const READ_ONLY_COLLECTION: &str = PROCEDURAL_COLLECTION;

const DEFAULT_RECALL_K: usize = 10;
const DEFAULT_SCROLL_LIMIT: usize = 100;

/// Create memory router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/memory/conversation",
            get(get_conversation).delete(reset_conversation),
        )
        .route("/memory/working", get(list_working_memories))
        .route(
            "/memory/working/{id}",
            get(get_working_memory).delete(delete_working_memory),
        )
        .route("/memory/recall", get(recall))
        .route(
            "/memory/collections",
            get(list_collections).delete(wipe_all_collections),
        )
        .route("/memory/collections/{name}", delete(wipe_collection))
        .route(
            "/memory/collections/{name}/points",
            get(list_points)
                .post(store_point)
                .delete(delete_points_by_metadata),
        )
        .route(
            "/memory/collections/{name}/points/metadata",
            patch(update_points_metadata),
        )
        .route(
            "/memory/collections/{name}/points/{id}",
            delete(delete_point),
        )
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RecallQuery {
    pub text: String,
    pub k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecallResponse {
    pub query: String,
    pub embedder: String,
    pub collections: BTreeMap<String, Vec<ScoredPoint>>,
}

#[derive(Debug, Deserialize)]
pub struct StorePointRequest {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ScrollQuery {
    pub limit: Option<usize>,
    /// JSON object every returned point's metadata must contain
    pub metadata: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMetadataRequest {
    pub search: MetadataFilter,
    pub update: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct MatchedPoint {
    pub id: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct UpdateMetadataResponse {
    pub matched_points: Vec<MatchedPoint>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct WipeAllResponse {
    pub success: bool,
    pub deleted: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct CollectionListResponse {
    pub collections: Vec<CollectionInfo>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct WorkingMemoryListResponse {
    pub conversations: Vec<String>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub success: bool,
    pub deleted: usize,
}

// ============================================================================
// Route Handlers
// ============================================================================

fn vectors(state: &AppState) -> ApiResult<Arc<dyn VectorMemory>> {
    state
        .host
        .vectors()
        .cloned()
        .ok_or_else(|| ApiError::Unavailable("vector memory is disabled".into()))
}

fn ensure_writable(collection: &str) -> ApiResult<()> {
    if collection == READ_ONLY_COLLECTION {
        return Err(ApiError::BadRequest(format!(
            "collection '{}' is read-only",
            collection
        )));
    }
    Ok(())
}

fn ensure_filter(filter: &MetadataFilter) -> ApiResult<()> {
    if filter.is_empty() {
        return Err(ApiError::BadRequest(
            "metadata filter must not be empty".into(),
        ));
    }
    Ok(())
}

/// Re-embed procedures after the procedural collection was emptied
async fn refresh_procedures(state: &AppState) {
    if let Err(e) = state.host.extensions().refresh_procedural_memory().await {
        warn!("Cannot refresh procedural memory: {}", e);
    }
}

async fn snapshot(state: &AppState, conversation_id: &str) -> Option<WorkingMemorySnapshot> {
    let memory = state.host.memory().existing(conversation_id).await?;
    let memory = memory.lock().await;
    Some(memory.snapshot())
}

/// Working memory of the request's conversation (empty when never used)
async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
) -> Json<WorkingMemorySnapshot> {
    let snapshot = match snapshot(&state, &session.conversation_id).await {
        Some(snapshot) => snapshot,
        None => WorkingMemory::new(
            session.conversation_id.clone(),
            state.host.config().memory.max_history,
        )
        .snapshot(),
    };
    Json(snapshot)
}

async fn reset_conversation(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
) -> Json<Value> {
    let deleted = state
        .host
        .reset_conversation(&session.conversation_id)
        .await;
    info!(conversation_id = %session.conversation_id, "Conversation reset");
    Json(json!({ "success": true, "deleted": deleted }))
}

async fn list_working_memories(
    State(state): State<Arc<AppState>>,
) -> Json<WorkingMemoryListResponse> {
    let mut conversations = state.host.memory().ids().await;
    conversations.sort();
    let total = conversations.len();
    Json(WorkingMemoryListResponse {
        conversations,
        total,
    })
}

async fn get_working_memory(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkingMemorySnapshot>> {
    snapshot(&state, &id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Conversation not found: {}", id)))
}

async fn delete_working_memory(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.host.reset_conversation(&id).await {
        return Err(ApiError::NotFound(format!("Conversation not found: {}", id)));
    }
    Ok(Json(json!({ "success": true })))
}

/// Recall memories similar to `text` from every collection.
///
/// Episodic memories are restricted to the requesting user's.
async fn recall(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Query(query): Query<RecallQuery>,
) -> ApiResult<Json<RecallResponse>> {
    let vectors = vectors(&state)?;
    let k = query.k.unwrap_or(DEFAULT_RECALL_K);
    let vector = vectors.embed(&query.text).await?;

    let mut user_filter = MetadataFilter::new();
    if let Some(user_id) = &session.user_id {
        user_filter.insert("source".into(), json!(user_id));
    }

    let mut collections = BTreeMap::new();
    for collection in vectors.collections().await {
        let filter = (collection.name == EPISODIC_COLLECTION && !user_filter.is_empty())
            .then_some(&user_filter);
        let points = vectors.search(&collection.name, &vector, k, filter).await?;
        collections.insert(collection.name, points);
    }

    Ok(Json(RecallResponse {
        query: query.text,
        embedder: vectors.embedder_name(),
        collections,
    }))
}

async fn list_collections(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<CollectionListResponse>> {
    let collections = vectors(&state)?.collections().await;
    let total = collections.len();
    Ok(Json(CollectionListResponse { collections, total }))
}

async fn wipe_all_collections(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<WipeAllResponse>> {
    let vectors = vectors(&state)?;
    let mut deleted = BTreeMap::new();
    for collection in vectors.collections().await {
        let removed = vectors.wipe(&collection.name).await?;
        deleted.insert(collection.name, removed);
    }
    info!(collections = deleted.len(), "All collections wiped");

    refresh_procedures(&state).await;
    Ok(Json(WipeAllResponse {
        success: true,
        deleted,
    }))
}

async fn wipe_collection(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<DeletedResponse>> {
    let deleted = vectors(&state)?.wipe(&name).await?;
    info!(collection = %name, deleted, "Collection wiped");

    if name == PROCEDURAL_COLLECTION {
        refresh_procedures(&state).await;
    }
    Ok(Json(DeletedResponse {
        success: true,
        deleted,
    }))
}

async fn list_points(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<ScrollQuery>,
) -> ApiResult<Json<Vec<MemoryPoint>>> {
    let limit = query.limit.unwrap_or(DEFAULT_SCROLL_LIMIT);
    let filter = query
        .metadata
        .as_deref()
        .map(serde_json::from_str::<MetadataFilter>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("invalid metadata filter: {}", e)))?;

    let points = vectors(&state)?
        .scroll(&name, filter.as_ref(), limit)
        .await?;
    Ok(Json(points))
}

async fn delete_points_by_metadata(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(filter): Json<MetadataFilter>,
) -> ApiResult<Json<DeletedResponse>> {
    ensure_writable(&name)?;
    ensure_filter(&filter)?;

    let deleted = vectors(&state)?.delete_by_filter(&name, &filter).await?;
    info!(collection = %name, deleted, "Memories deleted by metadata");
    Ok(Json(DeletedResponse {
        success: true,
        deleted,
    }))
}

async fn update_points_metadata(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<UpdateMetadataRequest>,
) -> ApiResult<Json<UpdateMetadataResponse>> {
    ensure_writable(&name)?;
    ensure_filter(&request.search)?;

    let updated = vectors(&state)?
        .update_metadata(&name, &request.search, request.update)
        .await?;
    let matched_points: Vec<MatchedPoint> = updated
        .into_iter()
        .map(|p| MatchedPoint {
            id: p.id,
            metadata: p.metadata,
        })
        .collect();
    info!(collection = %name, count = matched_points.len(), "Memory metadata updated");

    Ok(Json(UpdateMetadataResponse {
        count: matched_points.len(),
        matched_points,
    }))
}

async fn store_point(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Path(name): Path<String>,
    Json(request): Json<StorePointRequest>,
) -> ApiResult<Json<MemoryPoint>> {
    ensure_writable(&name)?;
    if request.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".into()));
    }

    let vectors = vectors(&state)?;
    let mut metadata = request.metadata;
    metadata
        .entry("source")
        .or_insert_with(|| json!(session.user_id.as_deref().unwrap_or("user")));

    let vector = vectors.embed(&request.content).await?;
    let point = vectors
        .upsert(&name, request.content, vector, metadata)
        .await?;
    Ok(Json(point))
}

async fn delete_point(
    State(state): State<Arc<AppState>>,
    Path((name, id)): Path<(String, String)>,
) -> ApiResult<Json<DeletedResponse>> {
    ensure_writable(&name)?;
    let deleted = vectors(&state)?.delete(&name, &[id.clone()]).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound(format!("Memory not found: {}", id)));
    }
    Ok(Json(DeletedResponse {
        success: true,
        deleted,
    }))
}
