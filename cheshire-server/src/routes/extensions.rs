//! Extension management routes.
//!
//! - GET /extensions - List every extension in the catalog
//! - GET /extensions/{id} - Extension details
//! - POST /extensions/{id}/enable - Persist enabled and load
//! - POST /extensions/{id}/disable - Persist disabled and unload
//! - POST /extensions/{id}/reload - Unload and load again

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use cheshire_sdk::extensions::{ExtensionInfo, ExtensionState};
use cheshire_sdk::SDKResult;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Create extensions router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/extensions", get(list_extensions))
        .route("/extensions/{id}", get(get_extension))
        .route("/extensions/{id}/enable", post(enable_extension))
        .route("/extensions/{id}/disable", post(disable_extension))
        .route("/extensions/{id}/reload", post(reload_extension))
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ExtensionListResponse {
    pub extensions: Vec<ExtensionInfo>,
    pub total: usize,
}

/// Outcome of a lifecycle action
#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    pub success: bool,
    pub id: String,
    pub state: ExtensionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn list_extensions(State(state): State<Arc<AppState>>) -> Json<ExtensionListResponse> {
    let extensions = state.host.extensions().list().await;
    let total = extensions.len();
    Json(ExtensionListResponse { extensions, total })
}

async fn get_extension(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExtensionInfo>> {
    state
        .host
        .extensions()
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Extension not found: {}", id)))
}

/// Report the extension's state after an action.
///
/// A load failure is recorded on the extension; it is reported with the
/// failed state rather than as a request error.
async fn lifecycle_response(
    state: &AppState,
    id: String,
    result: SDKResult<()>,
) -> ApiResult<Json<LifecycleResponse>> {
    let error = match result {
        Ok(()) => None,
        Err(e) if e.is_not_found() => return Err(e.into()),
        Err(e) => Some(e.to_string()),
    };

    let info = state
        .host
        .extensions()
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Extension not found: {}", id)))?;

    if let Some(error) = &error {
        warn!(extension = %id, "Extension action failed: {}", error);
    }

    Ok(Json(LifecycleResponse {
        success: error.is_none(),
        id,
        state: info.state,
        error,
    }))
}

async fn enable_extension(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<LifecycleResponse>> {
    info!(extension = %id, "Enable requested");
    let result = state.host.extensions().enable(&id).await;
    lifecycle_response(&state, id, result).await
}

async fn disable_extension(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<LifecycleResponse>> {
    info!(extension = %id, "Disable requested");
    state.host.extensions().disable(&id).await?;
    lifecycle_response(&state, id, Ok(())).await
}

async fn reload_extension(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<LifecycleResponse>> {
    info!(extension = %id, "Reload requested");
    let result = state.host.extensions().reload(&id).await;
    lifecycle_response(&state, id, result).await
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{app, send, test_state};
    use axum::http::StatusCode;
    use cheshire_sdk::extensions::builders::SDK;
    use cheshire_sdk::extensions::FnPlugin;
    use serde_json::json;
    use std::sync::Arc;

    fn clock() -> Arc<dyn cheshire_sdk::Plugin> {
        SDK::plugin("clock")
            .tool(
                SDK::tool("clock")
                    .example("what time")
                    .return_direct()
                    .handler(|_| async { Ok::<_, anyhow::Error>("It is noon".to_string()) }),
            )
            .build()
    }

    async fn ask(state: &Arc<crate::state::AppState>, text: &str) -> serde_json::Value {
        let (_, body) = send(
            app(state),
            "POST",
            "/message",
            Some(json!({ "text": text })),
            None,
            None,
        )
        .await;
        body["output"].clone()
    }

    #[tokio::test]
    async fn test_list_and_get() {
        let state = test_state(vec![clock()]).await;

        let (status, body) = send(app(&state), "GET", "/extensions", None, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["extensions"][0]["manifest"]["id"], "core");

        let (status, body) = send(app(&state), "GET", "/extensions/clock", None, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "active");

        let (status, _) = send(app(&state), "GET", "/extensions/nope", None, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_disable_and_enable_toggle_tools() {
        let state = test_state(vec![clock()]).await;
        assert_eq!(ask(&state, "what time is it").await, "It is noon");

        let (status, body) = send(
            app(&state),
            "POST",
            "/extensions/clock/disable",
            None,
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "disabled");
        assert_eq!(ask(&state, "what time is it").await, "You said: what time is it");

        let (_, body) = send(
            app(&state),
            "POST",
            "/extensions/clock/enable",
            None,
            None,
            None,
        )
        .await;
        assert_eq!(body["success"], true);
        assert_eq!(body["state"], "active");
        assert_eq!(ask(&state, "what time is it").await, "It is noon");
    }

    #[tokio::test]
    async fn test_core_cannot_be_disabled() {
        let state = test_state(vec![]).await;

        let (status, body) = send(
            app(&state),
            "POST",
            "/extensions/core/disable",
            None,
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = send(
            app(&state),
            "POST",
            "/extensions/ghost/enable",
            None,
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_failed_reload_reports_failed_state() {
        let flaky: Arc<dyn cheshire_sdk::Plugin> =
            Arc::new(FnPlugin::new("flaky", |_settings: &serde_json::Value| {
                anyhow::bail!("missing api key")
            }));
        let state = test_state(vec![flaky]).await;

        let (_, body) = send(app(&state), "GET", "/extensions/flaky", None, None, None).await;
        assert_eq!(body["state"], "failed");

        let (status, body) = send(
            app(&state),
            "POST",
            "/extensions/flaky/reload",
            None,
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["state"], "failed");
        assert!(body["error"].as_str().unwrap().contains("missing api key"));
    }
}
