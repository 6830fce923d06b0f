//! Health check endpoint.

use axum::{extract::State, Json};
use cheshire_sdk::extensions::{ExtensionState, RouteTable};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: HealthComponents,
    pub metrics: HealthMetrics,
}

#[derive(Serialize)]
pub struct HealthComponents {
    pub vector_memory: bool,
    pub embedder: Option<String>,
}

#[derive(Serialize)]
pub struct HealthMetrics {
    pub active_extensions: usize,
    pub failed_extensions: usize,
    pub conversations: usize,
    pub custom_routes: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let extensions = state.host.extensions().list().await;
    let active_extensions = extensions.iter().filter(|e| e.is_active()).count();
    let failed_extensions = extensions
        .iter()
        .filter(|e| e.state == ExtensionState::Failed)
        .count();

    let conversations = state.host.memory().len().await;
    let custom_routes = state.route_table.routes().await.len();
    let embedder = state.host.vectors().map(|v| v.embedder_name());

    // A failed extension degrades the host but never stops it
    let status = if failed_extensions == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: HealthComponents {
            vector_memory: embedder.is_some(),
            embedder,
        },
        metrics: HealthMetrics {
            active_extensions,
            failed_extensions,
            conversations,
            custom_routes,
        },
    })
}
