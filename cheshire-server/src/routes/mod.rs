//! API route modules.

pub mod custom;
pub mod extensions;
pub mod health;
pub mod memory;
pub mod message;
pub mod openapi;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::session_middleware;
use crate::state::AppState;

/// Create the main router with all routes.
///
/// Paths not matched here are dispatched to the live extension route table.
pub fn create_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/openapi.json", get(openapi::openapi_schema));

    let session_routes = Router::new()
        .merge(message::router())
        .merge(memory::router())
        .merge(extensions::router())
        .fallback(custom::dispatch)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
