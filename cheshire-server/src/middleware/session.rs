//! Session middleware.
//!
//! The host never authenticates. A deployment in front of the server is
//! expected to set the identity headers; this layer only turns them into a
//! [`SessionContext`] request extension.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

/// Conversation the request belongs to
pub const CONVERSATION_HEADER: &str = "x-conversation-id";

/// User the request is made for
pub const USER_HEADER: &str = "x-user-id";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, ApiError> {
    match headers.get(name) {
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim()))
            .map_err(|_| ApiError::BadRequest(format!("invalid {} header", name))),
        None => Ok(None),
    }
}

/// Attach the request's session to its extensions
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let session = {
        let headers = request.headers();
        state.session(
            header(headers, CONVERSATION_HEADER)?,
            header(headers, USER_HEADER)?,
        )
    };

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}
