//! Conversation turn route.
//!
//! - POST /message - Run one turn in the request's conversation

use axum::{extract::State, routing::post, Extension, Json, Router};
use cheshire_sdk::{AgentOutput, SessionContext};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Create message router
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/message", post(send_message))
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub conversation_id: String,
    #[serde(flatten)]
    pub output: AgentOutput,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Json(request): Json<MessageRequest>,
) -> ApiResult<Json<MessageResponse>> {
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".into()));
    }

    debug!(conversation_id = %session.conversation_id, "Turn received");
    let output = state.host.handle_turn(&session, &request.text).await;

    Ok(Json(MessageResponse {
        conversation_id: session.conversation_id,
        output,
    }))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{app, send, test_state};
    use axum::http::StatusCode;
    use cheshire_sdk::extensions::builders::SDK;
    use serde_json::json;

    #[tokio::test]
    async fn test_message_runs_a_turn() {
        let state = test_state(vec![]).await;

        let (status, body) = send(
            app(&state),
            "POST",
            "/message",
            Some(json!({"text": "hello"})),
            Some("c1"),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversationId"], "c1");
        assert_eq!(body["output"], "You said: hello");
        assert_eq!(body["return_direct"], false);
        assert!(state.host.memory().contains("c1").await);
    }

    #[tokio::test]
    async fn test_message_without_header_uses_default_conversation() {
        let state = test_state(vec![]).await;

        let (status, body) = send(
            app(&state),
            "POST",
            "/message",
            Some(json!({"text": "hi"})),
            None,
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversationId"], "default");
    }

    #[tokio::test]
    async fn test_message_drives_a_form() {
        let pizza = SDK::plugin("pizza")
            .form(
                SDK::form("order_pizza")
                    .slot("topping", "")
                    .no_confirm()
                    .start_example("order a pizza")
                    .build(),
            )
            .build();
        let state = test_state(vec![pizza]).await;

        let (_, body) = send(
            app(&state),
            "POST",
            "/message",
            Some(json!({"text": "I want to order a pizza"})),
            Some("p1"),
            None,
        )
        .await;
        assert_eq!(body["return_direct"], true);
        assert!(body["output"].as_str().unwrap().contains("topping"));

        let (_, body) = send(
            app(&state),
            "POST",
            "/message",
            Some(json!({"text": "mushrooms"})),
            Some("p1"),
            None,
        )
        .await;
        assert_eq!(body["return_direct"], true);
        assert!(body["output"].as_str().unwrap().contains("topping: mushrooms"));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let state = test_state(vec![]).await;

        let (status, body) = send(
            app(&state),
            "POST",
            "/message",
            Some(json!({"text": "  "})),
            None,
            None,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}
