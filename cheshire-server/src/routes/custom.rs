//! Extension routes.
//!
//! Requests that match no core route are looked up in the live route table,
//! so endpoints attached by an extension are served without rebuilding the
//! router.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{Method, Uri},
    Extension, Json,
};
use cheshire_sdk::extensions::{EndpointRequest, HttpMethod, RouteMatch};
use cheshire_sdk::{SDKError, SessionContext};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Fallback handler dispatching to extension endpoints
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let path = uri.path().to_string();
    let method = HttpMethod::parse(method.as_str())
        .ok_or_else(|| ApiError::MethodNotAllowed(format!("{} {}", method, path)))?;

    let (handler, params) = match state.route_table.lookup(&path, method).await {
        RouteMatch::Found { handler, params } => (handler, params),
        RouteMatch::MethodNotAllowed => {
            return Err(ApiError::MethodNotAllowed(format!("{} {}", method, path)));
        }
        RouteMatch::NotFound => {
            return Err(ApiError::NotFound(format!("No route for {}", path)));
        }
    };

    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))?
    };

    let request = EndpointRequest {
        method,
        path: path.clone(),
        params,
        query,
        body,
        session,
    };

    let limit = state.host.config().hooks.handler_timeout();
    match tokio::time::timeout(limit, handler(request)).await {
        Ok(Ok(reply)) => Ok(Json(reply)),
        Ok(Err(e)) => {
            warn!(path = %path, "Extension endpoint failed: {:#}", e);
            Err(ApiError::Internal(e))
        }
        Err(_) => {
            warn!(path = %path, timeout_ms = limit.as_millis() as u64, "Extension endpoint timed out");
            Err(SDKError::timeout(limit.as_millis() as u64).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{app, send, test_state, test_state_with};
    use cheshire_sdk::{HookConfig, SDKConfig};
    use axum::http::StatusCode;
    use cheshire_sdk::extensions::builders::SDK;
    use cheshire_sdk::extensions::endpoints::{CustomEndpoint, EndpointBuilder, HttpMethod};
    use serde_json::json;

    fn greeter() -> std::sync::Arc<dyn cheshire_sdk::Plugin> {
        SDK::plugin("greeter")
            .endpoint(CustomEndpoint::get("/hello", |req| async move {
                let name = req.query.get("name").cloned().unwrap_or_default();
                Ok::<_, anyhow::Error>(json!({
                    "hello": name,
                    "user": req.session.user_id,
                    "conversation": req.session.conversation_id,
                }))
            }))
            .endpoint(
                EndpointBuilder::new("/echo")
                    .prefix("/greeter")
                    .method(HttpMethod::Post)
                    .method(HttpMethod::Put)
                    .handler(|req| async move { Ok::<_, anyhow::Error>(req.body) }),
            )
            .endpoint(CustomEndpoint::get("/fail", |_| async {
                Err::<serde_json::Value, _>(anyhow::anyhow!("teapot exploded"))
            }))
            .endpoint(CustomEndpoint::get("/guests/{name}/cups", |req| async move {
                Ok::<_, anyhow::Error>(json!({"guest": req.params.get("name")}))
            }))
            .endpoint(CustomEndpoint::get("/slow", |_| async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok::<_, anyhow::Error>(json!("too late"))
            }))
            .build()
    }

    #[tokio::test]
    async fn test_extension_route_served_with_session() {
        let state = test_state(vec![greeter()]).await;

        let (status, body) = send(
            app(&state),
            "GET",
            "/custom/hello?name=alice",
            None,
            Some("tea-party"),
            Some("hatter"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"hello": "alice", "user": "hatter", "conversation": "tea-party"})
        );
    }

    #[tokio::test]
    async fn test_custom_prefix_and_methods() {
        let state = test_state(vec![greeter()]).await;

        let (status, body) = send(
            app(&state),
            "PUT",
            "/greeter/echo",
            Some(json!({"cake": "eat me"})),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"cake": "eat me"}));

        let (status, _) = send(app(&state), "GET", "/greeter/echo", None, None, None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_unknown_path_and_failing_handler() {
        let state = test_state(vec![greeter()]).await;

        let (status, body) = send(app(&state), "GET", "/custom/nowhere", None, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = send(app(&state), "GET", "/custom/fail", None, None, None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_routes_follow_extension_lifecycle() {
        let state = test_state(vec![greeter()]).await;

        state.host.extensions().disable("greeter").await.unwrap();
        let (status, _) = send(app(&state), "GET", "/custom/hello", None, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        state.host.extensions().enable("greeter").await.unwrap();
        let (status, _) = send(app(&state), "GET", "/custom/hello", None, None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_path_template_params_reach_handler() {
        let state = test_state(vec![greeter()]).await;

        let (status, body) = send(app(&state), "GET", "/custom/guests/dormouse/cups", None, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"guest": "dormouse"}));

        let (status, _) = send(app(&state), "GET", "/custom/guests/dormouse", None, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let config = SDKConfig {
            hooks: HookConfig {
                handler_timeout_ms: 20,
            },
            ..Default::default()
        };
        let state = test_state_with(config, vec![greeter()]).await;

        let (status, body) = send(app(&state), "GET", "/custom/slow", None, None, None).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["success"], false);
    }
}
