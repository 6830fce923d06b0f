//! API schema.
//!
//! The schema lists the core routes and every extension route currently
//! attached. It is cached in the route table and rebuilt after an extension
//! route is attached or detached.

use axum::{extract::State, Json};
use cheshire_sdk::extensions::endpoints::RouteInfo;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::state::AppState;

/// Core routes as (path, methods, tag)
const CORE_ROUTES: &[(&str, &[&str], &str)] = &[
    ("/health", &["GET"], "Status"),
    ("/message", &["POST"], "Conversation"),
    ("/memory/conversation", &["GET", "DELETE"], "Memory"),
    ("/memory/working", &["GET"], "Memory"),
    ("/memory/working/{id}", &["GET", "DELETE"], "Memory"),
    ("/memory/recall", &["GET"], "Memory"),
    ("/memory/collections", &["GET", "DELETE"], "Memory"),
    ("/memory/collections/{name}", &["DELETE"], "Memory"),
    ("/memory/collections/{name}/points", &["GET", "POST", "DELETE"], "Memory"),
    ("/memory/collections/{name}/points/metadata", &["PATCH"], "Memory"),
    ("/memory/collections/{name}/points/{id}", &["DELETE"], "Memory"),
    ("/extensions", &["GET"], "Extensions"),
    ("/extensions/{id}", &["GET"], "Extensions"),
    ("/extensions/{id}/enable", &["POST"], "Extensions"),
    ("/extensions/{id}/disable", &["POST"], "Extensions"),
    ("/extensions/{id}/reload", &["POST"], "Extensions"),
];

fn operation(tag: &str) -> Value {
    json!({
        "tags": [tag],
        "responses": { "200": { "description": "Successful Response" } }
    })
}

/// Build the OpenAPI document for the core routes plus `custom`
pub fn build_schema(custom: &[RouteInfo]) -> Value {
    let mut paths = Map::new();

    for (path, methods, tag) in CORE_ROUTES {
        let item: Map<String, Value> = methods
            .iter()
            .map(|m| (m.to_lowercase(), operation(tag)))
            .collect();
        paths.insert(path.to_string(), Value::Object(item));
    }

    for route in custom {
        let tag = route
            .tags
            .first()
            .map(String::as_str)
            .unwrap_or(cheshire_sdk::extensions::endpoints::DEFAULT_TAG);
        let item: Map<String, Value> = route
            .methods
            .iter()
            .map(|m| (m.as_str().to_lowercase(), operation(tag)))
            .collect();
        paths.insert(route.path.clone(), Value::Object(item));
    }

    json!({
        "openapi": "3.1.0",
        "info": {
            "title": "Cheshire",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": paths,
    })
}

/// Serve the cached schema, rebuilding it when invalidated
pub async fn openapi_schema(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.route_table.schema_or_build(build_schema).await)
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{app, send, test_state};
    use axum::http::StatusCode;
    use cheshire_sdk::extensions::builders::SDK;
    use cheshire_sdk::extensions::endpoints::CustomEndpoint;
    use serde_json::json;

    #[tokio::test]
    async fn test_schema_follows_extension_routes() {
        let greeter = SDK::plugin("greeter")
            .endpoint(CustomEndpoint::get("/hello", |_| async {
                Ok::<_, anyhow::Error>(json!("hi"))
            }))
            .build();
        let state = test_state(vec![greeter]).await;

        let (status, schema) = send(app(&state), "GET", "/openapi.json", None, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(schema["paths"]["/message"]["post"].is_object());
        assert_eq!(
            schema["paths"]["/custom/hello"]["get"]["tags"],
            json!(["Custom Endpoints"])
        );
        assert!(state.route_table.has_cached_schema().await);

        state.host.extensions().disable("greeter").await.unwrap();
        assert!(!state.route_table.has_cached_schema().await);

        let (_, schema) = send(app(&state), "GET", "/openapi.json", None, None, None).await;
        assert!(schema["paths"]["/custom/hello"].is_null());
    }
}
