//! Endpoint Activator
//!
//! Extensions may contribute HTTP routes. Routes live in a [`RouteTable`]
//! owned by the server; the activator attaches and detaches them while the
//! server keeps serving.
//!
//! Attach and detach are serialized through a single mutex. Activating an
//! endpoint whose path is already served is a no-op, and a failed attach
//! leaves the table as it was. Every change invalidates the cached API
//! schema.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::session::SessionContext;
use crate::{SDKError, SDKResult};

/// Prefix applied when an endpoint does not name one
pub const DEFAULT_PREFIX: &str = "/custom";

/// Tag applied when an endpoint does not name any
pub const DEFAULT_TAG: &str = "Custom Endpoints";

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint Types
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP method an endpoint answers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Parse a method name, case-insensitively
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request handed to an extension endpoint
#[derive(Debug, Clone)]
pub struct EndpointRequest {
    pub method: HttpMethod,
    pub path: String,
    /// Values captured by `{name}` segments of the route path
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: serde_json::Value,
    pub session: SessionContext,
}

/// Future returned by an endpoint handler
pub type EndpointFuture =
    Pin<Box<dyn Future<Output = anyhow::Result<serde_json::Value>> + Send>>;

/// Endpoint handler; the returned JSON becomes the response body.
pub type EndpointHandler = Arc<dyn Fn(EndpointRequest) -> EndpointFuture + Send + Sync>;

/// An HTTP route contributed by an extension.
#[derive(Clone)]
pub struct CustomEndpoint {
    pub prefix: String,
    pub path: String,
    pub methods: Vec<HttpMethod>,
    pub tags: Vec<String>,
    pub handler: EndpointHandler,
}

impl CustomEndpoint {
    /// GET endpoint under the default prefix
    pub fn get<F, Fut>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(EndpointRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        EndpointBuilder::new(path).method(HttpMethod::Get).handler(handler)
    }

    /// POST endpoint under the default prefix
    pub fn post<F, Fut>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(EndpointRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        EndpointBuilder::new(path).method(HttpMethod::Post).handler(handler)
    }

    /// Full route path (prefix + path); unique among active endpoints.
    pub fn name(&self) -> String {
        format!("{}{}", self.prefix, self.path)
    }
}

impl fmt::Debug for CustomEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomEndpoint")
            .field("name", &self.name())
            .field("methods", &self.methods)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Builder for endpoints with a custom prefix, tags, or several methods
#[derive(Debug, Clone)]
pub struct EndpointBuilder {
    prefix: String,
    path: String,
    methods: Vec<HttpMethod>,
    tags: Vec<String>,
}

impl EndpointBuilder {
    /// Start an endpoint for `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            path: path.into(),
            methods: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Override the prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Add an accepted method
    pub fn method(mut self, method: HttpMethod) -> Self {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    /// Add a tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Finish with the handler
    pub fn handler<F, Fut>(self, handler: F) -> CustomEndpoint
    where
        F: Fn(EndpointRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        let handler: EndpointHandler =
            Arc::new(move |req| Box::pin(handler(req)) as EndpointFuture);
        CustomEndpoint {
            prefix: self.prefix,
            path: self.path,
            methods: if self.methods.is_empty() {
                vec![HttpMethod::Get]
            } else {
                self.methods
            },
            tags: if self.tags.is_empty() {
                vec![DEFAULT_TAG.to_string()]
            } else {
                self.tags
            },
            handler,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Route Table
// ─────────────────────────────────────────────────────────────────────────────

/// Route to be attached to a route table
#[derive(Clone)]
pub struct RouteSpec {
    pub path: String,
    pub methods: Vec<HttpMethod>,
    pub tags: Vec<String>,
    pub handler: EndpointHandler,
}

impl From<&CustomEndpoint> for RouteSpec {
    fn from(endpoint: &CustomEndpoint) -> Self {
        Self {
            path: endpoint.name(),
            methods: endpoint.methods.clone(),
            tags: endpoint.tags.clone(),
            handler: endpoint.handler.clone(),
        }
    }
}

/// Handle to an attached route
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteRef {
    pub id: u64,
    pub path: String,
}

/// Public description of an attached route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteInfo {
    pub path: String,
    pub methods: Vec<HttpMethod>,
    pub tags: Vec<String>,
}

/// Result of looking up a request against the table
#[derive(Clone)]
pub enum RouteMatch {
    /// Handler plus the values captured by the path template
    Found {
        handler: EndpointHandler,
        params: HashMap<String, String>,
    },
    MethodNotAllowed,
    NotFound,
}

/// Live table of extension routes served by the host
#[async_trait]
pub trait RouteTable: Send + Sync {
    /// Attach a route
    async fn add_route(&self, spec: RouteSpec) -> SDKResult<RouteRef>;

    /// Detach a previously attached route
    async fn remove_route(&self, route: &RouteRef) -> SDKResult<()>;

    /// Drop the cached API schema so it is rebuilt on next request
    async fn invalidate_schema_cache(&self);

    /// Whether any route serves `path`
    async fn contains(&self, path: &str) -> bool;

    /// Routes currently attached
    async fn routes(&self) -> Vec<RouteInfo>;
}

struct StoredRoute {
    id: u64,
    spec: RouteSpec,
}

/// Attached routes keyed by template, plus the matcher built from them
struct RouteIndex {
    by_path: BTreeMap<String, StoredRoute>,
    matcher: matchit::Router<String>,
}

impl RouteIndex {
    /// Matcher over the current templates plus `extra`
    fn build_matcher(&self, extra: Option<&str>) -> Result<matchit::Router<String>, String> {
        let mut matcher = matchit::Router::new();
        for path in self.by_path.keys().map(String::as_str).chain(extra) {
            matcher
                .insert(path, path.to_string())
                .map_err(|e| e.to_string())?;
        }
        Ok(matcher)
    }
}

/// In-memory route table; the server dispatches unmatched requests to it.
///
/// Paths are templates: `/items/{id}` serves `/items/42` with `id = "42"`,
/// and `/files/{*rest}` captures the remainder of the path.
pub struct InMemoryRouteTable {
    routes: RwLock<RouteIndex>,
    schema: RwLock<Option<serde_json::Value>>,
    /// Bumped on every change that makes a cached schema stale
    generation: AtomicU64,
    next_id: AtomicU64,
}

impl Default for InMemoryRouteTable {
    fn default() -> Self {
        Self {
            routes: RwLock::new(RouteIndex {
                by_path: BTreeMap::new(),
                matcher: matchit::Router::new(),
            }),
            schema: RwLock::new(None),
            generation: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryRouteTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the handler for a concrete request path
    pub async fn lookup(&self, path: &str, method: HttpMethod) -> RouteMatch {
        let routes = self.routes.read().await;
        let Ok(matched) = routes.matcher.at(path) else {
            return RouteMatch::NotFound;
        };

        match routes.by_path.get(matched.value.as_str()) {
            Some(route) if route.spec.methods.contains(&method) => RouteMatch::Found {
                handler: route.spec.handler.clone(),
                params: matched
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            },
            Some(_) => RouteMatch::MethodNotAllowed,
            None => RouteMatch::NotFound,
        }
    }

    /// Cached schema, built with `build` when missing.
    ///
    /// A schema built while the table changed underneath is returned but
    /// not cached.
    pub async fn schema_or_build<F>(&self, build: F) -> serde_json::Value
    where
        F: FnOnce(&[RouteInfo]) -> serde_json::Value,
    {
        if let Some(schema) = self.schema.read().await.clone() {
            return schema;
        }

        let (generation, routes) = {
            let routes = self.routes.read().await;
            (self.generation.load(Ordering::SeqCst), Self::describe(&routes))
        };
        let schema = build(&routes);

        let mut cached = self.schema.write().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            *cached = Some(schema.clone());
        }
        schema
    }

    /// Whether a schema is currently cached
    pub async fn has_cached_schema(&self) -> bool {
        self.schema.read().await.is_some()
    }

    fn describe(routes: &RouteIndex) -> Vec<RouteInfo> {
        routes
            .by_path
            .values()
            .map(|r| RouteInfo {
                path: r.spec.path.clone(),
                methods: r.spec.methods.clone(),
                tags: r.spec.tags.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl RouteTable for InMemoryRouteTable {
    async fn add_route(&self, spec: RouteSpec) -> SDKResult<RouteRef> {
        if !spec.path.starts_with('/') {
            return Err(SDKError::activation(
                spec.path.clone(),
                "route path must start with '/'",
            ));
        }
        if spec.methods.is_empty() {
            return Err(SDKError::activation(spec.path.clone(), "route has no methods"));
        }

        let mut routes = self.routes.write().await;
        if routes.by_path.contains_key(&spec.path) {
            return Err(SDKError::activation(spec.path.clone(), "path already routed"));
        }
        let matcher = routes
            .build_matcher(Some(&spec.path))
            .map_err(|e| SDKError::activation(spec.path.clone(), e))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let path = spec.path.clone();
        routes.by_path.insert(path.clone(), StoredRoute { id, spec });
        routes.matcher = matcher;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(RouteRef { id, path })
    }

    async fn remove_route(&self, route: &RouteRef) -> SDKResult<()> {
        let mut routes = self.routes.write().await;
        match routes.by_path.get(&route.path) {
            Some(stored) if stored.id == route.id => {}
            _ => return Err(SDKError::not_found("Route", route.path.clone())),
        }

        let removed = routes.by_path.remove(&route.path);
        match routes.build_matcher(None) {
            Ok(matcher) => routes.matcher = matcher,
            Err(e) => {
                if let Some(stored) = removed {
                    routes.by_path.insert(route.path.clone(), stored);
                }
                return Err(SDKError::activation(route.path.clone(), e));
            }
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn invalidate_schema_cache(&self) {
        let mut cached = self.schema.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        *cached = None;
    }

    async fn contains(&self, path: &str) -> bool {
        self.routes.read().await.by_path.contains_key(path)
    }

    async fn routes(&self) -> Vec<RouteInfo> {
        Self::describe(&*self.routes.read().await)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Activator
// ─────────────────────────────────────────────────────────────────────────────

struct ActiveEndpoint {
    source: String,
    route: RouteRef,
}

/// Attaches and detaches extension endpoints on a live route table.
pub struct EndpointActivator {
    table: Arc<dyn RouteTable>,
    active: Mutex<HashMap<String, ActiveEndpoint>>,
}

impl EndpointActivator {
    /// Create an activator over `table`
    pub fn new(table: Arc<dyn RouteTable>) -> Self {
        Self {
            table,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying route table
    pub fn table(&self) -> Arc<dyn RouteTable> {
        self.table.clone()
    }

    /// Attach `endpoint` on behalf of `source`.
    ///
    /// Returns `Ok(false)` when the path is already active or served.
    pub async fn activate(&self, endpoint: &CustomEndpoint, source: &str) -> SDKResult<bool> {
        let name = endpoint.name();
        let mut active = self.active.lock().await;

        if active.contains_key(&name) || self.table.contains(&name).await {
            tracing::debug!(endpoint = %name, source, "Endpoint already active");
            return Ok(false);
        }

        let route = self
            .table
            .add_route(RouteSpec::from(endpoint))
            .await
            .map_err(|e| match e {
                SDKError::Activation { .. } => e,
                other => SDKError::activation(name.clone(), other.to_string()),
            })?;

        self.table.invalidate_schema_cache().await;
        active.insert(
            name.clone(),
            ActiveEndpoint {
                source: source.to_string(),
                route,
            },
        );

        tracing::info!(endpoint = %name, source, "Activated custom endpoint");
        Ok(true)
    }

    /// Detach the endpoint with full name `name`.
    ///
    /// Returns `Ok(false)` when nothing was active under that name.
    pub async fn deactivate(&self, name: &str) -> SDKResult<bool> {
        let mut active = self.active.lock().await;
        self.deactivate_locked(&mut active, name).await
    }

    /// Detach every endpoint currently owned by `source`.
    pub async fn deactivate_source(&self, source: &str) -> SDKResult<usize> {
        let mut active = self.active.lock().await;
        let names: Vec<String> = active
            .iter()
            .filter(|(_, a)| a.source == source)
            .map(|(name, _)| name.clone())
            .collect();

        let mut removed = 0;
        for name in names {
            if self.deactivate_locked(&mut active, &name).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// `(name, source)` of every active endpoint, sorted by name.
    pub async fn active(&self) -> Vec<(String, String)> {
        let active = self.active.lock().await;
        let mut list: Vec<(String, String)> = active
            .iter()
            .map(|(name, a)| (name.clone(), a.source.clone()))
            .collect();
        list.sort();
        list
    }

    async fn deactivate_locked(
        &self,
        active: &mut HashMap<String, ActiveEndpoint>,
        name: &str,
    ) -> SDKResult<bool> {
        let Some(entry) = active.remove(name) else {
            return Ok(false);
        };

        match self.table.remove_route(&entry.route).await {
            Ok(()) => {}
            // Already gone from the table; nothing left to detach.
            Err(e) if e.is_not_found() => {
                tracing::warn!(endpoint = %name, "Route missing from table on deactivate");
            }
            Err(e) => {
                active.insert(name.to_string(), entry);
                return Err(SDKError::activation(name, e.to_string()));
            }
        }

        self.table.invalidate_schema_cache().await;
        tracing::info!(endpoint = %name, source = %entry.source, "Deactivated custom endpoint");
        Ok(true)
    }
}
