//! Priority Registry
//!
//! Generic mapping from extension-point name to an ordered list of handlers.
//! Hooks, tools, options and forms are all stored in one of these, tagged
//! with the id of the extension that contributed them.
//!
//! Ordering is priority descending, then registration order ascending: on
//! equal priority the handler registered first wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::{SDKError, SDKResult};

/// A handler registered against an extension point.
#[derive(Debug, Clone)]
pub struct RegisteredHandler<P> {
    /// Extension-point name
    pub point: String,
    /// Higher runs (or wins) first
    pub priority: i32,
    /// Monotonic registration counter, used as the tie-break
    pub order: u64,
    /// Id of the extension that contributed this handler
    pub source: String,
    /// Hook closure, tool, or component factory
    pub payload: P,
}

#[derive(Debug)]
struct PointEntry<P> {
    handlers: Vec<RegisteredHandler<P>>,
    revision: u64,
}

impl<P> Default for PointEntry<P> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            revision: 0,
        }
    }
}

/// Priority-ordered registry of handlers keyed by extension-point name.
#[derive(Debug)]
pub struct PriorityRegistry<P> {
    points: RwLock<HashMap<String, PointEntry<P>>>,
    next_order: AtomicU64,
}

impl<P> Default for PriorityRegistry<P> {
    fn default() -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
            next_order: AtomicU64::new(0),
        }
    }
}

impl<P: Clone> PriorityRegistry<P> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, returning its registration order.
    pub async fn register(
        &self,
        point: &str,
        source: &str,
        priority: i32,
        payload: P,
    ) -> SDKResult<u64> {
        if point.trim().is_empty() {
            return Err(SDKError::invalid_registration(
                "extension point name must not be empty",
            ));
        }
        if source.trim().is_empty() {
            return Err(SDKError::invalid_registration(format!(
                "handler for '{}' has no source extension",
                point
            )));
        }

        let mut points = self.points.write().await;
        let order = self.next_order.fetch_add(1, Ordering::SeqCst);
        let entry = points.entry(point.to_string()).or_default();

        entry.handlers.push(RegisteredHandler {
            point: point.to_string(),
            priority,
            order,
            source: source.to_string(),
            payload,
        });
        entry
            .handlers
            .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
        entry.revision += 1;

        Ok(order)
    }

    /// Snapshot of the handlers for a point, highest priority first.
    pub async fn resolve(&self, point: &str) -> Vec<RegisteredHandler<P>> {
        let points = self.points.read().await;
        points
            .get(point)
            .map(|entry| entry.handlers.clone())
            .unwrap_or_default()
    }

    /// The winning handler for a point, if any.
    pub async fn head(&self, point: &str) -> Option<RegisteredHandler<P>> {
        let points = self.points.read().await;
        points
            .get(point)
            .and_then(|entry| entry.handlers.first().cloned())
    }

    /// Remove every handler contributed by `source`. Returns how many were removed.
    pub async fn unregister_source(&self, source: &str) -> usize {
        let mut points = self.points.write().await;
        let mut removed = 0;

        for entry in points.values_mut() {
            let before = entry.handlers.len();
            entry.handlers.retain(|h| h.source != source);
            let dropped = before - entry.handlers.len();
            if dropped > 0 {
                entry.revision += 1;
                removed += dropped;
            }
        }

        removed
    }

    /// Revision counter of a point; changes whenever its handler list changes.
    pub async fn revision(&self, point: &str) -> u64 {
        let points = self.points.read().await;
        points.get(point).map(|entry| entry.revision).unwrap_or(0)
    }

    /// Names of all points that currently have at least one handler.
    pub async fn points(&self) -> Vec<String> {
        let points = self.points.read().await;
        let mut names: Vec<String> = points
            .iter()
            .filter(|(_, entry)| !entry.handlers.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}
