//! Hook Bus
//!
//! Named extension points that fold an accumulator through every handler
//! registered for that name, highest priority first.
//!
//! # Failure isolation
//!
//! A handler that returns an error, panics, or exceeds the per-handler
//! timeout is skipped: the failure is logged and the fold continues with
//! the value the handler received. One misbehaving extension never aborts
//! the turn or starves the handlers after it.
//!
//! # Snapshots
//!
//! The handler list is resolved once at the start of a run. An extension
//! reloaded while a turn is folding only affects later runs.
//!
//! # Example
//!
//! ```rust
//! use cheshire_sdk::extensions::hooks::{sync_hook, HookBus, HookContext};
//! use serde_json::json;
//!
//! # async fn example() -> cheshire_sdk::SDKResult<()> {
//! let bus = HookBus::default();
//! bus.register(
//!     "before_cat_sends_message",
//!     "shouting",
//!     1,
//!     sync_hook(|mut message, _ctx| {
//!         message["output"] = json!("HELLO");
//!         Ok(message)
//!     }),
//! )
//! .await?;
//!
//! let ctx = HookContext::new("conversation-1");
//! let out = bus
//!     .run_hook("before_cat_sends_message", json!({"output": "hello"}), &ctx)
//!     .await;
//! assert_eq!(out["output"], "HELLO");
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::priority::PriorityRegistry;
use crate::config::HookConfig;
use crate::{SDKError, SDKResult};

/// Well-known hook names and the accumulator each one carries.
pub mod points {
    /// `{"text": String}` - the user message, before anything reads it.
    pub const BEFORE_CAT_READS_MESSAGE: &str = "before_cat_reads_message";
    /// `AgentInput` - the input handed to the agent chain.
    pub const BEFORE_AGENT_STARTS: &str = "before_agent_starts";
    /// `Option<AgentOutput>` - a non-null value short-circuits the agent chain.
    pub const AGENT_FAST_REPLY: &str = "agent_fast_reply";
    /// `Vec<String>` - names of the tools the agent may call this turn.
    pub const AGENT_ALLOWED_TOOLS: &str = "agent_allowed_tools";
    /// `AgentOutput` - the final output, before it is returned to the caller.
    pub const BEFORE_CAT_SENDS_MESSAGE: &str = "before_cat_sends_message";
}

/// Boxed future returned by hook handlers.
pub type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Hook handler: receives the accumulator and the shared context, returns the next value.
pub type HookHandler = Arc<dyn Fn(Value, Arc<HookContext>) -> HookFuture + Send + Sync>;

/// Wrap a synchronous closure as a hook handler.
pub fn sync_hook<F>(f: F) -> HookHandler
where
    F: Fn(Value, &HookContext) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(move |value, ctx| {
        let result = f(value, &ctx);
        Box::pin(async move { result })
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Hook Context
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only context shared by every handler of one hook run.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    /// Conversation the turn belongs to.
    pub conversation_id: String,
    /// Authenticated user, if known.
    pub user_id: Option<String>,
    /// Custom context data.
    pub extra: HashMap<String, Value>,
}

impl HookContext {
    /// Create a context for a conversation.
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            ..Default::default()
        }
    }

    /// Set user ID.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Add custom context data.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Declarations
// ─────────────────────────────────────────────────────────────────────────────

/// A hook an extension wants registered on load.
#[derive(Clone)]
pub struct HookDeclaration {
    /// Hook name
    pub name: String,
    /// Priority (higher runs first, default 1)
    pub priority: i32,
    /// Handler
    pub handler: HookHandler,
}

impl HookDeclaration {
    /// Declare a hook with the default priority.
    pub fn new(name: impl Into<String>, handler: HookHandler) -> Self {
        Self {
            name: name.into(),
            priority: 1,
            handler,
        }
    }

    /// Set priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl std::fmt::Debug for HookDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDeclaration")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hook Bus
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a hook run, including the failures that were skipped.
#[derive(Debug)]
pub struct HookRun {
    /// Final accumulator value.
    pub value: Value,
    /// One error per skipped handler, in execution order: `Timeout` for a
    /// handler that ran out of time, `HandlerFailure` otherwise.
    pub failures: Vec<SDKError>,
}

/// Registry and executor for hooks.
pub struct HookBus {
    registry: PriorityRegistry<HookHandler>,
    handler_timeout: Duration,
}

impl Default for HookBus {
    fn default() -> Self {
        Self::new(&HookConfig::default())
    }
}

impl HookBus {
    /// Create an empty bus.
    pub fn new(config: &HookConfig) -> Self {
        Self {
            registry: PriorityRegistry::new(),
            handler_timeout: config.handler_timeout(),
        }
    }

    /// Register a handler for `name`, contributed by extension `source`.
    pub async fn register(
        &self,
        name: &str,
        source: &str,
        priority: i32,
        handler: HookHandler,
    ) -> SDKResult<u64> {
        self.registry.register(name, source, priority, handler).await
    }

    /// Remove every handler contributed by `source`.
    pub async fn unregister_source(&self, source: &str) -> usize {
        self.registry.unregister_source(source).await
    }

    /// `(source, priority)` of the handlers for `name`, in execution order.
    pub async fn handlers(&self, name: &str) -> Vec<(String, i32)> {
        self.registry
            .resolve(name)
            .await
            .into_iter()
            .map(|h| (h.source, h.priority))
            .collect()
    }

    /// Run a hook and return the final value.
    ///
    /// With no handlers registered the initial value is returned unchanged.
    pub async fn run_hook(&self, name: &str, initial: Value, ctx: &HookContext) -> Value {
        self.fold(name, initial, ctx, |_| Ok(())).await.value
    }

    /// Run a hook and report skipped handlers alongside the value.
    pub async fn run_hook_detailed(
        &self,
        name: &str,
        initial: Value,
        ctx: &HookContext,
    ) -> HookRun {
        self.fold(name, initial, ctx, |_| Ok(())).await
    }

    /// Run a hook whose accumulator has the type `T`.
    ///
    /// A handler whose output does not deserialize as `T` counts as a
    /// failed handler and is skipped.
    pub async fn run_hook_as<T>(&self, name: &str, initial: T, ctx: &HookContext) -> SDKResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let initial_value = serde_json::to_value(&initial)?;
        let run = self
            .fold(name, initial_value, ctx, |value| {
                serde_json::from_value::<T>(value.clone())
                    .map(|_| ())
                    .map_err(|e| format!("output does not match the hook contract: {}", e))
            })
            .await;
        Ok(serde_json::from_value(run.value)?)
    }

    async fn fold<F>(&self, name: &str, initial: Value, ctx: &HookContext, accept: F) -> HookRun
    where
        F: Fn(&Value) -> Result<(), String>,
    {
        let handlers = self.registry.resolve(name).await;
        let mut run = HookRun {
            value: initial,
            failures: Vec::new(),
        };

        if handlers.is_empty() {
            return run;
        }

        let ctx = Arc::new(ctx.clone());

        for handler in handlers {
            let outcome = self
                .invoke(name, &handler.source, &handler.payload, run.value.clone(), ctx.clone())
                .await
                .and_then(|next| {
                    accept(&next)
                        .map(|_| next)
                        .map_err(|reason| SDKError::handler_failure(name, &handler.source, reason))
                });

            match outcome {
                Ok(next) => run.value = next,
                Err(err) => {
                    tracing::warn!(
                        hook = name,
                        source = %handler.source,
                        priority = handler.priority,
                        "Hook handler failed, continuing: {}",
                        err
                    );
                    run.failures.push(err);
                }
            }
        }

        run
    }

    async fn invoke(
        &self,
        name: &str,
        source: &str,
        handler: &HookHandler,
        value: Value,
        ctx: Arc<HookContext>,
    ) -> SDKResult<Value> {
        let failed = |reason: String| SDKError::handler_failure(name, source, reason);

        let future = std::panic::catch_unwind(AssertUnwindSafe(|| handler(value, ctx)))
            .map_err(|panic| failed(format!("handler panicked: {}", panic_message(&*panic))))?;

        match tokio::time::timeout(self.handler_timeout, AssertUnwindSafe(future).catch_unwind())
            .await
        {
            Ok(Ok(Ok(next))) => Ok(next),
            Ok(Ok(Err(err))) => Err(failed(format!("{:#}", err))),
            Ok(Err(panic)) => Err(failed(format!("handler panicked: {}", panic_message(&*panic)))),
            Err(_elapsed) => Err(SDKError::timeout(self.handler_timeout.as_millis() as u64)),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn append(suffix: &'static str) -> HookHandler {
        sync_hook(move |value, _ctx| {
            let text = value.as_str().unwrap_or_default();
            Ok(json!(format!("{}{}", text, suffix)))
        })
    }

    fn failing() -> HookHandler {
        sync_hook(|_value, _ctx| Err(anyhow::anyhow!("plugin exploded")))
    }

    #[tokio::test]
    async fn test_no_handlers_returns_input_unchanged() {
        let bus = HookBus::default();
        let ctx = HookContext::new("c1");
        let input = json!({"text": "hello", "nested": [1, 2, 3]});

        let out = bus.run_hook("never_registered", input.clone(), &ctx).await;
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_fold_runs_in_priority_order() {
        let bus = HookBus::default();
        bus.register("h", "low", 1, append("-low")).await.unwrap();
        bus.register("h", "high", 10, append("-high")).await.unwrap();
        bus.register("h", "mid", 5, append("-mid")).await.unwrap();

        let out = bus.run_hook("h", json!("start"), &HookContext::new("c1")).await;
        assert_eq!(out, json!("start-high-mid-low"));
    }

    #[tokio::test]
    async fn test_failing_handler_is_skipped() {
        let bus = HookBus::default();
        bus.register("h", "first", 10, append("-a")).await.unwrap();
        bus.register("h", "broken", 5, failing()).await.unwrap();
        bus.register("h", "last", 1, append("-b")).await.unwrap();

        let run = bus
            .run_hook_detailed("h", json!("x"), &HookContext::new("c1"))
            .await;
        assert_eq!(run.value, json!("x-a-b"));
        assert_eq!(run.failures.len(), 1);
        assert!(matches!(
            &run.failures[0],
            SDKError::HandlerFailure { source_id, .. } if source_id == "broken"
        ));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_skipped() {
        let bus = HookBus::default();
        bus.register("h", "panics", 10, sync_hook(|_v, _c| panic!("boom")))
            .await
            .unwrap();
        bus.register("h", "ok", 1, append("!")).await.unwrap();

        let out = bus.run_hook("h", json!("hi"), &HookContext::new("c1")).await;
        assert_eq!(out, json!("hi!"));
    }

    #[tokio::test]
    async fn test_async_panic_is_skipped() {
        let bus = HookBus::default();
        let handler: HookHandler = Arc::new(|value, _ctx| {
            Box::pin(async move {
                tokio::task::yield_now().await;
                if value.is_null() {
                    panic!("async boom");
                }
                Ok::<_, anyhow::Error>(value)
            })
        });
        bus.register("h", "panics", 10, handler).await.unwrap();
        bus.register("h", "ok", 1, append("?")).await.unwrap();

        let out = bus.run_hook("h", Value::Null, &HookContext::new("c1")).await;
        assert_eq!(out, json!("?"));
    }

    #[tokio::test]
    async fn test_slow_handler_times_out() {
        let bus = HookBus::new(&HookConfig {
            handler_timeout_ms: 20,
        });
        let slow: HookHandler = Arc::new(|value, _ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, anyhow::Error>(value)
            })
        });
        bus.register("h", "slow", 10, slow).await.unwrap();
        bus.register("h", "fast", 1, append("+")).await.unwrap();

        let run = bus
            .run_hook_detailed("h", json!("v"), &HookContext::new("c1"))
            .await;
        assert_eq!(run.value, json!("v+"));
        assert_eq!(run.failures.len(), 1);
        assert!(run.failures[0].is_timeout());
    }

    #[tokio::test]
    async fn test_handlers_see_context() {
        let bus = HookBus::default();
        bus.register(
            "h",
            "ctx",
            1,
            sync_hook(|_value, ctx| {
                Ok(json!({
                    "conversation": ctx.conversation_id,
                    "user": ctx.user_id,
                    "flag": ctx.extra.get("flag").cloned(),
                }))
            }),
        )
        .await
        .unwrap();

        let ctx = HookContext::new("c42")
            .with_user_id("alice")
            .with_extra("flag", json!(true));
        let out = bus.run_hook("h", Value::Null, &ctx).await;
        assert_eq!(out, json!({"conversation": "c42", "user": "alice", "flag": true}));
    }

    #[tokio::test]
    async fn test_typed_hook_rejects_wrong_shape() {
        let bus = HookBus::default();
        bus.register(
            points::AGENT_ALLOWED_TOOLS,
            "bad",
            10,
            sync_hook(|_v, _c| Ok(json!({"not": "a list"}))),
        )
        .await
        .unwrap();
        bus.register(
            points::AGENT_ALLOWED_TOOLS,
            "filter",
            1,
            sync_hook(|value, _c| {
                let names: Vec<String> = serde_json::from_value(value)?;
                Ok(json!(names.into_iter().filter(|n| n != "shell").collect::<Vec<_>>()))
            }),
        )
        .await
        .unwrap();

        let allowed: Vec<String> = bus
            .run_hook_as(
                points::AGENT_ALLOWED_TOOLS,
                vec!["search".to_string(), "shell".to_string()],
                &HookContext::new("c1"),
            )
            .await
            .unwrap();
        assert_eq!(allowed, vec!["search".to_string()]);
    }

    #[tokio::test]
    async fn test_unregister_source_removes_handlers() {
        let bus = HookBus::default();
        bus.register("h", "ext", 1, append("-ext")).await.unwrap();
        bus.register("h", "core", 0, append("-core")).await.unwrap();

        assert_eq!(bus.unregister_source("ext").await, 1);
        assert_eq!(bus.handlers("h").await, vec![("core".to_string(), 0)]);

        let out = bus.run_hook("h", json!(""), &HookContext::new("c1")).await;
        assert_eq!(out, json!("-core"));
    }

    #[tokio::test]
    async fn test_unregister_during_run_applies_to_next_run() {
        let bus = Arc::new(HookBus::default());
        let remover = bus.clone();
        let unregister: HookHandler = Arc::new(move |value, _ctx| {
            let bus = remover.clone();
            Box::pin(async move {
                bus.unregister_source("later").await;
                let text = value.as_str().unwrap_or_default().to_string();
                Ok::<_, anyhow::Error>(json!(format!("{}-first", text)))
            })
        });
        bus.register("h", "first", 10, unregister).await.unwrap();
        bus.register("h", "later", 1, append("-later")).await.unwrap();

        let ctx = HookContext::new("c1");
        let out = bus.run_hook("h", json!("x"), &ctx).await;
        assert_eq!(out, json!("x-first-later"));
        assert_eq!(bus.handlers("h").await, vec![("first".to_string(), 10)]);

        let out = bus.run_hook("h", json!("x"), &ctx).await;
        assert_eq!(out, json!("x-first"));
    }
}
