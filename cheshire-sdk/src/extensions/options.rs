//! Option Resolver
//!
//! Options let an extension replace a core component. Each overridable
//! component is a *slot* (for example `main_agent`) behind a trait object;
//! extensions declare factories for a slot with a priority, and the resolver
//! instantiates the single winning factory.
//!
//! Instances are cached per slot and rebuilt only when the winning
//! declaration for that slot changes. If the winner fails to construct, the
//! previously active instance stays in place.
//!
//! # Example
//!
//! ```rust,ignore
//! use cheshire_sdk::extensions::options::OptionDeclaration;
//!
//! let option = OptionDeclaration::new::<dyn Agent, _>("main_agent", 10, |args| {
//!     Ok(Arc::new(PirateAgent::new(args.services.clone())))
//! });
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::priority::PriorityRegistry;
use crate::agents::AgentServices;
use crate::{SDKError, SDKResult};

type ErasedInstance = Arc<dyn Any + Send + Sync>;

/// Type-erased component factory.
pub type ComponentFactory = Arc<dyn Fn(&SlotArgs) -> anyhow::Result<ErasedInstance> + Send + Sync>;

/// Standard construction arguments handed to every slot factory.
#[derive(Clone)]
pub struct SlotArgs {
    /// Slot being constructed
    pub slot: String,
    /// Shared services (hooks, working memory, tools, forms, generator)
    pub services: Arc<AgentServices>,
}

/// Declaration that a factory should fill a component slot.
#[derive(Clone)]
pub struct OptionDeclaration {
    /// Target slot name
    pub slot: String,
    /// Priority (higher wins, default 1)
    pub priority: i32,
    factory: ComponentFactory,
    type_name: &'static str,
}

impl OptionDeclaration {
    /// Declare a factory producing `Arc<T>` for `slot`.
    pub fn new<T, F>(slot: impl Into<String>, priority: i32, factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&SlotArgs) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            slot: slot.into(),
            priority,
            factory: erase(factory),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Name of the component type this declaration produces.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl std::fmt::Debug for OptionDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionDeclaration")
            .field("slot", &self.slot)
            .field("priority", &self.priority)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

fn erase<T, F>(factory: F) -> ComponentFactory
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&SlotArgs) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
{
    Arc::new(move |args| {
        let instance: Arc<T> = factory(args)?;
        Ok(Arc::new(instance) as ErasedInstance)
    })
}

fn downcast<T: ?Sized + Send + Sync + 'static>(instance: &ErasedInstance) -> Option<Arc<T>> {
    let any: &(dyn Any + Send + Sync) = &**instance;
    any.downcast_ref::<Arc<T>>().cloned()
}

#[derive(Clone)]
struct CachedComponent {
    revision: u64,
    /// Registration order of the winning declaration; `None` for the default.
    order: Option<u64>,
    source: Option<String>,
    instance: ErasedInstance,
}

/// Resolves the active component for each slot.
pub struct OptionResolver {
    registry: PriorityRegistry<ComponentFactory>,
    defaults: RwLock<HashMap<String, ComponentFactory>>,
    cache: RwLock<HashMap<String, CachedComponent>>,
    services: Arc<AgentServices>,
}

impl OptionResolver {
    /// Create a resolver whose factories receive `services`.
    pub fn new(services: Arc<AgentServices>) -> Self {
        Self {
            registry: PriorityRegistry::new(),
            defaults: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            services,
        }
    }

    /// Set the host-supplied default for a slot.
    pub async fn set_default<T, F>(&self, slot: &str, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&SlotArgs) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        let mut defaults = self.defaults.write().await;
        defaults.insert(slot.to_string(), erase(factory));
    }

    /// Register an option contributed by extension `source`.
    pub async fn register(&self, option: &OptionDeclaration, source: &str) -> SDKResult<u64> {
        let order = self
            .registry
            .register(&option.slot, source, option.priority, option.factory.clone())
            .await?;
        tracing::debug!(
            slot = %option.slot,
            source,
            priority = option.priority,
            "Registered option"
        );
        Ok(order)
    }

    /// Remove every option contributed by `source`.
    pub async fn unregister_source(&self, source: &str) -> usize {
        self.registry.unregister_source(source).await
    }

    /// Extension whose declaration is currently winning a slot.
    pub async fn winning_source(&self, slot: &str) -> Option<String> {
        self.registry.head(slot).await.map(|h| h.source)
    }

    /// Active instance for a slot.
    ///
    /// Uses the highest-priority declaration, or the default when there is
    /// none. Fails with `ComponentInit` when construction fails; the cached
    /// instance from before the failure is left untouched.
    pub async fn active_component<T>(&self, slot: &str) -> SDKResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let revision = self.registry.revision(slot).await;
        let head = self.registry.head(slot).await;
        let head_order = head.as_ref().map(|h| h.order);

        let mut cache = self.cache.write().await;

        if let Some(cached) = cache.get_mut(slot) {
            if cached.revision == revision || (head_order.is_some() && cached.order == head_order) {
                cached.revision = revision;
                return downcast::<T>(&cached.instance).ok_or_else(|| {
                    SDKError::component_init(slot, "cached component has a different type")
                });
            }
        }

        let (factory, source) = match head {
            Some(handler) => (handler.payload, Some(handler.source)),
            None => {
                let defaults = self.defaults.read().await;
                let factory = defaults
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| SDKError::not_found("Component slot", slot))?;
                (factory, None)
            }
        };

        let args = SlotArgs {
            slot: slot.to_string(),
            services: self.services.clone(),
        };

        let instance = factory(&args).map_err(|e| {
            tracing::warn!(
                slot,
                source = source.as_deref().unwrap_or("default"),
                "Component construction failed: {:#}",
                e
            );
            SDKError::component_init(slot, format!("{:#}", e))
        })?;

        let typed = downcast::<T>(&instance).ok_or_else(|| {
            SDKError::component_init(
                slot,
                format!(
                    "factory does not produce {}",
                    std::any::type_name::<T>()
                ),
            )
        })?;

        tracing::info!(
            slot,
            source = source.as_deref().unwrap_or("default"),
            "Activated component"
        );

        cache.insert(
            slot.to_string(),
            CachedComponent {
                revision,
                order: head_order,
                source,
                instance,
            },
        );

        Ok(typed)
    }

    /// Active instance for a slot, keeping the previous one on failure.
    ///
    /// When the winning declaration cannot be constructed, the last good
    /// instance is returned; without one, the default is tried.
    pub async fn resolve_or_retain<T>(&self, slot: &str) -> SDKResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        match self.active_component::<T>(slot).await {
            Ok(instance) => Ok(instance),
            Err(err @ SDKError::ComponentInit { .. }) => {
                if let Some(previous) = self.cached::<T>(slot).await {
                    tracing::warn!(slot, "Keeping previous component: {}", err);
                    return Ok(previous);
                }
                tracing::warn!(slot, "Falling back to default component: {}", err);
                self.construct_default::<T>(slot).await.map_err(|_| err)
            }
            Err(err) => Err(err),
        }
    }

    /// Source of the cached instance (`None` for the default).
    pub async fn cached_source(&self, slot: &str) -> Option<String> {
        let cache = self.cache.read().await;
        cache.get(slot).and_then(|c| c.source.clone())
    }

    async fn cached<T>(&self, slot: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let cache = self.cache.read().await;
        cache.get(slot).and_then(|c| downcast::<T>(&c.instance))
    }

    async fn construct_default<T>(&self, slot: &str) -> SDKResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let factory = {
            let defaults = self.defaults.read().await;
            defaults
                .get(slot)
                .cloned()
                .ok_or_else(|| SDKError::not_found("Component slot", slot))?
        };

        let args = SlotArgs {
            slot: slot.to_string(),
            services: self.services.clone(),
        };
        let instance =
            factory(&args).map_err(|e| SDKError::component_init(slot, format!("{:#}", e)))?;
        downcast::<T>(&instance)
            .ok_or_else(|| SDKError::component_init(slot, "default has a different type"))
    }
}
