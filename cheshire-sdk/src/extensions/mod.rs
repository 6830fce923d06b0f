//! Extension System
//!
//! Extensions contribute to the host through five kinds of declarations,
//! all tagged with the contributing extension's id:
//!
//! - **hooks** - handlers folded over a value at named points of a turn
//! - **tools** - callable capabilities for the procedures agent
//! - **options** - factories that replace a core component slot
//! - **forms** - multi-turn slot-filling dialogs
//! - **endpoints** - HTTP routes attached to the live route table
//!
//! # Builders
//!
//! ```rust,ignore
//! use cheshire_sdk::extensions::builders::SDK;
//! use cheshire_sdk::extensions::endpoints::CustomEndpoint;
//!
//! let plugin = SDK::plugin("weather")
//!     .tool(SDK::tool("weather").example("weather in").handler(|_| async {
//!         Ok("sunny".to_string())
//!     }))
//!     .endpoint(CustomEndpoint::get("/weather", |_| async { Ok(json!("sunny")) }))
//!     .build();
//!
//! host.extensions().add_plugin(plugin).await?;
//! host.extensions().enable("weather").await?;
//! ```

pub mod builders;
pub mod core_plugin;
pub mod endpoints;
pub mod hooks;
pub mod loader;
pub mod manager;
pub mod options;
pub mod priority;
pub mod store;
pub mod tools;
mod types;

pub mod migrations;

// Re-export public types
pub use types::{
    CatalogEntry, ExtensionInfo, ExtensionManifest, ExtensionState, Plugin, PluginDeclarations,
};

pub use builders::{BuilderError, FnPlugin, FormBuilder, PluginBuilder, SDK, ToolBuilder};
pub use core_plugin::CorePlugin;
pub use endpoints::{
    CustomEndpoint, EndpointActivator, EndpointBuilder, EndpointRequest, HttpMethod,
    InMemoryRouteTable, RouteMatch, RouteTable,
};
pub use hooks::{HookBus, HookContext, HookDeclaration, sync_hook};
pub use loader::{DiscoveredExtension, ExtensionLoader, LoaderConfig};
pub use manager::{CORE_EXTENSION_ID, ExtensionManager, ExtensionTargets};
pub use options::{OptionDeclaration, OptionResolver, SlotArgs};
pub use priority::{PriorityRegistry, RegisteredHandler};
pub use store::{ExtensionRecord, ExtensionStateStore};
pub use tools::{Tool, ToolDefinition, ToolInput, ToolOutput, ToolRegistry};
