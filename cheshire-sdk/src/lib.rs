//! Cheshire SDK - Conversational Agent Host
//!
//! This crate provides the host for a conversational agent that extensions
//! can reshape at runtime. Two subsystems live here:
//!
//! # Extension Registry
//!
//! - **extensions::priority** - ordered handler lists per extension point
//! - **extensions::hooks** - fail-open hook bus folding a value through handlers
//! - **extensions::options** - one active component per slot, replaced by priority
//! - **extensions::endpoints** - custom HTTP routes attached to a live route table
//! - **extensions::manager** - load, unload, reload, enable and disable extensions
//!
//! # Conversational Dispatch
//!
//! - **memory** - per-conversation working memory and vector memory
//! - **agents::form** - the slot-filling form state machine
//! - **agents** - form agent, procedures agent, main agent
//!
//! # Example
//!
//! ```rust,no_run
//! use cheshire_sdk::extensions::builders::SDK;
//! use cheshire_sdk::{Host, SDKConfig, SessionContext};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let travel = SDK::plugin("travel")
//!         .form(
//!             SDK::form("book_flight")
//!                 .slot("destination", "Where to")
//!                 .slot("date", "When")
//!                 .start_example("book a flight")
//!                 .build(),
//!         )
//!         .build();
//!
//!     let host = Host::builder(SDKConfig::default())
//!         .plugin(travel)
//!         .bootstrap()
//!         .await?;
//!
//!     let session = SessionContext::new("conv-1");
//!     let reply = host.handle_turn(&session, "book a flight").await;
//!     assert!(reply.return_direct);
//!
//!     host.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod extensions;
pub mod memory;

mod config;
mod error;
mod host;
mod session;

// Re-export main SDK types
pub use config::{ConfigValidationError, HookConfig, SDKConfig, WorkingMemoryConfig};
pub use error::{SDKError, SDKResult};
pub use host::{EPISODIC_COLLECTION, Host, HostBuilder};
pub use session::SessionContext;

pub use agents::{
    Agent, AgentOutput, AgentServices, Form, FormDefinition, FormState, IntermediateStep,
};
pub use extensions::{
    CustomEndpoint, ExtensionManager, HookBus, OptionDeclaration, Plugin, PluginDeclarations,
    Tool,
};
pub use memory::{VectorMemory, WorkingMemoryStore};
