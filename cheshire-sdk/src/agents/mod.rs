//! Conversational Dispatch
//!
//! Agents turn the latest user message of a conversation into an
//! [`AgentOutput`]. The `main_agent` slot holds the entry point; the default
//! [`MainAgent`] chains the form agent, the procedures agent and the
//! generator, stopping at the first output marked `return_direct`.

pub mod form;
pub mod form_agent;
pub mod generator;
pub mod main_agent;
pub mod output;
pub mod procedures;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SDKConfig;
use crate::extensions::hooks::HookBus;
use crate::extensions::tools::ToolRegistry;
use crate::memory::{VectorMemory, WorkingMemoryStore};
use crate::session::SessionContext;

pub use form::{
    DefaultFormBehavior, Form, FormBehavior, FormDefinition, FormError, FormInterpreter,
    FormOutcome, FormRegistry, FormSignal, FormSnapshot, FormState, FormStep, KeywordInterpreter,
    SlotSpec,
};
pub use form_agent::FormAgent;
pub use generator::{EchoGenerator, GenerationRequest, Generator};
pub use main_agent::MainAgent;
pub use output::{AgentInput, AgentOutput, IntermediateStep};
pub use procedures::{ProceduresAgent, ToolCall, ToolPlanner, TriggerPlanner};

/// Slot holding the turn entry point
pub const MAIN_AGENT_SLOT: &str = "main_agent";

/// A component that handles one conversation turn
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Produce the output for the latest user message of `session`.
    async fn execute(&self, session: &SessionContext) -> AgentOutput;
}

/// Shared services handed to agents and slot factories
pub struct AgentServices {
    pub config: SDKConfig,
    pub hooks: Arc<HookBus>,
    pub memory: Arc<WorkingMemoryStore>,
    pub tools: Arc<ToolRegistry>,
    pub forms: Arc<FormRegistry>,
    pub generator: Arc<dyn Generator>,
    pub planner: Arc<dyn ToolPlanner>,
    pub interpreter: Arc<dyn FormInterpreter>,
    /// Long-term memory; recall and episodic storage are skipped without it
    pub vectors: Option<Arc<dyn VectorMemory>>,
}

impl AgentServices {
    /// Services with the built-in generator, planner and interpreter
    pub fn new(config: SDKConfig) -> Self {
        Self {
            hooks: Arc::new(HookBus::new(&config.hooks)),
            memory: Arc::new(WorkingMemoryStore::new(config.memory.max_history)),
            tools: Arc::new(ToolRegistry::new()),
            forms: Arc::new(FormRegistry::new()),
            generator: Arc::new(EchoGenerator),
            planner: Arc::new(TriggerPlanner),
            interpreter: Arc::new(KeywordInterpreter),
            vectors: None,
            config,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn ToolPlanner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_interpreter(mut self, interpreter: Arc<dyn FormInterpreter>) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn with_vector_memory(mut self, vectors: Arc<dyn VectorMemory>) -> Self {
        self.vectors = Some(vectors);
        self
    }
}

impl std::fmt::Debug for AgentServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentServices")
            .field("config", &self.config)
            .field("vectors", &self.vectors.is_some())
            .finish_non_exhaustive()
    }
}
