//! Main Agent
//!
//! Default component for the `main_agent` slot. Each turn runs:
//!
//! 1. recall from vector memory (when configured)
//! 2. `before_agent_starts` on the agent input
//! 3. `agent_fast_reply`; a non-null reply ends the turn
//! 4. the form agent (resume an active form)
//! 5. the procedures agent (start a form or call a tool)
//! 6. the generator, with any tool steps collected so far

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, json};

use super::form_agent::FormAgent;
use super::generator::GenerationRequest;
use super::output::{AgentInput, AgentOutput};
use super::procedures::{ProceduresAgent, hook_context};
use super::{Agent, AgentServices};
use crate::extensions::hooks::{HookContext, points};
use crate::memory::Role;
use crate::session::SessionContext;

/// Turns of history rendered into the agent input
const HISTORY_TURNS: usize = 5;

pub struct MainAgent {
    services: Arc<AgentServices>,
    form_agent: FormAgent,
    procedures: ProceduresAgent,
}

impl MainAgent {
    pub fn new(services: Arc<AgentServices>) -> Self {
        Self {
            form_agent: FormAgent::new(services.memory.clone(), services.interpreter.clone()),
            procedures: ProceduresAgent::new(services.clone()),
            services,
        }
    }

    async fn recall(&self, session: &SessionContext, text: &str) -> Vec<String> {
        let Some(vectors) = &self.services.vectors else {
            return Vec::new();
        };
        let memory_config = &self.services.config.memory;

        let mut filter = Map::new();
        if let Some(user_id) = &session.user_id {
            filter.insert("source".into(), json!(user_id));
        }

        let recalled = async {
            let query = vectors.embed(text).await?;
            vectors
                .search(
                    &memory_config.recall_collection,
                    &query,
                    memory_config.recall_k,
                    Some(&filter),
                )
                .await
        }
        .await;

        match recalled {
            Ok(points) => points.into_iter().map(|p| p.point.content).collect(),
            Err(e) => {
                tracing::warn!("Memory recall failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn agent_input(&self, session: &SessionContext) -> AgentInput {
        let (input, chat_history) = {
            let memory = self.services.memory.get(&session.conversation_id).await;
            let memory = memory.lock().await;
            let input = memory.latest_user_message().unwrap_or_default().to_string();
            // The latest user message is the input itself
            let history = memory.recent(HISTORY_TURNS + 1);
            let history = &history[..history.len().saturating_sub(1)];
            let chat_history = history
                .iter()
                .map(|turn| match turn.role {
                    Role::User => format!("- Human: {}", turn.text),
                    Role::Assistant => format!("- AI: {}", turn.text),
                })
                .collect::<Vec<_>>()
                .join("\n");
            (input, chat_history)
        };

        AgentInput {
            episodic_memory: self.recall(session, &input).await,
            input,
            chat_history,
        }
    }

    async fn fast_reply(&self, ctx: &HookContext) -> Option<AgentOutput> {
        match self
            .services
            .hooks
            .run_hook_as::<Option<AgentOutput>>(points::AGENT_FAST_REPLY, None, ctx)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("agent_fast_reply hook failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Agent for MainAgent {
    fn name(&self) -> &str {
        "main_agent"
    }

    async fn execute(&self, session: &SessionContext) -> AgentOutput {
        let ctx = hook_context(session);

        let input = self.agent_input(session).await;
        let input = match self
            .services
            .hooks
            .run_hook_as(points::BEFORE_AGENT_STARTS, input.clone(), &ctx)
            .await
        {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!("before_agent_starts hook failed: {}", e);
                input
            }
        };

        if let Some(reply) = self.fast_reply(&ctx).await {
            tracing::debug!(conversation_id = %session.conversation_id, "Fast reply");
            return reply;
        }

        // Downstream agents see the message as rewritten by `before_agent_starts`
        let form_output = self
            .form_agent
            .execute_message(&session.conversation_id, &input.input)
            .await;
        if form_output.return_direct {
            return form_output;
        }

        let procedures_output = self.procedures.handle(session, &input.input).await;
        if procedures_output.return_direct {
            return procedures_output;
        }

        let request = GenerationRequest {
            input: input.input,
            chat_history: input.chat_history,
            episodic_memory: input.episodic_memory,
            intermediate_steps: procedures_output.intermediate_steps,
        };

        match self.services.generator.generate(&request).await {
            Ok(text) => AgentOutput {
                output: Some(text),
                intermediate_steps: request.intermediate_steps,
                return_direct: false,
            },
            Err(e) => {
                tracing::error!(
                    conversation_id = %session.conversation_id,
                    "Generation failed: {:#}",
                    e
                );
                AgentOutput::empty()
            }
        }
    }
}
