//! Procedures Agent
//!
//! Handles turns no active form claimed: starts a form whose trigger phrase
//! appears in the message, or picks a tool and runs it.

use std::sync::Arc;

use async_trait::async_trait;

use super::form::Form;
use super::form_agent::FormAgent;
use super::output::{AgentOutput, IntermediateStep};
use super::{Agent, AgentServices};
use crate::extensions::hooks::{HookContext, points};
use crate::extensions::tools::{ToolDefinition, ToolInput};
use crate::session::SessionContext;

/// A tool call chosen by a planner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub tool: String,
    pub input: String,
}

/// Chooses which tool (if any) to call for a message
#[async_trait]
pub trait ToolPlanner: Send + Sync {
    async fn plan(&self, message: &str, tools: &[ToolDefinition]) -> Option<ToolCall>;
}

/// Planner matching tool examples (or the tool name) against the message.
///
/// The longest matching phrase wins; the whole message is the tool input.
#[derive(Debug, Clone, Default)]
pub struct TriggerPlanner;

#[async_trait]
impl ToolPlanner for TriggerPlanner {
    async fn plan(&self, message: &str, tools: &[ToolDefinition]) -> Option<ToolCall> {
        let lower = message.to_lowercase();

        tools
            .iter()
            .filter_map(|tool| {
                let name_phrase = tool.name.replace('_', " ").to_lowercase();
                std::iter::once(name_phrase)
                    .chain(tool.examples.iter().map(|e| e.to_lowercase()))
                    .filter(|phrase| !phrase.is_empty() && lower.contains(phrase.as_str()))
                    .map(|phrase| phrase.len())
                    .max()
                    .map(|len| (len, tool))
            })
            // max_by_key keeps the last maximum; reverse so the first listed tool wins ties
            .rev()
            .max_by_key(|(len, _)| *len)
            .map(|(_, tool)| ToolCall {
                tool: tool.name.clone(),
                input: message.trim().to_string(),
            })
    }
}

/// Form-starting and tool-using agent
pub struct ProceduresAgent {
    services: Arc<AgentServices>,
    form_agent: FormAgent,
}

impl ProceduresAgent {
    pub fn new(services: Arc<AgentServices>) -> Self {
        let form_agent = FormAgent::new(services.memory.clone(), services.interpreter.clone());
        Self {
            services,
            form_agent,
        }
    }

    /// Tool definitions the agent may use this turn, after `agent_allowed_tools`.
    pub async fn allowed_tools(&self, ctx: &HookContext) -> Vec<ToolDefinition> {
        let names = self.services.tools.names().await;
        let allowed = match self
            .services
            .hooks
            .run_hook_as(points::AGENT_ALLOWED_TOOLS, names.clone(), ctx)
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!("agent_allowed_tools hook failed: {}", e);
                names
            }
        };

        self.services
            .tools
            .list()
            .await
            .into_iter()
            .filter(|tool| allowed.contains(&tool.name))
            .collect()
    }

    /// Start a form or run a tool for `message`.
    pub async fn handle(&self, session: &SessionContext, message: &str) -> AgentOutput {
        if let Some(output) = self.start_form(session, message).await {
            return output;
        }

        self.run_tool(session, message).await
    }

    async fn start_form(&self, session: &SessionContext, message: &str) -> Option<AgentOutput> {
        let definition = self.services.forms.match_trigger(message).await?;

        {
            let memory = self.services.memory.get(&session.conversation_id).await;
            let mut memory = memory.lock().await;
            if memory.active_form.as_ref().is_some_and(|f| !f.is_closed()) {
                return None;
            }
            tracing::info!(
                conversation_id = %session.conversation_id,
                form = %definition.name,
                "Starting form"
            );
            memory.active_form = Some(Form::new(definition, session.conversation_id.clone()));
        }

        Some(
            self.form_agent
                .execute_message(&session.conversation_id, message)
                .await,
        )
    }

    async fn run_tool(&self, session: &SessionContext, message: &str) -> AgentOutput {
        let ctx = hook_context(session);
        let tools = self.allowed_tools(&ctx).await;
        if tools.is_empty() {
            return AgentOutput::empty();
        }

        let Some(call) = self.services.planner.plan(message, &tools).await else {
            return AgentOutput::empty();
        };

        let input = ToolInput {
            input: call.input.clone(),
            session: session.clone(),
        };

        match self.services.tools.call(&call.tool, input).await {
            Ok(result) => {
                let step = IntermediateStep::new(&call.tool, &call.input, result.observation);
                if result.return_direct {
                    AgentOutput::direct(step)
                } else {
                    AgentOutput {
                        output: None,
                        intermediate_steps: vec![step],
                        return_direct: false,
                    }
                }
            }
            Err(e) => {
                tracing::warn!(tool = %call.tool, "Tool call failed: {}", e);
                AgentOutput::empty()
            }
        }
    }
}

#[async_trait]
impl Agent for ProceduresAgent {
    fn name(&self) -> &str {
        "procedures"
    }

    async fn execute(&self, session: &SessionContext) -> AgentOutput {
        let message = {
            let memory = self.services.memory.get(&session.conversation_id).await;
            let memory = memory.lock().await;
            memory.latest_user_message().unwrap_or_default().to_string()
        };

        self.handle(session, &message).await
    }
}

pub(crate) fn hook_context(session: &SessionContext) -> HookContext {
    let ctx = HookContext::new(session.conversation_id.clone());
    match &session.user_id {
        Some(user_id) => ctx.with_user_id(user_id.clone()),
        None => ctx,
    }
}
