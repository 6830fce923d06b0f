//! Form Agent
//!
//! First stop of every turn: resumes the conversation's active form, or
//! steps aside with an empty output so the next agent handles the turn.

use std::sync::Arc;

use super::form::{Form, FormInterpreter};
use super::output::{AgentOutput, IntermediateStep};
use crate::memory::WorkingMemoryStore;

/// Resumes active forms
pub struct FormAgent {
    memory: Arc<WorkingMemoryStore>,
    interpreter: Arc<dyn FormInterpreter>,
}

impl FormAgent {
    pub fn new(memory: Arc<WorkingMemoryStore>, interpreter: Arc<dyn FormInterpreter>) -> Self {
        Self {
            memory,
            interpreter,
        }
    }

    /// Run one form turn for `conversation_id`.
    ///
    /// - no active form: empty output
    /// - closed form: detach it, empty output
    /// - otherwise: advance the form with the latest user message and own
    ///   the turn (`return_direct`)
    ///
    /// A failing step is logged and degrades to an empty output.
    pub async fn execute(&self, conversation_id: &str) -> AgentOutput {
        self.step(conversation_id, None).await
    }

    /// Same as [`FormAgent::execute`], advancing the form with `message`
    /// instead of the recorded user turn.
    pub async fn execute_message(&self, conversation_id: &str, message: &str) -> AgentOutput {
        self.step(conversation_id, Some(message)).await
    }

    async fn step(&self, conversation_id: &str, message: Option<&str>) -> AgentOutput {
        let memory = self.memory.get(conversation_id).await;
        let mut memory = memory.lock().await;

        match memory.active_form.as_ref().map(Form::is_closed) {
            None => return AgentOutput::empty(),
            Some(true) => {
                if let Some(form) = memory.active_form.take() {
                    tracing::debug!(conversation_id, form = %form.name(), "Detached closed form");
                }
                return AgentOutput::empty();
            }
            Some(false) => {}
        }

        let message = match message {
            Some(message) => message.to_string(),
            None => memory.latest_user_message().unwrap_or_default().to_string(),
        };
        let Some(form) = memory.active_form.as_mut() else {
            return AgentOutput::empty();
        };

        let signal = self.interpreter.interpret(form, &message);
        match form.next(&signal) {
            Ok(step) => AgentOutput::direct(IntermediateStep::new(form.name(), "", step.output)),
            Err(e) => {
                tracing::error!(conversation_id, form = %form.name(), "Form step failed: {}", e);
                AgentOutput::empty()
            }
        }
    }
}
