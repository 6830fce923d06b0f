//! Agent input and output types

use serde::{Deserialize, Serialize};

/// One reasoning or tool-call step taken while producing an output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntermediateStep {
    /// Tool (or form) name
    pub tool: String,
    /// Input handed to it
    pub input: String,
    /// What it returned
    pub observation: String,
}

impl IntermediateStep {
    pub fn new(
        tool: impl Into<String>,
        input: impl Into<String>,
        observation: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            input: input.into(),
            observation: observation.into(),
        }
    }
}

/// What an agent produced for a turn.
///
/// `output: None` means the agent had nothing to say and the next agent in
/// the chain should handle the turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentOutput {
    pub output: Option<String>,
    pub intermediate_steps: Vec<IntermediateStep>,
    /// Stop processing and return `output` verbatim
    pub return_direct: bool,
}

impl AgentOutput {
    /// No output; defer to the next agent
    pub fn empty() -> Self {
        Self::default()
    }

    /// Plain text output
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::default()
        }
    }

    /// Output that must be returned as-is, traced by one step
    pub fn direct(step: IntermediateStep) -> Self {
        Self {
            output: Some(step.observation.clone()),
            intermediate_steps: vec![step],
            return_direct: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_none()
    }
}

/// Input handed to the agent chain, exposed to `before_agent_starts`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentInput {
    /// The user message
    pub input: String,
    /// Memories recalled for this message
    pub episodic_memory: Vec<String>,
    /// Recent turns rendered as `role: text` lines
    pub chat_history: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_output() {
        let out = AgentOutput::direct(IntermediateStep::new("book_flight", "", "Confirm?"));
        assert_eq!(out.output.as_deref(), Some("Confirm?"));
        assert!(out.return_direct);
        assert_eq!(out.intermediate_steps.len(), 1);
    }

    #[test]
    fn test_partial_json_deserializes() {
        let out: AgentOutput = serde_json::from_value(json!({"output": "meow"})).unwrap();
        assert_eq!(out, AgentOutput::text("meow"));
        assert!(AgentOutput::empty().is_empty());
    }
}
