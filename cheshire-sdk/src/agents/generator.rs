//! Generation backend
//!
//! The text generator is an external collaborator. Agents only see the
//! [`Generator`] trait; [`EchoGenerator`] answers without a model.

use async_trait::async_trait;

use super::output::IntermediateStep;

/// Everything the generator gets for one turn
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub input: String,
    pub chat_history: String,
    pub episodic_memory: Vec<String>,
    /// Tool calls already made this turn
    pub intermediate_steps: Vec<IntermediateStep>,
}

/// Plain generation fallback
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String>;
}

/// Generator that restates the input and whatever context it was given
#[derive(Debug, Clone, Default)]
pub struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String> {
        let mut reply = format!("You said: {}", request.input);

        for step in &request.intermediate_steps {
            reply.push_str(&format!("\n{} says: {}", step.tool, step.observation));
        }
        if !request.episodic_memory.is_empty() {
            reply.push_str(&format!(
                "\nI remember: {}",
                request.episodic_memory.join("; ")
            ));
        }

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_generator() {
        let request = GenerationRequest {
            input: "what time is it".into(),
            intermediate_steps: vec![IntermediateStep::new("clock", "", "noon")],
            episodic_memory: vec!["you asked yesterday".into()],
            ..Default::default()
        };

        let reply = EchoGenerator.generate(&request).await.unwrap();
        assert!(reply.starts_with("You said: what time is it"));
        assert!(reply.contains("clock says: noon"));
        assert!(reply.contains("I remember: you asked yesterday"));
    }
}
