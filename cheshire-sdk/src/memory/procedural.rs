//! Procedural Memory
//!
//! Mirrors the available procedures (tools and forms) into the `procedural`
//! collection so they can be recalled by similarity. Every trigger text
//! becomes one point: a procedure's description plus each of its start
//! examples.
//!
//! The collection is rebuilt from the registries on every refresh; it is
//! never written through the memory API.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use super::vector::VectorMemory;
use crate::SDKResult;
use crate::agents::FormRegistry;
use crate::extensions::tools::ToolRegistry;

/// Collection holding embedded procedures
pub const PROCEDURAL_COLLECTION: &str = "procedural";

/// Kind of procedure a point was embedded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    Tool,
    Form,
}

impl ProcedureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Form => "form",
        }
    }
}

struct Trigger {
    procedure: String,
    kind: ProcedureKind,
    trigger_type: &'static str,
    text: String,
    extension: Option<String>,
}

/// Keeps the procedural collection in sync with the tool and form registries
pub struct ProceduralMemory {
    tools: Arc<ToolRegistry>,
    forms: Arc<FormRegistry>,
    vectors: Arc<dyn VectorMemory>,
}

impl ProceduralMemory {
    pub fn new(
        tools: Arc<ToolRegistry>,
        forms: Arc<FormRegistry>,
        vectors: Arc<dyn VectorMemory>,
    ) -> Self {
        Self {
            tools,
            forms,
            vectors,
        }
    }

    /// Replace the collection with the triggers of every winning tool and
    /// form. Returns how many points were stored.
    pub async fn refresh(&self) -> SDKResult<usize> {
        let triggers = self.triggers().await;

        self.vectors.wipe(PROCEDURAL_COLLECTION).await?;
        for trigger in &triggers {
            let vector = self.vectors.embed(&trigger.text).await?;
            self.vectors
                .upsert(
                    PROCEDURAL_COLLECTION,
                    trigger.text.clone(),
                    vector,
                    trigger.metadata(),
                )
                .await?;
        }

        tracing::debug!(points = triggers.len(), "Refreshed procedural memory");
        Ok(triggers.len())
    }

    async fn triggers(&self) -> Vec<Trigger> {
        let mut triggers = Vec::new();

        for tool in self.tools.list().await {
            let extension = self.tools.provider(&tool.name).await;
            push_triggers(
                &mut triggers,
                &tool.name,
                ProcedureKind::Tool,
                &tool.description,
                &tool.examples,
                extension,
            );
        }
        for form in self.forms.list().await {
            let extension = self.forms.provider(&form.name).await;
            push_triggers(
                &mut triggers,
                &form.name,
                ProcedureKind::Form,
                &form.description,
                &form.start_examples,
                extension,
            );
        }

        triggers
    }
}

fn push_triggers(
    triggers: &mut Vec<Trigger>,
    procedure: &str,
    kind: ProcedureKind,
    description: &str,
    examples: &[String],
    extension: Option<String>,
) {
    let texts = std::iter::once(("description", description))
        .chain(examples.iter().map(|e| ("start_example", e.as_str())))
        .filter(|(_, text)| !text.trim().is_empty());

    for (trigger_type, text) in texts {
        triggers.push(Trigger {
            procedure: procedure.to_string(),
            kind,
            trigger_type,
            text: text.to_string(),
            extension: extension.clone(),
        });
    }
}

impl Trigger {
    fn metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("source".into(), json!(self.procedure));
        metadata.insert("type".into(), json!(self.kind.as_str()));
        metadata.insert("trigger_type".into(), json!(self.trigger_type));
        if let Some(extension) = &self.extension {
            metadata.insert("extension".into(), json!(extension));
        }
        metadata
    }
}
