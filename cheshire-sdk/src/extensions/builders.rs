//! Fluent Builder APIs for Extensions
//!
//! Provides ergonomic builder patterns for constructing extension components:
//! - `ToolBuilder` - Build tools with their handler
//! - `FormBuilder` - Build form definitions
//! - `PluginBuilder` - Bundle declarations into a [`Plugin`]
//!
//! # Example
//!
//! ```rust,ignore
//! use cheshire_sdk::extensions::builders::SDK;
//!
//! let clock = SDK::tool("clock")
//!     .description("Tells the time")
//!     .example("what time is it")
//!     .handler(|_input| async { Ok("noon".to_string()) });
//!
//! let plugin = SDK::plugin("clock")
//!     .name("Clock")
//!     .version("1.0.0")
//!     .tool(clock)
//!     .build();
//! ```

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use super::endpoints::CustomEndpoint;
use super::hooks::HookDeclaration;
use super::options::OptionDeclaration;
use super::tools::{Tool, ToolDefinition, ToolFuture, ToolHandler, ToolInput};
use super::types::{ExtensionManifest, Plugin, PluginDeclarations};
use crate::agents::{FormBehavior, FormDefinition, SlotSpec};

/// Builder for creating [`Tool`] instances with fluent API
#[derive(Debug, Clone)]
pub struct ToolBuilder {
    name: String,
    description: Option<String>,
    examples: Vec<String>,
    return_direct: bool,
    input_schema: Option<Value>,
    priority: i32,
}

impl ToolBuilder {
    /// Create a new tool builder with the given name
    ///
    /// # Arguments
    /// * `name` - Tool name, unique among active tools
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            examples: Vec::new(),
            return_direct: false,
            input_schema: None,
            priority: 1,
        }
    }

    /// Set the tool description
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Add an example message that should trigger the tool
    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    /// Return the observation to the user as-is
    pub fn return_direct(mut self) -> Self {
        self.return_direct = true;
        self
    }

    /// Set the input schema (JSON Schema)
    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Priority against tools of the same name
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Finish with the handler. The description defaults to the name.
    pub fn handler<F, Fut>(self, handler: F) -> Tool
    where
        F: Fn(ToolInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let description = self.description.clone().unwrap_or_else(|| self.name.clone());
        self.finish(description, handler)
    }

    /// Finish with the handler, returning an error if validation fails
    pub fn try_handler<F, Fut>(self, handler: F) -> Result<Tool, BuilderError>
    where
        F: Fn(ToolInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let description = self
            .description
            .clone()
            .ok_or(BuilderError::MissingField("description"))?;
        if let Some(schema) = &self.input_schema {
            if !schema.is_object() {
                return Err(BuilderError::InvalidValue {
                    field: "input_schema",
                    message: "must be a JSON object".into(),
                });
            }
        }
        Ok(self.finish(description, handler))
    }

    fn finish<F, Fut>(self, description: String, handler: F) -> Tool
    where
        F: Fn(ToolInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |input| Box::pin(handler(input)) as ToolFuture);
        Tool {
            definition: ToolDefinition {
                name: self.name,
                description,
                examples: self.examples,
                return_direct: self.return_direct,
                input_schema: self.input_schema,
            },
            priority: self.priority,
            handler,
        }
    }
}

/// Builder for creating [`FormDefinition`] instances with fluent API
#[derive(Clone)]
pub struct FormBuilder {
    definition: FormDefinition,
}

impl FormBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            definition: FormDefinition::new(name),
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.definition.description = desc.into();
        self
    }

    /// Add a required slot
    pub fn slot(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.definition.slots.push(SlotSpec::required(name, description));
        self
    }

    /// Add an optional slot
    pub fn optional_slot(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.definition.slots.push(SlotSpec::optional(name, description));
        self
    }

    /// Submit as soon as every required slot is filled
    pub fn no_confirm(mut self) -> Self {
        self.definition.ask_confirm = false;
        self
    }

    /// Add a phrase that starts the form
    pub fn start_example(mut self, phrase: impl Into<String>) -> Self {
        self.definition.start_examples.push(phrase.into());
        self
    }

    /// Add a phrase that aborts the form
    pub fn stop_example(mut self, phrase: impl Into<String>) -> Self {
        self.definition.stop_examples.push(phrase.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.definition.priority = priority;
        self
    }

    /// Custom submit and prompt texts
    pub fn behavior(mut self, behavior: Arc<dyn FormBehavior>) -> Self {
        self.definition.behavior = behavior;
        self
    }

    pub fn build(self) -> FormDefinition {
        self.definition
    }

    /// Build, rejecting forms with no slots or duplicate slot names
    pub fn try_build(self) -> Result<FormDefinition, BuilderError> {
        let slots = &self.definition.slots;
        if slots.is_empty() {
            return Err(BuilderError::MissingField("slots"));
        }
        for (i, slot) in slots.iter().enumerate() {
            if slot.name.trim().is_empty() {
                return Err(BuilderError::InvalidValue {
                    field: "slots",
                    message: "slot name is empty".into(),
                });
            }
            if slots[..i].iter().any(|s| s.name == slot.name) {
                return Err(BuilderError::InvalidValue {
                    field: "slots",
                    message: format!("duplicate slot '{}'", slot.name),
                });
            }
        }
        Ok(self.definition)
    }
}

/// Builder for a plugin with a fixed set of declarations
#[derive(Debug, Clone)]
pub struct PluginBuilder {
    manifest: ExtensionManifest,
    declarations: PluginDeclarations,
}

impl PluginBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            manifest: ExtensionManifest::new(id),
            declarations: PluginDeclarations::default(),
        }
    }

    /// Set the display name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.manifest.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.manifest.version = version.into();
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.manifest.description = desc.into();
        self
    }

    pub fn hook(mut self, hook: HookDeclaration) -> Self {
        self.declarations.hooks.push(hook);
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.declarations.tools.push(tool);
        self
    }

    pub fn option(mut self, option: OptionDeclaration) -> Self {
        self.declarations.options.push(option);
        self
    }

    pub fn form(mut self, form: FormDefinition) -> Self {
        self.declarations.forms.push(form);
        self
    }

    pub fn endpoint(mut self, endpoint: CustomEndpoint) -> Self {
        self.declarations.endpoints.push(endpoint);
        self
    }

    pub fn build(self) -> Arc<dyn Plugin> {
        Arc::new(StaticPlugin {
            manifest: self.manifest,
            declarations: self.declarations,
        })
    }
}

/// Plugin returning the same declarations on every load
struct StaticPlugin {
    manifest: ExtensionManifest,
    declarations: PluginDeclarations,
}

impl Plugin for StaticPlugin {
    fn id(&self) -> &str {
        &self.manifest.id
    }

    fn manifest(&self) -> ExtensionManifest {
        self.manifest.clone()
    }

    fn declare(&self, _settings: &Value) -> anyhow::Result<PluginDeclarations> {
        Ok(self.declarations.clone())
    }
}

/// Plugin whose declarations depend on its settings
pub struct FnPlugin<F> {
    id: String,
    declare: F,
}

impl<F> FnPlugin<F>
where
    F: Fn(&Value) -> anyhow::Result<PluginDeclarations> + Send + Sync + 'static,
{
    pub fn new(id: impl Into<String>, declare: F) -> Self {
        Self {
            id: id.into(),
            declare,
        }
    }
}

impl<F> Plugin for FnPlugin<F>
where
    F: Fn(&Value) -> anyhow::Result<PluginDeclarations> + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn declare(&self, settings: &Value) -> anyhow::Result<PluginDeclarations> {
        (self.declare)(settings)
    }
}

/// Error type for builder validation failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuilderError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field value: {field} - {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// SDK marker struct that provides fluent builder access
pub struct SDK;

impl SDK {
    /// Create a new tool builder
    pub fn tool(name: impl Into<String>) -> ToolBuilder {
        ToolBuilder::new(name)
    }

    /// Create a new form builder
    pub fn form(name: impl Into<String>) -> FormBuilder {
        FormBuilder::new(name)
    }

    /// Create a new plugin builder
    pub fn plugin(id: impl Into<String>) -> PluginBuilder {
        PluginBuilder::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionContext;
    use serde_json::json;

    #[tokio::test]
    async fn test_tool_builder_basic() {
        let tool = SDK::tool("clock")
            .example("what time is it")
            .return_direct()
            .handler(|input: ToolInput| async move { Ok::<_, anyhow::Error>(format!("noon for {}", input.input)) });

        assert_eq!(tool.definition.description, "clock");
        assert!(tool.definition.return_direct);
        assert_eq!(tool.priority, 1);

        let out = (tool.handler)(ToolInput {
            input: "me".into(),
            session: SessionContext::new("c1"),
        })
        .await
        .unwrap();
        assert_eq!(out, "noon for me");
    }

    #[test]
    fn test_tool_builder_try_handler_validation() {
        let err = SDK::tool("clock")
            .try_handler(|_| async { Ok::<_, anyhow::Error>(String::new()) })
            .unwrap_err();
        assert_eq!(err, BuilderError::MissingField("description"));

        let err = SDK::tool("clock")
            .description("time")
            .input_schema(json!("string"))
            .try_handler(|_| async { Ok::<_, anyhow::Error>(String::new()) })
            .unwrap_err();
        assert!(matches!(err, BuilderError::InvalidValue { field: "input_schema", .. }));
    }

    #[test]
    fn test_form_builder() {
        let form = SDK::form("book_flight")
            .slot("destination", "Where to")
            .optional_slot("seat", "Seat preference")
            .start_example("book a flight")
            .no_confirm()
            .build();
        assert_eq!(form.slots.len(), 2);
        assert!(!form.ask_confirm);
        assert!(!form.slots[1].required);

        let err = SDK::form("empty").try_build().unwrap_err();
        assert_eq!(err, BuilderError::MissingField("slots"));

        let err = SDK::form("dup").slot("a", "").slot("a", "").try_build().unwrap_err();
        assert!(matches!(err, BuilderError::InvalidValue { .. }));
    }

    #[test]
    fn test_plugin_builder() {
        let plugin = SDK::plugin("clock")
            .name("Clock")
            .version("1.2.0")
            .tool(SDK::tool("clock").handler(|_| async { Ok::<_, anyhow::Error>("noon".to_string()) }))
            .endpoint(CustomEndpoint::get("/time", |_| async { Ok::<_, anyhow::Error>(json!("noon")) }))
            .build();

        assert_eq!(plugin.id(), "clock");
        assert_eq!(plugin.manifest().name, "Clock");
        let declarations = plugin.declare(&Value::Null).unwrap();
        assert_eq!(declarations.tools.len(), 1);
        assert_eq!(declarations.endpoints.len(), 1);
    }

    #[test]
    fn test_fn_plugin_reads_settings() {
        let plugin = FnPlugin::new("greeter", |settings: &Value| {
            let name = settings["tool"].as_str().unwrap_or("greet").to_string();
            Ok(PluginDeclarations {
                tools: vec![SDK::tool(name).handler(|_| async { Ok::<_, anyhow::Error>("hi".to_string()) })],
                ..Default::default()
            })
        });

        let declarations = plugin.declare(&json!({"tool": "wave"})).unwrap();
        assert_eq!(declarations.tools[0].definition.name, "wave");
        assert_eq!(plugin.manifest().version, "0.1.0");
    }
}
