//! Form State Machine
//!
//! A form is a multi-turn slot-filling dialogue owned by one conversation.
//!
//! ```text
//!              Fill (partial)
//!              ┌──────────┐
//!              ▼          │
//!         ┌────────────┐──┘      all required slots filled
//!         │ Collecting │ ─────────────────────────────────┐
//!         └────────────┘                                  ▼
//!               │                           ┌───────────────────────┐
//!               │ Abort                     │ AwaitingConfirmation  │◄─┐ Fill
//!               ▼                           └───────────────────────┘──┘
//!         ┌────────────┐   Confirm (completed) /  │
//!         │   Closed   │◄─────────────────────────┘
//!         └────────────┘   Cancel, Abort (abandoned)
//! ```
//!
//! [`Form::next`] performs exactly one transition. Advancing a closed form
//! is a [`FormError::StateViolation`]; the dispatcher detaches closed forms
//! before that can happen.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::extensions::priority::PriorityRegistry;
use crate::{SDKError, SDKResult};

// ─────────────────────────────────────────────────────────────────────────────
// Definitions
// ─────────────────────────────────────────────────────────────────────────────

/// A slot the form collects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl SlotSpec {
    /// Required slot
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    /// Optional slot
    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, description)
        }
    }
}

/// Form-specific behaviour: submission and the texts shown to the user.
pub trait FormBehavior: Send + Sync {
    /// Called once when the form completes; the result is the turn output.
    fn submit(
        &self,
        form: &FormDefinition,
        values: &BTreeMap<String, Value>,
    ) -> anyhow::Result<String>;

    /// Prompt while required slots are still missing
    fn prompt_missing(
        &self,
        form: &FormDefinition,
        values: &BTreeMap<String, Value>,
        missing: &[&SlotSpec],
    ) -> String {
        let needed: Vec<String> = missing
            .iter()
            .map(|slot| {
                if slot.description.is_empty() {
                    slot.name.clone()
                } else {
                    format!("{} ({})", slot.name, slot.description)
                }
            })
            .collect();

        let summary = render_values(values);
        if summary.is_empty() {
            format!("To {} I need: {}", form.name, needed.join(", "))
        } else {
            format!("{}\nI still need: {}", summary, needed.join(", "))
        }
    }

    /// Prompt once every required slot is filled
    fn prompt_confirm(&self, _form: &FormDefinition, values: &BTreeMap<String, Value>) -> String {
        format!("{}\nConfirm? Yes or no?", render_values(values))
    }

    /// Output when the form is cancelled or aborted
    fn abandoned(&self, form: &FormDefinition) -> String {
        format!("Ok, {} cancelled.", form.name)
    }
}

/// Behaviour used when a form does not supply its own
#[derive(Debug, Clone, Default)]
pub struct DefaultFormBehavior;

impl FormBehavior for DefaultFormBehavior {
    fn submit(
        &self,
        form: &FormDefinition,
        values: &BTreeMap<String, Value>,
    ) -> anyhow::Result<String> {
        Ok(format!("{} completed.\n{}", form.name, render_values(values)))
    }
}

/// `slot: value` lines, in slot-name order
pub fn render_values(values: &BTreeMap<String, Value>) -> String {
    values
        .iter()
        .map(|(name, value)| match value {
            Value::String(s) => format!("{}: {}", name, s),
            other => format!("{}: {}", name, other),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Static description of a form, as declared by an extension
#[derive(Clone)]
pub struct FormDefinition {
    /// Unique form name, e.g. `book_flight`
    pub name: String,
    pub description: String,
    pub slots: Vec<SlotSpec>,
    /// Ask the user to confirm before submitting
    pub ask_confirm: bool,
    /// Phrases that start the form
    pub start_examples: Vec<String>,
    /// Phrases that abort the form
    pub stop_examples: Vec<String>,
    /// Priority among forms of the same name (default 1)
    pub priority: i32,
    pub behavior: Arc<dyn FormBehavior>,
}

impl FormDefinition {
    /// New form with the default behaviour and confirmation enabled
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            slots: Vec::new(),
            ask_confirm: true,
            start_examples: Vec::new(),
            stop_examples: Vec::new(),
            priority: 1,
            behavior: Arc::new(DefaultFormBehavior),
        }
    }

    /// Look up a slot by name
    pub fn slot(&self, name: &str) -> Option<&SlotSpec> {
        self.slots.iter().find(|s| s.name == name)
    }
}

impl std::fmt::Debug for FormDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormDefinition")
            .field("name", &self.name)
            .field("slots", &self.slots)
            .field("ask_confirm", &self.ask_confirm)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State Machine
// ─────────────────────────────────────────────────────────────────────────────

/// How a closed form ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormOutcome {
    Completed,
    Abandoned,
}

/// Form lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormState {
    Collecting,
    AwaitingConfirmation,
    Closed(FormOutcome),
}

impl FormState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Interpreted user input for one form turn
#[derive(Debug, Clone, PartialEq)]
pub enum FormSignal {
    /// Slot values extracted from the message (may be empty)
    Fill(BTreeMap<String, Value>),
    Confirm,
    Cancel,
    Abort,
}

/// Result of one successful transition
#[derive(Debug, Clone, PartialEq)]
pub struct FormStep {
    /// Agent-visible output for the turn
    pub output: String,
    /// State after the transition
    pub state: FormState,
}

/// Form errors
#[derive(Debug, Error)]
pub enum FormError {
    #[error("form '{form}' is closed and cannot advance")]
    StateViolation { form: String },

    #[error("form '{form}' step failed: {message}")]
    Step { form: String, message: String },
}

impl From<FormError> for SDKError {
    fn from(err: FormError) -> Self {
        match err {
            FormError::StateViolation { .. } => SDKError::state_violation(err.to_string()),
            FormError::Step { .. } => SDKError::form_step(err.to_string()),
        }
    }
}

/// Serializable view of a form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSnapshot {
    pub name: String,
    pub state: FormState,
    pub values: BTreeMap<String, Value>,
}

/// A running form instance
#[derive(Debug, Clone)]
pub struct Form {
    definition: FormDefinition,
    state: FormState,
    values: BTreeMap<String, Value>,
    conversation_id: String,
    turns: usize,
}

impl Form {
    /// Start a form for a conversation, with no slots filled
    pub fn new(definition: FormDefinition, conversation_id: impl Into<String>) -> Self {
        Self {
            definition,
            state: FormState::Collecting,
            values: BTreeMap::new(),
            conversation_id: conversation_id.into(),
            turns: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &FormDefinition {
        &self.definition
    }

    pub fn state(&self) -> FormState {
        self.state
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Transitions taken so far; zero until the form has prompted once
    pub fn turns(&self) -> usize {
        self.turns
    }

    /// Required slots without a value
    pub fn missing_slots(&self) -> Vec<&SlotSpec> {
        missing(&self.definition, &self.values)
    }

    pub fn snapshot(&self) -> FormSnapshot {
        FormSnapshot {
            name: self.definition.name.clone(),
            state: self.state,
            values: self.values.clone(),
        }
    }

    /// Advance the form by exactly one transition.
    ///
    /// On error the form is left unchanged.
    pub fn next(&mut self, signal: &FormSignal) -> Result<FormStep, FormError> {
        let def = &self.definition;
        let behavior = def.behavior.clone();
        let mut values = self.values.clone();

        let (state, output) = match (self.state, signal) {
            (FormState::Closed(_), _) => {
                return Err(FormError::StateViolation {
                    form: def.name.clone(),
                });
            }

            (_, FormSignal::Abort) => (
                FormState::Closed(FormOutcome::Abandoned),
                behavior.abandoned(def),
            ),

            (FormState::Collecting, FormSignal::Fill(update)) => {
                merge(def, &mut values, update);
                let missing = missing(def, &values);
                if !missing.is_empty() {
                    let prompt = behavior.prompt_missing(def, &values, &missing);
                    (FormState::Collecting, prompt)
                } else if def.ask_confirm {
                    (
                        FormState::AwaitingConfirmation,
                        behavior.prompt_confirm(def, &values),
                    )
                } else {
                    let output = submit(def, &values)?;
                    (FormState::Closed(FormOutcome::Completed), output)
                }
            }

            (FormState::Collecting, FormSignal::Confirm | FormSignal::Cancel) => {
                let missing = missing(def, &values);
                (
                    FormState::Collecting,
                    behavior.prompt_missing(def, &values, &missing),
                )
            }

            (FormState::AwaitingConfirmation, FormSignal::Confirm) => {
                let output = submit(def, &values)?;
                (FormState::Closed(FormOutcome::Completed), output)
            }

            (FormState::AwaitingConfirmation, FormSignal::Cancel) => (
                FormState::Closed(FormOutcome::Abandoned),
                behavior.abandoned(def),
            ),

            (FormState::AwaitingConfirmation, FormSignal::Fill(update)) => {
                merge(def, &mut values, update);
                (
                    FormState::AwaitingConfirmation,
                    behavior.prompt_confirm(def, &values),
                )
            }
        };

        tracing::debug!(
            form = %self.definition.name,
            conversation_id = %self.conversation_id,
            from = ?self.state,
            to = ?state,
            "Form transition"
        );

        self.values = values;
        self.state = state;
        self.turns += 1;
        Ok(FormStep { output, state })
    }
}

fn missing<'a>(def: &'a FormDefinition, values: &BTreeMap<String, Value>) -> Vec<&'a SlotSpec> {
    def.slots
        .iter()
        .filter(|slot| slot.required && !values.contains_key(&slot.name))
        .collect()
}

fn merge(def: &FormDefinition, values: &mut BTreeMap<String, Value>, update: &BTreeMap<String, Value>) {
    for (name, value) in update {
        if def.slot(name).is_none() {
            tracing::debug!(form = %def.name, slot = %name, "Ignoring unknown slot");
            continue;
        }
        match value {
            Value::Null => {}
            Value::String(s) if s.trim().is_empty() => {}
            _ => {
                values.insert(name.clone(), value.clone());
            }
        }
    }
}

fn submit(def: &FormDefinition, values: &BTreeMap<String, Value>) -> Result<String, FormError> {
    def.behavior
        .submit(def, values)
        .map_err(|e| FormError::Step {
            form: def.name.clone(),
            message: format!("{:#}", e),
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Interpretation
// ─────────────────────────────────────────────────────────────────────────────

/// Turns the latest user message into a [`FormSignal`]
pub trait FormInterpreter: Send + Sync {
    fn interpret(&self, form: &Form, message: &str) -> FormSignal;
}

const CONFIRM_WORDS: &[&str] = &["yes", "y", "confirm", "ok", "okay", "sure", "correct"];
const CANCEL_WORDS: &[&str] = &["no", "n", "cancel", "wrong", "nope"];

/// Keyword-based interpreter.
///
/// Recognises, in order: the form's stop phrases, `slot: value` or
/// `slot = value` pairs, confirm/cancel words, and finally a bare answer
/// when exactly one required slot is missing and the form has already asked
/// for it.
#[derive(Debug, Clone, Default)]
pub struct KeywordInterpreter;

impl KeywordInterpreter {
    fn pairs(form: &Form, message: &str) -> BTreeMap<String, Value> {
        let mut values = BTreeMap::new();
        for part in message.split([',', ';', '\n']) {
            let Some((key, value)) = part.split_once(':').or_else(|| part.split_once('=')) else {
                continue;
            };
            let key = key.trim().to_lowercase().replace(' ', "_");
            let value = value.trim();
            if !value.is_empty() && form.definition().slot(&key).is_some() {
                values.insert(key, Value::String(value.to_string()));
            }
        }
        values
    }
}

impl FormInterpreter for KeywordInterpreter {
    fn interpret(&self, form: &Form, message: &str) -> FormSignal {
        let lower = message.trim().to_lowercase();

        if form
            .definition()
            .stop_examples
            .iter()
            .any(|stop| !stop.is_empty() && lower.contains(&stop.to_lowercase()))
        {
            return FormSignal::Abort;
        }

        let pairs = Self::pairs(form, message);
        if !pairs.is_empty() {
            return FormSignal::Fill(pairs);
        }

        let word = lower.trim_matches(|c: char| !c.is_alphanumeric());
        if CONFIRM_WORDS.contains(&word) {
            return FormSignal::Confirm;
        }
        if CANCEL_WORDS.contains(&word) {
            return FormSignal::Cancel;
        }

        let missing = form.missing_slots();
        if form.state() == FormState::Collecting
            && form.turns() > 0
            && missing.len() == 1
            && !word.is_empty()
        {
            let mut values = BTreeMap::new();
            values.insert(
                missing[0].name.clone(),
                Value::String(message.trim().to_string()),
            );
            return FormSignal::Fill(values);
        }

        FormSignal::Fill(BTreeMap::new())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Form Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Priority registry of form definitions keyed by form name
#[derive(Default)]
pub struct FormRegistry {
    registry: PriorityRegistry<FormDefinition>,
}

impl FormRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a form contributed by `source`
    pub async fn register(&self, form: &FormDefinition, source: &str) -> SDKResult<u64> {
        self.registry
            .register(&form.name, source, form.priority, form.clone())
            .await
    }

    /// Remove every form contributed by `source`
    pub async fn unregister_source(&self, source: &str) -> usize {
        self.registry.unregister_source(source).await
    }

    /// Winning definition for `name`
    pub async fn get(&self, name: &str) -> Option<FormDefinition> {
        self.registry.head(name).await.map(|h| h.payload)
    }

    /// Extension that provides the winning form for `name`
    pub async fn provider(&self, name: &str) -> Option<String> {
        self.registry.head(name).await.map(|h| h.source)
    }

    /// Winning definition of every form, sorted by name
    pub async fn list(&self) -> Vec<FormDefinition> {
        let mut forms = Vec::new();
        for name in self.registry.points().await {
            if let Some(form) = self.get(&name).await {
                forms.push(form);
            }
        }
        forms
    }

    /// Form whose start phrase occurs in `message`; the longest phrase wins.
    pub async fn match_trigger(&self, message: &str) -> Option<FormDefinition> {
        let lower = message.to_lowercase();
        let mut best: Option<(usize, FormDefinition)> = None;

        for form in self.list().await {
            let longest = form
                .start_examples
                .iter()
                .map(|example| example.to_lowercase())
                .filter(|example| !example.is_empty() && lower.contains(example.as_str()))
                .map(|example| example.len())
                .max();

            if let Some(len) = longest {
                if best.as_ref().is_none_or(|(best_len, _)| len > *best_len) {
                    best = Some((len, form));
                }
            }
        }

        best.map(|(_, form)| form)
    }
}
