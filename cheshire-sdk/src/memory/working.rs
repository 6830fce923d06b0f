//! Working Memory Store
//!
//! Per-conversation state keyed by conversation id: the append-only turn
//! history and at most one active form.
//!
//! The store guarantees only that the id → state mapping is safe under
//! concurrent access. Each entry sits behind its own mutex, held by the
//! turn currently processing that conversation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::agents::form::{Form, FormSnapshot};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Agent trace for assistant turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why: Option<Value>,
}

/// State of one conversation
#[derive(Debug)]
pub struct WorkingMemory {
    pub conversation_id: String,
    pub history: Vec<TurnRecord>,
    /// At most one form per conversation
    pub active_form: Option<Form>,
    /// Turns rendered by [`WorkingMemory::snapshot`]
    max_history: usize,
}

impl WorkingMemory {
    pub fn new(conversation_id: impl Into<String>, max_history: usize) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            history: Vec::new(),
            active_form: None,
            max_history,
        }
    }

    /// Append a user turn
    pub fn record_user(&mut self, text: impl Into<String>) {
        self.push(TurnRecord {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            why: None,
        });
    }

    /// Append an assistant turn with its trace
    pub fn record_assistant(&mut self, text: impl Into<String>, why: Option<Value>) {
        self.push(TurnRecord {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            why,
        });
    }

    fn push(&mut self, record: TurnRecord) {
        self.history.push(record);
    }

    /// Text of the most recent user turn
    pub fn latest_user_message(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|r| r.role == Role::User)
            .map(|r| r.text.as_str())
    }

    /// Last `n` turns, oldest first
    pub fn recent(&self, n: usize) -> &[TurnRecord] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// View of the conversation with its last `max_history` turns
    pub fn snapshot(&self) -> WorkingMemorySnapshot {
        WorkingMemorySnapshot {
            conversation_id: self.conversation_id.clone(),
            total_turns: self.history.len(),
            history: self.recent(self.max_history).to_vec(),
            active_form: self.active_form.as_ref().map(Form::snapshot),
        }
    }
}

/// Serializable view of a conversation's working memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemorySnapshot {
    pub conversation_id: String,
    /// Turns in the full log; may exceed `history.len()`
    #[serde(default)]
    pub total_turns: usize,
    pub history: Vec<TurnRecord>,
    pub active_form: Option<FormSnapshot>,
}

/// Concurrency-safe map from conversation id to working memory
pub struct WorkingMemoryStore {
    memories: RwLock<HashMap<String, Arc<Mutex<WorkingMemory>>>>,
    max_history: usize,
}

impl WorkingMemoryStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            memories: RwLock::new(HashMap::new()),
            max_history: max_history.max(1),
        }
    }

    /// Working memory for `conversation_id`, created on first access
    pub async fn get(&self, conversation_id: &str) -> Arc<Mutex<WorkingMemory>> {
        if let Some(memory) = self.memories.read().await.get(conversation_id) {
            return memory.clone();
        }

        let mut memories = self.memories.write().await;
        memories
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(conversation_id, "Creating working memory");
                Arc::new(Mutex::new(WorkingMemory::new(
                    conversation_id,
                    self.max_history,
                )))
            })
            .clone()
    }

    /// Existing working memory, without creating one
    pub async fn existing(&self, conversation_id: &str) -> Option<Arc<Mutex<WorkingMemory>>> {
        self.memories.read().await.get(conversation_id).cloned()
    }

    pub async fn contains(&self, conversation_id: &str) -> bool {
        self.memories.read().await.contains_key(conversation_id)
    }

    /// Ids of all conversations, sorted
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.memories.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Destroy a conversation's working memory. Returns whether it existed.
    pub async fn reset(&self, conversation_id: &str) -> bool {
        let removed = self.memories.write().await.remove(conversation_id).is_some();
        if removed {
            tracing::info!(conversation_id, "Reset working memory");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.memories.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for WorkingMemoryStore {
    fn default() -> Self {
        Self::new(crate::config::WorkingMemoryConfig::default().max_history)
    }
}
