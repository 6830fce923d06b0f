//! Session context
//!
//! Identity of the caller for one turn or request. The host never
//! authenticates; the server fills this in from request headers.

use serde::{Deserialize, Serialize};

/// Conversation and user identity for a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Conversation (working memory) id
    pub conversation_id: String,
    /// Authenticated user, when known
    pub user_id: Option<String>,
}

impl SessionContext {
    /// Create a session for a conversation
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: None,
        }
    }

    /// Attach a user id
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}
