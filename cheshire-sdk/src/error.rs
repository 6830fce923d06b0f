//! SDK Error Types
//!
//! Defines the error taxonomy shared by the registries and the dispatch core.
//!
//! Registry and resolution errors are recoverable and isolated at the
//! smallest scope (one handler, one slot, one endpoint). `StateViolation`
//! and `InvalidRegistration` indicate programmer errors and are always
//! surfaced to the caller.

use thiserror::Error;

/// SDK Result type alias
pub type SDKResult<T> = Result<T, SDKError>;

/// SDK errors
#[derive(Debug, Error)]
pub enum SDKError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Malformed extension-point registration
    #[error("invalid registration: {message}")]
    InvalidRegistration { message: String },

    /// A hook handler failed (isolated; the fold continues)
    #[error("hook handler '{source_id}' failed on '{hook}': {message}")]
    HandlerFailure {
        hook: String,
        source_id: String,
        message: String,
    },

    /// An option replacement failed to construct
    #[error("component for slot '{slot}' failed to initialize: {message}")]
    ComponentInit { slot: String, message: String },

    /// Route attach/detach failed
    #[error("endpoint activation failed for '{endpoint}': {message}")]
    Activation { endpoint: String, message: String },

    /// A form step failed
    #[error("form step failed: {message}")]
    FormStep { message: String },

    /// Contract violation (e.g. advancing a closed form)
    #[error("state violation: {message}")]
    StateViolation { message: String },

    /// Extension error
    #[error("extension error: {message}")]
    Extension { message: String },

    /// Memory (working or vector) error
    #[error("memory error: {message}")]
    Memory { message: String },

    /// Entry not found
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// Timeout error
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SDKError {
    /// Create an invalid registration error
    pub fn invalid_registration(message: impl Into<String>) -> Self {
        Self::InvalidRegistration {
            message: message.into(),
        }
    }

    /// Create a handler failure error
    pub fn handler_failure(
        hook: impl Into<String>,
        source_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::HandlerFailure {
            hook: hook.into(),
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    /// Create a component init error
    pub fn component_init(slot: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ComponentInit {
            slot: slot.into(),
            message: message.into(),
        }
    }

    /// Create an activation error
    pub fn activation(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Activation {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a form step error
    pub fn form_step(message: impl Into<String>) -> Self {
        Self::FormStep {
            message: message.into(),
        }
    }

    /// Create a state violation error
    pub fn state_violation(message: impl Into<String>) -> Self {
        Self::StateViolation {
            message: message.into(),
        }
    }

    /// Create an extension error
    pub fn extension(message: impl Into<String>) -> Self {
        Self::Extension {
            message: message.into(),
        }
    }

    /// Create a memory error
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error marks a programmer error rather than a runtime fault
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            Self::StateViolation { .. } | Self::InvalidRegistration { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SDKError::activation("/custom/hello", "route table closed");
        assert!(err.to_string().contains("/custom/hello"));
        assert!(err.to_string().contains("route table closed"));

        let err = SDKError::not_found("Extension", "weather");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Extension"));
        assert!(err.to_string().contains("weather"));

        let err = SDKError::timeout(5000);
        assert!(err.is_timeout());
        assert!(err.to_string().contains("5000"));
    }

    #[test]
    fn test_defect_classification() {
        assert!(SDKError::state_violation("form closed").is_defect());
        assert!(SDKError::invalid_registration("empty point").is_defect());
        assert!(!SDKError::component_init("main_agent", "boom").is_defect());
        assert!(!SDKError::handler_failure("hook", "ext", "boom").is_defect());
    }
}
