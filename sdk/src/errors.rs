//! Error types and handling
//!
//! This module provides the error types shared by the Kestrel engine and the
//! state reader. All errors implement the `EngineErrorExt` trait which provides
//! user-friendly hints and classifies errors for the retry layer.
//!
//! # Taxonomy
//!
//! - **StoreUnavailable**: transient storage fault, retried with backoff
//! - **AdmissionDenied**: not a failure, a control-flow signal to throttle
//! - **LLMCallFailed**: transient when the provider reported a retryable status
//! - **ActionExecutionFailed**: recorded on the action, never thrown out of the loop
//! - **Cancelled**: propagated immediately, never retried

use thiserror::Error;

/// Result alias used by store contracts and shared helpers
pub type Result<T> = std::result::Result<T, EngineError>;

/// Trait for Kestrel error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints, recoverability and whether a retry may succeed.
pub trait EngineErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display and never echoes internal payloads.
    fn user_hint(&self) -> &str;

    /// Returns whether the agent can keep running after this error
    fn is_recoverable(&self) -> bool;

    /// Returns whether retrying the same operation may succeed
    fn is_transient(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, EngineErrorExt};
///
/// let error = EngineError::StoreUnavailable("pool timed out".to_string());
/// assert!(error.is_transient());
///
/// let cancelled = EngineError::Cancelled;
/// assert!(!cancelled.is_transient());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Storage errors
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Admission control
    #[error("Admission denied: {0}")]
    AdmissionDenied(String),

    // LLM collaborator errors
    #[error("LLM call failed: {message}")]
    LLMCallFailed { message: String, transient: bool },

    #[error("LLM call timed out")]
    LLMTimeout,

    // Tool / action errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Action {id} failed: {reason}")]
    ActionExecutionFailed { id: String, reason: String },

    // State errors
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid action transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    // Lifecycle
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Daemon already running")]
    DaemonAlreadyRunning,

    #[error("Path outside workspace: {0:?}")]
    PathOutsideWorkspace(std::path::PathBuf),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Transient LLM failure (HTTP 429/5xx, connection reset)
    pub fn llm_transient(message: impl Into<String>) -> Self {
        Self::LLMCallFailed {
            message: message.into(),
            transient: true,
        }
    }

    /// Non-transient LLM failure; aborts the current iteration only
    pub fn llm_fatal(message: impl Into<String>) -> Self {
        Self::LLMCallFailed {
            message: message.into(),
            transient: false,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl EngineErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::StoreUnavailable(_) => "Storage is temporarily unavailable. It will be retried",
            Self::Database(_) => "Database operation failed. Try restarting the agent",
            Self::Serialization(_) => "Stored record could not be decoded",

            Self::AdmissionDenied(_) => "Daily budget reached. The agent resumes after midnight UTC",

            Self::LLMCallFailed { .. } => "LLM provider unavailable. Check that it is running",
            Self::LLMTimeout => "LLM provider took too long to respond",

            Self::ToolNotFound(_) => "The requested tool is not available",
            Self::ToolError(_) => "Tool operation failed",
            Self::ActionExecutionFailed { .. } => "An action failed. See the action output",

            Self::UnknownAction(_) => "The action is no longer tracked by the agent",
            Self::InvalidTransition { .. } => "Finished actions cannot be reopened",

            Self::Cancelled => "The agent is shutting down",
            Self::DaemonAlreadyRunning => "Stop the existing agent first with 'kestrel stop'",
            Self::PathOutsideWorkspace(_) => "Operation must be within workspace",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled | Self::DaemonAlreadyRunning | Self::Config(_)
        )
    }

    fn is_transient(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) | Self::LLMTimeout => true,
            Self::LLMCallFailed { transient, .. } => *transient,
            _ => false,
        }
    }
}
