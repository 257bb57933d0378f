//! Error types for rtloop.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

use crate::provider::Completion;

/// Primary error type for all rtloop operations.
#[derive(Error, Debug)]
pub enum RtloopError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Tool call limit of {limit} reached for this turn")]
    LimitExceeded { limit: usize },

    #[error("No terminal event within {after_ms}ms")]
    Timeout {
        after_ms: u64,
        /// Reply content accumulated before the receive window expired.
        partial: Option<Box<Completion>>,
    },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Interrupted by the user")]
    Interrupted,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RtloopError {
    /// Create a timeout error without partial content.
    pub fn timeout(after_ms: u64) -> Self {
        Self::Timeout {
            after_ms,
            partial: None,
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::Connection(_) | Self::Io(_) => ErrorCategory::Connection,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::LimitExceeded { .. } => ErrorCategory::Limit,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Interrupted => ErrorCategory::Interrupted,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::InvalidArgument(_) | Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether a new turn may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Timeout
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::Connection => RecoverySuggestion::RetryNewTurn,
            ErrorCategory::Protocol => RecoverySuggestion::RetryNewTurn,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Limit => RecoverySuggestion::ReduceToolUsage,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolImplementation,
            ErrorCategory::Interrupted => RecoverySuggestion::None,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RtloopError>;
