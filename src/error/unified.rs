//! Error classification and recovery hints.

use serde::{Deserialize, Serialize};
use strum::Display;

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    Connection,
    Protocol,
    Limit,
    Timeout,
    ToolExecution,
    Interrupted,
    Configuration,
    Serialization,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryNewTurn,
    CheckCredentials,
    CheckConfiguration,
    IncreaseTimeout,
    ReduceToolUsage,
    CheckToolImplementation,
    ContactSupport,
    None,
}
