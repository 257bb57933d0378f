//! Approval types for side-effecting tool calls.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

const CANCELLED_SUFFIX: &str = "cancelled by the user.";

/// Approval request type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    CommandExecution,
    Other,
}

/// A request for the user to confirm a tool call before it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub tool_use_id: String,
    pub kind: ApprovalKind,
    /// Short human-readable description of the change, e.g. the command line.
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Approval decision for a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Accept,
    Decline,
}

/// Async approval handler callback.
pub type ApprovalHandler =
    Arc<dyn Fn(ApprovalRequest) -> BoxFuture<'static, ApprovalDecision> + Send + Sync>;

/// Tool output reported when the user declines a change.
pub fn cancellation_message(summary: &str) -> String {
    format!("{summary} {CANCELLED_SUFFIX}")
}
