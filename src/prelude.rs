//! Convenience re-exports for common use.

pub use crate::agent::{
    JsonlSessionLog, Notifier, PersistenceSink, RecoveryOutcome, TurnOrchestrator, TurnOutcome,
    TurnStatus,
};
pub use crate::config::RtloopConfig;
pub use crate::error::{Result, RtloopError};
pub use crate::provider::{Completion, CompletionProvider, CompletionRequest};
pub use crate::realtime::RealtimeProvider;
pub use crate::tools::{Tool, ToolArguments, ToolExecutor, ToolOutput, ToolParameters, ToolRegistry};
pub use crate::types::{Content, Message, Role, ToolResult, ToolUse, Usage};
