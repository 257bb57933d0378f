//! Completion provider seam between the turn loop and the remote service.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::RtloopError;
use crate::tools::ToolSpec;
use crate::types::{Message, ToolResult, Usage};

/// A request for one completed reply.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    /// System instructions for this generation.
    pub system: &'a str,
    /// Conversation so far. The last message is the one being answered.
    pub messages: &'a [Message],
    /// Tools the model may call.
    pub tools: &'a [ToolSpec],
}

/// A completed reply from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Assistant message: text and tool requests in arrival order.
    pub message: Message,
    pub usage: Usage,
    /// Results for tool requests the provider already executed while
    /// streaming, in request order.
    pub tool_results: Vec<ToolResult>,
}

impl Completion {
    pub fn new(message: Message, usage: Usage) -> Self {
        Self {
            message,
            usage,
            tool_results: Vec::new(),
        }
    }
}

/// Core trait implemented by completion providers.
#[async_trait]
pub trait CompletionProvider: Send {
    /// Provider name (e.g., "openai-realtime").
    fn provider_name(&self) -> &str;

    /// Called once at the start of every user turn.
    fn begin_turn(&mut self) {}

    /// Tool calls opened since the current turn began.
    fn tool_call_count(&self) -> usize {
        0
    }

    /// Obtain one completed reply.
    ///
    /// Fails with `Protocol`, `Connection`, `LimitExceeded`, `Timeout` or
    /// `Interrupted`; never returns a partially-formed reply as success.
    async fn complete(
        &mut self,
        request: CompletionRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Completion, RtloopError>;

    /// Content streamed by the last failed `complete` call, including tool
    /// requests the provider already executed. Taking it clears it.
    fn take_partial(&mut self) -> Option<Completion> {
        None
    }

    /// Release any held connection.
    async fn close(&mut self) {}
}
