//! Event-at-a-time state machine that turns server events into a reply.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::connection::{ConnectionManager, Received};
use super::events::{ClientEvent, ServerEvent};
use crate::agent::notifier::Notifier;
use crate::error::RtloopError;
use crate::provider::Completion;
use crate::tools::ToolExecutor;
use crate::types::{Content, Message, Role, ToolResult, ToolUse, Usage};

/// Reply under construction: text and tool requests in arrival order.
#[derive(Debug, Default)]
struct ReplyBuilder {
    content: Vec<Content>,
    pending_text: String,
    full_text: String,
    tool_results: Vec<ToolResult>,
}

impl ReplyBuilder {
    fn push_text(&mut self, delta: &str) {
        self.pending_text.push_str(delta);
        self.full_text.push_str(delta);
    }

    fn push_tool_call(&mut self, tool_use: ToolUse, result: ToolResult) {
        self.flush_text();
        self.content.push(Content::ToolUse(tool_use));
        self.tool_results.push(result);
    }

    fn flush_text(&mut self) {
        if !self.pending_text.is_empty() {
            let text = std::mem::take(&mut self.pending_text);
            self.content.push(Content::text(text));
        }
    }

    fn is_empty(&self) -> bool {
        self.content.is_empty() && self.pending_text.is_empty()
    }

    fn has_tool_calls(&self) -> bool {
        !self.tool_results.is_empty()
    }

    fn finish(mut self) -> Completion {
        self.flush_text();
        Completion {
            usage: Usage::estimate_from_text(&self.full_text),
            message: Message::new(Role::Assistant, self.content),
            tool_results: self.tool_results,
        }
    }
}

enum Step {
    Continue,
    Done,
}

/// A response that ended without `response.done`.
#[derive(Debug)]
pub struct ResponseError {
    pub error: RtloopError,
    /// What had streamed before the failure. Kept on a timeout, and on any
    /// other failure once a tool has run, so executed calls stay on record.
    pub partial: Option<Completion>,
}

/// Drives one response from `response.create` to a terminal event.
pub struct EventDispatcher<'a> {
    executor: &'a ToolExecutor,
    notifier: &'a dyn Notifier,
    max_malformed_events: usize,
    malformed_events: usize,
    reply: ReplyBuilder,
}

impl<'a> EventDispatcher<'a> {
    pub fn new(
        executor: &'a ToolExecutor,
        notifier: &'a dyn Notifier,
        max_malformed_events: usize,
    ) -> Self {
        Self {
            executor,
            notifier,
            max_malformed_events,
            malformed_events: 0,
            reply: ReplyBuilder::default(),
        }
    }

    /// Receive and dispatch events until `response.done`, an error, or a
    /// receive timeout.
    ///
    /// A timeout also carries the partial reply inside
    /// [`RtloopError::Timeout`].
    pub async fn run(
        mut self,
        connection: &mut ConnectionManager,
        cancel: &CancellationToken,
    ) -> Result<Completion, ResponseError> {
        let error = match self.receive(connection, cancel).await {
            Ok(()) => return Ok(self.reply.finish()),
            Err(error) => error,
        };

        let is_timeout = matches!(error, RtloopError::Timeout { .. });
        let keep = is_timeout || self.reply.has_tool_calls();
        let partial = (keep && !self.reply.is_empty())
            .then(|| std::mem::take(&mut self.reply).finish());
        let error = match error {
            RtloopError::Timeout { after_ms, .. } => RtloopError::Timeout {
                after_ms,
                partial: partial.clone().map(Box::new),
            },
            other => other,
        };
        if let Some(partial) = &partial {
            debug!(
                tool_calls = partial.tool_results.len(),
                error = %error,
                "Response failed with partial content"
            );
        }
        Err(ResponseError { error, partial })
    }

    async fn receive(
        &mut self,
        connection: &mut ConnectionManager,
        cancel: &CancellationToken,
    ) -> Result<(), RtloopError> {
        loop {
            let raw = match connection.recv(cancel).await? {
                Received::Payload(raw) => raw,
                Received::TimedOut => {
                    let after_ms = connection.receive_timeout().as_millis() as u64;
                    return Err(RtloopError::timeout(after_ms));
                }
            };

            let event = match ServerEvent::decode(&raw) {
                Ok(event) => event,
                Err(error) => {
                    self.malformed_events += 1;
                    warn!(
                        error = %error,
                        count = self.malformed_events,
                        "Skipping malformed realtime event"
                    );
                    if self.malformed_events > self.max_malformed_events {
                        let error = RtloopError::Protocol(format!(
                            "{} malformed events in one response, last: {error}",
                            self.malformed_events
                        ));
                        return Err(connection.fault(error).await);
                    }
                    continue;
                }
            };

            if let Step::Done = self.dispatch(connection, event, cancel).await? {
                return Ok(());
            }
        }
    }

    async fn dispatch(
        &mut self,
        connection: &mut ConnectionManager,
        event: ServerEvent,
        cancel: &CancellationToken,
    ) -> Result<Step, RtloopError> {
        match event {
            ServerEvent::Error { message, payload } => {
                warn!(%message, "Realtime service reported an error");
                let error = RtloopError::Protocol(format!("API error: {payload}"));
                Err(connection.fault(error).await)
            }
            ServerEvent::TextDelta { delta } => {
                self.reply.push_text(&delta);
                Ok(Step::Continue)
            }
            ServerEvent::FunctionCallDelta {
                call_id,
                function_name,
                delta,
            } => {
                connection
                    .on_tool_delta(call_id.as_deref(), function_name.as_deref(), &delta)
                    .await?;
                Ok(Step::Continue)
            }
            ServerEvent::FunctionCallDone { call_id } => {
                let tool_use = connection.on_tool_done(call_id.as_deref()).await?;
                self.run_tool(connection, tool_use, cancel).await?;
                Ok(Step::Continue)
            }
            ServerEvent::ResponseDone => Ok(Step::Done),
            ServerEvent::Unknown { event_type } => {
                debug!(%event_type, "Ignoring realtime event");
                Ok(Step::Continue)
            }
        }
    }

    /// Execute a completed call and send its result back as a tool item.
    ///
    /// The call is recorded before the send so a failed send still leaves
    /// the executed call and its result in the reply.
    async fn run_tool(
        &mut self,
        connection: &mut ConnectionManager,
        tool_use: ToolUse,
        cancel: &CancellationToken,
    ) -> Result<(), RtloopError> {
        self.notifier
            .status(&format!("Running tool {} ({})", tool_use.name, tool_use.id));
        let output = self.executor.execute_tool_use(&tool_use, cancel).await;
        debug!(
            call_id = %tool_use.id,
            is_error = output.is_error,
            "Tool call finished"
        );

        let id = tool_use.id.clone();
        let item = ClientEvent::message(Role::Tool, output.output.clone());
        let result = ToolResult::new(id.clone(), output.output, output.is_error);
        self.reply.push_tool_call(tool_use, result);

        connection.send(&item).await?;
        connection.mark_delivered(id);
        Ok(())
    }
}
