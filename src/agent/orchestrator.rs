//! Turn orchestration: one user message through to a settled reply.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::notifier::{Notifier, TracingNotifier};
use super::recovery::{
    recover_from_interrupt, recover_pending, repair_resumed_history, RecoveryOutcome,
    ResumeRepair,
};
use super::sink::PersistenceSink;
use crate::error::RtloopError;
use crate::provider::{Completion, CompletionProvider, CompletionRequest};
use crate::tools::ToolExecutor;
use crate::types::{Content, Message, Role, ToolResult, ToolUse, Usage};

/// Unique turn identifier.
pub type TurnId = Uuid;

/// Where the current turn is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    Submitted,
    Generating,
    ToolRound,
    Completed,
    Interrupted,
    Failed,
}

/// How a turn ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Interrupted,
}

/// Result of one turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: TurnId,
    pub status: TurnStatus,
    /// Final assistant reply when the turn completed.
    pub reply: Option<Message>,
    pub usage: Usage,
    pub recovery: Option<RecoveryOutcome>,
    /// Messages this turn added to the conversation, as flushed to the sink.
    pub committed: Vec<Message>,
    pub finished_at: DateTime<Utc>,
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == TurnStatus::Completed
    }
}

/// Drives the conversation loop and owns the conversation.
pub struct TurnOrchestrator {
    provider: Box<dyn CompletionProvider>,
    executor: Arc<ToolExecutor>,
    sink: Arc<dyn PersistenceSink>,
    notifier: Arc<dyn Notifier>,
    instructions: String,
    max_tool_calls: usize,
    conversation: Vec<Message>,
    phase: TurnPhase,
}

/// Per-turn bookkeeping.
struct TurnState {
    committed: Vec<Message>,
    usage: Usage,
    local_calls: usize,
}

impl TurnOrchestrator {
    pub fn new(
        provider: Box<dyn CompletionProvider>,
        executor: Arc<ToolExecutor>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        Self {
            provider,
            executor,
            sink,
            notifier: Arc::new(TracingNotifier),
            instructions: crate::config::DEFAULT_INSTRUCTIONS.to_string(),
            max_tool_calls: crate::config::DEFAULT_MAX_TOOL_CALLS,
            conversation: Vec::new(),
            phase: TurnPhase::Idle,
        }
    }

    /// Set system instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Tool-call budget for one turn, shared by inline and local execution.
    pub fn with_max_tool_calls(mut self, max_tool_calls: usize) -> Self {
        self.max_tool_calls = max_tool_calls;
        self
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn provider(&self) -> &dyn CompletionProvider {
        self.provider.as_ref()
    }

    /// Load a saved session, repairing an unsettled tail.
    pub fn resume(&mut self, mut messages: Vec<Message>) -> ResumeRepair {
        let repair = repair_resumed_history(&mut messages);
        if repair != ResumeRepair::Unchanged {
            info!(?repair, "Repaired resumed session");
        }
        self.conversation = messages;
        repair
    }

    /// Run one user turn.
    ///
    /// Interrupts end in `Ok` with [`TurnStatus::Interrupted`]. Connection,
    /// protocol, limit and timeout failures return `Err` after the
    /// conversation has been repaired and the settled messages flushed.
    pub async fn run_turn(
        &mut self,
        text: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, RtloopError> {
        let turn_id = Uuid::new_v4();
        let span = info_span!("turn", %turn_id);
        self.run_turn_inner(turn_id, text.into(), cancel)
            .instrument(span)
            .await
    }

    async fn run_turn_inner(
        &mut self,
        turn_id: TurnId,
        text: String,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, RtloopError> {
        self.phase = TurnPhase::Submitted;
        self.provider.begin_turn();

        let user = Message::user(text);
        self.conversation.push(user.clone());
        let mut turn = TurnState {
            committed: vec![user],
            usage: Usage::default(),
            local_calls: 0,
        };

        let result = self.drive(&mut turn, cancel).await;
        match result {
            Ok(reply) => {
                self.phase = TurnPhase::Completed;
                self.flush(&turn.committed).await?;
                debug!(messages = turn.committed.len(), "Turn completed");
                Ok(TurnOutcome {
                    turn_id,
                    status: TurnStatus::Completed,
                    reply: Some(reply),
                    usage: turn.usage,
                    recovery: None,
                    committed: turn.committed,
                    finished_at: Utc::now(),
                })
            }
            Err(RtloopError::Interrupted) => {
                self.phase = TurnPhase::Interrupted;
                if let Some(partial) = self.provider.take_partial() {
                    self.fold_partial(partial, &mut turn);
                }
                self.provider.close().await;
                let recovery = recover_from_interrupt(&mut self.conversation, &mut turn.committed);
                self.notifier.status(&recovery.description());
                self.flush(&turn.committed).await?;
                Ok(TurnOutcome {
                    turn_id,
                    status: TurnStatus::Interrupted,
                    reply: None,
                    usage: turn.usage,
                    recovery: Some(recovery),
                    committed: turn.committed,
                    finished_at: Utc::now(),
                })
            }
            Err(error) => {
                self.phase = TurnPhase::Failed;
                warn!(error = %error, "Turn failed");
                let partial = self.provider.take_partial().or_else(|| match &error {
                    RtloopError::Timeout {
                        partial: Some(partial),
                        ..
                    } => Some(partial.as_ref().clone()),
                    _ => None,
                });
                if let Some(partial) = partial {
                    self.fold_partial(partial, &mut turn);
                }
                self.provider.close().await;
                let recovery =
                    recover_pending(&mut self.conversation, &mut turn.committed, &error.to_string());
                debug!(?recovery, "Recovered after failure");
                if let Err(flush_error) = self.flush(&turn.committed).await {
                    warn!(error = %flush_error, "Failed to persist turn after failure");
                }
                Err(error)
            }
        }
    }

    /// Generate until a reply carries no further tool requests.
    async fn drive(
        &mut self,
        turn: &mut TurnState,
        cancel: &CancellationToken,
    ) -> Result<Message, RtloopError> {
        let tools = self.executor.registry().specs();
        loop {
            self.phase = TurnPhase::Generating;
            self.notifier.status("processing request");
            let request = CompletionRequest {
                system: &self.instructions,
                messages: &self.conversation,
                tools: &tools,
            };
            let completion = self.provider.complete(request, cancel).await?;
            turn.usage.merge(&completion.usage);

            let reply = completion.message.clone();
            if !self.settle(completion, turn, cancel).await? {
                return Ok(reply);
            }
            self.phase = TurnPhase::ToolRound;
            self.notifier.status("processing tool results");
        }
    }

    /// Append a reply, each run of tool requests followed by its results.
    ///
    /// Text arriving after a tool request starts a new assistant message so
    /// every request is answered before the conversation moves on. Returns
    /// whether another generation is needed.
    async fn settle(
        &mut self,
        completion: Completion,
        turn: &mut TurnState,
        cancel: &CancellationToken,
    ) -> Result<bool, RtloopError> {
        let Completion {
            message,
            tool_results: mut inline,
            ..
        } = completion;
        let ends_on_tool = message.ends_with_tool_use();

        let mut segment = Vec::new();
        let mut requests = Vec::new();
        let mut appended = false;
        let mut ran_locally = false;
        for part in message.content {
            if matches!(part, Content::Text { .. }) && !requests.is_empty() {
                self.append(Message::new(Role::Assistant, std::mem::take(&mut segment)), turn);
                let round = std::mem::take(&mut requests);
                ran_locally |= self.resolve(&round, &mut inline, turn, cancel).await?;
                appended = true;
            }
            if let Content::ToolUse(tool_use) = &part {
                requests.push(tool_use.clone());
            }
            segment.push(part);
        }
        if !segment.is_empty() || !appended {
            self.append(Message::new(Role::Assistant, segment), turn);
        }
        if !requests.is_empty() {
            ran_locally |= self.resolve(&requests, &mut inline, turn, cancel).await?;
        }

        if cancel.is_cancelled() {
            return Err(RtloopError::Interrupted);
        }
        Ok(ran_locally || ends_on_tool)
    }

    /// Append the results for one run of tool requests.
    ///
    /// Results the provider produced while streaming are used as-is; the
    /// rest are executed here under the turn's tool-call budget. Returns
    /// whether anything ran locally.
    async fn resolve(
        &mut self,
        requests: &[ToolUse],
        inline: &mut Vec<ToolResult>,
        turn: &mut TurnState,
        cancel: &CancellationToken,
    ) -> Result<bool, RtloopError> {
        let mut results = Vec::with_capacity(requests.len());
        let mut ran_locally = false;
        let mut failure = None;
        for tool_use in requests {
            if let Some(position) = inline.iter().position(|r| r.tool_use_id == tool_use.id) {
                results.push(inline.remove(position));
                continue;
            }
            if cancel.is_cancelled() {
                failure = Some(RtloopError::Interrupted);
                break;
            }
            let used = self.provider.tool_call_count() + turn.local_calls;
            if used >= self.max_tool_calls {
                failure = Some(RtloopError::LimitExceeded {
                    limit: self.max_tool_calls,
                });
                break;
            }
            turn.local_calls += 1;
            ran_locally = true;

            self.notifier
                .status(&format!("Running tool {} ({})", tool_use.name, tool_use.id));
            let output = self.executor.execute_tool_use(tool_use, cancel).await;
            results.push(ToolResult::new(
                tool_use.id.clone(),
                output.output,
                output.is_error,
            ));
        }

        if !results.is_empty() {
            self.append(Message::tool_results(results), turn);
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(ran_locally),
        }
    }

    fn append(&mut self, message: Message, turn: &mut TurnState) {
        turn.committed.push(message.clone());
        self.conversation.push(message);
    }

    /// Append what a failed generation streamed, laid out like [`Self::settle`]
    /// but without running anything. Requests left without a result are
    /// answered by recovery.
    fn fold_partial(&mut self, partial: Completion, turn: &mut TurnState) {
        turn.usage.merge(&partial.usage);
        let Completion {
            message,
            tool_results: mut inline,
            ..
        } = partial;

        let mut segment = Vec::new();
        let mut results = Vec::new();
        for part in message.content {
            if matches!(part, Content::Text { .. }) && !results.is_empty() {
                self.append(Message::new(Role::Assistant, std::mem::take(&mut segment)), turn);
                self.append(Message::tool_results(std::mem::take(&mut results)), turn);
            }
            if let Content::ToolUse(tool_use) = &part {
                if let Some(position) = inline.iter().position(|r| r.tool_use_id == tool_use.id) {
                    results.push(inline.remove(position));
                }
            }
            segment.push(part);
        }
        if !segment.is_empty() {
            self.append(Message::new(Role::Assistant, segment), turn);
        }
        if !results.is_empty() {
            self.append(Message::tool_results(results), turn);
        }
    }

    async fn flush(&self, committed: &[Message]) -> Result<(), RtloopError> {
        self.sink.append(committed).await
    }

    /// Close the provider connection.
    pub async fn shutdown(&mut self) {
        self.provider.close().await;
        self.phase = TurnPhase::Idle;
    }
}

impl std::fmt::Debug for TurnOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnOrchestrator")
            .field("provider", &self.provider.provider_name())
            .field("phase", &self.phase)
            .field("messages", &self.conversation.len())
            .finish_non_exhaustive()
    }
}
