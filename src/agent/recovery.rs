//! Conversation repair after interrupts, failures and session resume.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{Content, Message, Role, ToolResult, ToolUse};

/// Assistant message appended when a saved session is resumed mid-turn.
pub const RESUME_MESSAGE: &str = "I see we were interrupted. How can I help you?";

/// What interrupt recovery did to the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The turn ended between steps; nothing needed repair.
    NothingPending,
    /// The unanswered user message was removed.
    RemovedPendingUserMessage,
    /// Error results were synthesized for outstanding tool requests and an
    /// acknowledgement appended.
    ResolvedPendingToolCalls { count: usize },
    /// Every tool request had a result; an acknowledgement was appended.
    AcknowledgedToolResults,
}

impl RecoveryOutcome {
    /// Human-readable summary for status output.
    pub fn description(&self) -> String {
        match self {
            Self::NothingPending => "We interrupted before the next processing started.".into(),
            Self::RemovedPendingUserMessage => {
                "We interrupted before the model replied and removed the last message.".into()
            }
            Self::ResolvedPendingToolCalls { count } => {
                format!("We interrupted {count} pending tool call(s).")
            }
            Self::AcknowledgedToolResults => {
                "We interrupted after the tool results came back.".into()
            }
        }
    }
}

/// Tool requests that have no result anywhere later in the conversation.
pub fn dangling_tool_uses(conversation: &[Message]) -> Vec<&ToolUse> {
    let mut answered = HashSet::new();
    let mut dangling = Vec::new();
    for message in conversation.iter().rev() {
        for part in message.content.iter().rev() {
            match part {
                Content::ToolResult(result) => {
                    answered.insert(result.tool_use_id.as_str());
                }
                Content::ToolUse(tool_use) if !answered.contains(tool_use.id.as_str()) => {
                    dangling.push(tool_use);
                }
                _ => {}
            }
        }
    }
    dangling.reverse();
    dangling
}

/// Why the turn stopped before it settled.
#[derive(Debug, Clone, Copy)]
enum Cause<'a> {
    Interrupt,
    Failure(&'a str),
}

impl Cause<'_> {
    fn result_text(&self) -> &str {
        match self {
            Self::Interrupt => crate::tools::INTERRUPTED_OUTPUT,
            Self::Failure(reason) => *reason,
        }
    }

    fn acknowledgement(&self, names: &[&str]) -> Message {
        let names = if names.is_empty() {
            "the tool".to_string()
        } else {
            names.join(", ")
        };
        let text = match self {
            Self::Interrupt => format!(
                "We interrupted the existing call to {names}. How would you like to proceed?"
            ),
            Self::Failure(reason) => format!(
                "The turn stopped after the call to {names} because of an error: {reason}. \
                 How would you like to proceed?"
            ),
        };
        Message::assistant(text)
    }
}

fn push_both(conversation: &mut Vec<Message>, committed: &mut Vec<Message>, message: Message) {
    committed.push(message.clone());
    conversation.push(message);
}

/// Recover after a user interrupt. See [`recover_pending`].
pub fn recover_from_interrupt(
    conversation: &mut Vec<Message>,
    committed: &mut Vec<Message>,
) -> RecoveryOutcome {
    recover(conversation, committed, Cause::Interrupt)
}

/// Leave `conversation` in a settled state after a failure, mirroring every
/// edit in `committed`, which holds the suffix of `conversation` added this
/// turn.
///
/// - A trailing user text message is removed.
/// - Outstanding tool requests get error results carrying `reason`,
///   followed by an assistant acknowledgement naming it.
/// - A trailing tool-result message gets an acknowledgement.
pub fn recover_pending(
    conversation: &mut Vec<Message>,
    committed: &mut Vec<Message>,
    reason: &str,
) -> RecoveryOutcome {
    recover(conversation, committed, Cause::Failure(reason))
}

fn recover(
    conversation: &mut Vec<Message>,
    committed: &mut Vec<Message>,
    cause: Cause<'_>,
) -> RecoveryOutcome {
    if let Some(last) = conversation.last() {
        if last.role == Role::User && last.results().is_empty() {
            if let Some(removed) = conversation.pop() {
                if committed.last() == Some(&removed) {
                    committed.pop();
                }
            }
            return RecoveryOutcome::RemovedPendingUserMessage;
        }
    }

    let (results, names): (Vec<ToolResult>, Vec<String>) = dangling_tool_uses(conversation)
        .into_iter()
        .map(|tool_use| {
            (
                ToolResult::new(tool_use.id.clone(), cause.result_text(), true),
                tool_use.name.clone(),
            )
        })
        .unzip();
    if !results.is_empty() {
        let count = results.len();
        let names = unique(&names);
        push_both(conversation, committed, Message::tool_results(results));
        push_both(conversation, committed, cause.acknowledgement(&names));
        return RecoveryOutcome::ResolvedPendingToolCalls { count };
    }

    match conversation.last() {
        Some(last) if last.role == Role::Tool => {
            let answered: HashSet<&str> = last
                .results()
                .into_iter()
                .map(|result| result.tool_use_id.as_str())
                .collect();
            let names: Vec<String> = conversation
                .iter()
                .flat_map(|message| message.tool_uses())
                .filter(|tool_use| answered.contains(tool_use.id.as_str()))
                .map(|tool_use| tool_use.name.clone())
                .collect();
            let ack = cause.acknowledgement(&unique(&names));
            push_both(conversation, committed, ack);
            RecoveryOutcome::AcknowledgedToolResults
        }
        _ => RecoveryOutcome::NothingPending,
    }
}

fn unique(names: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(String::as_str)
        .filter(|name| seen.insert(*name))
        .collect()
}

/// How a loaded session was repaired before resuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeRepair {
    Unchanged,
    DroppedUserMessage,
    AcknowledgedToolResults,
    DroppedToolRequest,
}

/// Repair a session loaded from disk so it can take a new user message.
pub fn repair_resumed_history(messages: &mut Vec<Message>) -> ResumeRepair {
    let mut repair = ResumeRepair::Unchanged;

    if let Some(last) = messages.last() {
        if last.role == Role::User && matches!(last.content.last(), Some(Content::Text { .. })) {
            messages.pop();
            repair = ResumeRepair::DroppedUserMessage;
        } else if last.role == Role::Tool
            || matches!(last.content.last(), Some(Content::ToolResult(_)))
        {
            messages.push(Message::assistant(RESUME_MESSAGE));
            return ResumeRepair::AcknowledgedToolResults;
        }
    }

    if messages.last().is_some_and(Message::ends_with_tool_use) {
        messages.pop();
        messages.push(Message::assistant(RESUME_MESSAGE));
        repair = ResumeRepair::DroppedToolRequest;
    }
    repair
}
