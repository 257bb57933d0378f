//! Assembly of streamed argument fragments into complete tool requests.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::RtloopError;
use crate::tools::ToolArguments;
use crate::types::ToolUse;

/// Per-session tool-call budget.
///
/// Check-then-increment: once `tool_call_count == max_tool_calls` every
/// further open fails, so the count never exceeds the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    tool_call_count: usize,
    max_tool_calls: usize,
}

impl SessionLimits {
    pub fn new(max_tool_calls: usize) -> Self {
        Self {
            tool_call_count: 0,
            max_tool_calls,
        }
    }

    pub fn tool_call_count(&self) -> usize {
        self.tool_call_count
    }

    /// Record one more tool call, returning its zero-based index.
    pub fn try_open(&mut self) -> Result<usize, RtloopError> {
        if self.tool_call_count >= self.max_tool_calls {
            return Err(RtloopError::LimitExceeded {
                limit: self.max_tool_calls,
            });
        }
        let index = self.tool_call_count;
        self.tool_call_count += 1;
        Ok(index)
    }

    pub fn reset(&mut self) {
        self.tool_call_count = 0;
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_TOOL_CALLS)
    }
}

/// A tool call whose arguments are still streaming in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallInProgress {
    pub id: String,
    pub function_name: Option<String>,
    pub arguments_buffer: String,
    pub completed: bool,
}

fn function_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").ok())
        .as_ref()
}

fn is_valid_function_name(name: &str) -> bool {
    function_name_pattern().is_some_and(|pattern| pattern.is_match(name))
}

/// Holds at most one in-progress tool call; calls are strictly sequential.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    current: Option<ToolCallInProgress>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_progress(&self) -> Option<&ToolCallInProgress> {
        self.current.as_ref()
    }

    /// Open a call on its first fragment, or extend the open call.
    pub fn on_delta(
        &mut self,
        limits: &mut SessionLimits,
        call_id: Option<&str>,
        function_name: Option<&str>,
        fragment: &str,
    ) -> Result<(), RtloopError> {
        let Some(call) = self.current.as_mut() else {
            let index = limits.try_open()?;
            self.current = Some(ToolCallInProgress {
                id: call_id.map_or_else(|| format!("call_{index}"), ToString::to_string),
                function_name: function_name.map(ToString::to_string),
                arguments_buffer: fragment.to_string(),
                completed: false,
            });
            return Ok(());
        };

        if let Some(id) = call_id.filter(|id| *id != call.id) {
            return Err(RtloopError::Protocol(format!(
                "argument delta for tool call {id} while {} is still open",
                call.id
            )));
        }
        if let Some(name) = function_name {
            match &call.function_name {
                None => call.function_name = Some(name.to_string()),
                Some(current) if current != name => {
                    return Err(RtloopError::Protocol(format!(
                        "tool call {} changed function name from {current} to {name}",
                        call.id
                    )));
                }
                Some(_) => {}
            }
        }
        call.arguments_buffer.push_str(fragment);
        Ok(())
    }

    /// Close the open call and turn it into a tool request.
    ///
    /// Unparseable arguments or a bad function name still produce a request,
    /// flagged `is_error` with the diagnostic attached.
    pub fn on_done(&mut self, call_id: Option<&str>) -> Result<ToolUse, RtloopError> {
        let Some(mut call) = self.current.take() else {
            return Err(RtloopError::Protocol(
                "function_call.done without an open tool call".into(),
            ));
        };
        if let Some(id) = call_id.filter(|id| *id != call.id) {
            return Err(RtloopError::Protocol(format!(
                "function_call.done for {id} while {} is open",
                call.id
            )));
        }
        call.completed = true;
        Ok(finish(call))
    }

    /// Discard any open call.
    pub fn clear(&mut self) {
        self.current = None;
    }
}

fn finish(call: ToolCallInProgress) -> ToolUse {
    let ToolCallInProgress {
        id,
        function_name,
        arguments_buffer,
        ..
    } = call;

    let Some(name) = function_name else {
        let message = format!("Missing function name for tool call {id}");
        return ToolUse::invalid(id, "", arguments_buffer, message);
    };
    if !is_valid_function_name(&name) {
        let message = format!("Invalid function name '{name}', must match [a-zA-Z0-9_-]+");
        return ToolUse::invalid(id, name, arguments_buffer, message);
    }
    match ToolArguments::parse(&arguments_buffer) {
        Ok(args) => ToolUse::new(id, name, args.raw().clone()),
        Err(error) => {
            let message =
                format!("Invalid tool parameters for id {id}: {error}: {arguments_buffer}");
            ToolUse::invalid(id, name, arguments_buffer, message)
        }
    }
}
