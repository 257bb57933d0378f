//! The `shell` tool: runs a command through `sh -c` with a bounded timeout.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::RegexSet;
use tokio::process::Command;

use super::approvals::{ApprovalKind, ApprovalRequest};
use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext, ToolOutput};
use super::types::ToolParameters;
use crate::error::RtloopError;

pub const SHELL_TOOL_NAME: &str = "shell";

const DANGEROUS_PATTERNS: &[&str] = &[
    r"\brm\s+(-\S*\s+)*-[a-zA-Z]*[rRf]",
    r"\bsudo\b",
    r"\bmkfs(\.\w+)?\b",
    r"\bdd\s+.*\bif=",
    r"\b(shutdown|reboot|halt|poweroff)\b",
    r"\bch(mod|own)\s+(-\S*\s+)*-[a-zA-Z]*R",
    r"\bgit\s+push\b.*(--force\b|\s-f\b)",
    r">\s*/dev/(sd|nvme|disk|hd)",
    r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
];

fn dangerous_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RegexSet::new(DANGEROUS_PATTERNS).unwrap_or_else(|_| RegexSet::empty())
    })
}

/// Whether `command` matches a destructive pattern that needs confirmation.
pub fn is_dangerous_command(command: &str) -> bool {
    dangerous_patterns().is_match(command)
}

/// Runs shell commands as subprocesses.
///
/// Success yields stdout; a nonzero exit yields stderr as an error result.
#[derive(Debug, Clone)]
pub struct ShellTool {
    parameters: ToolParameters,
    timeout: Duration,
}

impl ShellTool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            parameters: ToolParameters::object()
                .string("command", "The shell command to execute", true)
                .build(),
            timeout,
        }
    }

    fn failure(&self, message: impl Into<String>) -> RtloopError {
        RtloopError::ToolExecution {
            tool_name: SHELL_TOOL_NAME.into(),
            message: message.into(),
        }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_TOOL_TIMEOUT)
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        SHELL_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn approval_request(&self, call_id: &str, args: &ToolArguments) -> Option<ApprovalRequest> {
        let command = args.get_str_opt("command")?;
        is_dangerous_command(command).then(|| ApprovalRequest {
            tool_use_id: call_id.to_string(),
            kind: ApprovalKind::CommandExecution,
            summary: format!("run `{command}`"),
            reason: Some("command matches a destructive pattern".into()),
        })
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, RtloopError> {
        let command = args.get_str("command")?;

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failure(format!("failed to spawn command: {e}")))?;

        // Dropping the wait future kills the child.
        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(RtloopError::Interrupted),
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return Err(self.failure(e.to_string())),
                Err(_) => {
                    return Err(self.failure(format!(
                        "command timed out after {}s",
                        self.timeout.as_secs_f64()
                    )));
                }
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(ToolOutput::success(stdout));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let body = if !stderr.trim().is_empty() {
            stderr
        } else if !stdout.trim().is_empty() {
            stdout
        } else {
            match output.status.code() {
                Some(code) => format!("command exited with status {code}"),
                None => "command terminated by signal".to_string(),
            }
        };
        Ok(ToolOutput::failure(body))
    }
}
