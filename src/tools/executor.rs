//! Runs a single tool call and turns every outcome into a bounded text result.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::approvals::{cancellation_message, ApprovalDecision, ApprovalHandler};
use super::arguments::ToolArguments;
use super::registry::ToolRegistry;
use super::tool::{ToolExecutionContext, ToolOutput};
use super::truncate::{truncate_output, OutputBudget};
use super::validation::validate_arguments;
use crate::error::RtloopError;
use crate::types::ToolUse;

/// Output reported for a tool call cut short by the user.
pub const INTERRUPTED_OUTPUT: &str = "interrupted by the user";

/// Executes tool calls against an injected registry.
///
/// Never fails: parse errors, unknown tools, declined approvals, timeouts
/// and nonzero exits all come back as `ToolOutput { is_error: true, .. }`.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    approval_handler: Option<ApprovalHandler>,
    budget: OutputBudget,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            approval_handler: None,
            budget: OutputBudget::default(),
        }
    }

    /// Handler asked to confirm dangerous calls. Without one they are declined.
    pub fn with_approval_handler(mut self, handler: ApprovalHandler) -> Self {
        self.approval_handler = Some(handler);
        self
    }

    pub fn with_output_budget(mut self, budget: OutputBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run `name` with the raw argument string streamed by the service.
    pub async fn execute(
        &self,
        call_id: &str,
        name: &str,
        raw_arguments: &str,
        cancel: &CancellationToken,
    ) -> ToolOutput {
        match ToolArguments::parse(raw_arguments) {
            Ok(args) => self.run(call_id, name, args, cancel).await,
            Err(e) => ToolOutput::failure(format!(
                "Invalid tool arguments for {name}: {e}: {raw_arguments}"
            )),
        }
    }

    /// Run an assembled tool request. Requests flagged as errors are not run.
    pub async fn execute_tool_use(
        &self,
        tool_use: &ToolUse,
        cancel: &CancellationToken,
    ) -> ToolOutput {
        if tool_use.is_error {
            let message = tool_use
                .error_message
                .clone()
                .unwrap_or_else(|| format!("Invalid tool call {}", tool_use.id));
            return ToolOutput::failure(message);
        }
        let args = ToolArguments::new(tool_use.arguments.clone());
        self.run(&tool_use.id, &tool_use.name, args, cancel).await
    }

    async fn run(
        &self,
        call_id: &str,
        name: &str,
        args: ToolArguments,
        cancel: &CancellationToken,
    ) -> ToolOutput {
        let Some(tool) = self.registry.get(name) else {
            warn!(tool = name, "Tool not found");
            return ToolOutput::failure(format!(
                "Unknown tool '{name}'. Available tools: {}",
                self.registry.names().join(", ")
            ));
        };

        if let Err(message) = validate_arguments(args.raw(), tool.parameters()) {
            return ToolOutput::failure(format!("Invalid arguments for {name}: {message}"));
        }

        if let Some(request) = tool.approval_request(call_id, &args) {
            let summary = request.summary.clone();
            let decision = match &self.approval_handler {
                Some(handler) => tokio::select! {
                    _ = cancel.cancelled() => return ToolOutput::failure(INTERRUPTED_OUTPUT),
                    decision = handler(request) => decision,
                },
                None => ApprovalDecision::Decline,
            };
            if decision != ApprovalDecision::Accept {
                debug!(call_id, tool = name, "tool call declined");
                return ToolOutput::failure(cancellation_message(&summary));
            }
        }

        let ctx = ToolExecutionContext {
            call_id: call_id.to_string(),
            cancel: cancel.clone(),
        };
        debug!(call_id, tool = name, "executing tool");
        let output = match tool.execute(&args, &ctx).await {
            Ok(output) => output,
            Err(RtloopError::Interrupted) => ToolOutput::failure(INTERRUPTED_OUTPUT),
            Err(RtloopError::ToolExecution { message, .. }) => ToolOutput::failure(message),
            Err(e) => {
                warn!(call_id, tool = name, error = %e, "Tool execution failed");
                ToolOutput::failure(e.to_string())
            }
        };

        ToolOutput {
            output: truncate_output(&output.output, self.budget),
            is_error: output.is_error,
        }
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("registry", &self.registry)
            .field("approval_handler", &self.approval_handler.as_ref().map(|_| ".."))
            .field("budget", &self.budget)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::BoxFuture;

    use crate::tools::approvals::ApprovalRequest;
    use crate::tools::tool::FunctionTool;
    use crate::tools::truncate::TRUNCATION_MARKER;
    use crate::tools::types::ToolParameters;

    fn shell_executor() -> ToolExecutor {
        ToolExecutor::new(ToolRegistry::with_shell(Duration::from_secs(10)))
    }

    fn approving(decision: ApprovalDecision, asked: Arc<AtomicUsize>) -> ApprovalHandler {
        Arc::new(
            move |_request: ApprovalRequest| -> BoxFuture<'static, ApprovalDecision> {
                asked.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { decision })
            },
        )
    }

    #[tokio::test]
    async fn runs_shell_command() {
        let output = shell_executor()
            .execute("call_0", "shell", r#"{"command":"echo hi"}"#, &CancellationToken::new())
            .await;
        assert_eq!(output, ToolOutput::success("hi\n"));
    }

    #[tokio::test]
    async fn malformed_arguments_become_error_result() {
        let output = shell_executor()
            .execute("call_0", "shell", r#"{"command": "ls"#, &CancellationToken::new())
            .await;
        assert!(output.is_error);
        assert!(output.output.starts_with("Invalid tool arguments for shell"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let output = shell_executor()
            .execute("call_0", "python", "{}", &CancellationToken::new())
            .await;
        assert!(output.is_error);
        assert_eq!(output.output, "Unknown tool 'python'. Available tools: shell");
    }

    #[tokio::test]
    async fn schema_violation_is_reported_before_running() {
        let output = shell_executor()
            .execute("call_0", "shell", r#"{"cmd":"ls"}"#, &CancellationToken::new())
            .await;
        assert_eq!(
            output,
            ToolOutput::failure("Invalid arguments for shell: missing required argument 'command'")
        );
    }

    #[tokio::test]
    async fn long_output_is_truncated() {
        let output = shell_executor()
            .execute("call_0", "shell", r#"{"command":"seq 1 100"}"#, &CancellationToken::new())
            .await;
        assert!(!output.is_error);
        assert!(output.output.ends_with(TRUNCATION_MARKER));
        assert_eq!(output.output.lines().count(), 15);
    }

    #[tokio::test]
    async fn dangerous_command_without_handler_is_declined() {
        let output = shell_executor()
            .execute(
                "call_0",
                "shell",
                r#"{"command":"rm -rf ./does-not-exist"}"#,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(
            output,
            ToolOutput::failure("run `rm -rf ./does-not-exist` cancelled by the user.")
        );
    }

    #[tokio::test]
    async fn dangerous_command_runs_after_approval() {
        let asked = Arc::new(AtomicUsize::new(0));
        let executor =
            shell_executor().with_approval_handler(approving(ApprovalDecision::Accept, asked.clone()));
        let output = executor
            .execute(
                "call_0",
                "shell",
                r#"{"command":"rm -rf ./does-not-exist-either && echo gone"}"#,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(output, ToolOutput::success("gone\n"));
        assert_eq!(asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn safe_command_never_asks() {
        let asked = Arc::new(AtomicUsize::new(0));
        let executor = shell_executor()
            .with_approval_handler(approving(ApprovalDecision::Decline, asked.clone()));
        let output = executor
            .execute("call_0", "shell", r#"{"command":"echo ok"}"#, &CancellationToken::new())
            .await;
        assert!(!output.is_error);
        assert_eq!(asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_tool_use_is_not_executed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = ToolRegistry::new().with(Arc::new(FunctionTool::new(
            "count",
            "Count invocations",
            ToolParameters::empty(),
            move |_args, _ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(ToolOutput::success("counted"))
                }
            },
        )));
        let executor = ToolExecutor::new(registry);

        let bad = ToolUse::invalid("call_1", "count", "{", "EOF while parsing");
        let output = executor.execute_tool_use(&bad, &CancellationToken::new()).await;
        assert_eq!(output, ToolOutput::failure("EOF while parsing"));

        let good = ToolUse::new("call_2", "count", serde_json::json!({}));
        let output = executor.execute_tool_use(&good, &CancellationToken::new()).await;
        assert_eq!(output, ToolOutput::success("counted"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_command_reports_interruption() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let output = shell_executor()
            .execute("call_0", "shell", r#"{"command":"sleep 5"}"#, &cancel)
            .await;
        assert_eq!(output, ToolOutput::failure(INTERRUPTED_OUTPUT));
    }
}
