//! Tests for the tool system.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rtloop::tools::*;
use rtloop::types::ToolUse;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn shell_executor() -> ToolExecutor {
    ToolExecutor::new(ToolRegistry::with_shell(Duration::from_secs(5)))
}

#[test]
fn parameter_builder_constructs_schema() {
    let params = ToolParameters::object()
        .string("query", "Search query", true)
        .number("limit", "Max results", false)
        .boolean("verbose", "Enable verbose output", false)
        .build();

    let schema = &params.schema;
    assert_eq!(schema["type"], "object");
    assert_eq!(schema["properties"]["query"]["type"], "string");
    assert_eq!(schema["properties"]["limit"]["type"], "number");
    assert_eq!(schema["required"].as_array().unwrap().len(), 1);
}

#[test]
fn registry_exposes_shell_catalog_entry() {
    let registry = ToolRegistry::with_shell(Duration::from_secs(5));
    assert_eq!(registry.names(), vec![SHELL_TOOL_NAME]);

    let specs = registry.specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].to_function_schema()["parameters"]["required"], json!(["command"]));
}

#[test]
fn dangerous_patterns_are_flagged() {
    assert!(is_dangerous_command("rm -rf build"));
    assert!(is_dangerous_command("sudo apt install"));
    assert!(!is_dangerous_command("ls -la"));
    assert!(!is_dangerous_command("echo rm"));
}

#[tokio::test]
async fn function_tool_receives_arguments() {
    let tool = FunctionTool::new(
        "greet",
        "Say hello",
        ToolParameters::object().string("name", "Who", true).build(),
        |args, _ctx| async move {
            let name = args.get_str("name")?.to_string();
            Ok(ToolOutput::success(format!("hello {name}")))
        },
    );
    let executor = ToolExecutor::new(ToolRegistry::new().with(Arc::new(tool)));

    let output = executor
        .execute("call_0", "greet", r#"{"name":"ada"}"#, &CancellationToken::new())
        .await;
    assert_eq!(output, ToolOutput::success("hello ada"));

    let missing = executor
        .execute("call_1", "greet", "{}", &CancellationToken::new())
        .await;
    assert!(missing.is_error);
    assert!(missing.output.starts_with("Invalid arguments for greet"));
}

#[tokio::test]
async fn dangerous_command_without_handler_is_declined() {
    let output = shell_executor()
        .execute(
            "call_0",
            "shell",
            r#"{"command":"rm -rf /tmp/rtloop-never-created"}"#,
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(
        output,
        ToolOutput::failure("run `rm -rf /tmp/rtloop-never-created` cancelled by the user.")
    );
}

#[tokio::test]
async fn approved_dangerous_command_runs_once_confirmed() {
    let asked = Arc::new(AtomicUsize::new(0));
    let counter = asked.clone();
    let handler: ApprovalHandler = Arc::new(
        move |request: ApprovalRequest| -> BoxFuture<'static, ApprovalDecision> {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.kind, ApprovalKind::CommandExecution);
            Box::pin(async { ApprovalDecision::Accept })
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("scratch");
    std::fs::create_dir(&target).unwrap();

    let executor = shell_executor().with_approval_handler(handler);
    let raw = json!({"command": format!("rm -rf {}", target.display())}).to_string();
    let output = executor
        .execute("call_0", "shell", &raw, &CancellationToken::new())
        .await;

    assert!(!output.is_error, "{}", output.output);
    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert!(!target.exists());
}

#[tokio::test]
async fn long_output_is_truncated_to_budget() {
    let executor = shell_executor().with_output_budget(OutputBudget {
        max_chars: 200,
        max_lines: 5,
    });
    let output = executor
        .execute("call_0", "shell", r#"{"command":"seq 1 100"}"#, &CancellationToken::new())
        .await;

    assert!(!output.is_error);
    assert_eq!(output.output.lines().count(), 5);
    assert!(output.output.ends_with(TRUNCATION_MARKER));
}

#[tokio::test]
async fn invalid_tool_use_is_reported_without_running() {
    let tool_use = ToolUse::invalid("call_9", "shell", "{oops", "Invalid tool parameters");
    let output = shell_executor()
        .execute_tool_use(&tool_use, &CancellationToken::new())
        .await;
    assert!(output.is_error);
}

#[tokio::test]
async fn unknown_tool_lists_available_tools() {
    let output = shell_executor()
        .execute("call_0", "browser", "{}", &CancellationToken::new())
        .await;
    assert_eq!(
        output,
        ToolOutput::failure("Unknown tool 'browser'. Available tools: shell")
    );
}
