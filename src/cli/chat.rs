//! `rtloop chat`: one turn per line of standard input.

use std::io::Write;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ChatArgs;
use crate::agent::{
    JsonlSessionLog, Notifier, ResumeRepair, TurnOrchestrator, TurnOutcome, TurnStatus,
};
use crate::config::RtloopConfig;
use crate::error::RtloopError;
use crate::realtime::RealtimeProvider;
use crate::tools::{ApprovalDecision, ApprovalHandler, ApprovalRequest, ToolExecutor, ToolRegistry};

/// Standard input shared by the prompt loop and approval prompts.
type SharedInput = Arc<Mutex<Lines<BufReader<Stdin>>>>;

/// Prints status lines to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn status(&self, text: &str) {
        eprintln!("  · {text}");
    }
}

/// Build the effective config: file, then environment, then CLI flags.
pub fn resolve_config(args: &ChatArgs) -> Result<RtloopConfig, RtloopError> {
    let base = match &args.config {
        Some(path) => RtloopConfig::load(path)?,
        None => RtloopConfig::default(),
    };
    let mut config = base.apply_env()?;
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(instructions) = &args.instructions {
        config.instructions = instructions.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Handle `rtloop chat`.
pub async fn handle_chat(args: ChatArgs) -> Result<(), RtloopError> {
    let config = resolve_config(&args)?;
    let session_dir = config.resolved_session_dir().ok_or_else(|| {
        RtloopError::Configuration("no session directory available; set session_dir".into())
    })?;
    let log = JsonlSessionLog::in_dir(&session_dir, &args.session);

    let input: SharedInput = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()));
    let notifier: Arc<dyn Notifier> = Arc::new(StderrNotifier);
    let executor = Arc::new(
        ToolExecutor::new(ToolRegistry::with_shell(config.tool_timeout))
            .with_output_budget(config.output_budget())
            .with_approval_handler(stdin_approval(input.clone())),
    );
    let provider =
        RealtimeProvider::from_config(&config, executor.clone())?.with_notifier(notifier.clone());
    let mut orchestrator = TurnOrchestrator::new(Box::new(provider), executor, Arc::new(log.clone()))
        .with_instructions(config.instructions.clone())
        .with_notifier(notifier)
        .with_max_tool_calls(config.max_tool_calls);

    if !args.new {
        let saved = log.load().await?;
        let count = saved.len();
        match orchestrator.resume(saved) {
            ResumeRepair::Unchanged => {}
            repair => eprintln!("Resumed session needed repair: {repair:?}"),
        }
        if count > 0 {
            eprintln!("Resumed {} ({count} messages)", log.path().display());
        }
    }
    info!(session = %args.session, model = %config.model, "Chat started");

    let result = chat_loop(&mut orchestrator, &input).await;
    orchestrator.shutdown().await;
    result
}

async fn chat_loop(
    orchestrator: &mut TurnOrchestrator,
    input: &SharedInput,
) -> Result<(), RtloopError> {
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = next_line(input) => line?,
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "exit" | "quit") {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };
        let result = orchestrator.run_turn(text, &cancel).await;
        watcher.abort();

        match result {
            Ok(outcome) => print_outcome(&outcome),
            Err(error) => {
                eprintln!("Error: {error}");
                if !error.is_retryable() && !matches!(error, RtloopError::LimitExceeded { .. }) {
                    debug!(suggestion = ?error.recovery_suggestion(), "Ending chat");
                    return Err(error);
                }
            }
        }
    }
}

async fn next_line(input: &SharedInput) -> Result<Option<String>, RtloopError> {
    Ok(input.lock().await.next_line().await?)
}

fn print_outcome(outcome: &TurnOutcome) {
    match outcome.status {
        TurnStatus::Completed => {
            if let Some(reply) = &outcome.reply {
                println!("{}", reply.text());
            }
        }
        TurnStatus::Interrupted => {
            if let Some(recovery) = &outcome.recovery {
                eprintln!("Interrupted: {}", recovery.description());
            }
        }
    }
}

/// Ask on the terminal before a dangerous command runs.
fn stdin_approval(input: SharedInput) -> ApprovalHandler {
    Arc::new(move |request: ApprovalRequest| -> BoxFuture<'static, ApprovalDecision> {
        let input = input.clone();
        Box::pin(async move {
            eprint!("Allow {}? [y/N] ", request.summary);
            let _ = std::io::stderr().flush();
            let answer = input
                .lock()
                .await
                .next_line()
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
            if is_yes(&answer) {
                ApprovalDecision::Accept
            } else {
                ApprovalDecision::Decline
            }
        })
    })
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
