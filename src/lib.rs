//! rtloop: an interactive agent runtime over a realtime streaming protocol.
//!
//! A [`TurnOrchestrator`](agent::TurnOrchestrator) takes one user message at
//! a time, streams the reply from a [`CompletionProvider`](provider::CompletionProvider),
//! executes requested tools locally and keeps the conversation consistent
//! across interrupts, failures and restarts.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rtloop::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> rtloop::error::Result<()> {
//! let config = RtloopConfig::from_env()?;
//! let executor = Arc::new(ToolExecutor::new(ToolRegistry::with_shell(config.tool_timeout)));
//! let provider = RealtimeProvider::from_config(&config, executor.clone())?;
//! let log = JsonlSessionLog::new("session.jsonl");
//!
//! let mut orchestrator = TurnOrchestrator::new(Box::new(provider), executor, Arc::new(log));
//! let outcome = orchestrator
//!     .run_turn("List the files here", &CancellationToken::new())
//!     .await?;
//! if let Some(reply) = outcome.reply {
//!     println!("{}", reply.text());
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod prelude;
pub mod provider;
pub mod realtime;
pub mod tools;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
