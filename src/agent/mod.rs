//! Agent system: turn orchestration, recovery and session persistence.

pub mod notifier;
pub mod orchestrator;
pub mod recovery;
pub mod sink;

pub use notifier::{NoopNotifier, Notifier, TracingNotifier};
pub use orchestrator::{TurnId, TurnOrchestrator, TurnOutcome, TurnPhase, TurnStatus};
pub use recovery::{
    dangling_tool_uses, recover_from_interrupt, recover_pending, repair_resumed_history,
    RecoveryOutcome, ResumeRepair, RESUME_MESSAGE,
};
pub use sink::{JsonlSessionLog, MemorySink, PersistenceSink};
