//! Local tools the model may call, and the executor that runs them.

pub mod approvals;
pub mod arguments;
pub mod executor;
pub mod registry;
pub mod shell;
pub mod tool;
pub mod truncate;
pub mod types;
pub mod validation;

pub use approvals::{ApprovalDecision, ApprovalHandler, ApprovalKind, ApprovalRequest};
pub use arguments::ToolArguments;
pub use executor::{ToolExecutor, INTERRUPTED_OUTPUT};
pub use registry::ToolRegistry;
pub use shell::{is_dangerous_command, ShellTool, SHELL_TOOL_NAME};
pub use tool::{FunctionTool, Tool, ToolExecutionContext, ToolOutput};
pub use truncate::{truncate_output, OutputBudget, TRUNCATION_MARKER};
pub use types::{ToolParameters, ToolSpec};
pub use validation::validate_arguments;
