//! Deterministic output truncation for tool results.

/// Marker line appended to truncated output.
pub const TRUNCATION_MARKER: &str = "[output truncated]";

/// Size budget for a single tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBudget {
    pub max_chars: usize,
    pub max_lines: usize,
}

impl Default for OutputBudget {
    fn default() -> Self {
        Self {
            max_chars: crate::config::DEFAULT_MAX_OUTPUT_CHARS,
            max_lines: crate::config::DEFAULT_MAX_OUTPUT_LINES,
        }
    }
}

impl OutputBudget {
    fn fits(&self, output: &str) -> bool {
        output.chars().count() <= self.max_chars && output.lines().count() <= self.max_lines
    }
}

/// Truncate `output` to fit `budget`.
///
/// The budget covers the marker line too, so anything that already fits,
/// including previously truncated output, is returned unchanged.
pub fn truncate_output(output: &str, budget: OutputBudget) -> String {
    if budget.fits(output) {
        return output.to_string();
    }

    let body_lines = budget.max_lines.saturating_sub(1);
    let body_chars = budget.max_chars.saturating_sub(TRUNCATION_MARKER.len() + 1);
    if body_lines == 0 || body_chars == 0 {
        return TRUNCATION_MARKER.to_string();
    }

    let kept_lines = output.lines().take(body_lines).collect::<Vec<_>>().join("\n");
    let body: String = kept_lines.chars().take(body_chars).collect();
    format!("{body}\n{TRUNCATION_MARKER}")
}
