//! Token usage types.

use serde::{Deserialize, Serialize};

/// Rough characters-per-token ratio used when the service reports no counts.
const CHARS_PER_TOKEN: u32 = 4;

/// Token usage for a generation.
///
/// The realtime protocol does not report token counts, so values produced by
/// this crate are estimates derived from reply length.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Estimate usage from the reply text.
    ///
    /// Deterministic: `max(1, chars / 4)` for both input and output, total is
    /// their sum. An empty reply counts as one token each way.
    pub fn estimate_from_text(text: &str) -> Self {
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        let estimated = if chars == 0 {
            1
        } else {
            (chars / CHARS_PER_TOKEN).max(1)
        };
        Self {
            input_tokens: estimated,
            output_tokens: estimated,
            total_tokens: estimated.saturating_mul(2),
        }
    }

    /// Merge another usage into this one (accumulate).
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}
