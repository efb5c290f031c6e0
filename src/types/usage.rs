//! Token accounting

use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Token counts reported by one or more model calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,
    /// Number of tokens generated
    pub completion_tokens: u32,
    /// Total tokens (prompt + completion)
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

impl fmt::Display for TokenUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "input_tokens: {}, output_tokens: {}, total_tokens: {}",
            self.prompt_tokens, self.completion_tokens, self.total_tokens
        )
    }
}

/// Per-model token totals for one request
///
/// Every model call site records into the ledger it was handed; the workflow
/// drains it once all pipelines have finished.
#[derive(Debug, Default)]
pub struct UsageLedger {
    by_model: Mutex<BTreeMap<String, TokenUsage>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one call's usage under `model`
    pub fn record(&self, model: &str, usage: TokenUsage) {
        if usage.is_empty() {
            return;
        }
        *self.by_model.lock().entry(model.to_string()).or_default() += usage;
    }

    /// Current totals without clearing them
    pub fn snapshot(&self) -> BTreeMap<String, TokenUsage> {
        self.by_model.lock().clone()
    }

    /// Take the totals and reset the ledger
    pub fn drain(&self) -> BTreeMap<String, TokenUsage> {
        std::mem::take(&mut *self.by_model.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_accumulates_per_model() {
        let ledger = UsageLedger::new();
        ledger.record("qwen", TokenUsage::new(10, 5));
        ledger.record("qwen", TokenUsage::new(1, 2));
        ledger.record("gemini", TokenUsage::new(3, 3));
        ledger.record("gemini", TokenUsage::default());

        let totals = ledger.snapshot();
        assert_eq!(totals["qwen"], TokenUsage::new(11, 7));
        assert_eq!(totals["gemini"].total_tokens, 6);
    }

    #[test]
    fn test_drain_clears() {
        let ledger = UsageLedger::new();
        ledger.record("m", TokenUsage::new(1, 1));
        assert_eq!(ledger.drain().len(), 1);
        assert!(ledger.drain().is_empty());
    }

    #[test]
    fn test_usage_display() {
        let text = TokenUsage::new(2, 3).to_string();
        assert!(text.contains("total_tokens: 5"));
    }
}
