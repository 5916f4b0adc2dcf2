//! Technique outcomes and the read-only context techniques run against.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;

use super::item::ItemScore;
use super::trace::TraceEvent;

/// Read-only context shared by every technique in an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EvaluationContext {
    pub evaluation_id: String,
    /// Repository under evaluation (path or URL).
    pub repository: String,
    /// Free-form inputs for techniques (language hints, file inventory, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl EvaluationContext {
    pub fn new(evaluation_id: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            evaluation_id: evaluation_id.into(),
            repository: repository.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Token and cost accounting for LLM-backed techniques.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        // Token counters saturate instead of wrapping.
        self.input_tokens = self.input_tokens.saturating_add(rhs.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(rhs.output_tokens);
        self.cost_usd += rhs.cost_usd;
    }
}

/// Immutable result of one technique run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TechniqueOutcome {
    pub technique_id: String,
    pub success: bool,
    #[serde(default)]
    pub item_scores: BTreeMap<String, ItemScore>,
    #[serde(default)]
    pub trace_events: Vec<TraceEvent>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TechniqueOutcome {
    /// A successful outcome with no scores yet.
    pub fn succeeded(technique_id: impl Into<String>) -> Self {
        Self {
            technique_id: technique_id.into(),
            success: true,
            item_scores: BTreeMap::new(),
            trace_events: Vec::new(),
            usage: TokenUsage::default(),
            error: None,
        }
    }

    /// A failed outcome carrying the error text.
    pub fn failed(technique_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::succeeded(technique_id)
        }
    }

    /// Add a score, keyed by its item id.
    pub fn with_score(mut self, score: ItemScore) -> Self {
        self.item_scores.insert(score.item_id.clone(), score);
        self
    }

    pub fn with_trace(mut self, event: TraceEvent) -> Self {
        self.trace_events.push(event);
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            cost_usd: 0.5,
        };
        total += TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            cost_usd: 0.25,
        };
        assert_eq!(total.input_tokens, 110);
        assert_eq!(total.output_tokens, 25);
        assert_eq!(total.total_tokens(), 135);
        assert!((total.cost_usd - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_usage_saturates_at_u64_max() {
        let mut total = TokenUsage {
            input_tokens: u64::MAX - 1,
            output_tokens: u64::MAX,
            cost_usd: 1.0,
        };
        total += TokenUsage {
            input_tokens: 10,
            output_tokens: 1,
            cost_usd: 1.0,
        };
        assert_eq!(total.input_tokens, u64::MAX);
        assert_eq!(total.output_tokens, u64::MAX);
        assert_eq!(total.total_tokens(), u64::MAX);
        assert!((total.cost_usd - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_outcome_has_error_and_no_scores() {
        let outcome = TechniqueOutcome::failed("dep-audit", "registry unreachable");
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("registry unreachable"));
        assert!(outcome.item_scores.is_empty());
    }
}
