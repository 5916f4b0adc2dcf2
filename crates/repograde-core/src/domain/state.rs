//! Branch-local and global evaluation state.
//!
//! A [`PartialEvaluationState`] is produced once per category branch and
//! consumed exactly once by [`EvaluationState::absorb`]. Both only ever grow
//! (or supersede entries) through the functions in [`crate::reducers`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::item::ItemScore;
use super::outcome::TokenUsage;
use super::trace::TraceEvent;
use crate::reducers;

/// A technique that was deliberately not run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExcludedTechnique {
    pub technique_id: String,
    pub reason: String,
    pub excluded_at: DateTime<Utc>,
    pub excluded_by: String,
}

impl ExcludedTechnique {
    pub fn new(
        technique_id: impl Into<String>,
        reason: impl Into<String>,
        excluded_by: impl Into<String>,
    ) -> Self {
        Self {
            technique_id: technique_id.into(),
            reason: reason.into(),
            excluded_at: Utc::now(),
            excluded_by: excluded_by.into(),
        }
    }
}

/// What one agent (category) contributed to the evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AgentContribution {
    pub agent: String,
    #[serde(default)]
    pub technique_ids: BTreeSet<String>,
    #[serde(default)]
    pub item_ids: BTreeSet<String>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, serde_json::Value>,
}

impl AgentContribution {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            ..Self::default()
        }
    }
}

/// State produced by a single category branch before fan-in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PartialEvaluationState {
    #[serde(default)]
    pub item_scores: BTreeMap<String, ItemScore>,
    #[serde(default)]
    pub trace_events: Vec<TraceEvent>,
    /// Sorted, de-duplicated technique ids.
    #[serde(default)]
    pub techniques_used: Vec<String>,
    #[serde(default)]
    pub excluded_techniques: Vec<ExcludedTechnique>,
    #[serde(default)]
    pub agent_contributions: BTreeMap<String, AgentContribution>,
}

impl PartialEvaluationState {
    pub fn is_empty(&self) -> bool {
        self.item_scores.is_empty()
            && self.trace_events.is_empty()
            && self.techniques_used.is_empty()
            && self.excluded_techniques.is_empty()
            && self.agent_contributions.is_empty()
    }
}

/// A technique that did not succeed, as reported in a [`CategoryResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TechniqueFailure {
    pub technique_id: String,
    pub error: String,
}

/// Non-fatal conditions reported alongside a category result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CategoryNotice {
    NoTechniquesAvailable,
}

impl fmt::Display for CategoryNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTechniquesAvailable => f.write_str("no techniques available"),
        }
    }
}

/// Per-category execution summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CategoryResult {
    pub category_id: String,
    pub techniques_succeeded: usize,
    pub techniques_failed: usize,
    /// Subset of `techniques_failed` that exceeded the per-task timeout.
    #[serde(default)]
    pub techniques_timed_out: usize,
    #[serde(default)]
    pub failed: Vec<TechniqueFailure>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<CategoryNotice>,
}

impl CategoryResult {
    pub fn empty(category_id: impl Into<String>) -> Self {
        Self {
            category_id: category_id.into(),
            ..Self::default()
        }
    }

    pub fn total(&self) -> usize {
        self.techniques_succeeded + self.techniques_failed
    }
}

/// Global evaluation state, folded from every branch's partial state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EvaluationState {
    pub evaluation_id: String,
    #[serde(flatten)]
    pub merged: PartialEvaluationState,
    #[serde(default)]
    pub category_results: BTreeMap<String, CategoryResult>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl EvaluationState {
    pub fn new(evaluation_id: impl Into<String>) -> Self {
        Self {
            evaluation_id: evaluation_id.into(),
            ..Self::default()
        }
    }

    /// Fold one branch's partial state into the global state.
    ///
    /// Uses only the reducer library, so branches may be absorbed in any
    /// order with the same final result.
    pub fn absorb(&mut self, partial: PartialEvaluationState) {
        let current = std::mem::take(&mut self.merged);
        self.merged = reducers::merge_partial_states(&current, &partial);
    }

    /// Record a category's execution summary and add its usage to the total.
    pub fn record_category(&mut self, result: CategoryResult) {
        self.usage += result.usage;
        self.category_results
            .insert(result.category_id.clone(), result);
    }

    pub fn techniques_failed(&self) -> usize {
        self.category_results
            .values()
            .map(|r| r.techniques_failed)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_category_result_has_zero_counts() {
        let result = CategoryResult::empty("security");
        assert_eq!(result.total(), 0);
        assert!(result.failed.is_empty());
        assert!(result.notice.is_none());
    }

    #[test]
    fn test_notice_display() {
        assert_eq!(
            CategoryNotice::NoTechniquesAvailable.to_string(),
            "no techniques available"
        );
    }

    #[test]
    fn test_record_category_sums_usage() {
        let mut state = EvaluationState::new("eval-1");
        let mut a = CategoryResult::empty("a");
        a.usage.input_tokens = 10;
        a.techniques_failed = 1;
        let mut b = CategoryResult::empty("b");
        b.usage.input_tokens = 5;
        b.techniques_failed = 2;
        state.record_category(a);
        state.record_category(b);
        assert_eq!(state.usage.input_tokens, 15);
        assert_eq!(state.techniques_failed(), 3);
        assert_eq!(state.category_results.len(), 2);
    }
}
