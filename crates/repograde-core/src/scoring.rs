//! Confidence-weighted, coverage-aware score normalisation.
//!
//! The normalised score measures the quality of what was actually assessed:
//! only `evaluated` items contribute to either side of the ratio. How much of
//! the rubric was assessed is reported separately as the coverage rate, so a
//! repository is not penalised twice for items that could not be evaluated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{Confidence, ItemScore, ItemStatus};

/// Number of items in the fixed rubric.
pub const TOTAL_RUBRIC_ITEMS: usize = 17;

/// Multiplier applied to medium-confidence scores.
pub const MEDIUM_CONFIDENCE_FACTOR: f64 = 0.85;

/// Share of a low-confidence score kept from the raw value.
pub const LOW_CONFIDENCE_RAW_WEIGHT: f64 = 0.3;

/// Share of a low-confidence score pulled towards the scale midpoint.
pub const LOW_CONFIDENCE_PRIOR_WEIGHT: f64 = 0.7;

/// Rationale phrases that indicate the technique had nothing to go on.
pub const ABSENCE_MARKERS: &[&str] = &[
    "not found",
    "not available",
    "cannot determine",
    "insufficient data",
    "no evidence",
    "unable to assess",
    "not provided",
    "absent",
    "missing",
];

/// Shrink a score according to how confident the technique was.
///
/// - high: unchanged
/// - medium: `raw * 0.85`
/// - low: `0.3 * raw + 0.7 * (max / 2)`
///
/// The result is always clamped to `[0, max]`.
pub fn adjust_score_by_confidence(raw_score: f64, max_score: f64, confidence: Confidence) -> f64 {
    let adjusted = match confidence {
        Confidence::High => raw_score,
        Confidence::Medium => raw_score * MEDIUM_CONFIDENCE_FACTOR,
        Confidence::Low => {
            LOW_CONFIDENCE_RAW_WEIGHT * raw_score + LOW_CONFIDENCE_PRIOR_WEIGHT * (max_score * 0.5)
        }
    };
    adjusted.clamp(0.0, max_score.max(0.0))
}

/// Result of normalising a set of item scores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreSummary {
    /// Sum of `score` over evaluated items.
    pub raw_score: f64,
    /// Sum of `max_score` over evaluated items.
    pub max_possible: f64,
    /// `100 * raw_score / max_possible`, or 0 when nothing was evaluated.
    pub normalized_score: f64,
    /// Evaluated items divided by rubric size.
    pub coverage_rate: f64,
    pub total_items: usize,
    pub evaluated_items: Vec<String>,
    pub excluded_items: Vec<String>,
    pub data_missing_items: Vec<String>,
    /// e.g. `"10/17 items evaluated"`.
    pub coverage_summary: String,
}

impl ScoreSummary {
    pub fn evaluated_count(&self) -> usize {
        self.evaluated_items.len()
    }
}

/// Normalise against the standard rubric of [`TOTAL_RUBRIC_ITEMS`] items.
pub fn calculate_exclusion_normalized_score(
    item_scores: &BTreeMap<String, ItemScore>,
) -> ScoreSummary {
    calculate_exclusion_normalized_score_for(item_scores, TOTAL_RUBRIC_ITEMS)
}

/// Normalise against a rubric of `total_items` items.
pub fn calculate_exclusion_normalized_score_for(
    item_scores: &BTreeMap<String, ItemScore>,
    total_items: usize,
) -> ScoreSummary {
    let mut raw_score = 0.0;
    let mut max_possible = 0.0;
    let mut evaluated_items = Vec::new();
    let mut excluded_items = Vec::new();
    let mut data_missing_items = Vec::new();

    for (item_id, item) in item_scores {
        match item.status {
            ItemStatus::Evaluated => {
                raw_score += item.score;
                max_possible += item.max_score;
                evaluated_items.push(item_id.clone());
            }
            ItemStatus::Excluded => excluded_items.push(item_id.clone()),
            ItemStatus::DataMissing => data_missing_items.push(item_id.clone()),
        }
    }

    let normalized_score = if max_possible > 0.0 {
        100.0 * raw_score / max_possible
    } else {
        0.0
    };
    let coverage_rate = if total_items > 0 {
        evaluated_items.len() as f64 / total_items as f64
    } else {
        0.0
    };
    let coverage_summary = format!("{}/{} items evaluated", evaluated_items.len(), total_items);

    ScoreSummary {
        raw_score,
        max_possible,
        normalized_score,
        coverage_rate,
        total_items,
        evaluated_items,
        excluded_items,
        data_missing_items,
        coverage_summary,
    }
}

/// Return a copy of `item_scores` with every evaluated entry's score
/// adjusted for its confidence. Other statuses pass through unchanged.
pub fn apply_confidence_adjustment_to_scores(
    item_scores: &BTreeMap<String, ItemScore>,
) -> BTreeMap<String, ItemScore> {
    item_scores
        .iter()
        .map(|(item_id, item)| {
            let mut adjusted = item.clone();
            if item.is_evaluated() {
                adjusted.score =
                    adjust_score_by_confidence(item.score, item.max_score, item.confidence);
            }
            (item_id.clone(), adjusted)
        })
        .collect()
}

/// Confidence-adjust, then normalise. This is the end-of-evaluation entry
/// point, run once on the fully merged item scores.
pub fn score_evaluation(
    item_scores: &BTreeMap<String, ItemScore>,
    total_items: usize,
) -> ScoreSummary {
    let adjusted = apply_confidence_adjustment_to_scores(item_scores);
    calculate_exclusion_normalized_score_for(&adjusted, total_items)
}

/// Whether a technique's evidence and rationale show it had nothing to
/// assess.
///
/// True when there is no non-blank evidence, or the rationale contains any
/// of [`ABSENCE_MARKERS`] (case-insensitive).
pub fn is_information_absent<S: AsRef<str>>(evidence: &[S], rationale: &str) -> bool {
    if evidence.iter().all(|e| e.as_ref().trim().is_empty()) {
        return true;
    }
    let rationale = rationale.to_lowercase();
    ABSENCE_MARKERS
        .iter()
        .any(|marker| rationale.contains(marker))
}

/// Status a technique should assign to an item given its evidence.
pub fn classify_item_status<S: AsRef<str>>(evidence: &[S], rationale: &str) -> ItemStatus {
    if is_information_absent(evidence, rationale) {
        ItemStatus::DataMissing
    } else {
        ItemStatus::Evaluated
    }
}
