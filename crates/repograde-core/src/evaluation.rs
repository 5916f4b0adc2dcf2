//! Reference fan-out / fan-in driver.
//!
//! Runs one [`CategoryWorker`] per category concurrently, folds each
//! branch's partial state into a single [`EvaluationState`] as it arrives,
//! and scores the merged items once at the end. Arrival order does not
//! matter because the fold uses only the reducer library.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::channel::ProgressEmitter;
use crate::domain::{EvaluationContext, EvaluationState, EventType, ProgressEvent};
use crate::metrics::METRICS;
use crate::scoring::{score_evaluation, ScoreSummary};
use crate::worker::{CategoryWorker, ConcurrencyPolicy, TechniqueRunner};

/// Techniques selected for one category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryPlan {
    pub category_id: String,
    #[serde(default)]
    pub techniques: Vec<String>,
}

impl CategoryPlan {
    pub fn new<I, S>(category_id: impl Into<String>, techniques: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            category_id: category_id.into(),
            techniques: techniques.into_iter().map(Into::into).collect(),
        }
    }
}

/// Final state plus its score summary.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub state: EvaluationState,
    pub summary: ScoreSummary,
}

/// Run every category concurrently and fold the results.
///
/// Emits `evaluation_start` first and a critical `evaluation_complete` last
/// (or `evaluation_error` when techniques ran and none succeeded).
#[instrument(skip_all, fields(evaluation_id = %context.evaluation_id, categories = plans.len()))]
pub async fn run_evaluation(
    plans: Vec<CategoryPlan>,
    runner: Arc<dyn TechniqueRunner>,
    policy: ConcurrencyPolicy,
    context: Arc<EvaluationContext>,
    emitter: ProgressEmitter,
    rubric_items: usize,
) -> EvaluationReport {
    emitter.emit(
        ProgressEvent::new(emitter.evaluation_id(), EventType::EvaluationStart)
            .with_message(format!("{} categories", plans.len())),
    );

    let mut branches: FuturesUnordered<_> = plans
        .into_iter()
        .map(|plan| {
            let worker = CategoryWorker::new(plan.category_id, Arc::clone(&runner), policy.clone())
                .with_emitter(emitter.clone());
            let context = Arc::clone(&context);
            async move { worker.run(plan.techniques, context).await }
        })
        .collect();

    let mut state = EvaluationState::new(context.evaluation_id.clone());
    while let Some(branch) = branches.next().await {
        state.absorb(branch.partial);
        state.record_category(branch.result);
    }

    let summary = score_evaluation(&state.merged.item_scores, rubric_items);
    let succeeded: usize = state
        .category_results
        .values()
        .map(|r| r.techniques_succeeded)
        .sum();
    let failed = state.techniques_failed();

    let terminal = if succeeded == 0 && failed > 0 {
        ProgressEvent::new(emitter.evaluation_id(), EventType::EvaluationError)
            .with_error(format!("all {failed} techniques failed"))
    } else {
        ProgressEvent::new(emitter.evaluation_id(), EventType::EvaluationComplete)
            .with_score(summary.normalized_score, 100.0)
    };
    emitter.emit(
        terminal
            .with_progress(100.0)
            .with_message(summary.coverage_summary.clone()),
    );

    info!(
        normalized_score = summary.normalized_score,
        coverage_rate = summary.coverage_rate,
        techniques_succeeded = succeeded,
        techniques_failed = failed,
        "evaluation finished"
    );
    METRICS.flush();

    EvaluationReport { state, summary }
}
