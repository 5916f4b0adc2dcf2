//! Concurrency-bounded category worker.
//!
//! Runs every technique selected for one category under a shared semaphore
//! and a per-technique timeout. A technique that times out, errors or panics
//! is recorded as a failure; its siblings keep running and the category
//! always completes with a usable partial state.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::channel::ProgressEmitter;
use crate::config::WorkerConfig;
use crate::domain::error::panic_message;
use crate::domain::{
    AgentContribution, CategoryNotice, CategoryResult, EvaluationContext, EventType,
    PartialEvaluationState, ProgressEvent, TechniqueError, TechniqueFailure, TechniqueOutcome,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::reducers::{merge_agent_contributions, merge_partial_states};

/// The technique contract: run one technique against a read-only context.
///
/// Returning `Ok` with `success == false` is treated the same as `Err`.
#[async_trait]
pub trait TechniqueRunner: Send + Sync {
    async fn run(
        &self,
        technique_id: &str,
        context: Arc<EvaluationContext>,
    ) -> Result<TechniqueOutcome, TechniqueError>;
}

/// Adapts an async closure `(technique_id, context) -> Result<TechniqueOutcome, TechniqueError>`
/// into a [`TechniqueRunner`].
pub struct FnTechniqueRunner<F>(pub F);

#[async_trait]
impl<F, Fut> TechniqueRunner for FnTechniqueRunner<F>
where
    F: Fn(String, Arc<EvaluationContext>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TechniqueOutcome, TechniqueError>> + Send,
{
    async fn run(
        &self,
        technique_id: &str,
        context: Arc<EvaluationContext>,
    ) -> Result<TechniqueOutcome, TechniqueError> {
        (self.0)(technique_id.to_string(), context).await
    }
}

/// Concurrency limit and per-technique timeout.
///
/// Clones share one semaphore, so several workers built from the same policy
/// respect a single global limit.
#[derive(Debug, Clone)]
pub struct ConcurrencyPolicy {
    semaphore: Arc<Semaphore>,
    limit: usize,
    timeout: Duration,
}

impl ConcurrencyPolicy {
    pub fn new(limit: usize, timeout: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            timeout,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.max_concurrent, config.technique_timeout())
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Permits not currently held by a running technique.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

/// Output of one category run.
#[derive(Debug, Clone)]
pub struct CategoryRun {
    pub result: CategoryResult,
    pub partial: PartialEvaluationState,
}

/// What one spawned technique task reports back.
struct TaskReport {
    index: usize,
    technique_id: String,
    result: Result<TechniqueOutcome, TechniqueError>,
}

/// Executes one category's techniques.
pub struct CategoryWorker {
    category_id: String,
    runner: Arc<dyn TechniqueRunner>,
    policy: ConcurrencyPolicy,
    emitter: Option<ProgressEmitter>,
}

impl CategoryWorker {
    pub fn new(
        category_id: impl Into<String>,
        runner: Arc<dyn TechniqueRunner>,
        policy: ConcurrencyPolicy,
    ) -> Self {
        Self {
            category_id: category_id.into(),
            runner,
            policy,
            emitter: None,
        }
    }

    /// Report progress through `emitter` instead of discarding it.
    pub fn with_emitter(mut self, emitter: ProgressEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn category_id(&self) -> &str {
        &self.category_id
    }

    /// Run `technique_ids` and fold every success into a partial state.
    ///
    /// Never fails: an empty list yields a zero-count result carrying
    /// [`CategoryNotice::NoTechniquesAvailable`], and technique failures are
    /// listed in [`CategoryResult::failed`].
    #[instrument(skip_all, fields(category_id = %self.category_id, evaluation_id = %context.evaluation_id))]
    pub async fn run(
        &self,
        technique_ids: Vec<String>,
        context: Arc<EvaluationContext>,
    ) -> CategoryRun {
        let started = Instant::now();
        let total = technique_ids.len();
        let emitter = self
            .emitter
            .clone()
            .unwrap_or_else(|| ProgressEmitter::detached(context.evaluation_id.clone()));

        obs::emit_category_started(&context.evaluation_id, &self.category_id, total);
        emitter.emit(
            ProgressEvent::new(emitter.evaluation_id(), EventType::CategoryStart)
                .with_category(&self.category_id)
                .with_message(format!("{total} techniques selected")),
        );

        if total == 0 {
            let mut result = CategoryResult::empty(&self.category_id);
            result.notice = Some(CategoryNotice::NoTechniquesAvailable);
            result.duration_ms = elapsed_ms(started);
            emitter.emit(
                ProgressEvent::new(emitter.evaluation_id(), EventType::CategoryComplete)
                    .with_category(&self.category_id)
                    .with_progress(100.0)
                    .with_message(CategoryNotice::NoTechniquesAvailable.to_string()),
            );
            obs::emit_category_finished(&context.evaluation_id, &self.category_id, 0, 0, 0);
            return CategoryRun {
                result,
                partial: PartialEvaluationState::default(),
            };
        }

        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();
        let mut ids = technique_ids.clone();

        for (index, technique_id) in technique_ids.into_iter().enumerate() {
            let runner = Arc::clone(&self.runner);
            let semaphore = Arc::clone(&self.policy.semaphore);
            let timeout = self.policy.timeout;
            let context = Arc::clone(&context);
            let emitter = emitter.clone();
            let completed = Arc::clone(&completed);
            let category_id = self.category_id.clone();

            tasks.spawn(async move {
                // Held until the task ends, whatever the outcome.
                let _permit = semaphore.acquire_owned().await.ok();

                emitter.emit(
                    ProgressEvent::new(emitter.evaluation_id(), EventType::TechniqueStart)
                        .with_category(&category_id)
                        .with_technique(&technique_id)
                        .with_progress(percent(completed.load(Ordering::SeqCst), total)),
                );

                let task_started = Instant::now();
                let run = AssertUnwindSafe(runner.run(&technique_id, context)).catch_unwind();
                let result = match tokio::time::timeout(timeout, run).await {
                    Err(_) => Err(TechniqueError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                    Ok(Err(panic)) => Err(TechniqueError::Panicked(panic_message(panic.as_ref()))),
                    Ok(Ok(Err(e))) => Err(e),
                    Ok(Ok(Ok(outcome))) if !outcome.success => Err(TechniqueError::Failed(
                        outcome
                            .error
                            .unwrap_or_else(|| "technique reported failure".to_string()),
                    )),
                    Ok(Ok(Ok(outcome))) => Ok(outcome),
                };
                let duration_ms = elapsed_ms(task_started);
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;

                let event = match &result {
                    Ok(outcome) => {
                        METRICS.inc_techniques_succeeded();
                        let mut event =
                            ProgressEvent::new(emitter.evaluation_id(), EventType::TechniqueComplete);
                        let (score, max_score) = outcome
                            .item_scores
                            .values()
                            .fold((0.0, 0.0), |(s, m), item| (s + item.score, m + item.max_score));
                        if !outcome.item_scores.is_empty() {
                            event = event.with_score(score, max_score);
                        }
                        event
                    }
                    Err(e) => {
                        METRICS.inc_techniques_failed(e.is_timeout());
                        obs::emit_technique_failed(&category_id, &technique_id, e);
                        ProgressEvent::new(emitter.evaluation_id(), EventType::TechniqueError)
                            .with_error(e.to_string())
                    }
                };
                emitter.emit(
                    event
                        .with_category(&category_id)
                        .with_technique(&technique_id)
                        .with_progress(percent(done, total))
                        .with_duration_ms(duration_ms),
                );

                TaskReport {
                    index,
                    technique_id,
                    result,
                }
            });
        }

        let mut reports: Vec<Option<TaskReport>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    let index = report.index;
                    reports[index] = Some(report);
                }
                Err(e) => warn!(error = %e, "technique task did not complete"),
            }
        }

        let mut result = CategoryResult::empty(&self.category_id);
        let mut partial = PartialEvaluationState::default();
        let mut contribution = AgentContribution::new(&self.category_id);

        for (index, report) in reports.into_iter().enumerate() {
            let report = report.unwrap_or_else(|| TaskReport {
                index,
                technique_id: std::mem::take(&mut ids[index]),
                result: Err(TechniqueError::failed("technique task cancelled")),
            });
            match report.result {
                Ok(outcome) => {
                    result.techniques_succeeded += 1;
                    result.usage += outcome.usage;
                    contribution
                        .technique_ids
                        .insert(report.technique_id.clone());
                    contribution
                        .item_ids
                        .extend(outcome.item_scores.keys().cloned());
                    let branch = PartialEvaluationState {
                        item_scores: outcome.item_scores,
                        trace_events: outcome.trace_events,
                        techniques_used: vec![report.technique_id],
                        ..PartialEvaluationState::default()
                    };
                    partial = merge_partial_states(&partial, &branch);
                }
                Err(e) => {
                    result.techniques_failed += 1;
                    if e.is_timeout() {
                        result.techniques_timed_out += 1;
                    }
                    result.failed.push(TechniqueFailure {
                        technique_id: report.technique_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        contribution.artifacts.insert(
            "techniques_succeeded".to_string(),
            serde_json::json!(result.techniques_succeeded),
        );
        contribution.artifacts.insert(
            "techniques_failed".to_string(),
            serde_json::json!(result.techniques_failed),
        );
        partial.agent_contributions = merge_agent_contributions(
            &partial.agent_contributions,
            &BTreeMap::from([(self.category_id.clone(), contribution)]),
        );
        result.duration_ms = elapsed_ms(started);

        debug!(
            succeeded = result.techniques_succeeded,
            failed = result.techniques_failed,
            "category folded"
        );
        emitter.emit(
            ProgressEvent::new(emitter.evaluation_id(), EventType::CategoryComplete)
                .with_category(&self.category_id)
                .with_progress(100.0)
                .with_duration_ms(result.duration_ms)
                .with_message(format!(
                    "{}/{} techniques succeeded",
                    result.techniques_succeeded, total
                )),
        );
        obs::emit_category_finished(
            &context.evaluation_id,
            &self.category_id,
            result.techniques_succeeded,
            result.techniques_failed,
            result.duration_ms,
        );

        CategoryRun { result, partial }
    }
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 * 1000.0 / total as f64).round() / 10.0
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
