//! Structured observability hooks for evaluation lifecycle events.
//!
//! Events are emitted at `info!` (lifecycle) or `warn!`/`error!` (failures
//! and dropped progress) with an `event` field naming the lifecycle point.

use tracing::{error, info, warn};

/// RAII guard that enters an evaluation-scoped tracing span.
///
/// ```ignore
/// let _span = EvaluationSpan::enter("eval-42");
/// // tracing calls below carry evaluation_id = "eval-42"
/// ```
pub struct EvaluationSpan {
    _span: tracing::span::EnteredSpan,
}

impl EvaluationSpan {
    pub fn enter(evaluation_id: &str) -> Self {
        let span = tracing::info_span!("repograde.evaluation", evaluation_id = %evaluation_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_category_started(evaluation_id: &str, category_id: &str, techniques: usize) {
    info!(
        event = "category.started",
        evaluation_id = %evaluation_id,
        category_id = %category_id,
        techniques = techniques,
    );
}

pub fn emit_category_finished(
    evaluation_id: &str,
    category_id: &str,
    succeeded: usize,
    failed: usize,
    duration_ms: u64,
) {
    info!(
        event = "category.finished",
        evaluation_id = %evaluation_id,
        category_id = %category_id,
        succeeded = succeeded,
        failed = failed,
        duration_ms = duration_ms,
    );
}

/// Technique failure at warning level.
pub fn emit_technique_failed(category_id: &str, technique_id: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "technique.failed",
        category_id = %category_id,
        technique_id = %technique_id,
        error = %error,
    );
}

/// A progress event was dropped. Critical drops are logged at `error!`.
pub fn emit_event_dropped(evaluation_id: &str, event_type: &str, critical: bool, reason: &str) {
    if critical {
        error!(
            event = "progress.dropped",
            evaluation_id = %evaluation_id,
            event_type = %event_type,
            reason = %reason,
            "critical progress event dropped",
        );
    } else {
        warn!(
            event = "progress.dropped",
            evaluation_id = %evaluation_id,
            event_type = %event_type,
            reason = %reason,
        );
    }
}

pub fn emit_channel_closed(evaluation_id: &str, subscribers: usize, stale: bool) {
    info!(
        event = "channel.closed",
        evaluation_id = %evaluation_id,
        subscribers = subscribers,
        stale = stale,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_span_enter() {
        let _span = EvaluationSpan::enter("eval-test");
        emit_category_started("eval-test", "docs", 3);
        emit_event_dropped("eval-test", "evaluation_complete", true, "intake full");
    }
}
