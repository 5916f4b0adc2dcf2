//! Observability tests for evaluation lifecycle logging and counters.

use repograde_core::obs::{
    emit_category_finished, emit_category_started, emit_channel_closed, emit_event_dropped,
    emit_technique_failed,
};
use repograde_core::{
    init_tracing, ChannelConfig, EventType, EvaluationSpan, ProgressChannel, ProgressEvent,
    TechniqueError, METRICS,
};
use tokio::runtime::Handle;
use tracing::Level;

#[test]
fn test_lifecycle_helpers_emit_without_subscriber_setup() {
    emit_category_started("eval-obs", "docs", 4);
    emit_category_finished("eval-obs", "docs", 3, 1, 120);
    emit_channel_closed("eval-obs", 2, false);
}

#[test]
fn test_failure_helpers_accept_domain_errors() {
    init_tracing(false, Level::DEBUG);
    let timeout = TechniqueError::Timeout { timeout_ms: 50 };
    emit_technique_failed("testing", "mutation", &timeout);
    emit_event_dropped("eval-obs", "technique_start", false, "intake full");
    emit_event_dropped("eval-obs", "evaluation_complete", true, "intake full");
}

#[test]
fn test_evaluation_span_nests_helpers() {
    let span = EvaluationSpan::enter("eval-span");
    emit_category_started("eval-span", "security", 1);
    drop(span);
}

#[tokio::test]
async fn test_dropped_events_are_counted() {
    let channel = ProgressChannel::new(
        ChannelConfig {
            intake_capacity: 1,
            critical_wait_ms: 10,
            ..ChannelConfig::default()
        },
        Handle::current(),
    );
    let before_dropped = METRICS.events_dropped();
    let before_critical = METRICS.critical_events_dropped();

    channel.emit_from_producer("eval-m", ProgressEvent::new("eval-m", EventType::TechniqueStart));
    channel.emit_from_producer("eval-m", ProgressEvent::new("eval-m", EventType::TechniqueStart));
    channel.emit_from_producer(
        "eval-m",
        ProgressEvent::new("eval-m", EventType::EvaluationComplete),
    );

    assert_eq!(METRICS.events_dropped() - before_dropped, 2);
    assert_eq!(METRICS.critical_events_dropped() - before_critical, 1);
    METRICS.flush();
}
