//! Progress channel delivery, buffering, backpressure and lifecycle tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use repograde_core::{
    ChannelConfig, EmitOutcome, EventType, ProgressChannel, ProgressEmitter, ProgressEvent,
    ProgressStream, PublishOutcome, HEARTBEAT_PROGRESS,
};
use tokio::runtime::Handle;

const WAIT: Duration = Duration::from_secs(2);

fn channel_with(config: ChannelConfig) -> Arc<ProgressChannel> {
    ProgressChannel::new(config, Handle::current())
}

fn channel() -> Arc<ProgressChannel> {
    channel_with(ChannelConfig::default())
}

fn step(evaluation_id: &str, n: usize) -> ProgressEvent {
    ProgressEvent::new(evaluation_id, EventType::TechniqueStart).with_message(n.to_string())
}

async fn next(stream: &mut ProgressStream) -> Option<ProgressEvent> {
    tokio::time::timeout(WAIT, stream.next())
        .await
        .expect("stream stalled")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_late_subscriber_receives_backlog_in_order() {
    let channel = channel();
    assert!(channel.create_channel("eval-late"));

    for n in 0..5 {
        assert_eq!(
            channel.emit_from_producer("eval-late", step("eval-late", n)),
            EmitOutcome::Queued
        );
    }
    wait_until(|| channel.pending_len("eval-late") == 5).await;

    let mut stream = channel.subscribe("eval-late");
    for n in 0..5 {
        let event = next(&mut stream).await.unwrap();
        assert_eq!(event.message.as_deref(), Some(n.to_string().as_str()));
    }
    assert_eq!(channel.pending_len("eval-late"), 0);

    channel.emit_from_producer("eval-late", step("eval-late", 5));
    let live = next(&mut stream).await.unwrap();
    assert_eq!(live.message.as_deref(), Some("5"));
}

#[tokio::test]
async fn test_publish_without_subscriber_buffers() {
    let channel = channel();

    let outcome = channel
        .publish_async("eval-buffer", step("eval-buffer", 0))
        .await;

    assert_eq!(outcome, PublishOutcome::Buffered);
    assert_eq!(channel.pending_len("eval-buffer"), 1);
    assert!(channel.is_open("eval-buffer"));
}

#[tokio::test]
async fn test_pending_buffer_keeps_newest_within_bound() {
    let channel = channel_with(ChannelConfig {
        pending_max_events: 3,
        ..ChannelConfig::default()
    });

    for n in 0..5 {
        channel.publish_async("eval-bound", step("eval-bound", n)).await;
    }
    assert_eq!(channel.pending_len("eval-bound"), 3);

    let mut stream = channel.subscribe("eval-bound");
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(next(&mut stream).await.unwrap().message.unwrap());
    }
    assert_eq!(seen, vec!["2", "3", "4"]);
}

#[tokio::test]
async fn test_pending_buffer_prefers_evicting_non_critical() {
    let channel = channel_with(ChannelConfig {
        pending_max_events: 2,
        ..ChannelConfig::default()
    });

    let done = ProgressEvent::new("eval-crit", EventType::EvaluationComplete);
    channel.publish_async("eval-crit", done).await;
    channel.publish_async("eval-crit", step("eval-crit", 1)).await;
    channel.publish_async("eval-crit", step("eval-crit", 2)).await;

    let mut stream = channel.subscribe("eval-crit");
    assert_eq!(
        next(&mut stream).await.unwrap().event_type,
        EventType::EvaluationComplete
    );
    assert!(next(&mut stream).await.is_none());
}

#[tokio::test]
async fn test_expired_backlog_is_not_replayed() {
    let channel = channel_with(ChannelConfig {
        pending_max_age_ms: 20,
        heartbeat_interval_ms: 50,
        ..ChannelConfig::default()
    });

    channel.publish_async("eval-aged", step("eval-aged", 0)).await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    let mut stream = channel.subscribe("eval-aged");
    let first = next(&mut stream).await.unwrap();
    assert_eq!(first.event_type, EventType::Heartbeat);
}

#[tokio::test]
async fn test_non_critical_event_dropped_immediately_when_intake_full() {
    // No transfer task: nothing drains the intake.
    let channel = channel_with(ChannelConfig {
        intake_capacity: 1,
        critical_wait_ms: 200,
        ..ChannelConfig::default()
    });

    assert_eq!(
        channel.emit_from_producer("eval-full", step("eval-full", 0)),
        EmitOutcome::Queued
    );

    let started = Instant::now();
    let outcome = channel.emit_from_producer("eval-full", step("eval-full", 1));
    assert_eq!(outcome, EmitOutcome::Dropped);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(channel.intake_len(), 1);
}

#[tokio::test]
async fn test_critical_event_waits_bounded_time_when_intake_full() {
    let channel = channel_with(ChannelConfig {
        intake_capacity: 1,
        critical_wait_ms: 200,
        ..ChannelConfig::default()
    });
    channel.emit_from_producer("eval-full", step("eval-full", 0));

    let started = Instant::now();
    let outcome = channel.emit_from_producer(
        "eval-full",
        ProgressEvent::new("eval-full", EventType::EvaluationComplete),
    );
    let waited = started.elapsed();

    assert_eq!(outcome, EmitOutcome::Dropped);
    assert!(waited >= Duration::from_millis(180), "waited {waited:?}");
    assert!(waited < Duration::from_secs(2), "waited {waited:?}");
}

#[tokio::test]
async fn test_closed_channel_ignores_everything() {
    let channel = channel();
    assert!(channel.create_channel("eval-closed"));

    assert!(channel.close_channel("eval-closed"));
    assert!(!channel.close_channel("eval-closed"));
    assert!(channel.is_closed("eval-closed"));
    assert!(!channel.is_open("eval-closed"));

    assert_eq!(
        channel.emit_from_producer("eval-closed", step("eval-closed", 0)),
        EmitOutcome::Closed
    );
    assert_eq!(
        channel
            .publish_async("eval-closed", step("eval-closed", 0))
            .await,
        PublishOutcome::Closed
    );
    assert!(!channel.create_channel("eval-closed"));

    let mut stream = channel.subscribe("eval-closed");
    assert!(next(&mut stream).await.is_none());
    assert_eq!(channel.subscriber_count("eval-closed"), 0);
}

#[tokio::test]
async fn test_close_ends_attached_streams() {
    let channel = channel();
    channel.create_channel("eval-end");
    let mut stream = channel.subscribe("eval-end");

    channel.close_channel("eval-end");

    assert!(next(&mut stream).await.is_none());
}

#[tokio::test]
async fn test_heartbeat_sent_when_idle() {
    let channel = channel_with(ChannelConfig {
        heartbeat_interval_ms: 50,
        ..ChannelConfig::default()
    });
    channel.create_channel("eval-idle");
    let mut stream = channel.subscribe("eval-idle");

    let event = next(&mut stream).await.unwrap();

    assert_eq!(event.event_type, EventType::Heartbeat);
    assert_eq!(event.evaluation_id, "eval-idle");
    assert_eq!(event.progress_percent, HEARTBEAT_PROGRESS);

    // Heartbeats do not end the stream.
    let again = next(&mut stream).await.unwrap();
    assert_eq!(again.event_type, EventType::Heartbeat);
}

#[tokio::test]
async fn test_stream_ends_after_terminal_event() {
    let channel = channel();
    channel.create_channel("eval-term");
    let mut stream = channel.subscribe("eval-term");

    channel.emit_from_producer("eval-term", step("eval-term", 0));
    channel.emit_from_producer(
        "eval-term",
        ProgressEvent::new("eval-term", EventType::EvaluationError).with_error("all failed"),
    );

    assert_eq!(next(&mut stream).await.unwrap().event_type, EventType::TechniqueStart);
    let terminal = next(&mut stream).await.unwrap();
    assert_eq!(terminal.event_type, EventType::EvaluationError);
    assert_eq!(terminal.error_message.as_deref(), Some("all failed"));
    assert!(next(&mut stream).await.is_none());
}

#[tokio::test]
async fn test_every_subscriber_receives_each_event() {
    let channel = channel();
    channel.create_channel("eval-fan");
    let mut first = channel.subscribe("eval-fan");
    let mut second = channel.subscribe("eval-fan");
    assert_eq!(channel.subscriber_count("eval-fan"), 2);

    channel.emit_from_producer("eval-fan", step("eval-fan", 7));

    assert_eq!(next(&mut first).await.unwrap().message.as_deref(), Some("7"));
    assert_eq!(next(&mut second).await.unwrap().message.as_deref(), Some("7"));
}

#[tokio::test]
async fn test_dropping_stream_deregisters_subscriber() {
    let channel = channel();
    channel.create_channel("eval-drop");
    let stream = channel.subscribe("eval-drop");
    assert_eq!(channel.subscriber_count("eval-drop"), 1);

    drop(stream);

    assert_eq!(channel.subscriber_count("eval-drop"), 0);
    assert!(channel.is_open("eval-drop"));
}

#[tokio::test]
async fn test_emits_from_plain_thread_are_delivered() {
    let channel = channel();
    channel.create_channel("eval-thread");
    let mut stream = channel.subscribe("eval-thread");

    let producer = Arc::clone(&channel);
    std::thread::spawn(move || {
        for n in 0..3 {
            producer.emit_from_producer("eval-thread", step("eval-thread", n));
        }
    })
    .join()
    .unwrap();

    for n in 0..3 {
        let event = next(&mut stream).await.unwrap();
        assert_eq!(event.message, Some(n.to_string()));
    }
}

#[tokio::test]
async fn test_emitter_routes_to_its_evaluation() {
    let channel = channel();
    channel.create_channel("eval-a");
    channel.create_channel("eval-b");
    let mut a = channel.subscribe("eval-a");

    let emitter_b = ProgressEmitter::new(Arc::clone(&channel), "eval-b");
    let emitter_a = ProgressEmitter::new(Arc::clone(&channel), "eval-a");
    emitter_b.emit(step("eval-b", 1));
    emitter_a.emit(step("eval-a", 2));

    let event = next(&mut a).await.unwrap();
    assert_eq!(event.evaluation_id, "eval-a");
    assert_eq!(event.message.as_deref(), Some("2"));

    let detached = ProgressEmitter::detached("eval-c");
    assert_eq!(detached.emit(step("eval-c", 0)), EmitOutcome::Detached);
}

#[tokio::test]
async fn test_stale_channels_are_swept() {
    let channel = channel_with(ChannelConfig {
        stale_after_ms: 20,
        ..ChannelConfig::default()
    });
    channel.create_channel("eval-old");
    tokio::time::sleep(Duration::from_millis(40)).await;
    channel.create_channel("eval-fresh");

    let closed = channel.cleanup_stale_channels();

    assert_eq!(closed, vec!["eval-old".to_string()]);
    assert!(channel.is_closed("eval-old"));
    assert!(channel.is_open("eval-fresh"));
}

#[tokio::test]
async fn test_transfer_task_stops_when_no_channels_remain() {
    let channel = channel();
    channel.create_channel("eval-1");
    channel.create_channel("eval-2");
    assert!(channel.is_transfer_running());

    channel.close_channel("eval-1");
    assert!(channel.is_transfer_running());

    channel.close_channel("eval-2");
    assert!(!channel.is_transfer_running());
    assert_eq!(channel.active_channels(), 0);

    // A new evaluation restarts delivery.
    channel.create_channel("eval-3");
    assert!(channel.is_transfer_running());
    let mut stream = channel.subscribe("eval-3");
    channel.emit_from_producer("eval-3", step("eval-3", 9));
    assert_eq!(next(&mut stream).await.unwrap().message.as_deref(), Some("9"));
}

#[tokio::test]
async fn test_current_requires_runtime() {
    assert!(ProgressChannel::current(ChannelConfig::default()).is_ok());

    let outside = std::thread::spawn(|| ProgressChannel::current(ChannelConfig::default()).is_err())
        .join()
        .unwrap();
    assert!(outside);
}

#[tokio::test]
async fn test_closed_ids_stay_terminal_and_are_counted() {
    let channel = channel();
    for id in ["eval-x", "eval-y", "eval-z"] {
        channel.create_channel(id);
        channel.close_channel(id);
    }
    assert_eq!(channel.closed_channels(), 3);
    assert_eq!(channel.active_channels(), 0);

    // Repeated operations on closed ids neither reopen nor re-count them.
    assert!(!channel.create_channel("eval-x"));
    assert!(!channel.close_channel("eval-y"));
    assert_eq!(
        channel.emit_from_producer("eval-z", step("eval-z", 0)),
        EmitOutcome::Closed
    );
    assert_eq!(channel.closed_channels(), 3);
    assert_eq!(channel.active_channels(), 0);
}
