//! Subscriber-side stream and deregistration.

use futures::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{Delivery, ProgressChannel};
use crate::domain::ProgressEvent;

/// Live sequence of progress events for one evaluation.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send + 'static>>;

/// Removes the subscriber from the registry when the stream is dropped,
/// including when the consumer is cancelled mid-await.
struct SubscriptionGuard {
    channel: Weak<ProgressChannel>,
    evaluation_id: String,
    subscriber_id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.unsubscribe(&self.evaluation_id, self.subscriber_id);
        }
    }
}

pub(super) fn open(
    channel: Weak<ProgressChannel>,
    evaluation_id: String,
    subscriber_id: u64,
    backlog: Vec<ProgressEvent>,
    mut rx: mpsc::Receiver<Delivery>,
    heartbeat: Duration,
) -> ProgressStream {
    let guard = SubscriptionGuard {
        channel,
        evaluation_id: evaluation_id.clone(),
        subscriber_id,
    };
    let mut backlog = VecDeque::from(backlog);

    Box::pin(async_stream::stream! {
        let _guard = guard;
        loop {
            let event = match backlog.pop_front() {
                Some(event) => event,
                None => match tokio::time::timeout(heartbeat, rx.recv()).await {
                    Ok(Some(Delivery::Event(event))) => event,
                    Ok(Some(Delivery::Close)) | Ok(None) => break,
                    Err(_) => ProgressEvent::heartbeat(evaluation_id.as_str()),
                },
            };
            let terminal = event.event_type.is_terminal();
            yield event;
            if terminal {
                break;
            }
        }
    })
}

/// Stream for a closed evaluation: ends immediately.
pub(super) fn closed(evaluation_id: String) -> ProgressStream {
    tracing::debug!(evaluation_id = %evaluation_id, "subscribe on closed channel");
    Box::pin(futures::stream::empty())
}
