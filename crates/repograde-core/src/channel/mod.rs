//! Synchronous-to-asynchronous progress channel.
//!
//! Producers (category workers, technique code, plain threads) push progress
//! with [`ProgressChannel::emit_from_producer`], which never blocks except
//! for a bounded wait on critical events. A single transfer task drains the
//! shared intake queue in small batches and is the only writer of subscriber
//! queues, so producers and consumers never touch each other's state.
//!
//! Each evaluation id moves through `UNCREATED -> OPEN -> CLOSED`. `CLOSED`
//! is terminal: every later operation on that id is a silent no-op.
//!
//! ```ignore
//! let channel = ProgressChannel::current(ChannelConfig::default())?;
//! channel.create_channel("eval-1");
//! let mut events = Box::pin(channel.subscribe("eval-1"));
//! channel.emit_from_producer("eval-1", ProgressEvent::new("eval-1", EventType::CategoryStart));
//! while let Some(event) = events.next().await { /* forward downstream */ }
//! ```

mod pending;
mod subscription;
mod transfer;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ChannelConfig;
use crate::domain::{ChannelError, ProgressEvent};
use crate::metrics::METRICS;
use crate::obs;

use pending::PendingBuffer;
pub use subscription::ProgressStream;
use transfer::TransferTask;

/// What happened to an event handed to [`ProgressChannel::emit_from_producer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Queued,
    /// Intake full (immediately, or after the critical-event wait).
    Dropped,
    /// The evaluation's channel is closed.
    Closed,
    /// Emitted through a [`ProgressEmitter`] with no channel attached.
    Detached,
}

/// What [`ProgressChannel::publish_async`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Held in the pending buffer for a future subscriber.
    Buffered,
    /// Handed to this many subscriber queues.
    Delivered(usize),
    Closed,
}

/// Event tagged with its evaluation id on the intake queue.
#[derive(Debug)]
struct Envelope {
    evaluation_id: String,
    event: ProgressEvent,
}

/// Item placed on a subscriber's queue.
#[derive(Debug)]
enum Delivery {
    Event(ProgressEvent),
    Close,
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Delivery>,
}

#[derive(Debug)]
struct EvaluationChannel {
    subscribers: Vec<Subscriber>,
    pending: PendingBuffer,
    last_activity: Instant,
}

/// All mutable channel state, guarded by one coarse lock.
#[derive(Debug, Default)]
struct Registry {
    channels: HashMap<String, EvaluationChannel>,
    /// Ids closed during this channel's lifetime. Never pruned, since
    /// `CLOSED` is terminal; it grows by one id per finished evaluation.
    /// Hosts that run unbounded numbers of evaluations should recycle the
    /// whole [`ProgressChannel`] periodically.
    closed: HashSet<String>,
    transfer: Option<TransferTask>,
    /// Previous transfer task, still finishing its last batch.
    retiring: Option<tokio::task::JoinHandle<()>>,
}

/// Process-wide progress channel coordinating every evaluation.
#[derive(Debug)]
pub struct ProgressChannel {
    config: ChannelConfig,
    intake_tx: Sender<Envelope>,
    intake_rx: Receiver<Envelope>,
    registry: Mutex<Registry>,
    runtime: Handle,
    next_subscriber: AtomicU64,
}

impl ProgressChannel {
    /// Create a channel whose transfer task runs on `runtime`.
    pub fn new(config: ChannelConfig, runtime: Handle) -> Arc<Self> {
        let (intake_tx, intake_rx) = crossbeam_channel::bounded(config.intake_capacity.max(1));
        Arc::new(Self {
            config,
            intake_tx,
            intake_rx,
            registry: Mutex::new(Registry::default()),
            runtime,
            next_subscriber: AtomicU64::new(1),
        })
    }

    /// Create a channel bound to the runtime of the calling context.
    pub fn current(config: ChannelConfig) -> Result<Arc<Self>, ChannelError> {
        let runtime = Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;
        Ok(Self::new(config, runtime))
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_evaluation_channel(&self, now: Instant) -> EvaluationChannel {
        EvaluationChannel {
            subscribers: Vec::new(),
            pending: PendingBuffer::new(
                self.config.pending_max_events,
                self.config.pending_max_age(),
            ),
            last_activity: now,
        }
    }

    /// Ensure state exists for `evaluation_id` and the transfer task is
    /// running. Idempotent. Returns `false` if the id is already closed.
    pub fn create_channel(self: &Arc<Self>, evaluation_id: &str) -> bool {
        let now = Instant::now();
        let mut registry = self.registry();
        if registry.closed.contains(evaluation_id) {
            debug!(evaluation_id = %evaluation_id, "create on closed channel ignored");
            return false;
        }
        if !registry.channels.contains_key(evaluation_id) {
            let channel = self.new_evaluation_channel(now);
            registry.channels.insert(evaluation_id.to_string(), channel);
            debug!(evaluation_id = %evaluation_id, "progress channel opened");
        } else if let Some(channel) = registry.channels.get_mut(evaluation_id) {
            channel.last_activity = now;
        }
        self.ensure_transfer_running(&mut registry);
        true
    }

    fn ensure_transfer_running(self: &Arc<Self>, registry: &mut Registry) {
        if registry.transfer.as_ref().is_some_and(TransferTask::is_running) {
            return;
        }
        let previous = registry.retiring.take();
        registry.transfer = Some(TransferTask::spawn(
            &self.runtime,
            Arc::downgrade(self),
            self.intake_rx.clone(),
            self.config.clone(),
            previous,
        ));
    }

    /// Non-blocking enqueue from any context, sync or async.
    ///
    /// Critical events wait up to `critical_wait_ms` for intake space; all
    /// other events are dropped at once when the intake is full.
    pub fn emit_from_producer(&self, evaluation_id: &str, event: ProgressEvent) -> EmitOutcome {
        if self.registry().closed.contains(evaluation_id) {
            return EmitOutcome::Closed;
        }

        let critical = event.is_critical();
        let event_type = event.event_type;
        let envelope = Envelope {
            evaluation_id: evaluation_id.to_string(),
            event,
        };

        let sent = if critical {
            match self
                .intake_tx
                .send_timeout(envelope, self.config.critical_wait())
            {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(_)) => Err("intake full after critical wait"),
                Err(SendTimeoutError::Disconnected(_)) => Err("intake disconnected"),
            }
        } else {
            match self.intake_tx.try_send(envelope) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err("intake full"),
                Err(TrySendError::Disconnected(_)) => Err("intake disconnected"),
            }
        };

        match sent {
            Ok(()) => {
                METRICS.inc_events_emitted();
                EmitOutcome::Queued
            }
            Err(reason) => {
                METRICS.inc_events_dropped(critical);
                obs::emit_event_dropped(evaluation_id, event_type.as_str(), critical, reason);
                EmitOutcome::Dropped
            }
        }
    }

    /// Deliver one event to the evaluation's subscribers, or buffer it when
    /// there are none. Called by the transfer task.
    pub async fn publish_async(&self, evaluation_id: &str, event: ProgressEvent) -> PublishOutcome {
        let now = Instant::now();
        let targets: Vec<(u64, mpsc::Sender<Delivery>)> = {
            let mut registry = self.registry();
            if registry.closed.contains(evaluation_id) {
                return PublishOutcome::Closed;
            }
            let channel = registry
                .channels
                .entry(evaluation_id.to_string())
                .or_insert_with(|| self.new_evaluation_channel(now));
            channel.last_activity = now;

            if channel.subscribers.is_empty() {
                for evicted in channel.pending.push(event, now) {
                    METRICS.inc_events_dropped(evicted.is_critical());
                    obs::emit_event_dropped(
                        evaluation_id,
                        evicted.event_type.as_str(),
                        evicted.is_critical(),
                        "pending buffer evicted",
                    );
                }
                return PublishOutcome::Buffered;
            }
            channel
                .subscribers
                .iter()
                .map(|s| (s.id, s.tx.clone()))
                .collect()
        };

        let delivery_timeout = self.config.delivery_timeout();
        let mut delivered = 0;
        for (subscriber_id, tx) in targets {
            let send = tx.send(Delivery::Event(event.clone()));
            match tokio::time::timeout(delivery_timeout, send).await {
                Ok(Ok(())) => {
                    delivered += 1;
                    METRICS.inc_events_delivered();
                }
                Ok(Err(_)) => {
                    debug!(evaluation_id = %evaluation_id, subscriber_id, "subscriber gone");
                }
                Err(_) => {
                    METRICS.inc_events_dropped(event.is_critical());
                    warn!(
                        evaluation_id = %evaluation_id,
                        subscriber_id,
                        event_type = %event.event_type,
                        "subscriber queue full, event skipped for this subscriber"
                    );
                }
            }
        }
        PublishOutcome::Delivered(delivered)
    }

    /// Attach a live subscriber.
    ///
    /// Anything buffered while nobody was listening is yielded first, in
    /// order. A heartbeat is synthesized whenever no event arrives within the
    /// heartbeat interval. The stream ends on channel close or after a
    /// terminal event, and deregisters itself when dropped.
    pub fn subscribe(self: &Arc<Self>, evaluation_id: &str) -> ProgressStream {
        let now = Instant::now();
        let (tx, rx) = mpsc::channel(self.config.subscriber_capacity.max(1));
        let subscriber_id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);

        let backlog = {
            let mut registry = self.registry();
            if registry.closed.contains(evaluation_id) {
                None
            } else {
                let channel = registry
                    .channels
                    .entry(evaluation_id.to_string())
                    .or_insert_with(|| self.new_evaluation_channel(now));
                channel.last_activity = now;
                let backlog = channel.pending.drain(now);
                channel.subscribers.push(Subscriber {
                    id: subscriber_id,
                    tx,
                });
                self.ensure_transfer_running(&mut registry);
                Some(backlog)
            }
        };

        match backlog {
            Some(backlog) => {
                debug!(
                    evaluation_id = %evaluation_id,
                    subscriber_id,
                    backlog = backlog.len(),
                    "subscriber attached"
                );
                subscription::open(
                    Arc::downgrade(self),
                    evaluation_id.to_string(),
                    subscriber_id,
                    backlog,
                    rx,
                    self.config.heartbeat_interval(),
                )
            }
            None => subscription::closed(evaluation_id.to_string()),
        }
    }

    fn unsubscribe(&self, evaluation_id: &str, subscriber_id: u64) {
        let mut registry = self.registry();
        if let Some(channel) = registry.channels.get_mut(evaluation_id) {
            channel.subscribers.retain(|s| s.id != subscriber_id);
            debug!(evaluation_id = %evaluation_id, subscriber_id, "subscriber detached");
        }
    }

    /// Close an evaluation's channel. Idempotent; returns `false` if it was
    /// already closed.
    pub fn close_channel(&self, evaluation_id: &str) -> bool {
        self.close_inner(evaluation_id, false)
    }

    fn close_inner(&self, evaluation_id: &str, stale: bool) -> bool {
        let _span = obs::EvaluationSpan::enter(evaluation_id);
        let (subscribers, stopping) = {
            let mut registry = self.registry();
            if !registry.closed.insert(evaluation_id.to_string()) {
                return false;
            }
            let subscribers = registry
                .channels
                .remove(evaluation_id)
                .map(|c| c.subscribers)
                .unwrap_or_default();
            let mut stopping = false;
            if registry.channels.is_empty() {
                if let Some(task) = registry.transfer.take() {
                    registry.retiring = Some(task.retire());
                    stopping = true;
                }
            }
            (subscribers, stopping)
        };

        for subscriber in &subscribers {
            if subscriber.tx.try_send(Delivery::Close).is_err() {
                debug!(
                    evaluation_id = %evaluation_id,
                    subscriber_id = subscriber.id,
                    "close sentinel not queued; stream ends when its queue drains"
                );
            }
        }
        if stopping {
            debug!("no progress channels remain, transfer task stopping");
        }
        obs::emit_channel_closed(evaluation_id, subscribers.len(), stale);
        true
    }

    /// Close every open channel idle for longer than `stale_after_ms`.
    /// Returns the ids that were closed.
    pub fn cleanup_stale_channels(&self) -> Vec<String> {
        let now = Instant::now();
        let stale_after = self.config.stale_after();
        let stale: Vec<String> = self
            .registry()
            .channels
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.last_activity) > stale_after)
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .filter(|id| self.close_inner(id, true))
            .collect()
    }

    pub fn is_open(&self, evaluation_id: &str) -> bool {
        self.registry().channels.contains_key(evaluation_id)
    }

    pub fn is_closed(&self, evaluation_id: &str) -> bool {
        self.registry().closed.contains(evaluation_id)
    }

    pub fn subscriber_count(&self, evaluation_id: &str) -> usize {
        self.registry()
            .channels
            .get(evaluation_id)
            .map_or(0, |c| c.subscribers.len())
    }

    pub fn pending_len(&self, evaluation_id: &str) -> usize {
        self.registry()
            .channels
            .get(evaluation_id)
            .map_or(0, |c| c.pending.len())
    }

    /// Ids retained in the closed set.
    pub fn closed_channels(&self) -> usize {
        self.registry().closed.len()
    }

    pub fn active_channels(&self) -> usize {
        self.registry().channels.len()
    }

    pub fn is_transfer_running(&self) -> bool {
        self.registry()
            .transfer
            .as_ref()
            .is_some_and(TransferTask::is_running)
    }

    /// Events waiting in the intake queue.
    pub fn intake_len(&self) -> usize {
        self.intake_rx.len()
    }
}

impl Drop for ProgressChannel {
    fn drop(&mut self) {
        let registry = self.registry.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = registry.transfer.take() {
            task.stop();
        }
    }
}

/// Evaluation-scoped handle producers use to report progress.
///
/// A detached emitter discards everything, so workers can run without
/// observers.
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    channel: Option<Arc<ProgressChannel>>,
    evaluation_id: String,
}

impl ProgressEmitter {
    pub fn new(channel: Arc<ProgressChannel>, evaluation_id: impl Into<String>) -> Self {
        Self {
            channel: Some(channel),
            evaluation_id: evaluation_id.into(),
        }
    }

    pub fn detached(evaluation_id: impl Into<String>) -> Self {
        Self {
            channel: None,
            evaluation_id: evaluation_id.into(),
        }
    }

    pub fn evaluation_id(&self) -> &str {
        &self.evaluation_id
    }

    pub fn emit(&self, event: ProgressEvent) -> EmitOutcome {
        match &self.channel {
            Some(channel) => channel.emit_from_producer(&self.evaluation_id, event),
            None => EmitOutcome::Detached,
        }
    }
}
