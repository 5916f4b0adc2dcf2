//! Background task moving events from the intake queue to subscribers.

use crossbeam_channel::Receiver;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Weak;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{Envelope, ProgressChannel};
use crate::config::ChannelConfig;
use crate::domain::error::panic_message;

/// Pause after an unexpected failure before the loop resumes.
const RECOVERY_PAUSE: Duration = Duration::from_millis(100);

/// Handle to the running transfer loop.
#[derive(Debug)]
pub(super) struct TransferTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TransferTask {
    /// Start the loop. If `previous` is still finishing its last batch it is
    /// awaited first so at most one loop drains the intake at a time.
    pub(super) fn spawn(
        runtime: &Handle,
        channel: Weak<ProgressChannel>,
        intake: Receiver<Envelope>,
        config: ChannelConfig,
        previous: Option<JoinHandle<()>>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let handle = runtime.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            run(channel, intake, config, stop_rx).await;
        });
        debug!("progress transfer task started");
        Self { stop, handle }
    }

    pub(super) fn is_running(&self) -> bool {
        !self.handle.is_finished() && !*self.stop.borrow()
    }

    pub(super) fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Signal the loop to stop and hand back its join handle.
    pub(super) fn retire(self) -> JoinHandle<()> {
        self.stop();
        self.handle
    }
}

async fn run(
    channel: Weak<ProgressChannel>,
    intake: Receiver<Envelope>,
    config: ChannelConfig,
    mut stop: watch::Receiver<bool>,
) {
    let batch_size = config.batch_size.max(1);
    let mut last_sweep = Instant::now();

    loop {
        if *stop.borrow() {
            break;
        }

        let batch: Vec<Envelope> = intake.try_iter().take(batch_size).collect();
        if batch.is_empty() {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(config.idle_poll()) => {}
            }
        } else {
            let Some(strong) = channel.upgrade() else {
                break;
            };
            for envelope in batch {
                let publish = strong.publish_async(&envelope.evaluation_id, envelope.event);
                if let Err(panic) = AssertUnwindSafe(publish).catch_unwind().await {
                    error!(
                        evaluation_id = %envelope.evaluation_id,
                        panic = %panic_message(panic.as_ref()),
                        "progress publish failed unexpectedly, resuming after pause"
                    );
                    tokio::time::sleep(RECOVERY_PAUSE).await;
                }
            }
        }

        if last_sweep.elapsed() >= config.sweep_interval() {
            last_sweep = Instant::now();
            match channel.upgrade() {
                Some(strong) => {
                    let closed = strong.cleanup_stale_channels();
                    if !closed.is_empty() {
                        debug!(closed = closed.len(), "stale progress channels closed");
                    }
                }
                None => break,
            }
        }

        if channel.strong_count() == 0 {
            break;
        }
    }

    debug!("progress transfer task stopped");
}
