//! Polling replay of the output log.
//!
//! Feeds newly appended log bytes through the same chunk-to-event path as
//! live process output, so a bridge in another process can observe output
//! it did not produce.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::classify::{OutputEvent, StreamClassifier, StreamKind};
use crate::mirror::log::OutputLog;
use crate::mirror::tailer::{LogTailer, MirrorError};

/// Default interval between log polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Polls the output log and broadcasts replayed output as events.
///
/// Replayed bytes are classified on the stdout stream, matching how the
/// log writer recorded them.
#[derive(Debug)]
pub struct LogMirror {
    log: OutputLog,
    tailer: LogTailer,
    classifier: StreamClassifier,
    events: mpsc::UnboundedSender<OutputEvent>,
    interval: Duration,
    replay_existing: bool,
}

impl LogMirror {
    /// Create a mirror for the given log, sending events on `events`.
    ///
    /// By default only output appended after [`run`](Self::run) starts is
    /// replayed.
    #[must_use]
    pub fn new(log: OutputLog, events: mpsc::UnboundedSender<OutputEvent>) -> Self {
        let tailer = LogTailer::new(log.path());
        Self {
            log,
            tailer,
            classifier: StreamClassifier::new(StreamKind::Stdout),
            events,
            interval: DEFAULT_POLL_INTERVAL,
            replay_existing: false,
        }
    }

    /// Set the poll interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Replay content already accumulated in the log before startup.
    #[must_use]
    pub fn replay_existing(mut self) -> Self {
        self.replay_existing = true;
        self
    }

    /// Run the poll loop until cancelled or the event channel closes.
    ///
    /// The log file is created if absent and never truncated. Transient
    /// read failures are logged and retried on the next tick.
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed` when every event receiver is gone, or an
    /// I/O error from startup.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), MirrorError> {
        self.log.ensure_exists().await?;
        if !self.replay_existing {
            self.tailer.seek_to_end().await?;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::debug!(path = %self.log.path().display(), "log mirror cancelled");
                    return Ok(());
                }

                _ = ticker.tick() => {
                    match self.tailer.read_new_chunk().await {
                        Ok(Some(chunk)) => {
                            for event in self.classifier.push_chunk(&chunk) {
                                self.events
                                    .send(event)
                                    .map_err(|_| MirrorError::ChannelClosed)?;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            // The writer may not have created the log yet;
                            // keep polling.
                            tracing::debug!(path = %self.log.path().display(), error = %e, "log poll failed");
                        }
                    }
                }
            }
        }
    }
}
