//! Native filesystem watcher.
//!
//! Watches the inbox (non-recursively) through `notify` and hands files on
//! to the admission path once they are stable (sync complete).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use tokio::sync::{mpsc, oneshot};

use super::source::{ArrivalHandler, CandidateFilter, EventSource, WatcherError};
use super::stability::StabilityTracker;
use crate::core::shutdown::ShutdownSignal;

/// How often pending files are re-checked for stability
const STABILITY_TICK: Duration = Duration::from_millis(250);

/// Debounce window for raw notify events
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Event source backed by the platform's native notification API
#[derive(Debug)]
pub struct NotifyEventSource {
    dir: PathBuf,
    filter: CandidateFilter,
    grace: Duration,
}

impl NotifyEventSource {
    pub fn new(dir: PathBuf, filter: CandidateFilter, grace: Duration) -> Self {
        Self { dir, filter, grace }
    }
}

#[async_trait]
impl EventSource for NotifyEventSource {
    fn name(&self) -> &str {
        "notify"
    }

    async fn run(
        self: Box<Self>,
        handler: Arc<dyn ArrivalHandler>,
        mut shutdown: ShutdownSignal,
        ready: oneshot::Sender<()>,
    ) -> Result<(), WatcherError> {
        if !self.dir.is_dir() {
            return Err(WatcherError::DirectoryNotFound(self.dir.clone()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();

        // The debouncer calls back on its own thread
        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            let _ = tx.send(result);
        })?;

        debouncer
            .watcher()
            .watch(&self.dir, RecursiveMode::NonRecursive)?;

        tracing::info!("Watching {} (native events)", self.dir.display());
        let _ = ready.send(());

        let mut tracker = StabilityTracker::new(self.grace);
        let mut tick = tokio::time::interval(STABILITY_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    tracing::info!("Watcher stopping...");
                    break;
                }
                received = rx.recv() => match received {
                    Some(Ok(events)) => {
                        let now = Instant::now();
                        for event in events {
                            if self.filter.accepts(&event.path) {
                                tracker.observe_at(event.path, now);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Watcher error: {:?}", e);
                    }
                    None => {
                        tracing::error!("Watcher channel disconnected");
                        break;
                    }
                },
                _ = tick.tick() => {
                    for path in tracker.take_stable(Instant::now()) {
                        handler.on_file_appeared(path).await;
                    }
                }
            }
        }

        Ok(())
    }
}
