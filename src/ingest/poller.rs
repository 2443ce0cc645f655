//! Polling fallback for filesystems without usable native events
//! (network mounts, some sync clients).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::scan::scan_directory;
use super::source::{ArrivalHandler, CandidateFilter, EventSource, WatcherError};
use super::stability::StabilityTracker;
use crate::core::shutdown::ShutdownSignal;

/// Event source that lists the directory on a fixed interval
#[derive(Debug)]
pub struct PollingEventSource {
    dir: PathBuf,
    filter: CandidateFilter,
    grace: Duration,
    interval: Duration,
}

impl PollingEventSource {
    pub fn new(dir: PathBuf, filter: CandidateFilter, grace: Duration, interval: Duration) -> Self {
        Self {
            dir,
            filter,
            grace,
            interval,
        }
    }
}

#[async_trait]
impl EventSource for PollingEventSource {
    fn name(&self) -> &str {
        "poll"
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

        // Files listed here are left to the startup sweep, which runs after `ready`
        let mut known: HashSet<PathBuf> = scan_directory(&self.dir, &self.filter)
            .await?
            .into_iter()
            .collect();

        tracing::info!(
            "Polling {} every {:?} ({} existing files)",
            self.dir.display(),
            self.interval,
            known.len()
        );
        let _ = ready.send(());

        let mut tracker = StabilityTracker::new(self.grace);
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    tracing::info!("Poller stopping...");
                    break;
                }
                _ = tick.tick() => {
                    let listing = match scan_directory(&self.dir, &self.filter).await {
                        Ok(listing) => listing,
                        Err(e) => {
                            tracing::warn!("Poll of {} failed: {}", self.dir.display(), e);
                            continue;
                        }
                    };

                    let now = Instant::now();
                    let present: HashSet<PathBuf> = listing.into_iter().collect();

                    // Forget files that left, so a later file with the same name is new
                    known.retain(|path| present.contains(path));

                    for path in present {
                        if !known.contains(&path) {
                            tracker.observe_at(path, now);
                        }
                    }

                    for path in tracker.take_stable(now) {
                        known.insert(path.clone());
                        handler.on_file_appeared(path).await;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shutdown::shutdown_channel;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<PathBuf>>);

    #[async_trait]
    impl ArrivalHandler for Recorder {
        async fn on_file_appeared(&self, path: PathBuf) {
            self.0.lock().unwrap().push(path);
        }
    }

    #[tokio::test]
    async fn test_reports_only_files_that_arrive_after_start() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        tokio::fs::write(dir.join("old.pdf"), b"old").await.unwrap();

        let recorder = Arc::new(Recorder::default());
        let (trigger, signal) = shutdown_channel();
        let source = Box::new(PollingEventSource::new(
            dir.clone(),
            CandidateFilter::default(),
            Duration::from_millis(100),
            Duration::from_millis(50),
        ));
        let handler: Arc<dyn ArrivalHandler> = recorder.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(source.run(handler, signal, ready_tx));

        ready_rx.await.unwrap();
        tokio::fs::write(dir.join("new.pdf"), b"new").await.unwrap();
        tokio::fs::write(dir.join("queue.md"), b"sentinel").await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.0.lock().unwrap().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        // A few more polls must not report it again
        tokio::time::sleep(Duration::from_millis(300)).await;

        trigger.trigger();
        task.await.unwrap().unwrap();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen, vec![dir.join("new.pdf")]);
    }

    #[tokio::test]
    async fn test_file_written_right_after_ready_is_reported() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        tokio::fs::write(dir.join("swept.pdf"), b"swept").await.unwrap();

        let recorder = Arc::new(Recorder::default());
        let (trigger, signal) = shutdown_channel();
        let source = Box::new(PollingEventSource::new(
            dir.clone(),
            CandidateFilter::default(),
            Duration::ZERO,
            Duration::from_millis(200),
        ));
        let handler: Arc<dyn ArrivalHandler> = recorder.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(source.run(handler, signal, ready_tx));

        // Lands while the startup sweep would be running, before the first real poll
        ready_rx.await.unwrap();
        tokio::fs::write(dir.join("between.pdf"), b"between").await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.0.lock().unwrap().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        trigger.trigger();
        task.await.unwrap().unwrap();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen, vec![dir.join("between.pdf")]);
    }
}
