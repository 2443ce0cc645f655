//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use inboxd::adapters::{ProcessingError, Processor};
use inboxd::config::{DaemonConfig, WatcherBackend};

/// Copies input to output and remembers the order of inputs
#[derive(Default)]
pub struct RecordingProcessor {
    seen: Mutex<Vec<String>>,
}

impl RecordingProcessor {
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    fn name(&self) -> &str {
        "recording"
    }

    async fn process(
        &self,
        input: &Path,
        output: &Path,
        _timeout: Duration,
    ) -> Result<(), ProcessingError> {
        let name = input.file_name().unwrap().to_string_lossy().to_string();
        self.seen.lock().unwrap().push(name);
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

/// Always exits non-zero
#[derive(Default)]
pub struct FailingProcessor {
    pub calls: AtomicU32,
}

#[async_trait]
impl Processor for FailingProcessor {
    fn name(&self) -> &str {
        "failing"
    }

    async fn process(&self, _: &Path, _: &Path, _: Duration) -> Result<(), ProcessingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProcessingError::ExitFailure {
            code: 2,
            stderr: "cannot convert".to_string(),
        })
    }
}

/// Never finishes on its own
pub struct HangingProcessor;

#[async_trait]
impl Processor for HangingProcessor {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn process(&self, _: &Path, _: &Path, _: Duration) -> Result<(), ProcessingError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Fast, deterministic settings rooted at `root`
pub fn test_config(root: &Path) -> DaemonConfig {
    let mut config = DaemonConfig::with_root(root);
    config.watcher.backend = WatcherBackend::Poll;
    config.watcher.poll_interval_ms = 50;
    config.watcher.grace_period_secs = 0;
    config.queue_poll = Duration::from_millis(50);
    config.stop_timeout = Duration::from_secs(2);
    config
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}
