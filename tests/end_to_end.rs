//! End-to-End Daemon Tests
//!
//! Full runs through the daemon with an in-process processor and the
//! polling event source.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use common::{test_config, wait_until, RecordingProcessor};
use inboxd::core::{fingerprint_bytes, status, Daemon, PidFileError, ShutdownSignal};
use inboxd::domain::Action;
use inboxd::ingest::{ArrivalHandler, EventSource, PollingEventSource, WatcherError};
use tempfile::TempDir;
use tokio::sync::oneshot;

/// Polling source that drops a file into the inbox the moment it reports
/// ready, while the daemon runs its startup sweep
struct ArrivalDuringSweep {
    inner: PollingEventSource,
    staged: PathBuf,
    arrival: PathBuf,
}

#[async_trait]
impl EventSource for ArrivalDuringSweep {
    fn name(&self) -> &str {
        "arrival-during-sweep"
    }

    async fn run(
        self: Box<Self>,
        handler: Arc<dyn ArrivalHandler>,
        shutdown: ShutdownSignal,
        ready: oneshot::Sender<()>,
    ) -> Result<(), WatcherError> {
        let Self {
            inner,
            staged,
            arrival,
        } = *self;
        tokio::fs::write(&staged, b"arrived mid-sweep").await?;

        let (inner_tx, inner_rx) = oneshot::channel();
        let inner = tokio::spawn(Box::new(inner).run(handler, shutdown, inner_tx));

        if inner_rx.await.is_ok() {
            let _ = ready.send(());
            tokio::fs::rename(&staged, &arrival).await?;
        }

        inner.await.expect("poller task panicked")
    }
}

#[tokio::test]
async fn test_urgent_file_is_processed_before_newsletter() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    config.paths.ensure().unwrap();

    std::fs::write(config.paths.inbox.join("newsletter.pdf"), b"weekly digest").unwrap();
    std::fs::write(config.paths.inbox.join("urgent_note.txt"), b"0123456789").unwrap();

    let processor = Arc::new(RecordingProcessor::default());
    let handle = Daemon::new(config.clone(), processor.clone())
        .spawn()
        .await
        .unwrap();

    let ledger = handle.ledger().clone();
    assert!(wait_until(Duration::from_secs(10), || ledger.processed_count().unwrap() == 2).await);

    assert_eq!(processor.seen(), vec!["urgent_note.txt", "newsletter.pdf"]);

    let month_dir = config
        .paths
        .processed
        .join(Local::now().format("%Y-%m").to_string());
    assert!(month_dir.join("urgent_note.txt").exists());
    assert!(month_dir.join("newsletter.pdf").exists());
    assert!(config.paths.output.join("urgent_note.md").exists());
    assert!(config.paths.output.join("newsletter.md").exists());

    let record = ledger
        .record(&fingerprint_bytes(b"0123456789"))
        .unwrap()
        .expect("ledger row for urgent_note.txt");
    assert_eq!(record.filename, "urgent_note.txt");
    assert_eq!(record.status, "complete");

    let stats = handle.stop().await.unwrap();
    assert_eq!(stats.completed, 2);
    assert!(!config.paths.pid_path().exists());
}

#[tokio::test]
async fn test_late_duplicate_is_skipped_and_left_in_inbox() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    config.paths.ensure().unwrap();
    std::fs::write(config.paths.inbox.join("whiteboard.jpg"), b"diagram").unwrap();

    let processor = Arc::new(RecordingProcessor::default());
    let handle = Daemon::new(config.clone(), processor.clone())
        .spawn()
        .await
        .unwrap();
    let ledger = handle.ledger().clone();

    assert!(wait_until(Duration::from_secs(10), || ledger.processed_count().unwrap() == 1).await);

    // Same bytes under a new name, picked up by the event source
    let copy = config.paths.inbox.join("whiteboard copy.jpg");
    std::fs::write(&copy, b"diagram").unwrap();

    assert!(
        wait_until(Duration::from_secs(10), || {
            ledger
                .actions_for("whiteboard copy.jpg")
                .unwrap()
                .iter()
                .any(|e| e.kind() == Some(Action::SkippedDuplicate))
        })
        .await
    );

    handle.stop().await.unwrap();

    assert_eq!(processor.seen(), vec!["whiteboard.jpg"]);
    assert!(copy.exists());

    let status = status(&config).await.unwrap();
    assert!(!status.running);
    assert_eq!(status.pending, 1);
    assert_eq!(status.in_flight, 0);
    assert_eq!(status.processed_total, 1);
}

#[tokio::test]
async fn test_second_daemon_refuses_to_start() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());

    let first = Daemon::new(config.clone(), Arc::new(RecordingProcessor::default()))
        .spawn()
        .await
        .unwrap();

    let second = Daemon::new(config.clone(), Arc::new(RecordingProcessor::default()))
        .spawn()
        .await;

    let err = second.err().expect("second daemon must not start");
    assert!(matches!(
        err.downcast_ref::<PidFileError>(),
        Some(PidFileError::AlreadyRunning(Some(_)))
    ));

    let running = status(&config).await.unwrap();
    assert!(running.running);
    assert_eq!(running.pid, Some(std::process::id()));

    first.stop().await.unwrap();
    assert!(!status(&config).await.unwrap().running);
}

#[tokio::test]
async fn test_file_arriving_during_startup_sweep_is_processed_once() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    config.paths.ensure().unwrap();
    std::fs::write(config.paths.inbox.join("early.pdf"), b"already here").unwrap();

    let filter = inboxd::ingest::CandidateFilter::default();
    let source = ArrivalDuringSweep {
        inner: PollingEventSource::new(
            config.paths.inbox.clone(),
            filter,
            config.watcher.grace_period(),
            config.watcher.poll_interval(),
        ),
        staged: temp.path().join("late.pdf"),
        arrival: config.paths.inbox.join("late.pdf"),
    };

    let processor = Arc::new(RecordingProcessor::default());
    let handle = Daemon::new(config.clone(), processor.clone())
        .with_event_source(Box::new(source))
        .spawn()
        .await
        .unwrap();
    let ledger = handle.ledger().clone();

    assert!(wait_until(Duration::from_secs(10), || ledger.processed_count().unwrap() == 2).await);
    // A few more polls must not pick either file up again
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(ledger.is_processed(&fingerprint_bytes(b"arrived mid-sweep")).unwrap());
    handle.stop().await.unwrap();

    let mut seen = processor.seen();
    seen.sort();
    assert_eq!(seen, vec!["early.pdf", "late.pdf"]);
}
