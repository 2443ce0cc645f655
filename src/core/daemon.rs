//! Daemon lifecycle: startup, the two long-lived tasks, and shutdown.
//!
//! ```text
//! spawn():  dirs → pid file → ledger → recover processing/
//!           → [event source task] (ready) → sweep inbox → [worker task]
//! stop():   shutdown signal → join (bounded) → close ledger → drop pid file
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::admission::{JobAdmission, PriorityRules};
use super::ledger::Ledger;
use super::pidfile::PidFile;
use super::queue::PriorityJobQueue;
use super::shutdown::{shutdown_channel, ShutdownTrigger};
use super::worker::{move_into, WorkerLoop, WorkerSettings, WorkerStats};
use crate::adapters::Processor;
use crate::config::paths::Layout;
use crate::config::{DaemonConfig, WatcherBackend};
use crate::domain::{file_name_of, Action};
use crate::ingest::{
    count_candidates, scan_directory, ArrivalHandler, CandidateFilter, EventSource,
    NotifyEventSource, PollingEventSource,
};

/// A configured, not yet started daemon
pub struct Daemon {
    config: DaemonConfig,
    processor: Arc<dyn Processor>,
    event_source: Option<Box<dyn EventSource>>,
}

impl Daemon {
    pub fn new(config: DaemonConfig, processor: Arc<dyn Processor>) -> Self {
        Self {
            config,
            processor,
            event_source: None,
        }
    }

    /// Replace the event source chosen by `watcher.backend`
    pub fn with_event_source(mut self, source: Box<dyn EventSource>) -> Self {
        self.event_source = Some(source);
        self
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Start everything and return a handle for stopping it
    pub async fn spawn(self) -> Result<DaemonHandle> {
        let config = self.config;
        let layout = &config.paths;

        layout.ensure().with_context(|| {
            format!("Failed to create directories under {}", layout.root.display())
        })?;

        let pid_file = PidFile::acquire(&layout.pid_path())?;

        let ledger = Ledger::open(&layout.db_path())
            .with_context(|| format!("Failed to open ledger at {}", layout.db_path().display()))?;

        let filter = candidate_filter(&config)?;
        let rules = PriorityRules::compile(&config.priority.rules, config.priority.default)?;

        let recovered = recover_in_flight(layout, &ledger, &filter).await;
        if recovered > 0 {
            tracing::info!("Recovered {} file(s) left in processing", recovered);
        }

        let queue = Arc::new(PriorityJobQueue::new());
        let admission = Arc::new(JobAdmission::new(ledger.clone(), queue.clone(), rules));

        let (trigger, signal) = shutdown_channel();

        // Source first: anything landing during the sweep is still reported
        let source = self
            .event_source
            .unwrap_or_else(|| default_event_source(&config, filter.clone()));
        let source_name = source.name().to_string();
        let handler: Arc<dyn ArrivalHandler> = admission.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let source_signal = signal.clone();
        let source_task = tokio::spawn(async move {
            if let Err(e) = source.run(handler, source_signal, ready_tx).await {
                tracing::error!("Event source '{}' failed: {}", source_name, e);
            }
        });

        if ready_rx.await.is_err() {
            tracing::warn!(
                "Event source stopped before it was ready; running the startup sweep only"
            );
        }

        let summary = admission.sweep(&layout.inbox, &filter).await;
        tracing::info!(
            "Startup sweep: {} queued, {} duplicate, {} error(s)",
            summary.queued,
            summary.duplicates + summary.already_queued,
            summary.errors
        );

        let worker = WorkerLoop::new(
            queue.clone(),
            ledger.clone(),
            self.processor,
            worker_settings(&config),
        );
        let worker_task = tokio::spawn(worker.run(signal));

        tracing::info!(
            "inboxd running (pid {}), watching {}",
            std::process::id(),
            layout.inbox.display()
        );

        Ok(DaemonHandle {
            trigger,
            worker_task,
            source_task,
            ledger,
            queue,
            pid_file: Some(pid_file),
            stop_timeout: config.stop_timeout,
        })
    }

    /// Start, then block until Ctrl-C or SIGTERM, then stop
    pub async fn run(self) -> Result<()> {
        let handle = self.spawn().await?;

        wait_for_termination().await?;
        tracing::info!("Shutdown requested");

        handle.stop().await?;
        Ok(())
    }
}

/// Handle to a running daemon
pub struct DaemonHandle {
    trigger: ShutdownTrigger,
    worker_task: JoinHandle<WorkerStats>,
    source_task: JoinHandle<()>,
    ledger: Ledger,
    queue: Arc<PriorityJobQueue>,
    pid_file: Option<PidFile>,
    stop_timeout: Duration,
}

impl DaemonHandle {
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn queue(&self) -> &Arc<PriorityJobQueue> {
        &self.queue
    }

    /// Signal both tasks, wait for them (bounded), then release resources
    pub async fn stop(mut self) -> Result<WorkerStats> {
        self.trigger.trigger();

        let stats = match tokio::time::timeout(self.stop_timeout, &mut self.worker_task).await {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                tracing::error!("Worker task failed: {}", e);
                WorkerStats::default()
            }
            Err(_) => {
                tracing::warn!("Worker did not stop within {:?}, aborting", self.stop_timeout);
                self.worker_task.abort();
                WorkerStats::default()
            }
        };

        if tokio::time::timeout(self.stop_timeout, &mut self.source_task)
            .await
            .is_err()
        {
            tracing::warn!("Event source did not stop within {:?}, aborting", self.stop_timeout);
            self.source_task.abort();
        }

        self.ledger.close()?;

        if let Some(pid_file) = self.pid_file.take() {
            pid_file.release();
        }

        tracing::info!("inboxd stopped");
        Ok(stats)
    }
}

/// Snapshot reported by `inboxd status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    /// Pid recorded in the pid file
    pub pid: Option<u32>,

    /// Pid file lock is held by a live daemon
    pub running: bool,

    /// Files in the inbox awaiting admission or processing
    pub pending: usize,

    /// Files in the processing folder
    pub in_flight: usize,

    /// Files in the dead-letter folder
    pub dead_lettered: usize,

    /// Rows in the ledger
    pub processed_total: u64,
}

/// Read the current state from disk without starting anything
pub async fn status(config: &DaemonConfig) -> Result<DaemonStatus> {
    let layout = &config.paths;
    let filter = candidate_filter(config)?;
    let pid_path = layout.pid_path();
    let db_path = layout.db_path();

    let processed_total = if db_path.exists() {
        let ledger = Ledger::open(&db_path)?;
        let total = ledger.processed_count()?;
        ledger.close()?;
        total
    } else {
        0
    };

    Ok(DaemonStatus {
        pid: PidFile::read_pid(&pid_path),
        running: PidFile::is_held(&pid_path),
        pending: count_candidates(&layout.inbox, &filter).await,
        in_flight: count_candidates(&layout.processing, &filter).await,
        dead_lettered: count_candidates(&layout.failed, &filter).await,
        processed_total,
    })
}

/// Move every dead-lettered file back into the inbox. Returns how many
/// were moved.
pub async fn requeue_failed(config: &DaemonConfig) -> Result<usize> {
    let layout = &config.paths;
    let filter = candidate_filter(config)?;

    let failed = match scan_directory(&layout.failed, &filter).await {
        Ok(files) => files,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to list {}", layout.failed.display()))
        }
    };

    if failed.is_empty() {
        return Ok(0);
    }

    let ledger = Ledger::open(&layout.db_path())?;
    let mut moved = 0;

    for path in failed {
        let file_name = file_name_of(&path);
        match move_into(&path, &layout.inbox).await {
            Ok(_) => {
                ledger.log_action(&file_name, Action::RequeuedFromFailed, "");
                moved += 1;
            }
            Err(e) => tracing::warn!("Failed to requeue {}: {}", file_name, e),
        }
    }

    ledger.close()?;
    Ok(moved)
}

/// Move files left in `processing/` by a crash back into the inbox
async fn recover_in_flight(layout: &Layout, ledger: &Ledger, filter: &CandidateFilter) -> usize {
    let leftovers = match scan_directory(&layout.processing, filter).await {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!("Failed to list {}: {}", layout.processing.display(), e);
            return 0;
        }
    };

    let mut recovered = 0;
    for path in leftovers {
        let file_name = file_name_of(&path);
        match move_into(&path, &layout.inbox).await {
            Ok(_) => {
                ledger.log_action(&file_name, Action::Recovered, "returned to inbox");
                recovered += 1;
            }
            Err(e) => tracing::warn!("Failed to recover {}: {}", file_name, e),
        }
    }

    recovered
}

fn candidate_filter(config: &DaemonConfig) -> Result<CandidateFilter> {
    CandidateFilter::new(&config.watcher.sentinel_names, &config.watcher.ignore)
        .context("Invalid watcher.ignore pattern")
}

fn worker_settings(config: &DaemonConfig) -> WorkerSettings {
    let layout = &config.paths;
    WorkerSettings {
        inbox_dir: layout.inbox.clone(),
        processing_dir: layout.processing.clone(),
        processed_dir: layout.processed.clone(),
        failed_dir: layout.failed.clone(),
        output_dir: layout.output.clone(),
        max_retries: config.processor.max_retries,
        processor_timeout: config.processor.timeout(),
        poll_interval: config.queue_poll,
    }
}

fn default_event_source(config: &DaemonConfig, filter: CandidateFilter) -> Box<dyn EventSource> {
    let inbox = config.paths.inbox.clone();
    let grace = config.watcher.grace_period();

    match config.watcher.backend {
        WatcherBackend::Native => Box::new(NotifyEventSource::new(inbox, filter, grace)),
        WatcherBackend::Poll => Box::new(PollingEventSource::new(
            inbox,
            filter,
            grace,
            config.watcher.poll_interval(),
        )),
    }
}

#[cfg(unix)]
async fn wait_for_termination() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_termination() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}
