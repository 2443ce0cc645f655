//! The single consumer of the job queue.
//!
//! Each job goes `queued → processing → complete`, or through the retry
//! check back to `queued`, or on to `failed` once retries are exhausted.
//! The source file follows the job: inbox → processing → processed/YYYY-MM
//! or failed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;

use super::ledger::Ledger;
use super::queue::PriorityJobQueue;
use super::shutdown::ShutdownSignal;
use crate::adapters::{ProcessingError, Processor};
use crate::domain::{file_name_of, Action, Job, JobStatus};

/// Directories and limits the worker needs
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub inbox_dir: PathBuf,
    pub processing_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub failed_dir: PathBuf,
    pub output_dir: PathBuf,

    /// Attempts before a job is dead-lettered
    pub max_retries: u32,

    /// Upper bound for one processor run
    pub processor_timeout: Duration,

    /// How long an idle worker waits on the queue before re-checking
    /// for shutdown
    pub poll_interval: Duration,
}

/// Final (or interim) outcome of one pass through `process_job`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Output written, source archived, ledger updated
    Completed { output: PathBuf, archived: PathBuf },

    /// Attempt failed, job pushed back onto the queue
    Requeued { retry_count: u32 },

    /// Retries exhausted, source moved to the failed folder
    DeadLettered { error: String },

    /// Source disappeared before processing started
    Vanished,

    /// Shutdown arrived; source returned to the inbox
    Interrupted,
}

/// Counters reported when the worker exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
    pub vanished: usize,
    pub interrupted: usize,
}

impl WorkerStats {
    fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Completed { .. } => self.completed += 1,
            Disposition::Requeued { .. } => self.requeued += 1,
            Disposition::DeadLettered { .. } => self.dead_lettered += 1,
            Disposition::Vanished => self.vanished += 1,
            Disposition::Interrupted => self.interrupted += 1,
        }
    }
}

/// Drains the queue one job at a time
pub struct WorkerLoop {
    queue: Arc<PriorityJobQueue>,
    ledger: Ledger,
    processor: Arc<dyn Processor>,
    settings: WorkerSettings,
}

impl WorkerLoop {
    pub fn new(
        queue: Arc<PriorityJobQueue>,
        ledger: Ledger,
        processor: Arc<dyn Processor>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            ledger,
            processor,
            settings,
        }
    }

    /// Run until shutdown. Never returns an error: every failure is
    /// turned into a disposition.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> WorkerStats {
        let mut stats = WorkerStats::default();

        tracing::info!("Worker started (processor: {})", self.processor.name());

        loop {
            if shutdown.is_triggered() {
                break;
            }

            let job = tokio::select! {
                _ = shutdown.wait() => break,
                job = self.queue.pop_timeout(self.settings.poll_interval) => job,
            };

            let Some(job) = job else {
                continue;
            };

            let disposition = self.process_job(job, &mut shutdown).await;
            stats.record(&disposition);
        }

        tracing::info!(
            "Worker stopped ({} completed, {} dead-lettered, {} interrupted)",
            stats.completed,
            stats.dead_lettered,
            stats.interrupted
        );

        stats
    }

    /// Take one job through a single attempt
    pub async fn process_job(&self, mut job: Job, shutdown: &mut ShutdownSignal) -> Disposition {
        let file_name = job.file_name();

        if shutdown.is_triggered() {
            // Not started; a retried job's file is still in processing/
            return self.handle_interrupt(job, &file_name).await;
        }

        let claimed = match move_into(&job.path, &self.settings.processing_dir).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Source vanished before processing: {}", file_name);
                self.ledger.log_action(&file_name, Action::Vanished, "");
                self.queue.release(&job.fingerprint);
                return Disposition::Vanished;
            }
            Err(e) => return self.handle_failure(job, &file_name, ProcessingError::Io(e)).await,
        };

        job.relocate(claimed);
        job.status = JobStatus::Processing;

        let output = output_path_for(&self.settings.output_dir, &file_name);

        tracing::info!(
            job_id = %job.id,
            "Processing {} (priority={}, attempt {}/{})",
            file_name,
            job.priority,
            job.retry_count + 1,
            self.settings.max_retries
        );
        self.ledger.log_action(
            &file_name,
            Action::ProcessingStarted,
            &format!("attempt={} priority={}", job.retry_count + 1, job.priority),
        );

        let result = tokio::select! {
            _ = shutdown.wait() => None,
            result = self.run_processor(&job.path, &output) => Some(result),
        };

        match result {
            None => self.handle_interrupt(job, &file_name).await,
            Some(Ok(())) => self.handle_success(job, &file_name, output).await,
            Some(Err(e)) => self.handle_failure(job, &file_name, e).await,
        }
    }

    async fn run_processor(&self, input: &Path, output: &Path) -> Result<(), ProcessingError> {
        tokio::fs::create_dir_all(&self.settings.output_dir).await?;

        // Only an artifact written by this attempt counts
        match tokio::fs::remove_file(output).await {
            Ok(()) => tracing::debug!("Removed stale output {}", output.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.processor
            .process(input, output, self.settings.processor_timeout)
            .await?;

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(ProcessingError::MissingOutput(output.to_path_buf()));
        }

        Ok(())
    }

    async fn handle_success(&self, mut job: Job, file_name: &str, output: PathBuf) -> Disposition {
        let month_dir = self
            .settings
            .processed_dir
            .join(Local::now().format("%Y-%m").to_string());

        match move_into(&job.path, &month_dir).await {
            Ok(archived) => job.relocate(archived),
            Err(e) => {
                // Content is processed either way; recovery will find a duplicate
                tracing::warn!("Failed to archive {}: {}", file_name, e);
            }
        }

        let record = (job.fingerprint.clone(), file_name.to_string(), output.clone());
        let marked = self
            .ledger
            .run_blocking(move |ledger| {
                let (fingerprint, name, output) = record;
                ledger.mark_processed(&fingerprint, &name, &output, "complete")
            })
            .await;
        if let Err(e) = marked {
            tracing::error!("Failed to record {} as processed: {}", file_name, e);
        }

        self.ledger
            .log_action(file_name, Action::Completed, &output.to_string_lossy());

        job.status = JobStatus::Complete;
        self.queue.release(&job.fingerprint);

        tracing::info!(job_id = %job.id, "Completed: {} → {}", file_name, output.display());

        Disposition::Completed {
            output,
            archived: job.path,
        }
    }

    async fn handle_failure(
        &self,
        mut job: Job,
        file_name: &str,
        error: ProcessingError,
    ) -> Disposition {
        job.retry_count += 1;
        let message = error.to_string();

        tracing::warn!(
            job_id = %job.id,
            "Failed: {} (attempt {}/{}): {}",
            file_name,
            job.retry_count,
            self.settings.max_retries,
            message
        );
        self.ledger.log_action(
            file_name,
            Action::Failed,
            &format!("attempt={} error={}", job.retry_count, message),
        );

        if job.retry_count < self.settings.max_retries {
            job.status = JobStatus::Queued;
            let retry_count = job.retry_count;
            self.queue.push(job);
            return Disposition::Requeued { retry_count };
        }

        match move_into(&job.path, &self.settings.failed_dir).await {
            Ok(dead) => job.relocate(dead),
            Err(e) => tracing::error!("Failed to move {} to the failed folder: {}", file_name, e),
        }

        job.status = JobStatus::Failed {
            error: message.clone(),
        };
        self.ledger.log_action(
            file_name,
            Action::DeadLettered,
            &format!("retries={} error={}", job.retry_count, message),
        );
        self.queue.release(&job.fingerprint);

        tracing::error!(
            job_id = %job.id,
            "Dead-lettered: {} after {} attempts",
            file_name,
            job.retry_count
        );

        Disposition::DeadLettered { error: message }
    }

    async fn handle_interrupt(&self, mut job: Job, file_name: &str) -> Disposition {
        // The processor future was dropped, which killed any child process
        match move_into(&job.path, &self.settings.inbox_dir).await {
            Ok(back) => job.relocate(back),
            Err(e) => tracing::error!("Failed to return {} to the inbox: {}", file_name, e),
        }

        job.status = JobStatus::Queued;
        self.ledger
            .log_action(file_name, Action::Interrupted, "returned to inbox");
        self.queue.release(&job.fingerprint);

        tracing::info!("Interrupted: {} returned to inbox", file_name);
        Disposition::Interrupted
    }
}

/// `<output_dir>/<stem>.md`
pub fn output_path_for(output_dir: &Path, file_name: &str) -> PathBuf {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    output_dir.join(format!("{}.md", stem))
}

/// Move `src` into `dir`, keeping its name. An existing file of the same
/// name gets a numeric suffix instead of being overwritten. A file that is
/// already in `dir` stays put.
pub async fn move_into(src: &Path, dir: &Path) -> Result<PathBuf, std::io::Error> {
    // Surface a missing source as NotFound before touching the target
    tokio::fs::metadata(src).await?;

    if src.parent() == Some(dir) {
        return Ok(src.to_path_buf());
    }

    tokio::fs::create_dir_all(dir).await?;

    let target = unique_destination(dir, &file_name_of(src)).await;

    if let Err(rename_err) = tokio::fs::rename(src, &target).await {
        if rename_err.kind() == std::io::ErrorKind::NotFound {
            return Err(rename_err);
        }
        // Across filesystems: copy then remove
        tokio::fs::copy(src, &target).await?;
        tokio::fs::remove_file(src).await?;
    }

    Ok(target)
}

async fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }

    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    let extension = name.extension().map(|e| e.to_string_lossy().to_string());

    let mut n = 1u32;
    loop {
        let numbered = match &extension {
            Some(ext) => format!("{}_{}.{}", stem, n, ext),
            None => format!("{}_{}", stem, n),
        };
        let candidate = dir.join(numbered);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}
