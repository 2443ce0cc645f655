//! Job state for a single file moving through the pipeline.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::fingerprint::Fingerprint;

/// Lifecycle status of a job.
///
/// The error text lives inside `Failed`, so a job can only carry an
/// error once it has reached the terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum JobStatus {
    /// Waiting in the priority queue
    Queued,

    /// Owned by the worker, processor running
    Processing,

    /// Output produced and source archived
    Complete,

    /// Retries exhausted, source moved to the dead-letter folder
    Failed { error: String },
}

impl JobStatus {
    /// Short lowercase name, as stored in the ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed { .. })
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work: one source file and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Correlation id for logs
    pub id: Uuid,

    /// Current location of the source file
    pub path: PathBuf,

    /// Lower value = more urgent (1 is most urgent)
    pub priority: u8,

    /// When the job was admitted. Kept across retries so a retried job
    /// does not lose its place among jobs of the same priority.
    pub submitted_at: DateTime<Utc>,

    /// Content hash, fixed at admission
    pub fingerprint: Fingerprint,

    /// Number of failed attempts so far
    pub retry_count: u32,

    /// Current status
    pub status: JobStatus,
}

impl Job {
    /// Create a freshly admitted job
    pub fn new(path: PathBuf, priority: u8, fingerprint: Fingerprint) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            priority,
            submitted_at: Utc::now(),
            fingerprint,
            retry_count: 0,
            status: JobStatus::Queued,
        }
    }

    /// Override the submission time
    pub fn with_submitted_at(mut self, submitted_at: DateTime<Utc>) -> Self {
        self.submitted_at = submitted_at;
        self
    }

    /// File name of the source, lossily converted for logs and the ledger
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }

    /// Error text if the job ended in the dead-letter folder
    pub fn last_error(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Record the new location of the source file
    pub fn relocate(&mut self, path: PathBuf) {
        self.path = path;
    }
}

/// Lossy file name of a path, empty if it has none
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}
