//! Rows persisted by the ledger.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle transitions recorded in the action log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Admitted and pushed onto the queue
    Queued,

    /// Content already processed or already queued
    SkippedDuplicate,

    /// Worker picked the job up
    ProcessingStarted,

    /// Output produced, source archived
    Completed,

    /// One attempt failed (may retry)
    Failed,

    /// Retries exhausted, moved to the dead-letter folder
    DeadLettered,

    /// Found in the processing folder at startup and moved back to the inbox
    Recovered,

    /// Stopped mid-processing, moved back to the inbox
    Interrupted,

    /// Could not be fingerprinted
    Unreadable,

    /// Source disappeared before processing
    Vanished,

    /// Moved from the dead-letter folder back into the inbox
    RequeuedFromFailed,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::ProcessingStarted => "processing_started",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
            Self::Recovered => "recovered",
            Self::Interrupted => "interrupted",
            Self::Unreadable => "unreadable",
            Self::Vanished => "vanished",
            Self::RequeuedFromFailed => "requeued_from_failed",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "skipped_duplicate" => Ok(Self::SkippedDuplicate),
            "processing_started" => Ok(Self::ProcessingStarted),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "dead_lettered" => Ok(Self::DeadLettered),
            "recovered" => Ok(Self::Recovered),
            "interrupted" => Ok(Self::Interrupted),
            "unreadable" => Ok(Self::Unreadable),
            "vanished" => Ok(Self::Vanished),
            "requeued_from_failed" => Ok(Self::RequeuedFromFailed),
            other => Err(format!("Unknown action: {}", other)),
        }
    }
}

/// A processed fingerprint (one row per fingerprint)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub fingerprint: String,
    pub filename: String,
    pub processed_at: DateTime<Utc>,
    pub status: String,
    pub output_path: String,
}

/// One row of the append-only action log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: i64,
    pub filename: String,
    /// Stored as text; unknown values from older databases are kept verbatim
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

impl ActionLogEntry {
    /// Parsed action, if it is one this build knows about
    pub fn kind(&self) -> Option<Action> {
        self.action.parse().ok()
    }
}
