//! Job admission: turns a candidate path into a queued job, or rejects it.
//!
//! Admission is where deduplication happens. Content already recorded in
//! the ledger is skipped, as is content that is already queued or being
//! processed in this process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fingerprint::{fingerprint_file, Fingerprint};
use super::ledger::{Ledger, LedgerError};
use super::queue::PriorityJobQueue;
use crate::domain::{file_name_of, Action, Job};
use crate::ingest::{scan_directory, ArrivalHandler, CandidateFilter};

/// Priority given to files that match no rule
pub const DEFAULT_PRIORITY: u8 = 3;

/// Errors that reject a candidate outright
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Cannot read {path}: {source}")]
    UnreadableSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Invalid priority pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// One entry of the priority table, as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityRuleConfig {
    pub pattern: String,
    pub priority: u8,
}

impl PriorityRuleConfig {
    pub fn new(pattern: impl Into<String>, priority: u8) -> Self {
        Self {
            pattern: pattern.into(),
            priority,
        }
    }
}

/// Built-in priority table
pub fn default_priority_rules() -> Vec<PriorityRuleConfig> {
    vec![
        PriorityRuleConfig::new(r"urgent_.*", 1),
        PriorityRuleConfig::new(r"receipt_.*\.(jpg|png|pdf)", 1),
        PriorityRuleConfig::new(r"meeting.*\.(jpg|png)", 2),
        PriorityRuleConfig::new(r"whiteboard.*", 2),
        PriorityRuleConfig::new(r"audio.*\.(mp3|m4a)", 2),
        PriorityRuleConfig::new(r".*\.docx", 3),
        PriorityRuleConfig::new(r".*\.csv", 3),
        PriorityRuleConfig::new(r"book.*\.pdf", 4),
        PriorityRuleConfig::new(r".*\.epub", 4),
        PriorityRuleConfig::new(r"archive_.*", 4),
        PriorityRuleConfig::new(r"newsletter.*", 5),
        PriorityRuleConfig::new(r"bulk_.*", 5),
    ]
}

/// Ordered filename → priority table. First match wins.
#[derive(Debug, Clone)]
pub struct PriorityRules {
    rules: Vec<(Regex, u8)>,
    default_priority: u8,
}

impl PriorityRules {
    /// Compile a rule table. Patterns are case-insensitive and anchored
    /// at the start of the file name.
    pub fn compile(
        rules: &[PriorityRuleConfig],
        default_priority: u8,
    ) -> Result<Self, AdmissionError> {
        let compiled = rules
            .iter()
            .map(|rule| {
                RegexBuilder::new(&format!("^(?:{})", rule.pattern))
                    .case_insensitive(true)
                    .build()
                    .map(|re| (re, rule.priority))
                    .map_err(|source| AdmissionError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules: compiled,
            default_priority,
        })
    }

    /// Priority for a file name
    pub fn priority_for(&self, file_name: &str) -> u8 {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(file_name))
            .map(|(_, priority)| *priority)
            .unwrap_or(self.default_priority)
    }
}

impl Default for PriorityRules {
    fn default() -> Self {
        Self::compile(&default_priority_rules(), DEFAULT_PRIORITY)
            .unwrap_or_else(|e| unreachable!("built-in priority rules must compile: {}", e))
    }
}

/// What admission did with a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// New job pushed onto the queue
    Queued {
        fingerprint: Fingerprint,
        priority: u8,
    },

    /// Content already recorded as processed in the ledger
    Duplicate(Fingerprint),

    /// Content already queued or in flight
    AlreadyQueued(Fingerprint),
}

impl AdmissionOutcome {
    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            Self::Queued { fingerprint, .. }
            | Self::Duplicate(fingerprint)
            | Self::AlreadyQueued(fingerprint) => fingerprint,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

/// Result of admitting a whole directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub queued: usize,
    pub duplicates: usize,
    pub already_queued: usize,
    pub errors: usize,
}

impl ScanSummary {
    pub fn total_scanned(&self) -> usize {
        self.queued + self.duplicates + self.already_queued + self.errors
    }
}

/// Admission path: fingerprint, dedup, prioritize, enqueue
#[derive(Debug, Clone)]
pub struct JobAdmission {
    ledger: Ledger,
    queue: Arc<PriorityJobQueue>,
    rules: PriorityRules,
}

impl JobAdmission {
    pub fn new(ledger: Ledger, queue: Arc<PriorityJobQueue>, rules: PriorityRules) -> Self {
        Self {
            ledger,
            queue,
            rules,
        }
    }

    /// Admit a single file
    pub async fn admit(&self, path: &Path) -> Result<AdmissionOutcome, AdmissionError> {
        let file_name = file_name_of(path);

        let fingerprint = match fingerprint_file(path).await {
            Ok(fp) => fp,
            Err(source) => {
                self.ledger
                    .log_action(&file_name, Action::Unreadable, &source.to_string());
                return Err(AdmissionError::UnreadableSource {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let lookup = fingerprint.clone();
        if self
            .ledger
            .run_blocking(move |ledger| ledger.is_processed(&lookup))
            .await?
        {
            tracing::info!("Skipping {} (already processed, {})", file_name, fingerprint.short());
            self.ledger.log_action(
                &file_name,
                Action::SkippedDuplicate,
                &format!("hash={} reason=processed", fingerprint.short()),
            );
            return Ok(AdmissionOutcome::Duplicate(fingerprint));
        }

        if !self.queue.track(&fingerprint) {
            tracing::debug!("Skipping {} (already queued, {})", file_name, fingerprint.short());
            self.ledger.log_action(
                &file_name,
                Action::SkippedDuplicate,
                &format!("hash={} reason=queued", fingerprint.short()),
            );
            return Ok(AdmissionOutcome::AlreadyQueued(fingerprint));
        }

        let priority = self.rules.priority_for(&file_name);
        let job = Job::new(path.to_path_buf(), priority, fingerprint.clone());

        self.queue.push(job);
        self.ledger
            .log_action(&file_name, Action::Queued, &format!("priority={}", priority));

        tracing::info!("Queued: {} (priority={})", file_name, priority);

        Ok(AdmissionOutcome::Queued {
            fingerprint,
            priority,
        })
    }

    /// Admit every candidate file in a directory
    pub async fn sweep(&self, dir: &Path, filter: &CandidateFilter) -> ScanSummary {
        let mut summary = ScanSummary::default();

        let candidates = match scan_directory(dir, filter).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("Failed to scan {}: {}", dir.display(), e);
                summary.errors += 1;
                return summary;
            }
        };

        for path in candidates {
            match self.admit(&path).await {
                Ok(AdmissionOutcome::Queued { .. }) => summary.queued += 1,
                Ok(AdmissionOutcome::Duplicate(_)) => summary.duplicates += 1,
                Ok(AdmissionOutcome::AlreadyQueued(_)) => summary.already_queued += 1,
                Err(e) => {
                    tracing::warn!("Failed to admit {}: {}", path.display(), e);
                    summary.errors += 1;
                }
            }
        }

        summary
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn queue(&self) -> &Arc<PriorityJobQueue> {
        &self.queue
    }
}

#[async_trait]
impl ArrivalHandler for JobAdmission {
    async fn on_file_appeared(&self, path: PathBuf) {
        if let Err(e) = self.admit(&path).await {
            tracing::error!("Dropped {}: {}", path.display(), e);
        }
    }
}
