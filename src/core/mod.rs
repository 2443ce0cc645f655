//! Core daemon logic.
//!
//! This module contains:
//! - Fingerprint: content hashing
//! - Ledger: durable record of processed content plus the action log
//! - Queue: in-memory priority queue with in-flight tracking
//! - Admission: dedup and prioritization of arriving files
//! - Worker: the single consumer that runs the processor
//! - Daemon: lifecycle, status and dead-letter requeue

pub mod admission;
pub mod daemon;
pub mod fingerprint;
pub mod ledger;
pub mod pidfile;
pub mod queue;
pub mod shutdown;
pub mod worker;

// Re-export commonly used types
pub use admission::{AdmissionError, AdmissionOutcome, JobAdmission, PriorityRules, ScanSummary};
pub use daemon::{requeue_failed, status, Daemon, DaemonHandle, DaemonStatus};
pub use fingerprint::{fingerprint_bytes, fingerprint_file, Fingerprint};
pub use ledger::{Ledger, LedgerError};
pub use pidfile::{PidFile, PidFileError};
pub use queue::PriorityJobQueue;
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use worker::{Disposition, WorkerLoop, WorkerSettings, WorkerStats};
