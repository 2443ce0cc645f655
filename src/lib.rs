//! inboxd - inbox watcher with a durable, deduplicating priority job queue
//!
//! Files dropped into an inbox folder are fingerprinted by content,
//! checked against a SQLite ledger of already-processed content, given a
//! priority from their name, and handed one at a time to an external
//! converter that writes a markdown note.
//!
//! # Architecture
//!
//! ```text
//! inbox/ → EventSource → JobAdmission → PriorityJobQueue → WorkerLoop → Processor
//!                            ↓                                 ↓
//!                         Ledger (is_processed)      Ledger (mark_processed, log)
//! ```
//!
//! # Modules
//!
//! - `adapters`: External processor (subprocess)
//! - `core`: Fingerprint, Ledger, Queue, Admission, Worker, Daemon
//! - `domain`: Data structures (Job, LedgerRecord, ActionLogEntry)
//! - `ingest`: Event sources (native watcher, poller) and stability gating
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run in the foreground
//! inboxd run
//!
//! # Or in the background
//! inboxd start
//! inboxd status
//! inboxd history --limit 20
//! inboxd stop
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use adapters::{CommandProcessor, ProcessingError, Processor};
pub use config::DaemonConfig;
pub use core::{Daemon, DaemonHandle, Fingerprint, JobAdmission, Ledger, PriorityJobQueue};
pub use domain::{Action, Job, JobStatus};
