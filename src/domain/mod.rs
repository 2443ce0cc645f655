//! Domain types for the inbox pipeline.
//!
//! - Job: a file and its processing state
//! - Records: ledger rows and the action log

pub mod job;
pub mod records;

// Re-export commonly used types
pub use job::{file_name_of, Job, JobStatus};
pub use records::{Action, ActionLogEntry, LedgerRecord};
