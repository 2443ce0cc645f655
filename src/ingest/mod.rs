//! Inbox ingestion: detecting files that have arrived and settled.
//!
//! ```text
//! inbox/ ──► EventSource (notify | poll) ──► StabilityTracker ──► ArrivalHandler
//!   │                                                              (JobAdmission)
//!   └──► scan_directory (startup sweep)
//! ```

pub mod poller;
pub mod scan;
pub mod source;
pub mod stability;
pub mod watcher;

pub use poller::PollingEventSource;
pub use scan::{count_candidates, scan_directory};
pub use source::{ArrivalHandler, CandidateFilter, EventSource, WatcherError};
pub use stability::StabilityTracker;
pub use watcher::NotifyEventSource;
