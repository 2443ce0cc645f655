//! Seams between event sources and the admission path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use glob::Pattern;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::shutdown::ShutdownSignal;

/// Errors that can occur with an event source
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid ignore pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Receives paths of files that have appeared and settled
#[async_trait]
pub trait ArrivalHandler: Send + Sync {
    async fn on_file_appeared(&self, path: PathBuf);
}

/// A source of file-arrival events for one directory
#[async_trait]
pub trait EventSource: Send {
    /// Human-readable source name
    fn name(&self) -> &str;

    /// Emit arrivals to `handler` until `shutdown` fires.
    ///
    /// `ready` fires once every arrival from then on will be reported.
    /// The startup sweep waits for it, so nothing lands in between.
    async fn run(
        self: Box<Self>,
        handler: Arc<dyn ArrivalHandler>,
        shutdown: ShutdownSignal,
        ready: oneshot::Sender<()>,
    ) -> Result<(), WatcherError>;
}

/// Decides which directory entries are candidates for admission
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    ignored_names: Vec<String>,
    ignore_patterns: Vec<Pattern>,
}

impl CandidateFilter {
    pub fn new(ignored_names: &[String], ignore_patterns: &[String]) -> Result<Self, WatcherError> {
        let ignore_patterns = ignore_patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            ignored_names: ignored_names.to_vec(),
            ignore_patterns,
        })
    }

    /// Check the name only; callers check that the path is a regular file
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        if name.starts_with('.') {
            return false;
        }

        if self.ignored_names.iter().any(|ignored| ignored == name) {
            return false;
        }

        !self.ignore_patterns.iter().any(|p| p.matches(name))
    }
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self {
            ignored_names: vec!["queue.md".to_string()],
            ignore_patterns: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_and_sentinel_files_are_rejected() {
        let filter = CandidateFilter::default();

        assert!(filter.accepts(Path::new("/inbox/scan.pdf")));
        assert!(!filter.accepts(Path::new("/inbox/.DS_Store")));
        assert!(!filter.accepts(Path::new("/inbox/.scan.pdf.icloud")));
        assert!(!filter.accepts(Path::new("/inbox/queue.md")));
        // Only the exact sentinel name is reserved
        assert!(filter.accepts(Path::new("/inbox/queue.md.txt")));
    }

    #[test]
    fn test_ignore_patterns() {
        let filter = CandidateFilter::new(
            &["queue.md".to_string()],
            &["*.part".to_string(), "~$*".to_string()],
        )
        .unwrap();

        assert!(!filter.accepts(Path::new("movie.mp4.part")));
        assert!(!filter.accepts(Path::new("~$report.docx")));
        assert!(filter.accepts(Path::new("report.docx")));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = CandidateFilter::new(&[], &["[".to_string()]);
        assert!(matches!(result, Err(WatcherError::Pattern(_))));
    }
}
