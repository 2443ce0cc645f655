//! Processor interfaces for the external tool that turns an inbox file
//! into a markdown note.
//!
//! The daemon only depends on the [`Processor`] trait; the production
//! implementation shells out to a CLI, tests plug in their own.

pub mod command;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use command::CommandProcessor;

/// Why a processing attempt failed
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Processing timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Processor exited with code {code}: {stderr}")]
    ExitFailure { code: i32, stderr: String },

    #[error("Processor reported success but wrote no output at {0}")]
    MissingOutput(PathBuf),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for the external processing step
#[async_trait]
pub trait Processor: Send + Sync {
    /// Human-readable processor name
    fn name(&self) -> &str;

    /// Process `input`, writing the result to `output`.
    ///
    /// Must give up after `timeout`. Dropping the returned future must
    /// abandon the attempt (and stop any child process).
    async fn process(
        &self,
        input: &Path,
        output: &Path,
        timeout: Duration,
    ) -> Result<(), ProcessingError>;
}
