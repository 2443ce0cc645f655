//! Canonical on-disk layout.
//!
//! Single source of truth for where things live under the root:
//!
//! | Location | Purpose |
//! |----------|---------|
//! | `inbox/` | Drop folder, watched |
//! | `processing/` | Files owned by the worker |
//! | `processed/YYYY-MM/` | Archived sources |
//! | `failed/` | Dead-letter folder |
//! | `output/` | Markdown produced by the processor |
//! | `state/` | `state.db`, `watcher.pid`, `watcher.log` |

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Ledger database file name (under `state/`)
pub const DB_FILE: &str = "state.db";

/// Pid file name (under `state/`)
pub const PID_FILE: &str = "watcher.pid";

/// Daemon log file name (under `state/`)
pub const LOG_FILE: &str = "watcher.log";

/// Reserved name in the inbox that is never treated as input
pub const SENTINEL_FILE: &str = "queue.md";

/// Resolved absolute directories
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layout {
    pub root: PathBuf,
    pub inbox: PathBuf,
    pub processing: PathBuf,
    pub processed: PathBuf,
    pub failed: PathBuf,
    pub output: PathBuf,
    pub state: PathBuf,
}

impl Layout {
    /// Default layout under `root`
    pub fn under(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            inbox: root.join("inbox"),
            processing: root.join("processing"),
            processed: root.join("processed"),
            failed: root.join("failed"),
            output: root.join("output"),
            state: root.join("state"),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.state.join(DB_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state.join(PID_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.state.join(LOG_FILE)
    }

    /// Every directory the daemon writes to
    pub fn directories(&self) -> [&Path; 6] {
        [
            &self.inbox,
            &self.processing,
            &self.processed,
            &self.failed,
            &self.output,
            &self.state,
        ]
    }

    /// Create all directories
    pub fn ensure(&self) -> Result<(), std::io::Error> {
        for dir in self.directories() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Default root: `$INBOXD_HOME` if given, else `~/.inboxd`
pub fn default_root(env_home: Option<PathBuf>) -> Option<PathBuf> {
    env_home.or_else(|| dirs::home_dir().map(|home| home.join(".inboxd")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_under_root() {
        let layout = Layout::under(Path::new("/data/inboxd"));

        assert_eq!(layout.inbox, PathBuf::from("/data/inboxd/inbox"));
        assert_eq!(layout.db_path(), PathBuf::from("/data/inboxd/state/state.db"));
        assert_eq!(layout.pid_path(), PathBuf::from("/data/inboxd/state/watcher.pid"));
        assert_eq!(layout.log_path(), PathBuf::from("/data/inboxd/state/watcher.log"));
    }

    #[test]
    fn test_ensure_creates_everything() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::under(temp.path());

        layout.ensure().unwrap();
        for dir in layout.directories() {
            assert!(dir.is_dir(), "{} missing", dir.display());
        }
    }

    #[test]
    fn test_env_home_wins() {
        let env = PathBuf::from("/srv/inboxd");
        assert_eq!(default_root(Some(env.clone())), Some(env));
    }
}
