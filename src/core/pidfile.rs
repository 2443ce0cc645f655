//! Single-instance guard.
//!
//! The pid file is held under an exclusive `fs2` lock for the daemon's
//! lifetime, so liveness is "someone holds the lock", not "a process with
//! that pid exists" (pids get reused).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("inboxd is already running{}", describe_pid(.0))]
    AlreadyRunning(Option<u32>),

    #[error("Pid file error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn describe_pid(pid: &Option<u32>) -> String {
    pid.map(|p| format!(" (pid {})", p)).unwrap_or_default()
}

/// A held pid file. Dropping it unlocks and removes the file.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    file: Option<File>,
}

impl PidFile {
    /// Create (or reuse a stale) pid file, lock it and write our pid
    pub fn acquire(path: &Path) -> Result<Self, PidFileError> {
        let io_err = |source| PidFileError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        if let Err(e) = file.try_lock_exclusive() {
            if is_contended(&e) {
                return Err(PidFileError::AlreadyRunning(Self::read_pid(path)));
            }
            return Err(io_err(e));
        }

        // Only truncate once we own the lock
        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        writeln!(file, "{}", std::process::id()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        tracing::debug!("Acquired pid file {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file and drop the lock
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(file) = self.file.take() {
            // Remove while still locked so a new daemon never loses its file
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!("Failed to remove pid file {}: {}", self.path.display(), e);
            }
            let _ = file.unlock();
        }
    }

    /// Pid recorded in the file, if any
    pub fn read_pid(path: &Path) -> Option<u32> {
        let mut contents = String::new();
        File::open(path).ok()?.read_to_string(&mut contents).ok()?;
        contents.trim().parse().ok()
    }

    /// Whether a live process holds the lock on `path`
    pub fn is_held(path: &Path) -> bool {
        let Ok(file) = OpenOptions::new().read(true).write(true).open(path) else {
            return false;
        };

        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = file.unlock();
                false
            }
            Err(e) => is_contended(&e),
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_writes_pid_and_release_removes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state/watcher.pid");

        let pid_file = PidFile::acquire(&path).unwrap();
        assert_eq!(PidFile::read_pid(&path), Some(std::process::id()));
        assert!(PidFile::is_held(&path));

        pid_file.release();
        assert!(!path.exists());
        assert!(!PidFile::is_held(&path));
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("watcher.pid");

        let _held = PidFile::acquire(&path).unwrap();
        match PidFile::acquire(&path) {
            Err(PidFileError::AlreadyRunning(pid)) => assert_eq!(pid, Some(std::process::id())),
            other => panic!("expected AlreadyRunning, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_file_is_taken_over() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("watcher.pid");
        std::fs::write(&path, "999999999\n").unwrap();

        assert!(!PidFile::is_held(&path));
        let _held = PidFile::acquire(&path).unwrap();
        assert_eq!(PidFile::read_pid(&path), Some(std::process::id()));
    }

    #[test]
    fn test_drop_releases() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("watcher.pid");

        {
            let _held = PidFile::acquire(&path).unwrap();
        }
        assert!(!path.exists());
        assert!(PidFile::acquire(&path).is_ok());
    }
}
