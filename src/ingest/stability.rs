//! Grace-period tracking for files that may still be syncing.
//!
//! A detected file is only handed on once its size and mtime have stayed
//! the same for the whole grace period. Any change restarts the clock.
//! This is a heuristic: a writer that pauses longer than the grace period
//! can still get a partial file admitted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    len: u64,
    modified: Option<SystemTime>,
}

impl Snapshot {
    fn take(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

#[derive(Debug)]
struct Observation {
    snapshot: Snapshot,
    since: Instant,
}

/// Files seen but not yet stable
#[derive(Debug)]
pub struct StabilityTracker {
    grace: Duration,
    pending: HashMap<PathBuf, Observation>,
}

impl StabilityTracker {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            pending: HashMap::new(),
        }
    }

    /// Note activity on `path` at `now`
    pub fn observe_at(&mut self, path: PathBuf, now: Instant) {
        let Some(snapshot) = Snapshot::take(&path) else {
            self.pending.remove(&path);
            return;
        };

        match self.pending.get_mut(&path) {
            Some(existing) if existing.snapshot == snapshot => {}
            Some(existing) => {
                existing.snapshot = snapshot;
                existing.since = now;
            }
            None => {
                self.pending.insert(path, Observation { snapshot, since: now });
            }
        }
    }

    /// Remove and return files that have been unchanged for the grace
    /// period. Files that vanished are dropped; files that changed have
    /// their clock restarted.
    pub fn take_stable(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut stable = Vec::new();
        let mut vanished = Vec::new();

        for (path, observation) in self.pending.iter_mut() {
            if now.saturating_duration_since(observation.since) < self.grace {
                continue;
            }

            match Snapshot::take(path) {
                None => vanished.push(path.clone()),
                Some(current) if current == observation.snapshot => stable.push(path.clone()),
                Some(current) => {
                    observation.snapshot = current;
                    observation.since = now;
                }
            }
        }

        for path in vanished.iter().chain(stable.iter()) {
            self.pending.remove(path);
        }

        stable.sort();
        stable
    }

    pub fn is_tracking(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    const GRACE: Duration = Duration::from_secs(2);

    #[test]
    fn test_unchanged_file_is_released_after_grace() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scan.pdf");
        std::fs::write(&path, b"complete").unwrap();

        let mut tracker = StabilityTracker::new(GRACE);
        let t0 = Instant::now();
        tracker.observe_at(path.clone(), t0);

        assert!(tracker.take_stable(t0 + Duration::from_secs(1)).is_empty());
        assert_eq!(tracker.take_stable(t0 + GRACE), vec![path.clone()]);
        assert!(!tracker.is_tracking(&path));
    }

    #[test]
    fn test_growing_file_restarts_the_clock() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("upload.mp3");
        std::fs::write(&path, b"part").unwrap();

        let mut tracker = StabilityTracker::new(GRACE);
        let t0 = Instant::now();
        tracker.observe_at(path.clone(), t0);

        std::fs::write(&path, b"part and more").unwrap();
        assert!(tracker.take_stable(t0 + GRACE).is_empty());
        assert!(tracker.is_tracking(&path));

        assert_eq!(tracker.take_stable(t0 + GRACE * 2), vec![path]);
    }

    #[test]
    fn test_touched_file_restarts_the_clock() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("note.txt");
        std::fs::write(&path, b"same size").unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        let mut tracker = StabilityTracker::new(GRACE);
        let t0 = Instant::now();
        tracker.observe_at(path.clone(), t0);

        set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
        assert!(tracker.take_stable(t0 + GRACE).is_empty());
        assert_eq!(tracker.take_stable(t0 + GRACE * 2), vec![path]);
    }

    #[test]
    fn test_vanished_file_is_dropped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gone.pdf");
        std::fs::write(&path, b"x").unwrap();

        let mut tracker = StabilityTracker::new(GRACE);
        let t0 = Instant::now();
        tracker.observe_at(path.clone(), t0);
        std::fs::remove_file(&path).unwrap();

        assert!(tracker.take_stable(t0 + GRACE).is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_repeat_observation_does_not_reset_unchanged_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("steady.pdf");
        std::fs::write(&path, b"steady").unwrap();

        let mut tracker = StabilityTracker::new(GRACE);
        let t0 = Instant::now();
        tracker.observe_at(path.clone(), t0);
        tracker.observe_at(path.clone(), t0 + Duration::from_secs(1));

        assert_eq!(tracker.take_stable(t0 + GRACE), vec![path]);
        assert_eq!(tracker.len(), 0);
    }
}
