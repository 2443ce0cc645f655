//! In-memory priority queue shared by the admission path and the worker.
//!
//! Dequeue order is lowest `priority` first, then earliest `submitted_at`,
//! then push order. Waiting consumers are woken through a `Notify`, and
//! `pop_timeout` bounds the wait so the worker can observe shutdown.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::fingerprint::Fingerprint;
use crate::domain::Job;

/// Heap entry. `BinaryHeap` is a max-heap, so `Ord` is inverted: the
/// entry that should come out first compares greatest.
#[derive(Debug)]
struct Entry {
    seq: u64,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .job
            .priority
            .cmp(&self.job.priority)
            .then_with(|| other.job.submitted_at.cmp(&self.job.submitted_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Thread-safe, unbounded priority queue of jobs
#[derive(Debug, Default)]
pub struct PriorityJobQueue {
    heap: Mutex<BinaryHeap<Entry>>,
    /// Fingerprints queued or in flight in this process
    tracked: Mutex<HashSet<Fingerprint>>,
    next_seq: AtomicU64,
    notify: Notify,
}

impl PriorityJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn heap(&self) -> MutexGuard<'_, BinaryHeap<Entry>> {
        // A panic while holding the lock cannot leave the heap half-updated
        self.heap.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tracked(&self) -> MutexGuard<'_, HashSet<Fingerprint>> {
        self.tracked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a job. Never blocks, always succeeds.
    pub fn push(&self, job: Job) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.heap().push(Entry { seq, job });
        self.notify.notify_one();
    }

    /// Take the next job if one is ready
    pub fn try_pop(&self) -> Option<Job> {
        self.heap().pop().map(|entry| entry.job)
    }

    /// Wait up to `timeout` for the next job. Returns `None` on timeout.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(job) = self.try_pop() {
                return Some(job);
            }

            // A push between try_pop and here leaves a stored permit, so
            // the wakeup is not lost.
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.try_pop();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap().is_empty()
    }

    /// Mark a fingerprint as queued or in flight. Returns false if it
    /// already was.
    pub fn track(&self, fingerprint: &Fingerprint) -> bool {
        self.tracked().insert(fingerprint.clone())
    }

    /// Forget a fingerprint once its job has left the system
    pub fn release(&self, fingerprint: &Fingerprint) {
        self.tracked().remove(fingerprint);
    }

    pub fn is_tracked(&self, fingerprint: &Fingerprint) -> bool {
        self.tracked().contains(fingerprint)
    }
}
