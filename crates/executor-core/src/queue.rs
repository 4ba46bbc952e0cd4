//! The FIFO of jobs the worker drains, one procedure's worth at a time.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::job::Job;

/// Queue a single worker task drains. `None` is the shutdown sentinel.
pub struct ExecutorQueue {
    inner: Mutex<VecDeque<Option<Arc<Job>>>>,
    notify: Notify,
}

impl Default for ExecutorQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Construct a queue whose backing buffer is pre-sized for `hint`
    /// entries. The queue remains unbounded — `hint` only avoids
    /// reallocation for the common case, it is never enforced as a cap.
    pub fn with_capacity_hint(hint: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(hint)),
            notify: Notify::new(),
        }
    }

    /// Remove and return the next entry, suspending until one is
    /// available.
    pub async fn get(&self) -> Option<Arc<Job>> {
        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(entry) = queue.pop_front() {
                    return entry;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Atomically append a batch of jobs (or the shutdown sentinel) to
    /// the queue. A `None` entry embedded in the batch is preserved in
    /// position, matching a procedure with no scheduled jobs being
    /// represented as `[None]`.
    pub async fn schedule(&self, jobs: Vec<Arc<Job>>) {
        if jobs.is_empty() {
            return;
        }
        let mut queue = self.inner.lock().await;
        queue.extend(jobs.into_iter().map(Some));
        self.notify.notify_waiters();
    }

    /// Push the shutdown sentinel.
    pub async fn shutdown(&self) {
        let mut queue = self.inner.lock().await;
        queue.push_back(None);
        self.notify.notify_waiters();
    }

    /// Bookkeeping no-op mirroring the source's `task_done()` call after
    /// each dequeue; kept for symmetry even though nothing currently
    /// reads the completion count it would have fed.
    pub async fn done(&self) {}
}
