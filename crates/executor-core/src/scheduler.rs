//! The lock-aware scheduler contract consumed by the worker.
//!
//! The scheduler itself is out of scope for this crate: it is the
//! component that holds back procedures whose lock sets conflict with
//! currently-executing ones. This module only pins down the interface the
//! worker drives it through, plus a simple in-memory implementation used
//! by tests and demos.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::error::SchedulerError;
use crate::procedure::Procedure;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// The scheduler contract the execution core depends on.
///
/// `next_procedure` is expected to suspend until a procedure is available
/// whose lock set does not conflict with any currently in-flight
/// procedure, or until shutdown is requested (in which case it resolves to
/// `None`).
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submit a procedure for eventual execution. `None` is the shutdown
    /// sentinel: it is guaranteed to eventually be reflected by a `None`
    /// return from `next_procedure`.
    async fn enqueue_procedure(&self, procedure: Option<Arc<Procedure>>) -> SchedulerResult<()>;

    /// Hand the worker the next procedure whose locks it may safely take,
    /// suspending if none is currently eligible.
    async fn next_procedure(&self) -> SchedulerResult<Option<Arc<Procedure>>>;

    /// Notify the scheduler that `procedure` has fully drained, releasing
    /// whatever locks it held. `None` is tolerated as a no-op, covering the
    /// worker's very first iteration where there is no previous procedure.
    async fn done(&self, procedure: Option<&Procedure>) -> SchedulerResult<()>;
}

/// A simple FIFO scheduler that serializes procedures whose lock sets
/// intersect, releasing a procedure's locks when the worker reports it
/// done. Good enough for tests and single-tenant demos; a production
/// deployment would plug in a real lock-aware scheduler here.
pub struct FifoLockScheduler {
    inner: Mutex<FifoState>,
    notify: Notify,
}

struct FifoState {
    queue: VecDeque<Option<Arc<Procedure>>>,
    held_locks: HashSet<String>,
}

impl Default for FifoLockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FifoLockScheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FifoState {
                queue: VecDeque::new(),
                held_locks: HashSet::new(),
            }),
            notify: Notify::new(),
        }
    }
}

#[async_trait]
impl Scheduler for FifoLockScheduler {
    async fn enqueue_procedure(&self, procedure: Option<Arc<Procedure>>) -> SchedulerResult<()> {
        let mut state = self.inner.lock().await;
        state.queue.push_back(procedure);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn next_procedure(&self) -> SchedulerResult<Option<Arc<Procedure>>> {
        loop {
            {
                let mut state = self.inner.lock().await;
                if let Some(front) = state.queue.front() {
                    let eligible = match front {
                        None => true,
                        Some(p) => p.lock_objects().is_disjoint(&state.held_locks),
                    };
                    if eligible {
                        let next = state.queue.pop_front().unwrap();
                        if let Some(p) = &next {
                            state.held_locks.extend(p.lock_objects());
                        }
                        return Ok(next);
                    }
                }
            }
            self.notify.notified().await;
        }
    }

    async fn done(&self, procedure: Option<&Procedure>) -> SchedulerResult<()> {
        if let Some(p) = procedure {
            let mut state = self.inner.lock().await;
            for lock in p.lock_objects() {
                state.held_locks.remove(&lock);
            }
            self.notify.notify_waiters();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::Procedure;

    #[tokio::test]
    async fn fifo_scheduler_hands_back_procedures_in_order() {
        let scheduler = FifoLockScheduler::new();
        let p1 = Procedure::new(None);
        let p2 = Procedure::new(None);
        let id1 = p1.uuid();
        let id2 = p2.uuid();

        scheduler.enqueue_procedure(Some(p1)).await.unwrap();
        scheduler.enqueue_procedure(Some(p2)).await.unwrap();

        let first = scheduler.next_procedure().await.unwrap().unwrap();
        assert_eq!(first.uuid(), id1);
        scheduler.done(Some(first.as_ref())).await.unwrap();

        let second = scheduler.next_procedure().await.unwrap().unwrap();
        assert_eq!(second.uuid(), id2);
    }

    #[tokio::test]
    async fn fifo_scheduler_shutdown_sentinel_passes_through() {
        let scheduler = FifoLockScheduler::new();
        scheduler.enqueue_procedure(None).await.unwrap();
        let next = scheduler.next_procedure().await.unwrap();
        assert!(next.is_none());
    }
}
