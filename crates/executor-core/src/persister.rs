//! The transactional persister contract consumed by the worker.
//!
//! One persister instance exists per worker and is never shared across
//! tasks: jobs executed by the worker share exactly one persister,
//! serially. The persister itself (e.g. a database connection wrapping a
//! transaction) is out of scope; this module only pins down the
//! `begin`/`commit`/`rollback` contract plus an in-memory double for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PersistenceError;

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// A transactional context a [`crate::job::Job`] runs its action inside.
#[async_trait]
pub trait Persister: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> PersistenceResult<()>;

    /// Commit the currently open transaction.
    async fn commit(&self) -> PersistenceResult<()>;

    /// Roll back the currently open transaction. May itself fail; callers
    /// must tolerate that by logging and continuing rather than propagating.
    async fn rollback(&self) -> PersistenceResult<()>;

    /// Release any resources (e.g. a pooled connection) held by this
    /// persister. Called exactly once, by the worker, on loop exit.
    async fn close(&self) -> PersistenceResult<()> {
        Ok(())
    }
}

/// An in-memory persister that records how many times each transactional
/// step was invoked, for use in tests asserting e.g. "rollback was called
/// exactly once".
#[derive(Default)]
pub struct RecordingPersister {
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    closed: AtomicU64,
}

impl RecordingPersister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_count(&self) -> u64 {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Persister for RecordingPersister {
    async fn begin(&self) -> PersistenceResult<()> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> PersistenceResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> PersistenceResult<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> PersistenceResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Constructs a fresh [`Persister`] for a worker, one per worker task, so
/// tests can plug in [`RecordingPersister`] without touching the worker loop.
pub trait PersisterFactory: Send + Sync {
    fn create(&self) -> Box<dyn Persister>;
}

impl<F> PersisterFactory for F
where
    F: Fn() -> Box<dyn Persister> + Send + Sync,
{
    fn create(&self) -> Box<dyn Persister> {
        (self)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_persister_counts_calls() {
        let persister = RecordingPersister::new();
        persister.begin().await.unwrap();
        persister.commit().await.unwrap();
        persister.begin().await.unwrap();
        persister.rollback().await.unwrap();
        persister.close().await.unwrap();

        assert_eq!(persister.begin_count(), 2);
        assert_eq!(persister.commit_count(), 1);
        assert_eq!(persister.rollback_count(), 1);
        assert_eq!(persister.close_count(), 1);
    }
}
