//! The durable checkpoint store contract consumed by jobs and the facade.
//!
//! The checkpoint store itself (durable `(procedure_id, job_id,
//! action_fqn, args, kwargs, begin_ts, finish_ts)` records) is out of
//! scope for this crate; this module pins down the contract and provides
//! an in-memory double for tests and demos.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CheckpointError;

pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// A durable checkpoint record for a single job, as registered by
/// [`CheckpointStore::register`].
#[derive(Debug, Clone)]
pub struct CheckpointRecord {
    pub procedure_id: Uuid,
    pub job_id: Uuid,
    pub action_fqn: String,
    pub args: Vec<Value>,
    pub kwargs: Value,
    pub begin_ts: Option<DateTime<Utc>>,
    pub finish_ts: Option<DateTime<Utc>>,
}

impl CheckpointRecord {
    pub fn new(
        procedure_id: Uuid,
        job_id: Uuid,
        action_fqn: impl Into<String>,
        args: Vec<Value>,
        kwargs: Value,
    ) -> Self {
        Self {
            procedure_id,
            job_id,
            action_fqn: action_fqn.into(),
            args,
            kwargs,
            begin_ts: None,
            finish_ts: None,
        }
    }
}

/// The durable checkpoint store contract.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Static predicate: is an action (identified by its fully-qualified
    /// name) declared recoverable? Non-recoverable actions are accepted
    /// with a logged warning rather than rejected.
    fn is_recoverable(&self, action_fqn: &str) -> bool;

    /// Durably record a batch of jobs. `scheduled` distinguishes jobs
    /// registered before being handed to the scheduler (`false`) from
    /// jobs registered atomically at their spawning job's commit time
    /// (`true`).
    async fn register(&self, jobs: &[CheckpointRecord], scheduled: bool) -> CheckpointResult<()>;

    /// Durably record that a job's execution has started.
    async fn begin(&self, job_id: Uuid) -> CheckpointResult<()>;

    /// Durably record that a job's execution has finished. This may happen
    /// before the job's transaction actually commits; recovery accounts
    /// for that gap.
    async fn finish(&self, job_id: Uuid) -> CheckpointResult<()>;

    /// Remove a job's checkpoint record entirely.
    async fn remove(&self, job_id: Uuid) -> CheckpointResult<()>;
}

/// An in-memory checkpoint store. Actions are "recoverable" if their fqn
/// was registered via [`InMemoryCheckpointStore::mark_recoverable`] (tests
/// default everything to recoverable unless told otherwise).
pub struct InMemoryCheckpointStore {
    overrides: Mutex<HashMap<String, bool>>,
    records: Mutex<HashMap<Uuid, CheckpointRecord>>,
    default_recoverable: bool,
}

impl InMemoryCheckpointStore {
    /// `default_recoverable` controls whether an fqn not explicitly
    /// marked is treated as recoverable; tests exercising the
    /// non-recoverable warning path should construct with `false`.
    pub fn new(default_recoverable: bool) -> Self {
        Self {
            overrides: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
            default_recoverable,
        }
    }

    pub fn mark_recoverable(&self, fqn: impl Into<String>) {
        self.overrides.lock().unwrap().insert(fqn.into(), true);
    }

    pub fn mark_unrecoverable(&self, fqn: impl Into<String>) {
        self.overrides.lock().unwrap().insert(fqn.into(), false);
    }

    /// Test/recovery helper: snapshot of the records currently stored.
    pub fn records(&self) -> Vec<CheckpointRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn contains(&self, job_id: Uuid) -> bool {
        self.records.lock().unwrap().contains_key(&job_id)
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    fn is_recoverable(&self, action_fqn: &str) -> bool {
        self.overrides
            .lock()
            .unwrap()
            .get(action_fqn)
            .copied()
            .unwrap_or(self.default_recoverable)
    }

    async fn register(&self, jobs: &[CheckpointRecord], _scheduled: bool) -> CheckpointResult<()> {
        let mut records = self.records.lock().unwrap();
        for job in jobs {
            records.insert(job.job_id, job.clone());
        }
        Ok(())
    }

    async fn begin(&self, job_id: Uuid) -> CheckpointResult<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&job_id)
            .ok_or_else(|| CheckpointError::Begin(format!("no checkpoint registered for job {job_id}")))?;
        record.begin_ts = Some(Utc::now());
        Ok(())
    }

    async fn finish(&self, job_id: Uuid) -> CheckpointResult<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&job_id)
            .ok_or_else(|| CheckpointError::Finish(format!("no checkpoint registered for job {job_id}")))?;
        record.finish_ts = Some(Utc::now());
        Ok(())
    }

    async fn remove(&self, job_id: Uuid) -> CheckpointResult<()> {
        self.records.lock().unwrap().remove(&job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_begin_then_finish_then_remove() {
        let store = InMemoryCheckpointStore::new(true);
        let job_id = Uuid::new_v4();
        let record = CheckpointRecord::new(Uuid::new_v4(), job_id, "test.action", vec![], Value::Null);

        store.register(&[record], false).await.unwrap();
        assert!(store.contains(job_id));

        store.begin(job_id).await.unwrap();
        store.finish(job_id).await.unwrap();
        let snapshot = store.records();
        let record = snapshot.iter().find(|r| r.job_id == job_id).unwrap();
        assert!(record.begin_ts.is_some());
        assert!(record.finish_ts.is_some());

        store.remove(job_id).await.unwrap();
        assert!(!store.contains(job_id));
    }

    #[test]
    fn recoverability_defaults_and_overrides() {
        let store = InMemoryCheckpointStore::new(false);
        assert!(!store.is_recoverable("whatever.fn"));
        store.mark_recoverable("whatever.fn");
        assert!(store.is_recoverable("whatever.fn"));
        store.mark_unrecoverable("whatever.fn");
        assert!(!store.is_recoverable("whatever.fn"));
    }
}
