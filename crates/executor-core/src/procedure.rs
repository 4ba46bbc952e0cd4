//! A procedure: one submitted unit of work, potentially spanning several
//! jobs as it executes and spawns follow-up jobs of its own.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::job::Job;
use crate::status::StatusRecord;

/// A submitted procedure and its accumulated execution state.
///
/// Jobs hold a [`std::sync::Weak`] back-reference to their owning
/// procedure rather than an `Arc`, so a procedure's `scheduled`/`executed`
/// lists (which hold `Arc<Job>` strongly) don't form a reference cycle
/// with the job's own back-pointer.
pub struct Procedure {
    uuid: Uuid,
    /// Opaque identifiers whose overlap with another procedure's set makes
    /// the two procedures unsafe to run concurrently. Populated by the
    /// scheduler implementation; the execution core only ever compares
    /// sets for disjointness.
    lock_objects: HashSet<String>,
    priority: i64,
    inner: Mutex<ProcedureInner>,
    notify: Notify,
}

struct ProcedureInner {
    scheduled: Vec<Arc<Job>>,
    executed: Vec<Arc<Job>>,
    complete: bool,
    status: Vec<StatusRecord>,
}

/// The sentinel lock set every procedure acquires when the caller doesn't
/// supply its own — effectively global mutual exclusion between
/// procedures, per spec: the current scheduler implementation makes no
/// attempt at finer-grained locking.
fn default_lock_objects() -> HashSet<String> {
    HashSet::from(["lock".to_string()])
}

impl Procedure {
    /// Construct a new procedure. `lock_objects` is `None` for the common
    /// case of a procedure with no caller-supplied lock set, which falls
    /// back to the sentinel `{"lock"}` set (global mutual exclusion).
    pub fn new(lock_objects: Option<HashSet<String>>) -> Arc<Self> {
        Arc::new(Self {
            uuid: Uuid::new_v4(),
            lock_objects: lock_objects.unwrap_or_else(default_lock_objects),
            priority: 0,
            inner: Mutex::new(ProcedureInner {
                scheduled: Vec::new(),
                executed: Vec::new(),
                complete: false,
                status: Vec::new(),
            }),
            notify: Notify::new(),
        })
    }

    /// Construct a procedure recovered from durable checkpoints, whose
    /// uuid must match the uuid recorded on disk rather than a fresh one.
    pub fn recovered(uuid: Uuid, lock_objects: Option<HashSet<String>>) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            lock_objects: lock_objects.unwrap_or_else(default_lock_objects),
            priority: 0,
            inner: Mutex::new(ProcedureInner {
                scheduled: Vec::new(),
                executed: Vec::new(),
                complete: false,
                status: Vec::new(),
            }),
            notify: Notify::new(),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn lock_objects(&self) -> &HashSet<String> {
        &self.lock_objects
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub async fn is_complete(&self) -> bool {
        self.inner.lock().await.complete
    }

    pub async fn scheduled_jobs(&self) -> Vec<Arc<Job>> {
        self.inner.lock().await.scheduled.clone()
    }

    pub async fn executed_jobs(&self) -> Vec<Arc<Job>> {
        self.inner.lock().await.executed.clone()
    }

    pub async fn add_scheduled_job(&self, job: Arc<Job>) {
        self.inner.lock().await.scheduled.push(job);
    }

    /// Record that `job` has finished executing, removing it from the
    /// scheduled set and appending it to the executed set. The procedure
    /// completes the moment its scheduled set drains empty — which may
    /// happen well before every job that will ever run on its behalf has
    /// been created, if those jobs are themselves spawned later. Returns
    /// `true` if this call was the one that completed the procedure, so
    /// the caller knows whether to remove the just-finished job's
    /// checkpoint record.
    pub async fn add_executed_job(&self, job: Arc<Job>) -> bool {
        let job_status = job.status().await;
        let mut inner = self.inner.lock().await;
        inner.scheduled.retain(|j| j.uuid() != job.uuid());
        inner.status.extend(job_status);
        inner.executed.push(job);

        if inner.scheduled.is_empty() && !inner.complete {
            inner.complete = true;
            drop(inner);
            self.notify.notify_waiters();
            true
        } else {
            false
        }
    }

    /// The procedure's result: the last executed job's non-null result if
    /// one exists, else `true` if every executed job succeeded and `false`
    /// if any failed.
    pub async fn result(&self) -> Value {
        let inner = self.inner.lock().await;
        debug_assert!(inner.complete, "Procedure::result read before the procedure completed");
        for job in inner.executed.iter().rev() {
            if let Some(result) = job.result().await {
                if !result.is_null() {
                    return result;
                }
            }
        }
        let any_error = futures_any_error(&inner.executed).await;
        Value::Bool(!any_error)
    }

    pub async fn status(&self) -> Vec<StatusRecord> {
        let inner = self.inner.lock().await;
        debug_assert!(inner.complete, "Procedure::status read before the procedure completed");
        inner.status.clone()
    }

    /// Block the calling task until the procedure completes.
    pub async fn wait(&self) {
        loop {
            if self.is_complete().await {
                return;
            }
            self.notify.notified().await;
            if self.is_complete().await {
                return;
            }
        }
    }
}

async fn futures_any_error(jobs: &[Arc<Job>]) -> bool {
    for job in jobs {
        if job.failed().await {
            return true;
        }
    }
    false
}

impl std::fmt::Debug for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Procedure").field("uuid", &self.uuid).finish()
    }
}
