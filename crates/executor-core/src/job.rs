//! A job: one action invocation scheduled on behalf of a procedure.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::action::Action;
use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::error::{ExecutorError, Result};
use crate::persister::Persister;
use crate::procedure::Procedure;
use crate::queue::ExecutorQueue;
use crate::scheduler::Scheduler;
use crate::status::{JobState, Outcome, StatusRecord};

/// One action invocation, scheduled on behalf of a [`Procedure`].
///
/// Holds a weak back-reference to its procedure: the procedure's
/// scheduled/executed lists hold `Arc<Job>` strongly, so a strong
/// back-pointer here would leave the pair uncollectable.
pub struct Job {
    uuid: Uuid,
    procedure: Weak<Procedure>,
    action: Arc<dyn Action>,
    action_fqn: String,
    args: Vec<Value>,
    kwargs: Value,
    is_recoverable: bool,
    checkpoint: CheckpointRecord,
    inner: Mutex<JobInner>,
}

struct JobInner {
    status: Vec<StatusRecord>,
    result: Option<Value>,
    complete: bool,
    /// Jobs spawned by this job's action while it was executing, buffered
    /// here until the action returns successfully and its transaction
    /// commits. Drained — never before.
    spawned: Vec<Arc<Job>>,
}

impl Job {
    /// Create a job scheduled on behalf of `procedure`. Registers itself
    /// on the procedure's scheduled set before returning, matching the
    /// invariant that a job is always visible to its procedure from the
    /// moment it exists.
    ///
    /// `reject_unrecoverable` mirrors
    /// [`crate::config::ExecutorConfig::reject_unrecoverable_actions`]: when
    /// set, an action the checkpoint store doesn't declare recoverable is
    /// refused outright instead of accepted with a logged warning.
    pub async fn new(
        procedure: &Arc<Procedure>,
        action: Arc<dyn Action>,
        description: impl Into<String>,
        args: Vec<Value>,
        kwargs: Value,
        checkpoints: &dyn CheckpointStore,
        reject_unrecoverable: bool,
    ) -> Result<Arc<Self>> {
        Self::with_uuid(procedure, action, description, args, kwargs, checkpoints, Uuid::new_v4(), reject_unrecoverable).await
    }

    /// Create a job with a caller-supplied uuid, used when rebuilding a
    /// job during crash recovery from its durable checkpoint record.
    #[allow(clippy::too_many_arguments)]
    pub async fn with_uuid(
        procedure: &Arc<Procedure>,
        action: Arc<dyn Action>,
        description: impl Into<String>,
        args: Vec<Value>,
        kwargs: Value,
        checkpoints: &dyn CheckpointStore,
        uuid: Uuid,
        reject_unrecoverable: bool,
    ) -> Result<Arc<Self>> {
        let action_fqn = action.fqn().to_string();
        let is_recoverable = checkpoints.is_recoverable(&action_fqn);
        if !is_recoverable {
            if reject_unrecoverable {
                return Err(ExecutorError::ActionNotRecoverable(action_fqn));
            }
            warn!(action = %action_fqn, "action is not recoverable; a crash mid-execution may leave the system in an inconsistent state");
        }

        let checkpoint = CheckpointRecord::new(procedure.uuid(), uuid, action_fqn.clone(), args.clone(), kwargs.clone());

        let job = Arc::new(Self {
            uuid,
            procedure: Arc::downgrade(procedure),
            action,
            action_fqn,
            args,
            kwargs,
            is_recoverable,
            checkpoint,
            inner: Mutex::new(JobInner {
                status: vec![StatusRecord::new(Outcome::Success, JobState::Enqueued, description.into())],
                result: None,
                complete: false,
                spawned: Vec::new(),
            }),
        });

        procedure.add_scheduled_job(job.clone()).await;
        Ok(job)
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn procedure(&self) -> Option<Arc<Procedure>> {
        self.procedure.upgrade()
    }

    pub fn action_fqn(&self) -> &str {
        &self.action_fqn
    }

    pub fn is_recoverable(&self) -> bool {
        self.is_recoverable
    }

    pub fn checkpoint(&self) -> &CheckpointRecord {
        &self.checkpoint
    }

    pub async fn result(&self) -> Option<Value> {
        self.inner.lock().await.result.clone()
    }

    pub async fn failed(&self) -> bool {
        self.inner
            .lock()
            .await
            .status
            .iter()
            .any(|s| s.success == Outcome::Error)
    }

    pub async fn status(&self) -> Vec<StatusRecord> {
        self.inner.lock().await.status.clone()
    }

    pub async fn is_complete(&self) -> bool {
        self.inner.lock().await.complete
    }

    /// Buffer jobs spawned during this job's action invocation. They are
    /// not visible to the scheduler or the procedure until this job's
    /// execution commits successfully.
    pub async fn append_jobs(&self, jobs: Vec<Arc<Job>>) {
        self.inner.lock().await.spawned.extend(jobs);
    }

    async fn add_status(&self, success: Outcome, state: JobState, description: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        let record = StatusRecord::new(success, state, description.into());
        debug!(
            procedure = %self.procedure.upgrade().map(|p| p.uuid()).unwrap_or_default(),
            job = %self.uuid,
            action = %self.action_fqn,
            state = ?record.state,
            success = ?record.success,
            "job status transition"
        );
        inner.status.push(record);
    }

    async fn add_status_with_diagnosis(&self, success: Outcome, state: JobState, description: impl Into<String>, diagnosis: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.status.push(StatusRecord::with_diagnosis(success, state, description.into(), diagnosis.into()));
    }

    /// Run the job's action to completion, bracketed by a persister
    /// transaction and (if the action is recoverable) a checkpoint
    /// begin/finish pair. On success, jobs the action spawned are
    /// partitioned into same-procedure jobs (handed to `queue`) and
    /// cross-procedure jobs (whose owning procedures are handed to
    /// `scheduler`). On failure, the persister transaction is rolled
    /// back and the job is recorded as failed; a rollback failure is
    /// itself only logged, never propagated.
    pub async fn execute(
        self: Arc<Self>,
        persister: &dyn Persister,
        checkpoints: &dyn CheckpointStore,
        scheduler: &dyn Scheduler,
        queue: &ExecutorQueue,
    ) {
        self.add_status(Outcome::Success, JobState::Processing, format!("Executing action ({}).", self.action_fqn))
            .await;

        if self.is_recoverable {
            if let Err(err) = checkpoints.begin(self.uuid).await {
                warn!(job = %self.uuid, error = %err, "failed to record checkpoint begin");
            }
        }

        if let Err(err) = persister.begin().await {
            warn!(job = %self.uuid, error = %err, "failed to open transaction");
        }

        match self.action.call(&self.args, &self.kwargs).await {
            Ok(result) => {
                self.inner.lock().await.result = Some(result);
                self.on_success(persister, checkpoints, scheduler, queue).await;
                self.add_status(Outcome::Success, JobState::Complete, format!("Executed action ({}).", self.action_fqn))
                    .await;
            }
            Err(error) => {
                if let Err(rollback_err) = persister.rollback().await {
                    warn!(job = %self.uuid, error = %rollback_err, "rollback failed");
                }
                self.inner.lock().await.result = Some(Value::Bool(false));
                self.add_status_with_diagnosis(
                    Outcome::Error,
                    JobState::Complete,
                    format!("Tried to execute action ({}).", self.action_fqn),
                    format!("{error:#}"),
                )
                .await;
            }
        }

        self.inner.lock().await.complete = true;

        let uuid = self.uuid;
        let is_recoverable = self.is_recoverable;
        if let Some(procedure) = self.procedure.upgrade() {
            let just_completed = procedure.add_executed_job(self).await;
            if just_completed && is_recoverable {
                if let Err(err) = checkpoints.remove(uuid).await {
                    warn!(job = %uuid, error = %err, "failed to remove checkpoint");
                }
            }
        }
    }

    async fn on_success(&self, persister: &dyn Persister, checkpoints: &dyn CheckpointStore, scheduler: &dyn Scheduler, queue: &ExecutorQueue) {
        let spawned = std::mem::take(&mut self.inner.lock().await.spawned);

        let records: Vec<CheckpointRecord> = spawned.iter().map(|j| j.checkpoint.clone()).collect();
        if !records.is_empty() {
            if let Err(err) = checkpoints.register(&records, true).await {
                warn!(error = %err, "failed to register spawned job checkpoints");
            }
        }

        if self.is_recoverable {
            if let Err(err) = checkpoints.finish(self.uuid).await {
                warn!(job = %self.uuid, error = %err, "failed to record checkpoint finish");
            }
        }

        if let Err(err) = persister.commit().await {
            warn!(job = %self.uuid, error = %err, "commit failed");
        }

        let own_procedure = self.procedure.upgrade().map(|p| p.uuid());
        let mut same_procedure = Vec::new();
        let mut other_procedures: Vec<Arc<Procedure>> = Vec::new();
        for job in spawned {
            match job.procedure() {
                Some(p) if Some(p.uuid()) == own_procedure => same_procedure.push(job),
                Some(p) => {
                    if !other_procedures.iter().any(|existing| existing.uuid() == p.uuid()) {
                        other_procedures.push(p);
                    }
                }
                None => {}
            }
        }

        for procedure in other_procedures {
            let uuid = procedure.uuid();
            if let Err(err) = scheduler.enqueue_procedure(Some(procedure)).await {
                warn!(procedure = %uuid, error = %err, "failed to enqueue spawned procedure");
            }
        }
        queue.schedule(same_procedure).await;
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for Job {}

impl std::hash::Hash for Job {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("uuid", &self.uuid)
            .field("action_fqn", &self.action_fqn)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FnAction;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::persister::RecordingPersister;
    use crate::scheduler::FifoLockScheduler;
    use serde_json::json;

    #[tokio::test]
    async fn successful_action_commits_and_completes() {
        let procedure = Procedure::new(None);
        let checkpoints = InMemoryCheckpointStore::new(true);
        let persister = RecordingPersister::new();
        let scheduler = FifoLockScheduler::new();
        let queue = ExecutorQueue::new();

        let action = Arc::new(FnAction::new("test.add", |args, _kwargs| async move {
            let a = args[0].as_i64().unwrap();
            let b = args[1].as_i64().unwrap();
            Ok(json!(a + b))
        }));

        let job = Job::new(&procedure, action, "add two numbers", vec![json!(2), json!(3)], json!({}), &checkpoints, false)
            .await
            .unwrap();
        job.clone().execute(&persister, &checkpoints, &scheduler, &queue).await;

        assert_eq!(job.result().await, Some(json!(5)));
        assert!(job.is_complete().await);
        assert!(!job.failed().await);
        assert_eq!(persister.commit_count(), 1);
        assert_eq!(persister.rollback_count(), 0);
        assert!(procedure.is_complete().await);
    }

    #[tokio::test]
    async fn failing_action_rolls_back_and_records_diagnosis() {
        let procedure = Procedure::new(None);
        let checkpoints = InMemoryCheckpointStore::new(true);
        let persister = RecordingPersister::new();
        let scheduler = FifoLockScheduler::new();
        let queue = ExecutorQueue::new();

        let action = Arc::new(FnAction::new("test.fail", |_args, _kwargs| async move {
            Err(anyhow::anyhow!("boom"))
        }));

        let job = Job::new(&procedure, action, "always fails", vec![], json!({}), &checkpoints, false)
            .await
            .unwrap();
        job.clone().execute(&persister, &checkpoints, &scheduler, &queue).await;

        assert!(job.failed().await);
        assert_eq!(job.result().await, Some(json!(false)));
        assert_eq!(persister.rollback_count(), 1);
        assert_eq!(persister.commit_count(), 0);
        let status = job.status().await;
        assert!(!status.last().unwrap().diagnosis.is_empty());
    }

    #[tokio::test]
    async fn unrecoverable_action_is_rejected_when_configured_to() {
        let procedure = Procedure::new(None);
        let checkpoints = InMemoryCheckpointStore::new(false);
        let action = Arc::new(FnAction::new("test.unrecoverable", |_args, _kwargs| async move { Ok(Value::Null) }));

        let err = Job::new(&procedure, action, "not recoverable", vec![], json!({}), &checkpoints, true)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::ExecutorError::ActionNotRecoverable(_)));
    }
}
