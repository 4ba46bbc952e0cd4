//! The submission-facing facade: start/shutdown a worker, enqueue
//! procedures, look one up, and wait for it to drain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use once_cell::sync::OnceCell;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::action::Action;
use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, Result};
use crate::job::Job;
use crate::persister::PersisterFactory;
use crate::procedure::Procedure;
use crate::queue::ExecutorQueue;
use crate::scheduler::Scheduler;
use crate::worker::{self, ExecutorWorker};

/// Whether a newly-enqueued procedure is a brand new one, reuses the
/// caller's own in-flight procedure, or is being rebuilt at a specific
/// uuid during crash recovery. Recovery's `Uuid` case can't overlap with
/// the submission-time boolean distinction the two others need, hence a
/// three-way enum rather than the boolean-or-uuid union the system this
/// replaces gets away with in a dynamically typed language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithinProcedure {
    /// Create a new procedure for each action.
    New,
    /// Attach to the procedure owning the job currently executing on the
    /// worker task. Only valid when called from inside a running action.
    Current,
    /// Rebuild a procedure at a specific uuid, recovered from durable
    /// checkpoints. Only valid when *not* called from the worker task.
    Recovery(Uuid),
}

/// One action plus the description/arguments to run it with, as accepted
/// by [`Executor::enqueue_procedures`].
pub struct ActionSpec {
    pub action: Arc<dyn Action>,
    pub description: String,
    pub args: Vec<Value>,
    pub kwargs: Value,
}

impl ActionSpec {
    pub fn new(action: Arc<dyn Action>, description: impl Into<String>, args: Vec<Value>, kwargs: Value) -> Self {
        Self {
            action,
            description: description.into(),
            args,
            kwargs,
        }
    }
}

/// The execution core's facade. Exactly one worker task runs at a time;
/// `start`/`shutdown` bracket its lifetime.
pub struct Executor {
    scheduler: Arc<dyn Scheduler>,
    checkpoints: Arc<dyn CheckpointStore>,
    persisters: Arc<dyn PersisterFactory>,
    queue: Arc<ExecutorQueue>,
    config: ExecutorConfig,
    procedures: StdMutex<HashMap<Uuid, std::sync::Weak<Procedure>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    /// Construct an executor. If `config.auto_start` is set, the worker
    /// task is spawned immediately and a subsequent explicit `start()`
    /// call will fail with [`ExecutorError::ExecutorAlreadyRunning`],
    /// exactly as if the caller had called `start()` themselves.
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        checkpoints: Arc<dyn CheckpointStore>,
        persisters: Arc<dyn PersisterFactory>,
        config: ExecutorConfig,
    ) -> Arc<Self> {
        let auto_start = config.auto_start;
        let executor = Arc::new(Self {
            scheduler,
            checkpoints,
            persisters,
            queue: Arc::new(ExecutorQueue::with_capacity_hint(config.queue_capacity_hint)),
            config,
            procedures: StdMutex::new(HashMap::new()),
            worker: Mutex::new(None),
        });
        if auto_start {
            tracing::info!("auto-starting executor");
            let handle = executor.spawn_worker();
            *executor
                .worker
                .try_lock()
                .expect("no other task can be contending for the worker lock during construction") = Some(handle);
        }
        executor
    }

    fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let handle = ExecutorWorker::new(
            self.scheduler.clone(),
            self.checkpoints.clone(),
            self.persisters.clone(),
            self.queue.clone(),
        );
        tokio::spawn(handle.run())
    }

    /// Spawn the worker task. Errors if one is already running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Err(ExecutorError::ExecutorAlreadyRunning);
        }
        tracing::info!("starting executor");
        *worker = Some(self.spawn_worker());
        tracing::info!("executor started");
        Ok(())
    }

    /// Send the shutdown sentinel through the scheduler and wait for the
    /// worker task to drain and exit.
    pub async fn shutdown(self: &Arc<Self>) -> Result<()> {
        tracing::info!("shutting down executor");
        let handle = {
            let mut worker = self.worker.lock().await;
            worker.take()
        };
        if let Some(handle) = handle {
            self.scheduler.enqueue_procedure(None).await?;
            tracing::debug!("waiting for worker task to stop");
            let _ = handle.await;
        }
        tracing::info!("executor has stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        // Best-effort, non-blocking: used only to produce a clearer error
        // message than a hang when a caller forgets to `start()`.
        self.worker.try_lock().map(|g| g.is_some()).unwrap_or(true)
    }

    async fn create_procedures(self: &Arc<Self>, within_procedure: WithinProcedure, nactions: usize) -> Result<Vec<Arc<Procedure>>> {
        if !self.is_running() {
            return Err(ExecutorError::ExecutorNotRunning);
        }

        match within_procedure {
            WithinProcedure::Current => {
                if !worker::is_worker_task() {
                    return Err(ExecutorError::ProgrammingError(
                        "one can only enqueue a job within the context of the current procedure from a job that belongs to it".into(),
                    ));
                }
                let current = worker::current_job()
                    .and_then(|j| j.procedure())
                    .ok_or_else(|| ExecutorError::ProgrammingError("no job is currently executing on the worker task".into()))?;
                Ok(std::iter::repeat(current).take(nactions).collect())
            }
            WithinProcedure::Recovery(uuid) => {
                if worker::is_worker_task() {
                    return Err(ExecutorError::ProgrammingError(
                        "one can only create a job within the context of a specific procedure while recovering".into(),
                    ));
                }
                let mut procedures = Vec::with_capacity(nactions);
                for _ in 0..nactions {
                    let procedure = Procedure::recovered(uuid, None);
                    self.register_procedure(&procedure);
                    procedures.push(procedure);
                }
                Ok(procedures)
            }
            WithinProcedure::New => {
                let mut procedures = Vec::with_capacity(nactions);
                for _ in 0..nactions {
                    let procedure = Procedure::new(None);
                    self.register_procedure(&procedure);
                    procedures.push(procedure);
                }
                Ok(procedures)
            }
        }
    }

    fn register_procedure(&self, procedure: &Arc<Procedure>) {
        self.procedures.lock().unwrap().insert(procedure.uuid(), Arc::downgrade(procedure));
    }

    /// Schedule a single procedure running one action.
    pub async fn enqueue_procedure(self: &Arc<Self>, within_procedure: WithinProcedure, spec: ActionSpec) -> Result<Arc<Procedure>> {
        let procedures = self.enqueue_procedures(within_procedure, vec![spec]).await?;
        Ok(procedures.into_iter().next().expect("exactly one procedure requested"))
    }

    /// Schedule one procedure per action in `actions`. When
    /// `within_procedure` is [`WithinProcedure::Current`] the new jobs are
    /// buffered on the currently-executing job instead of handed straight
    /// to the scheduler, and only become visible once that job's action
    /// returns successfully and its transaction commits.
    pub async fn enqueue_procedures(self: &Arc<Self>, within_procedure: WithinProcedure, actions: Vec<ActionSpec>) -> Result<Vec<Arc<Procedure>>> {
        let nactions = actions.len();
        let procedures = self.create_procedures(within_procedure, nactions).await?;

        if within_procedure == WithinProcedure::New || matches!(within_procedure, WithinProcedure::Recovery(_)) {
            debug_assert_eq!(
                procedures.iter().map(|p| p.uuid()).collect::<std::collections::HashSet<_>>().len(),
                procedures.len(),
                "create_procedures must return distinct procedures"
            );
        }

        let mut jobs = Vec::with_capacity(nactions);
        for (procedure, spec) in procedures.iter().zip(actions) {
            let job = Job::new(
                procedure,
                spec.action,
                spec.description,
                spec.args,
                spec.kwargs,
                self.checkpoints.as_ref(),
                self.config.reject_unrecoverable_actions,
            )
            .await?;
            jobs.push(job);
        }

        if within_procedure == WithinProcedure::Current {
            let current = worker::current_job().expect("checked in create_procedures");
            current.append_jobs(jobs).await;
        } else {
            let records: Vec<CheckpointRecord> = jobs.iter().map(|j| j.checkpoint().clone()).collect();
            self.checkpoints.register(&records, false).await?;
            for procedure in &procedures {
                self.scheduler.enqueue_procedure(Some(procedure.clone())).await?;
            }
        }

        Ok(procedures)
    }

    /// Recover a procedure after a crash, rebuilding it at its original
    /// uuid and rescheduling the jobs it had registered but not finished.
    pub async fn reschedule_procedure(self: &Arc<Self>, proc_uuid: Uuid, actions: Vec<(Uuid, ActionSpec)>) -> Result<Arc<Procedure>> {
        let procedures = self.create_procedures(WithinProcedure::Recovery(proc_uuid), 1).await?;
        let procedure = procedures.into_iter().next().expect("exactly one procedure requested");

        for (job_uuid, spec) in actions {
            Job::with_uuid(
                &procedure,
                spec.action,
                spec.description,
                spec.args,
                spec.kwargs,
                self.checkpoints.as_ref(),
                job_uuid,
                self.config.reject_unrecoverable_actions,
            )
            .await?;
        }

        self.scheduler.enqueue_procedure(Some(procedure.clone())).await?;
        Ok(procedure)
    }

    /// Look up a previously-enqueued procedure by uuid. Procedures that
    /// have already completed and been dropped by every other owner are
    /// not found even if their uuid was once valid — the registry holds
    /// only weak references so a completed procedure doesn't leak forever.
    pub fn get_procedure(&self, proc_uuid: Uuid) -> Option<Arc<Procedure>> {
        self.procedures.lock().unwrap().get(&proc_uuid).and_then(|weak| weak.upgrade())
    }

    /// Block until `procedure` completes. Must not be called from inside
    /// a job's action — that would deadlock the single worker task.
    pub async fn wait_for_procedure(&self, procedure: &Procedure) -> Result<()> {
        if !self.is_running() {
            return Err(ExecutorError::ExecutorNotRunning);
        }
        if worker::is_worker_task() {
            return Err(ExecutorError::ProgrammingError(
                "one cannot wait for the execution of a procedure from a job".into(),
            ));
        }
        procedure.wait().await;
        Ok(())
    }
}

static GLOBAL_EXECUTOR: OnceCell<Arc<Executor>> = OnceCell::new();

/// Install an executor instance as the process-wide singleton. Intended
/// to be called once at startup; a second call is a programming error.
pub fn install(executor: Arc<Executor>) -> Result<()> {
    GLOBAL_EXECUTOR
        .set(executor)
        .map_err(|_| ExecutorError::ProgrammingError("executor already installed".into()))
}

/// Fetch the process-wide executor singleton installed via [`install`].
pub fn global() -> Result<Arc<Executor>> {
    GLOBAL_EXECUTOR
        .get()
        .cloned()
        .ok_or_else(|| ExecutorError::ProgrammingError("no executor installed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FnAction;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::persister::RecordingPersister;
    use crate::scheduler::FifoLockScheduler;
    use serde_json::json;
    use std::time::Duration;

    fn persister_factory() -> Arc<dyn PersisterFactory> {
        Arc::new(|| -> Box<dyn crate::persister::Persister> { Box::new(RecordingPersister::new()) })
    }

    #[tokio::test]
    async fn single_action_runs_and_is_awaitable() {
        let executor = Executor::new(
            Arc::new(FifoLockScheduler::new()),
            Arc::new(InMemoryCheckpointStore::new(true)),
            persister_factory(),
            ExecutorConfig::default(),
        );
        executor.start().await.unwrap();

        let action = Arc::new(FnAction::new("test.double", |args, _kwargs| async move {
            Ok(json!(args[0].as_i64().unwrap() * 2))
        }));
        let spec = ActionSpec::new(action, "double a number", vec![json!(21)], json!({}));
        let procedure = executor.enqueue_procedure(WithinProcedure::New, spec).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), executor.wait_for_procedure(&procedure))
            .await
            .expect("procedure did not complete in time")
            .unwrap();

        assert_eq!(procedure.result().await, json!(42));
        executor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn enqueue_before_start_is_rejected() {
        let executor = Executor::new(
            Arc::new(FifoLockScheduler::new()),
            Arc::new(InMemoryCheckpointStore::new(true)),
            persister_factory(),
            ExecutorConfig::default(),
        );
        let action = Arc::new(FnAction::new("test.noop", |_args, _kwargs| async move { Ok(Value::Null) }));
        let spec = ActionSpec::new(action, "noop", vec![], json!({}));
        let err = executor.enqueue_procedure(WithinProcedure::New, spec).await.unwrap_err();
        assert!(matches!(err, ExecutorError::ExecutorNotRunning));
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let executor = Executor::new(
            Arc::new(FifoLockScheduler::new()),
            Arc::new(InMemoryCheckpointStore::new(true)),
            persister_factory(),
            ExecutorConfig::default(),
        );
        executor.start().await.unwrap();
        let err = executor.start().await.unwrap_err();
        assert!(matches!(err, ExecutorError::ExecutorAlreadyRunning));
        executor.shutdown().await.unwrap();
    }
}
