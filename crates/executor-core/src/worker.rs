//! The single worker task that drains procedures and executes their jobs.

use std::cell::RefCell;
use std::sync::Arc;

use tokio::task_local;
use tracing::{debug, info};

use crate::checkpoint::CheckpointStore;
use crate::job::Job;
use crate::persister::PersisterFactory;
use crate::procedure::Procedure;
use crate::queue::ExecutorQueue;
use crate::scheduler::Scheduler;

task_local! {
    /// Set for the lifetime of the worker task's scope; its presence is
    /// how the rest of the crate tells "running on the worker task" from
    /// "running on a caller's task", the async equivalent of comparing
    /// `threading.current_thread()` against the executor thread.
    pub(crate) static CURRENT_JOB: RefCell<Option<Arc<Job>>>;
}

/// True if the calling task is the executor's worker task.
pub(crate) fn is_worker_task() -> bool {
    CURRENT_JOB.try_with(|_| ()).is_ok()
}

/// The job currently executing on the worker task, if any. Panics if
/// called from outside the worker task's scope — callers must check
/// [`is_worker_task`] first.
pub(crate) fn current_job() -> Option<Arc<Job>> {
    CURRENT_JOB.with(|cell| cell.borrow().clone())
}

/// Drives the scheduler and queue to completion. One instance runs for
/// the lifetime of a started executor, as a single tokio task: jobs
/// within a worker always execute one at a time, sharing one persister.
pub struct ExecutorWorker {
    scheduler: Arc<dyn Scheduler>,
    checkpoints: Arc<dyn CheckpointStore>,
    persisters: Arc<dyn PersisterFactory>,
    queue: Arc<ExecutorQueue>,
}

impl ExecutorWorker {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        checkpoints: Arc<dyn CheckpointStore>,
        persisters: Arc<dyn PersisterFactory>,
        queue: Arc<ExecutorQueue>,
    ) -> Self {
        Self {
            scheduler,
            checkpoints,
            persisters,
            queue,
        }
    }

    /// Run the worker loop until the shutdown sentinel drains through the
    /// queue. Intended to be spawned as its own task and awaited only by
    /// `Executor::shutdown`.
    pub async fn run(self) {
        let scope = RefCell::new(None);
        CURRENT_JOB.scope(scope, self.run_inner()).await
    }

    async fn run_inner(self) {
        debug!("executor worker starting");
        let persister = self.persisters.create();

        let mut procedure: Option<Arc<Procedure>> = None;
        loop {
            let needs_next = match &procedure {
                None => true,
                Some(p) => p.is_complete().await,
            };
            if needs_next {
                procedure = self.next_procedure(procedure).await;
                debug!(procedure = ?procedure.as_ref().map(|p| p.uuid()), "read procedure from scheduler");
            }

            let job = self.queue.get().await;
            self.queue.done().await;

            let job = match job {
                Some(job) => job,
                None => break,
            };

            CURRENT_JOB.with(|cell| *cell.borrow_mut() = Some(job.clone()));
            job.execute(persister.as_ref(), self.checkpoints.as_ref(), self.scheduler.as_ref(), &self.queue)
                .await;
            CURRENT_JOB.with(|cell| *cell.borrow_mut() = None);
        }

        if let Err(err) = persister.close().await {
            tracing::warn!(error = %err, "failed to close worker persister");
        }
        info!("executor worker stopped");
    }

    async fn next_procedure(&self, previous: Option<Arc<Procedure>>) -> Option<Arc<Procedure>> {
        if let Err(err) = self.scheduler.done(previous.as_deref()).await {
            tracing::warn!(error = %err, "scheduler.done failed");
        }
        let procedure = match self.scheduler.next_procedure().await {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(error = %err, "scheduler.next_procedure failed; treating as shutdown");
                None
            }
        };

        match &procedure {
            Some(p) => {
                let jobs = p.scheduled_jobs().await;
                self.queue.schedule(jobs).await;
            }
            None => self.queue.shutdown().await,
        }

        procedure
    }
}
