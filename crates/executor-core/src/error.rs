//! Error taxonomy for the execution core.
//!
//! Errors from the *submission* API surface to the caller as [`ExecutorError`].
//! Errors encountered on the *execution* path (inside a running job) never
//! propagate out of the worker: they are captured as status records on the
//! owning procedure instead, see [`crate::job::Job::execute`].

use uuid::Uuid;

/// Result type alias used throughout the crate's submission-facing API.
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Errors raised by the submission API and by the collaborator traits the
/// core depends on (scheduler, persister, checkpoint store).
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// An action handed to `enqueue*` was not a valid registered action.
    #[error("action is not callable: {0}")]
    NotCallable(String),

    /// A submission call was made while no worker is running.
    #[error("executor is not running")]
    ExecutorNotRunning,

    /// `start()` was called while a worker was already running.
    #[error("executor is already running")]
    ExecutorAlreadyRunning,

    /// Misuse of `within_procedure`, or `wait_for_procedure` called from
    /// the worker task itself (which would deadlock the executor).
    #[error("programming error: {0}")]
    ProgrammingError(String),

    /// An action was rejected because it is not checkpoint-recoverable and
    /// [`crate::config::ExecutorConfig::reject_unrecoverable_actions`] is set.
    #[error("action is not recoverable: {0}")]
    ActionNotRecoverable(String),

    /// A lookup for a procedure by UUID found nothing.
    #[error("unknown procedure: {0}")]
    UnknownProcedure(Uuid),

    /// The scheduler collaborator reported a failure.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// The persister collaborator reported a failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// The checkpoint store collaborator reported a failure.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors from the external, lock-aware scheduler. Out of scope for this
/// crate beyond the trait contract in [`crate::scheduler`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the per-worker transactional persister.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to begin transaction: {0}")]
    Begin(String),

    #[error("failed to commit transaction: {0}")]
    Commit(String),

    #[error("failed to roll back transaction: {0}")]
    Rollback(String),
}

/// Errors from the durable checkpoint store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CheckpointError {
    #[error("failed to register checkpoint batch: {0}")]
    Register(String),

    #[error("failed to mark checkpoint begun: {0}")]
    Begin(String),

    #[error("failed to mark checkpoint finished: {0}")]
    Finish(String),

    #[error("failed to remove checkpoint: {0}")]
    Remove(String),
}
