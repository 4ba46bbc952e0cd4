//! A single-worker execution core for running procedures made up of
//! dynamically-spawned, transactionally-checkpointed jobs.
//!
//! A caller submits a [`procedure::Procedure`] consisting of one or more
//! [`action::Action`] invocations. The [`executor::Executor`] facade hands
//! procedures to an external, lock-aware [`scheduler::Scheduler`] and runs
//! their jobs one at a time on a single worker task, bracketing each job's
//! action with a [`persister::Persister`] transaction and, for recoverable
//! actions, a durable [`checkpoint::CheckpointStore`] record. Jobs may
//! spawn further jobs — either within their own procedure or as brand new
//! ones — while they run; those only become visible once the spawning
//! job's transaction commits.

pub mod action;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod persister;
pub mod procedure;
pub mod queue;
pub mod scheduler;
pub mod status;
mod worker;

pub use action::{Action, ActionResult, FnAction};
pub use checkpoint::{CheckpointRecord, CheckpointStore};
pub use config::ExecutorConfig;
pub use error::{ExecutorError, Result};
pub use executor::{install, global, ActionSpec, Executor, WithinProcedure};
pub use job::Job;
pub use persister::{Persister, PersisterFactory};
pub use procedure::Procedure;
pub use queue::ExecutorQueue;
pub use scheduler::Scheduler;
pub use status::{JobState, Outcome, StatusRecord};

#[cfg(feature = "testing")]
pub use checkpoint::InMemoryCheckpointStore;
#[cfg(feature = "testing")]
pub use persister::RecordingPersister;
#[cfg(feature = "testing")]
pub use scheduler::FifoLockScheduler;
