//! End-to-end scenarios against the in-memory scheduler/checkpoint/persister
//! doubles: a real worker task, driven entirely through the public facade.
//!
//! These mirror the literal scenarios from the execution core's design
//! notes (single action, in-procedure spawn, cross-procedure spawn,
//! recovery, shutdown) rather than unit-testing individual components.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use executor_core::{
    ActionSpec, CheckpointRecord, CheckpointStore, Executor, ExecutorConfig, ExecutorError, FifoLockScheduler, FnAction, InMemoryCheckpointStore,
    Persister, PersisterFactory, RecordingPersister, WithinProcedure,
};
use serde_json::{json, Value};
use uuid::Uuid;

fn persister_factory() -> Arc<dyn PersisterFactory> {
    Arc::new(|| -> Box<dyn Persister> { Box::new(RecordingPersister::new()) })
}

fn new_executor() -> Arc<Executor> {
    Executor::new(
        Arc::new(FifoLockScheduler::new()),
        Arc::new(InMemoryCheckpointStore::new(true)),
        persister_factory(),
        ExecutorConfig::default(),
    )
}

async fn wait(executor: &Arc<Executor>, procedure: &executor_core::Procedure) {
    tokio::time::timeout(Duration::from_secs(2), executor.wait_for_procedure(procedure))
        .await
        .expect("procedure did not complete in time")
        .unwrap();
}

#[tokio::test]
async fn in_procedure_spawn_runs_on_same_procedure_before_anything_else() {
    let executor = new_executor();
    executor.start().await.unwrap();

    let inner_executor = executor.clone();
    let action_a = Arc::new(FnAction::new("test.spawn_same_procedure", move |_args, _kwargs| {
        let inner_executor = inner_executor.clone();
        async move {
            let b = Arc::new(FnAction::new("test.b", |_args, _kwargs| async move { Ok(json!("from b")) }));
            let spec_b = ActionSpec::new(b, "stage b", vec![], json!({}));
            inner_executor
                .enqueue_procedures(WithinProcedure::Current, vec![spec_b])
                .await
                .unwrap();
            Ok(json!("from a"))
        }
    }));

    let spec_a = ActionSpec::new(action_a, "stage a", vec![], json!({}));
    let procedure = executor.enqueue_procedure(WithinProcedure::New, spec_a).await.unwrap();

    wait(&executor, &procedure).await;

    let executed = procedure.executed_jobs().await;
    assert_eq!(executed.len(), 2, "procedure should have gained both stage a and stage b");
    assert_eq!(executed[0].action_fqn(), "test.spawn_same_procedure");
    assert_eq!(executed[1].action_fqn(), "test.b");
    assert_eq!(procedure.result().await, json!("from b"));

    executor.shutdown().await.unwrap();
}

#[tokio::test]
async fn cross_procedure_spawn_leaves_originating_procedure_with_only_its_own_job() {
    let executor = new_executor();
    executor.start().await.unwrap();

    let inner_executor = executor.clone();
    let spawned_uuid: Arc<std::sync::Mutex<Option<Uuid>>> = Arc::new(std::sync::Mutex::new(None));
    let spawned_uuid_writer = spawned_uuid.clone();

    let action_a = Arc::new(FnAction::new("test.spawn_new_procedure", move |_args, _kwargs| {
        let inner_executor = inner_executor.clone();
        let spawned_uuid_writer = spawned_uuid_writer.clone();
        async move {
            let b = Arc::new(FnAction::new("test.q", |_args, _kwargs| async move { Ok(json!("q ran")) }));
            let spec_b = ActionSpec::new(b, "procedure q", vec![], json!({}));
            let q = inner_executor
                .enqueue_procedures(WithinProcedure::New, vec![spec_b])
                .await
                .unwrap()
                .into_iter()
                .next()
                .unwrap();
            *spawned_uuid_writer.lock().unwrap() = Some(q.uuid());
            Ok(json!("a ran"))
        }
    }));

    let spec_a = ActionSpec::new(action_a, "procedure a", vec![], json!({}));
    let procedure_a = executor.enqueue_procedure(WithinProcedure::New, spec_a).await.unwrap();
    wait(&executor, &procedure_a).await;

    assert_eq!(procedure_a.executed_jobs().await.len(), 1, "A's own procedure must contain only A");
    assert_eq!(procedure_a.result().await, json!("a ran"));

    let q_uuid = spawned_uuid.lock().unwrap().take().expect("action A should have recorded Q's uuid");
    let procedure_q = executor.get_procedure(q_uuid).expect("spawned procedure Q must be reachable by uuid");
    wait(&executor, &procedure_q).await;
    assert_eq!(procedure_q.result().await, json!("q ran"));

    executor.shutdown().await.unwrap();
}

#[tokio::test]
async fn reschedule_procedure_preserves_caller_supplied_uuids() {
    let checkpoints = Arc::new(InMemoryCheckpointStore::new(true));
    let executor = Executor::new(
        Arc::new(FifoLockScheduler::new()),
        checkpoints.clone(),
        persister_factory(),
        ExecutorConfig::default(),
    );
    executor.start().await.unwrap();

    let proc_uuid = Uuid::new_v4();
    let job_uuid = Uuid::new_v4();

    checkpoints
        .register(&[CheckpointRecord::new(proc_uuid, job_uuid, "test.recovered", vec![], json!({}))], false)
        .await
        .unwrap();
    assert!(checkpoints.contains(job_uuid));

    let action = Arc::new(FnAction::new("test.recovered", |_args, _kwargs| async move { Ok(json!("recovered")) }));
    let spec = ActionSpec::new(action, "recovered job", vec![], json!({}));

    let procedure = executor
        .reschedule_procedure(proc_uuid, vec![(job_uuid, spec)])
        .await
        .unwrap();
    assert_eq!(procedure.uuid(), proc_uuid);
    assert!(checkpoints.contains(job_uuid), "checkpoint must survive until the job completes");

    wait(&executor, &procedure).await;

    let executed = procedure.executed_jobs().await;
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].uuid(), job_uuid);
    assert_eq!(procedure.result().await, json!("recovered"));
    assert!(!checkpoints.contains(job_uuid), "checkpoint must be removed once the procedure completes");

    executor.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_drains_already_queued_procedures_then_rejects_new_submissions() {
    let executor = new_executor();
    executor.start().await.unwrap();

    let completions = Arc::new(AtomicU64::new(0));
    let mut procedures = Vec::new();
    for i in 0..5u64 {
        let completions = completions.clone();
        let action = Arc::new(FnAction::new("test.counted", move |_args, _kwargs| {
            let completions = completions.clone();
            async move {
                completions.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }));
        let spec = ActionSpec::new(action, format!("counted job {i}"), vec![], json!({}));
        procedures.push(executor.enqueue_procedure(WithinProcedure::New, spec).await.unwrap());
    }

    executor.shutdown().await.unwrap();

    for procedure in &procedures {
        assert!(procedure.is_complete().await, "all procedures queued before shutdown must complete");
    }
    assert_eq!(completions.load(Ordering::SeqCst), 5);

    let action = Arc::new(FnAction::new("test.after_shutdown", |_args, _kwargs| async move { Ok(Value::Null) }));
    let spec = ActionSpec::new(action, "too late", vec![], json!({}));
    let err = executor.enqueue_procedure(WithinProcedure::New, spec).await.unwrap_err();
    assert!(matches!(err, ExecutorError::ExecutorNotRunning));
}
