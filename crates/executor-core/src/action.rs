//! The action contract actions implement to be runnable as jobs.

use async_trait::async_trait;
use serde_json::Value;

/// Result of running an action body.
///
/// Actions return plain `anyhow::Error` rather than a crate-specific type:
/// the execution core treats any error uniformly as an action failure and
/// captures its formatted message as the job's diagnosis, so actions are
/// free to use whatever error type is convenient.
pub type ActionResult = anyhow::Result<Value>;

/// A callable administrative action, identified by a fully-qualified name.
///
/// Actions are the host-supplied code bodies a [`crate::job::Job`] invokes.
/// An action may call back into the facade's `enqueue*` APIs with
/// `within_procedure = WithinProcedure::Current` to spawn follow-up jobs
/// in the same procedure.
#[async_trait]
pub trait Action: Send + Sync {
    /// Stable identity used for checkpoint lookups and log messages, e.g.
    /// `"orchestrator.rebalance_shard"`.
    fn fqn(&self) -> &str;

    /// Run the action body against the supplied positional/keyword
    /// argument bundles.
    async fn call(&self, args: &[Value], kwargs: &Value) -> ActionResult;
}

/// Convenience wrapper for building an [`Action`] from a plain async
/// closure, used heavily by tests and by the demo CLI where defining a
/// named struct per action would be ceremony without benefit.
pub struct FnAction<F> {
    fqn: String,
    func: F,
}

impl<F> FnAction<F> {
    pub fn new(fqn: impl Into<String>, func: F) -> Self {
        Self {
            fqn: fqn.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> Action for FnAction<F>
where
    F: Fn(Vec<Value>, Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ActionResult> + Send,
{
    fn fqn(&self) -> &str {
        &self.fqn
    }

    async fn call(&self, args: &[Value], kwargs: &Value) -> ActionResult {
        (self.func)(args.to_vec(), kwargs.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fn_action_invokes_closure() {
        let action = FnAction::new("test.double", |args, _kwargs| async move {
            let x = args[0].as_i64().unwrap();
            Ok(json!(x * 2))
        });

        let result = action.call(&[json!(21)], &json!({})).await.unwrap();
        assert_eq!(result, json!(42));
        assert_eq!(action.fqn(), "test.double");
    }
}
