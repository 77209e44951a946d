use futures::future::{try_join_all, BoxFuture};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{OpsError, OpsResult};
use crate::events::{Phase, StatusEvent};
use crate::operation::BoxedOperation;
use crate::tree::{NodeBody, OpSource, StatusNode};

/// Result of a `perform` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The node was already mid-flight; state untouched, nothing invoked
    AlreadyPending,
    /// The operation (or batch) settled successfully with this value
    Settled(Value),
}

impl Outcome {
    /// Settled value, if any
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Settled(value) => Some(value),
            Outcome::AlreadyPending => None,
        }
    }

    /// Value contributed to an enclosing batch result. An already-pending
    /// child contributes a marker object instead of a settled value.
    fn into_batch_value(self) -> Value {
        match self {
            Outcome::Settled(value) => value,
            Outcome::AlreadyPending => json!({ "pending": true }),
        }
    }
}

impl StatusNode {
    /// Invoke this node.
    ///
    /// At most one invocation per node is in flight: while the node is
    /// pending, further calls return [`Outcome::AlreadyPending`] without
    /// touching state or starting anything. Otherwise the status record is
    /// reset, the operation runs, and the node settles - flags are written
    /// before the caller sees the result, and a failure is recorded on the
    /// node *and* returned, always both.
    ///
    /// # Errors
    ///
    /// [`OpsError::UnknownOperation`] for an unregistered named leaf,
    /// [`OpsError::Operation`] for an operation or child failure.
    pub fn perform(&self, args: Value) -> BoxFuture<'_, OpsResult<Outcome>> {
        Box::pin(self.perform_impl(args))
    }

    async fn perform_impl(&self, args: Value) -> OpsResult<Outcome> {
        // Guard and reset under one lock acquisition so the transition is
        // atomic from the caller's perspective
        {
            let mut status = self.status.write().await;
            if status.is_pending() {
                warn!("Operation '{}' already pending, not re-invoked", self.path);
                return Ok(Outcome::AlreadyPending);
            }
            status.begin();
        }

        let invocation = Uuid::new_v4();
        self.emit(invocation, Phase::Started);
        debug!("Operation '{}' started (invocation {invocation})", self.path);

        let result = match &self.body {
            NodeBody::Single(source) => self.run_single(source, args).await,
            NodeBody::Batch(children) => self.run_batch(children, args).await,
        };

        // Flags first, event second, caller's result last
        match result {
            Ok(value) => {
                self.status.write().await.settle_ok();
                self.emit(invocation, Phase::Resolved);
                info!("Operation '{}' resolved (invocation {invocation})", self.path);
                Ok(Outcome::Settled(value))
            }
            Err(err) => {
                self.status.write().await.settle_err(err.message());
                self.emit(invocation, Phase::Rejected);
                error!(
                    "Operation '{}' rejected (invocation {invocation}): {err}",
                    self.path
                );
                Err(err)
            }
        }
    }

    async fn run_single(&self, source: &OpSource, args: Value) -> OpsResult<Value> {
        let op: BoxedOperation = match source {
            OpSource::Inline(op) => Arc::clone(op),
            OpSource::Named(name) => match self.shared.registry.resolve(name).await {
                Some(op) => op,
                None => {
                    warn!("No operation named '{name}' registered for '{}'", self.path);
                    return Err(OpsError::UnknownOperation(name.clone()));
                }
            },
        };

        op.run(args).await.map_err(|e| OpsError::Operation {
            path: self.path.clone(),
            message: format!("{e:#}"),
        })
    }

    /// Execute every child concurrently and aggregate.
    ///
    /// Children are spawned in declaration order. The batch settles at the
    /// first child failure; already-started siblings are not cancelled - they
    /// keep running in the background and settle their own nodes.
    async fn run_batch(&self, children: &[Arc<StatusNode>], args: Value) -> OpsResult<Value> {
        let handles: Vec<_> = children
            .iter()
            .map(|child| {
                let child = Arc::clone(child);
                let args = child_args(&args, &child.key);
                tokio::spawn(async move { child.perform(args).await })
            })
            .collect();

        let outcomes = try_join_all(handles.into_iter().map(|handle| {
            let batch_path = self.path.clone();
            async move {
                match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(OpsError::Operation {
                        path: batch_path,
                        message: format!("Failed to join child operation: {e}"),
                    }),
                }
            }
        }))
        .await?;

        Ok(Value::Array(
            outcomes.into_iter().map(Outcome::into_batch_value).collect(),
        ))
    }

    fn emit(&self, invocation: Uuid, phase: Phase) {
        // Subscribers are optional; a lagging or absent receiver never fails
        // the dispatcher
        let _ = self.shared.events.send(StatusEvent {
            path: self.path.clone(),
            invocation,
            phase,
        });
    }
}

/// Per-child slice of a batch argument. An object argument is destructured by
/// child key; anything else forwards `Null` to every child.
fn child_args(args: &Value, key: &str) -> Value {
    match args {
        Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::operation::{FnOperation, MockOperation};
    use crate::registry::OperationRegistry;
    use crate::spec::OperationSpec;
    use crate::tree::OpsTree;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio_test::{assert_err, assert_ok};

    fn build_tree(spec: OperationSpec) -> OpsTree {
        OpsTree::build(Config::default(), Arc::new(OperationRegistry::new()), spec)
            .expect("tree builds")
    }

    async fn wait_until_pending(node: &Arc<StatusNode>) {
        for _ in 0..200 {
            if node.status().await.is_pending() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("node '{}' never became pending", node.path());
    }

    async fn wait_until_resolved(tree: &OpsTree, path: &[&str]) {
        for _ in 0..200 {
            if tree.status(path).await.unwrap().resolved == Some(true) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("node at {path:?} never resolved");
    }

    /// Handler that blocks until the returned gate is notified
    fn gated(value: Value) -> (BoxedOperation, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let waiter = Arc::clone(&gate);
        let op = FnOperation::boxed(move |_| {
            let waiter = Arc::clone(&waiter);
            let value = value.clone();
            async move {
                waiter.notified().await;
                Ok(value)
            }
        });
        (op, gate)
    }

    #[tokio::test]
    async fn test_single_resolve_settles_node_and_caller() {
        let tree = build_tree(
            OperationSpec::new().op("load", |_| async move { Ok(json!("loaded")) }),
        );

        let outcome = assert_ok!(tree.perform(&["load"], Value::Null).await);
        assert_eq!(outcome, Outcome::Settled(json!("loaded")));

        let status = tree.status(&["load"]).await.unwrap();
        assert_eq!(status.pending, Some(false));
        assert_eq!(status.resolved, Some(true));
        assert_eq!(status.rejected, Some(false));
        assert_eq!(status.error, None);
    }

    #[tokio::test]
    async fn test_single_reject_records_and_propagates() {
        let tree = build_tree(
            OperationSpec::new().op("load", |_| async move { anyhow::bail!("boom") }),
        );

        let err = assert_err!(tree.perform(&["load"], Value::Null).await);
        assert_eq!(err.message(), "boom");

        let status = tree.status(&["load"]).await.unwrap();
        assert_eq!(status.pending, Some(false));
        assert_eq!(status.rejected, Some(true));
        assert_eq!(status.resolved, Some(false));
        assert_eq!(status.error, Some("boom".to_string()));
    }

    #[tokio::test]
    async fn test_arguments_reach_the_operation() {
        let tree = build_tree(
            OperationSpec::new().op("echo", |args| async move { Ok(args) }),
        );

        let outcome = assert_ok!(tree.perform(&["echo"], json!({ "page": 2 })).await);
        assert_eq!(outcome, Outcome::Settled(json!({ "page": 2 })));
    }

    #[tokio::test]
    async fn test_pending_node_is_not_reinvoked() {
        let (op, gate) = gated(json!("done"));
        let tree = build_tree(OperationSpec::new().handler("slow", op));
        let node = tree.node(&["slow"]).unwrap();

        let in_flight = {
            let node = Arc::clone(&node);
            tokio::spawn(async move { node.perform(Value::Null).await })
        };
        wait_until_pending(&node).await;

        // Re-entrant call: immediate marker, state untouched
        let outcome = assert_ok!(node.perform(Value::Null).await);
        assert_eq!(outcome, Outcome::AlreadyPending);
        assert!(node.status().await.is_pending());

        gate.notify_one();
        let outcome = assert_ok!(in_flight.await.unwrap());
        assert_eq!(outcome, Outcome::Settled(json!("done")));
        assert_eq!(node.status().await.resolved, Some(true));
    }

    #[tokio::test]
    async fn test_settled_node_can_be_performed_again() {
        let tree = build_tree(
            OperationSpec::new().op("load", |_| async move { Ok(json!(1)) }),
        );
        let mut events = tree.subscribe();

        assert_ok!(tree.perform(&["load"], Value::Null).await);
        assert_ok!(tree.perform(&["load"], Value::Null).await);

        // Two full Started/Resolved cycles with distinct invocation ids:
        // state is not sticky, each re-invocation passes through pending
        let first_started = events.try_recv().unwrap();
        let first_resolved = events.try_recv().unwrap();
        let second_started = events.try_recv().unwrap();
        let second_resolved = events.try_recv().unwrap();

        assert_eq!(first_started.phase, Phase::Started);
        assert_eq!(first_resolved.phase, Phase::Resolved);
        assert_eq!(second_started.phase, Phase::Started);
        assert_eq!(second_resolved.phase, Phase::Resolved);
        assert_eq!(first_started.invocation, first_resolved.invocation);
        assert_ne!(first_started.invocation, second_started.invocation);
    }

    #[tokio::test]
    async fn test_failure_then_success_clears_error() {
        let tree = build_tree(OperationSpec::new().op("flaky", |args| async move {
            if args == json!("fail") {
                anyhow::bail!("transient")
            }
            Ok(json!("ok"))
        }));

        assert_err!(tree.perform(&["flaky"], json!("fail")).await);
        assert_eq!(
            tree.status(&["flaky"]).await.unwrap().error,
            Some("transient".to_string())
        );

        assert_ok!(tree.perform(&["flaky"], Value::Null).await);
        let status = tree.status(&["flaky"]).await.unwrap();
        assert_eq!(status.error, None);
        assert_eq!(status.resolved, Some(true));
    }

    #[tokio::test]
    async fn test_named_leaf_resolves_through_registry() {
        let registry = Arc::new(OperationRegistry::new());
        let tree = OpsTree::build(
            Config::default(),
            Arc::clone(&registry),
            OperationSpec::new().named("refresh", "do_refresh"),
        )
        .unwrap();

        // Registered after the tree was built - resolution is late-bound
        registry
            .register_fn("do_refresh", |_| async move { Ok(json!("refreshed")) })
            .await;

        let outcome = assert_ok!(tree.perform(&["refresh"], Value::Null).await);
        assert_eq!(outcome, Outcome::Settled(json!("refreshed")));
    }

    #[tokio::test]
    async fn test_unknown_name_rejects_the_node() {
        let tree = build_tree(OperationSpec::new().named("refresh", "missing_op"));

        let err = assert_err!(tree.perform(&["refresh"], Value::Null).await);
        assert!(matches!(err, OpsError::UnknownOperation(ref name) if name == "missing_op"));

        let status = tree.status(&["refresh"]).await.unwrap();
        assert_eq!(status.rejected, Some(true));
        assert_eq!(status.error, Some("Unknown operation: missing_op".to_string()));
    }

    #[tokio::test]
    async fn test_mocked_operation_invoked_once_per_perform() {
        let mut mock = MockOperation::new();
        mock.expect_run()
            .times(2)
            .returning(|_| Ok(json!("mocked")));

        let tree = build_tree(OperationSpec::new().handler("op", Arc::new(mock)));
        assert_ok!(tree.perform(&["op"], Value::Null).await);
        assert_ok!(tree.perform(&["op"], Value::Null).await);
    }

    #[tokio::test]
    async fn test_batch_resolves_with_ordered_child_results() {
        let tree = build_tree(
            OperationSpec::new().batch(
                "all",
                OperationSpec::new()
                    .op("a", |_| async move { Ok(json!(1)) })
                    .op("b", |_| async move { Ok(json!(2)) }),
            ),
        );

        let outcome = assert_ok!(tree.perform(&["all"], Value::Null).await);
        assert_eq!(outcome, Outcome::Settled(json!([1, 2])));

        let status = tree.status(&["all"]).await.unwrap();
        assert_eq!(status.resolved, Some(true));
        assert_eq!(tree.status(&["all", "a"]).await.unwrap().resolved, Some(true));
        assert_eq!(tree.status(&["all", "b"]).await.unwrap().resolved, Some(true));
    }

    #[tokio::test]
    async fn test_batch_child_failure_rejects_the_batch() {
        let tree = build_tree(
            OperationSpec::new().batch(
                "all",
                OperationSpec::new()
                    .op("a", |_| async move { Ok(json!(1)) })
                    .op("b", |_| async move { anyhow::bail!("boom") }),
            ),
        );

        let err = assert_err!(tree.perform(&["all"], Value::Null).await);
        assert_eq!(err.message(), "boom");

        let status = tree.status(&["all"]).await.unwrap();
        assert_eq!(status.rejected, Some(true));
        assert_eq!(status.error, Some("boom".to_string()));

        // The failing child settled its own node too
        let child = tree.status(&["all", "b"]).await.unwrap();
        assert_eq!(child.rejected, Some(true));
        assert_eq!(child.error, Some("boom".to_string()));

        // The successful sibling still ran to completion
        wait_until_resolved(&tree, &["all", "a"]).await;
    }

    #[tokio::test]
    async fn test_batch_failure_does_not_cancel_slow_sibling() {
        let (slow_op, gate) = gated(json!("slow-done"));
        let tree = build_tree(OperationSpec::new().batch(
            "all",
            OperationSpec::new()
                .op("fail", |_| async move { anyhow::bail!("fast failure") })
                .handler("slow", slow_op),
        ));

        let err = assert_err!(tree.perform(&["all"], Value::Null).await);
        assert_eq!(err.message(), "fast failure");
        assert_eq!(tree.status(&["all"]).await.unwrap().rejected, Some(true));

        // The batch settled while the sibling is still in flight
        let slow = tree.node(&["all", "slow"]).unwrap();
        wait_until_pending(&slow).await;

        // It keeps running in the background and settles its own node; its
        // late success is not surfaced anywhere on the batch
        gate.notify_one();
        wait_until_resolved(&tree, &["all", "slow"]).await;
        assert_eq!(tree.status(&["all"]).await.unwrap().rejected, Some(true));
    }

    #[tokio::test]
    async fn test_batch_destructures_object_argument_by_child_key() {
        let tree = build_tree(
            OperationSpec::new().batch(
                "all",
                OperationSpec::new()
                    .op("a", |args| async move { Ok(args) })
                    .op("b", |args| async move { Ok(args) }),
            ),
        );

        let outcome = assert_ok!(
            tree.perform(&["all"], json!({ "a": { "page": 1 }, "c": true }))
                .await
        );
        // 'a' got its slice, 'b' had no slice and got null
        assert_eq!(outcome, Outcome::Settled(json!([{ "page": 1 }, null])));
    }

    #[tokio::test]
    async fn test_batch_forwards_null_for_non_object_argument() {
        let tree = build_tree(
            OperationSpec::new().batch(
                "all",
                OperationSpec::new().op("a", |args| async move { Ok(args) }),
            ),
        );

        let outcome = assert_ok!(tree.perform(&["all"], json!([1, 2])).await);
        assert_eq!(outcome, Outcome::Settled(json!([null])));
    }

    #[tokio::test]
    async fn test_empty_batch_resolves_immediately() {
        let tree = build_tree(OperationSpec::new().batch("all", OperationSpec::new()));

        let outcome = assert_ok!(tree.perform(&["all"], Value::Null).await);
        assert_eq!(outcome, Outcome::Settled(json!([])));
        assert_eq!(tree.status(&["all"]).await.unwrap().resolved, Some(true));
    }

    #[tokio::test]
    async fn test_pending_child_contributes_marker_to_batch() {
        let (slow_op, gate) = gated(json!("slow-done"));
        let tree = build_tree(OperationSpec::new().batch(
            "all",
            OperationSpec::new()
                .handler("slow", slow_op)
                .op("fast", |_| async move { Ok(json!("fast-done")) }),
        ));

        // Start the slow child directly so the batch finds it mid-flight
        let slow = tree.node(&["all", "slow"]).unwrap();
        let in_flight = {
            let slow = Arc::clone(&slow);
            tokio::spawn(async move { slow.perform(Value::Null).await })
        };
        wait_until_pending(&slow).await;

        let outcome = assert_ok!(tree.perform(&["all"], Value::Null).await);
        assert_eq!(
            outcome,
            Outcome::Settled(json!([{ "pending": true }, "fast-done"]))
        );

        gate.notify_one();
        assert_ok!(in_flight.await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_pending_guard_applies_at_batch_level() {
        let (slow_op, gate) = gated(json!("done"));
        let tree = build_tree(OperationSpec::new().batch(
            "all",
            OperationSpec::new().handler("slow", slow_op),
        ));
        let batch = tree.node(&["all"]).unwrap();

        let in_flight = {
            let batch = Arc::clone(&batch);
            tokio::spawn(async move { batch.perform(Value::Null).await })
        };
        wait_until_pending(&batch).await;

        let outcome = assert_ok!(batch.perform(Value::Null).await);
        assert_eq!(outcome, Outcome::AlreadyPending);

        gate.notify_one();
        assert_ok!(in_flight.await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_path_is_an_error() {
        let tree = build_tree(OperationSpec::new().op("load", |_| async move { Ok(json!(1)) }));
        let err = assert_err!(tree.perform(&["nope"], Value::Null).await);
        assert!(matches!(err, OpsError::UnknownPath(ref path) if path == "nope"));
    }
}
