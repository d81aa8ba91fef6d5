//! Evaluation
//!
//! # Direct
//!
//! [`Node::evaluate`] resolves dependencies depth-first with an explicit
//! frame stack: literals are used as-is, producers are invoked, nodes are
//! descended into. When a frame runs out of pending entries its transform is
//! applied and the result is handed to the parent frame.
//!
//! # Concurrent
//!
//! [`Node::evaluate_async`] is the asynchronous entry point. A node with
//! `Execution::Concurrent` submits each selected dependency as its own tokio
//! task and waits for all of them before applying the transform. Completion
//! order is arbitrary; results are reassembled in declared order. Other nodes
//! await their dependencies one after another.
//!
//! # Memoization
//!
//! Both paths consult the memo slot before touching dependencies and fill it
//! after a successful transform. Errors are never cached.

use futures_util::future::{join_all, BoxFuture, FutureExt};
use futures_util::stream::TryStreamExt;
use smallvec::SmallVec;
use tokio::task::JoinError;

use super::{Dependency, Execution, Node};
use crate::error::{GraphError, Result};
use crate::value::Value;

struct Frame {
    node: Node,
    pending: std::vec::IntoIter<Dependency>,
    results: SmallVec<[Value; 4]>,
}

enum Step {
    Done(Value),
    Descend(Frame),
}

impl Node {
    /// Evaluate synchronously.
    ///
    /// `Concurrent` nodes resolve their dependencies in order on this path.
    /// Streaming nodes are drained through [`Node::iter`] and yield an array.
    pub fn evaluate(&self) -> Result<Value> {
        let mut stack = match self.begin()? {
            Step::Done(value) => return Ok(value),
            Step::Descend(frame) => vec![frame],
        };

        loop {
            let next = match stack.last_mut() {
                Some(frame) => frame.pending.next(),
                None => return Ok(Value::Null),
            };

            let resolved = match next {
                Some(Dependency::Value(value)) => value,
                Some(Dependency::Producer(producer)) => producer.call()?,
                Some(Dependency::Node(child)) => match child.begin()? {
                    Step::Done(value) => value,
                    Step::Descend(frame) => {
                        stack.push(frame);
                        continue;
                    }
                },
                None => {
                    let Some(frame) = stack.pop() else {
                        return Ok(Value::Null);
                    };
                    let value = frame.node.finish(frame.results.into_vec())?;
                    if stack.is_empty() {
                        return Ok(value);
                    }
                    value
                }
            };

            if let Some(parent) = stack.last_mut() {
                parent.results.push(resolved);
            }
        }
    }

    /// Evaluate asynchronously, spawning dependency tasks for `Concurrent` nodes.
    ///
    /// A panic inside a spawned dependency task is resumed on the caller.
    pub fn evaluate_async(&self) -> BoxFuture<'static, Result<Value>> {
        let node = self.clone();
        async move { node.evaluate_owned().await }.boxed()
    }

    async fn evaluate_owned(self) -> Result<Value> {
        if let Some(cached) = self.cached() {
            return Ok(cached);
        }
        if self.is_streaming() {
            let items: Vec<Value> = self.subscribe().try_collect().await?;
            return Ok(self.remember(Value::Array(items)));
        }

        let dependencies = self.selected_dependencies();
        let values = if self.execution() == Execution::Concurrent {
            tracing::trace!(node = %self.label(), tasks = dependencies.len(), "spawning dependency tasks");
            let tasks: Vec<_> = dependencies
                .into_iter()
                .map(|dependency| tokio::spawn(resolve(dependency)))
                .collect();
            let joined = join_all(tasks).await;

            let mut values = Vec::with_capacity(joined.len());
            for result in joined {
                values.push(self.join_task(result)?);
            }
            values
        } else {
            let mut values = Vec::with_capacity(dependencies.len());
            for dependency in dependencies {
                values.push(resolve(dependency).await?);
            }
            values
        };

        self.finish(values)
    }

    fn join_task(&self, joined: std::result::Result<Result<Value>, JoinError>) -> Result<Value> {
        match joined {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(GraphError::Cancelled { node: self.label() }),
        }
    }

    fn begin(&self) -> Result<Step> {
        if let Some(cached) = self.cached() {
            return Ok(Step::Done(cached));
        }
        if self.is_streaming() {
            let items = self.iter()?.collect::<Result<Vec<_>>>()?;
            return Ok(Step::Done(self.remember(Value::Array(items))));
        }
        Ok(Step::Descend(Frame {
            node: self.clone(),
            pending: self.selected_dependencies().into_iter(),
            results: SmallVec::new(),
        }))
    }

    fn finish(&self, values: Vec<Value>) -> Result<Value> {
        let value = self.apply_transform(values)?;
        Ok(self.remember(value))
    }

    pub(crate) fn cached(&self) -> Option<Value> {
        let cached = self.memo().get();
        if cached.is_some() {
            tracing::debug!(node = %self.label(), "cache hit");
        }
        cached
    }

    /// Fill the memo slot of a memoizing node; pass other values through.
    pub(crate) fn remember(&self, value: Value) -> Value {
        if !self.is_memoized() {
            return value;
        }
        tracing::debug!(node = %self.label(), "cache filled");
        self.memo().fill(value)
    }
}

async fn resolve(dependency: Dependency) -> Result<Value> {
    match dependency {
        Dependency::Node(node) => node.evaluate_async().await,
        Dependency::Value(value) => Ok(value),
        Dependency::Producer(producer) => producer.call(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Producer, Selection};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    fn counting(value: Value, cost: f64, calls: &Arc<AtomicUsize>) -> Node {
        let calls = calls.clone();
        Node::builder()
            .cost(cost)
            .dependency(Producer::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value.clone())
            }))
            .build()
    }

    fn sum(values: Vec<Value>) -> Value {
        json!(values.iter().filter_map(Value::as_i64).sum::<i64>())
    }

    #[test]
    fn leaf_evaluates_to_literal() {
        assert_eq!(Node::leaf(json!([1, 2, 3])).evaluate().unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn nested_results_in_declared_order() {
        let a = Node::leaf(1);
        let b = Node::builder().dependencies([json!(2), json!(3)]).map(sum).build();
        let root = Node::builder()
            .dependency(&a)
            .dependency(json!("x"))
            .dependency(&b)
            .build();
        assert_eq!(root.evaluate().unwrap(), json!([1, "x", 5]));
    }

    #[test]
    fn producers_run_at_resolution_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = counting(json!(9), 0.0, &calls);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(node.evaluate().unwrap(), json!(9));
        assert_eq!(node.evaluate().unwrap(), json!(9));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn pure_graphs_are_deterministic() {
        let a = Node::leaf(2);
        let b = Node::builder().dependency(&a).dependency(json!(3)).map(sum).build();
        let root = Node::builder().dependency(&a).dependency(&b).build();
        let first = root.evaluate().unwrap();
        let second = root.evaluate().unwrap();
        assert_eq!(first, json!([2, 5]));
        assert_eq!(first, second);
    }

    #[test]
    fn cache_evaluates_dependency_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let expensive = counting(json!({"answer": 42}), 10.0, &calls);
        let cache = Node::cache(&expensive);

        assert_eq!(cache.cost(), 10.0);
        let first = cache.evaluate().unwrap();
        assert_eq!(first, expensive.evaluate().unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(cache.is_cached());
        assert_eq!(cache.cost(), 0.0);
        assert_eq!(cache.evaluate().unwrap(), first);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cached_subtree_costs_nothing_for_parents() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Node::cache(counting(json!(1), 10.0, &calls));
        let root = Node::builder().cost(2.0).dependency(&cache).build();

        assert_eq!(root.cost(), 12.0);
        root.evaluate().unwrap();
        assert_eq!(root.cost(), 2.0);
    }

    #[test]
    fn min_cost_evaluates_only_cheapest_branch() {
        let calls: Vec<_> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let node = Node::builder()
            .cost(4.0)
            .dependency(counting(json!("five"), 5.0, &calls[0]))
            .dependency(counting(json!("two"), 2.0, &calls[1]))
            .dependency(counting(json!("eight"), 8.0, &calls[2]))
            .select(Selection::MinCost)
            .build();

        assert_eq!(node.cost(), 6.0);
        assert_eq!(node.evaluate().unwrap(), json!("two"));
        assert_eq!(calls[0].load(Ordering::SeqCst), 0);
        assert_eq!(calls[1].load(Ordering::SeqCst), 1);
        assert_eq!(calls[2].load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_min_cost_behaves_like_a_leaf() {
        let node = Node::builder().select(Selection::MinCost).build();
        assert_eq!(node.evaluate().unwrap(), json!([]));
    }

    #[test]
    fn user_errors_propagate_unmodified() {
        let failing = Node::builder()
            .dependency(json!(1))
            .transform(|_| Err(GraphError::user("boom")))
            .build();
        let root = Node::builder().dependency(&failing).build();

        let err = root.evaluate().unwrap_err();
        assert!(matches!(err, GraphError::User(_)));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn failed_evaluation_does_not_fill_cache() {
        let failing = Node::builder()
            .dependency(Producer::new(|| Err(GraphError::user("offline"))))
            .build();
        let cache = Node::cache(&failing);
        assert!(cache.evaluate().is_err());
        assert!(!cache.is_cached());
    }

    #[test]
    fn deep_chains_evaluate_without_recursion() {
        let mut node = Node::leaf(0);
        for _ in 0..50_000 {
            node = Node::builder()
                .dependency(node)
                .map(|values| json!(values[0].as_i64().unwrap_or(0) + 1))
                .build();
        }
        assert_eq!(node.evaluate().unwrap(), json!(50_000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dependencies_run_in_parallel() {
        let barrier = Arc::new(Barrier::new(2));
        let waiting = |label: &'static str| {
            let barrier = barrier.clone();
            Node::builder()
                .dependency(json!(label))
                .map(move |values| {
                    barrier.wait();
                    values[0].clone()
                })
                .build()
        };

        let root = Node::builder()
            .dependency(waiting("left"))
            .dependency(waiting("right"))
            .execution(Execution::Concurrent)
            .build();

        let result = tokio::time::timeout(Duration::from_secs(10), root.evaluate_async())
            .await
            .expect("dependencies did not run concurrently")
            .unwrap();
        assert_eq!(result, json!(["left", "right"]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_results_keep_declared_order() {
        let slow = Node::builder()
            .dependency(json!("slow"))
            .map(|values| {
                std::thread::sleep(Duration::from_millis(50));
                values[0].clone()
            })
            .build();
        let root = Node::builder()
            .dependency(&slow)
            .dependency(Node::leaf("fast"))
            .dependency(json!("literal"))
            .execution(Execution::Concurrent)
            .build();

        assert_eq!(
            root.evaluate_async().await.unwrap(),
            json!(["slow", "fast", "literal"])
        );
    }

    #[tokio::test]
    async fn async_cache_and_min_cost() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Node::cache(counting(json!(3), 7.0, &calls));
        let branch = Node::builder()
            .dependency(&cache)
            .dependency(Node::builder().cost(5.0).dependency(json!(99)).build())
            .select(Selection::MinCost)
            .execution(Execution::Concurrent)
            .build();

        // The cache costs 7 and loses to the constant branch.
        assert_eq!(branch.evaluate_async().await.unwrap(), json!(99));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(cache.evaluate_async().await.unwrap(), json!(3));
        // Paid: the cache now wins the selection.
        assert_eq!(branch.evaluate_async().await.unwrap(), json!(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_errors_propagate() {
        let root = Node::builder()
            .dependency(Producer::new(|| Err(GraphError::user("no data"))))
            .execution(Execution::Concurrent)
            .build();
        let err = root.evaluate_async().await.unwrap_err();
        assert_eq!(err.to_string(), "no data");
    }
}
