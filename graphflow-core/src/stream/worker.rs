//! Isolated Stream Workers
//!
//! An isolated node is driven on a dedicated OS thread with its own
//! single-threaded tokio runtime, so a CPU-heavy transform never stalls the
//! caller's executor. The worker is the node's only driver; consumers attach
//! as subscribers before or while it runs.
//!
//! Workers are threads, not processes. Transforms are in-process closures, so
//! subscriber queues are plain channels and a worker shares the caller's
//! address space. A worker panic is caught and reported by [`Node::join`],
//! but a crash that takes down the process (abort, stack overflow) is not
//! contained.

use std::panic::resume_unwind;
use std::thread::{self, JoinHandle};

use futures_util::stream::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::WorkerOptions;
use crate::error::{GraphError, Result};
use crate::node::{Execution, Node};

/// Handle of a node's running worker thread.
pub(crate) struct WorkerSlot {
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl WorkerSlot {
    pub(crate) fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }
}

/// Releases the broadcaster when the worker exits, even by panic.
struct ReleaseOnExit(Node);

impl Drop for ReleaseOnExit {
    fn drop(&mut self) {
        self.0.broadcaster().release();
    }
}

impl Node {
    /// Launch the worker of an isolated node with default options.
    pub fn start(&self) -> Result<()> {
        self.start_with(&WorkerOptions::default())
    }

    /// Launch the worker of an isolated node.
    ///
    /// Does nothing if a worker is already running or the node is not
    /// isolated.
    pub fn start_with(&self, options: &WorkerOptions) -> Result<()> {
        if self.execution() != Execution::Isolated {
            debug!(node = %self.label(), "start ignored: node is not isolated");
            return Ok(());
        }

        let mut slot = self.worker().handle.lock();
        if slot.is_some() {
            debug!(node = %self.label(), "worker already started");
            return Ok(());
        }

        let mut builder = thread::Builder::new().name(options.thread_name(&self.label()));
        if let Some(stack_size) = options.stack_size {
            builder = builder.stack_size(stack_size);
        }

        self.broadcaster().mark_driving();
        let node = self.clone();
        let spawned = builder.spawn(move || {
            let _release = ReleaseOnExit(node.clone());
            drive(&node)
        });
        match spawned {
            Ok(handle) => {
                info!(node = %self.label(), "stream worker started");
                *slot = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.broadcaster().release();
                Err(GraphError::WorkerSpawn(err))
            }
        }
    }

    /// Wait for the worker to finish and clear its handle.
    ///
    /// Returns immediately if no worker was started.
    pub async fn join(&self) -> Result<()> {
        let Some(handle) = self.worker().handle.lock().take() else {
            return Ok(());
        };

        let node = self.label();
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(result)) => {
                info!(node = %node, ok = result.is_ok(), "stream worker joined");
                result
            }
            Ok(Err(_)) => {
                warn!(node = %node, "stream worker panicked");
                Err(GraphError::WorkerPanicked { node })
            }
            Err(err) if err.is_panic() => resume_unwind(err.into_panic()),
            Err(_) => Err(GraphError::Cancelled { node }),
        }
    }

    /// Whether a started worker has not finished yet.
    pub fn is_running(&self) -> bool {
        self.worker()
            .handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

fn drive(node: &Node) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut upstream = node.upstream();
        let mut published = 0usize;
        while let Some(item) = upstream.next().await {
            let value = item?;
            if !value.is_null() {
                node.broadcaster().publish(&value);
                published += 1;
            }
        }
        debug!(node = %node.label(), published, "stream worker drained upstream");
        Ok::<(), GraphError>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{Role, StreamState};
    use crate::value::Value;
    use futures_util::stream::TryStreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn isolated_ticks(count: i64, traversals: &Arc<AtomicUsize>) -> Node {
        let traversals = traversals.clone();
        Node::builder()
            .name("ticks")
            .execution(Execution::Isolated)
            .source_iter(move || {
                traversals.fetch_add(1, Ordering::SeqCst);
                (1..=count).map(Value::from).collect::<Vec<_>>()
            })
            .build()
    }

    #[tokio::test]
    async fn worker_broadcasts_to_every_subscriber() {
        let traversals = Arc::new(AtomicUsize::new(0));
        let ticks = isolated_ticks(5, &traversals);

        let a = ticks.attach();
        assert!(matches!(a.role(), Some(Role::Subscriber(_))));
        let b = ticks.subscribe();

        ticks.start().unwrap();
        ticks.start().unwrap();

        let (a, b) = tokio::join!(a.try_collect::<Vec<_>>(), b.try_collect::<Vec<_>>());
        let expected: Vec<Value> = (1..=5).map(Value::from).collect();
        assert_eq!(a.unwrap(), expected);
        assert_eq!(b.unwrap(), expected);

        ticks.join().await.unwrap();
        assert!(!ticks.is_running());
        assert_eq!(traversals.load(Ordering::SeqCst), 1);
        assert_eq!(ticks.stream_state(), StreamState::Unattached);
    }

    #[tokio::test]
    async fn worker_drives_streaming_dependencies() {
        let source = Node::builder()
            .source_iter(|| (1..=3).map(Value::from).collect::<Vec<_>>())
            .build();
        let doubled = Node::builder()
            .dependency(&source)
            .execution(Execution::Isolated)
            .map(|values| json!(values[0].as_i64().unwrap_or(0) * 2))
            .build();

        let subscriber = doubled.subscribe();
        doubled
            .start_with(&WorkerOptions {
                thread_name_prefix: "doubler".to_string(),
                stack_size: Some(256 * 1024),
            })
            .unwrap();

        let seen: Vec<Value> = subscriber.try_collect().await.unwrap();
        assert_eq!(seen, vec![json!(2), json!(4), json!(6)]);
        doubled.join().await.unwrap();
    }

    #[tokio::test]
    async fn worker_errors_surface_on_join() {
        let failing = Node::builder()
            .dependency(Node::builder().source_iter(|| vec![json!(1)]).build())
            .execution(Execution::Isolated)
            .transform(|_| Err(GraphError::user("sensor offline")))
            .build();

        let subscriber = failing.subscribe();
        failing.start().unwrap();
        let seen: Vec<Value> = subscriber.try_collect().await.unwrap();
        assert!(seen.is_empty());

        let err = failing.join().await.unwrap_err();
        assert_eq!(err.to_string(), "sensor offline");
    }

    #[tokio::test]
    async fn worker_panics_are_reported() {
        let panicking = Node::builder()
            .name("fragile")
            .execution(Execution::Isolated)
            .source_iter(|| -> Vec<Value> { panic!("source exploded") })
            .build();

        let subscriber = panicking.subscribe();
        panicking.start().unwrap();
        let seen: Vec<Value> = subscriber.try_collect().await.unwrap();
        assert!(seen.is_empty());

        let err = panicking.join().await.unwrap_err();
        assert!(matches!(err, GraphError::WorkerPanicked { node } if node == "fragile"));
    }

    #[tokio::test]
    async fn start_and_join_ignore_other_nodes() {
        let node = Node::builder()
            .source_iter(|| vec![json!(1)])
            .build();
        node.start().unwrap();
        assert!(!node.is_running());
        node.join().await.unwrap();
        assert_eq!(node.stream_state(), StreamState::Unattached);
    }

    #[tokio::test]
    async fn worker_can_be_restarted_after_join() {
        let traversals = Arc::new(AtomicUsize::new(0));
        let ticks = isolated_ticks(2, &traversals);

        for _ in 0..2 {
            let subscriber = ticks.subscribe();
            ticks.start().unwrap();
            let seen: Vec<Value> = subscriber.try_collect().await.unwrap();
            assert_eq!(seen, vec![json!(1), json!(2)]);
            ticks.join().await.unwrap();
        }
        assert_eq!(traversals.load(Ordering::SeqCst), 2);
    }
}
