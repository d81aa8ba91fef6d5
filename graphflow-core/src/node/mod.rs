//! Graph Nodes
//!
//! A [`Node`] is the single evaluable unit of the engine. It owns an ordered
//! list of dependency entries, an intrinsic processing cost and a transform
//! that maps the resolved dependency results to the node's output.
//!
//! # Policies
//!
//! Instead of one node type per behaviour, every node carries two independent
//! policies chosen at construction:
//!
//! - [`Selection`]: which dependencies are resolved. `All` resolves every
//!   entry; `MinCost` resolves only the cheapest one (branch selection).
//! - [`Execution`]: how they are resolved. `Direct` is synchronous,
//!   `Concurrent` spawns one task per dependency, `Streaming` turns the node
//!   into a lazy sequence with broadcast fan-out, and `Isolated` runs the
//!   broadcast loop on a dedicated worker thread.
//!
//! Memoization (the cache decorator) is a flag on top of either policy.
//!
//! # Ownership
//!
//! Nodes are cheap handles around an `Arc`. Dependencies are referenced, never
//! owned exclusively, so the same node may feed many parents. A node's memo
//! slot, input slot, subscriber queues and worker handle belong to that node
//! alone. Since dependency lists are fixed once a node is built, a cycle
//! cannot be formed through this API.

mod builder;
mod compose;
mod cost;
mod eval;
mod memo;
mod traverse;

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::BoxStream;
use parking_lot::RwLock;

use crate::error::{GraphError, Result};
use crate::stream::broadcast::Broadcaster;
use crate::stream::worker::WorkerSlot;
use crate::value::{self, Value};

pub use builder::NodeBuilder;
pub use traverse::Traverse;

use memo::MemoSlot;

/// Unique identifier for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// A zero-argument function producing a dependency value on demand.
#[derive(Clone)]
pub struct Producer(Arc<dyn Fn() -> Result<Value> + Send + Sync>);

impl Producer {
    /// Wrap a zero-argument function.
    pub fn new<F>(produce: F) -> Self
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(produce))
    }

    /// Invoke the producer.
    pub fn call(&self) -> Result<Value> {
        (self.0)()
    }
}

impl Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Producer(..)")
    }
}

/// One entry of a node's dependency list.
#[derive(Debug, Clone)]
pub enum Dependency {
    /// Another node, evaluated with the active strategy.
    Node(Node),
    /// A literal, used as-is.
    Value(Value),
    /// A zero-argument producer, invoked at resolution time.
    Producer(Producer),
}

impl Dependency {
    /// The node behind this entry, if it is one.
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Dependency::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Cost contributed by this entry. Only node entries have a cost.
    pub(crate) fn cost(&self) -> f64 {
        self.as_node().map_or(0.0, Node::cost)
    }

    /// Box literals and producers into leaf nodes.
    pub(crate) fn into_node(self) -> Node {
        match self {
            Dependency::Node(node) => node,
            other => Node::builder().dependency(other).build(),
        }
    }
}

impl From<Node> for Dependency {
    fn from(node: Node) -> Self {
        Dependency::Node(node)
    }
}

impl From<&Node> for Dependency {
    fn from(node: &Node) -> Self {
        Dependency::Node(node.clone())
    }
}

impl From<Value> for Dependency {
    fn from(value: Value) -> Self {
        Dependency::Value(value)
    }
}

impl From<Producer> for Dependency {
    fn from(producer: Producer) -> Self {
        Dependency::Producer(producer)
    }
}

/// Intrinsic processing cost of a node.
#[derive(Clone)]
pub enum ProcessCost {
    Static(f64),
    /// Evaluated each time the cost is queried.
    Dynamic(Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl ProcessCost {
    /// Current cost. Dynamic costs are recomputed on every call.
    pub fn value(&self) -> f64 {
        match self {
            ProcessCost::Static(cost) => *cost,
            ProcessCost::Dynamic(cost) => cost(),
        }
    }
}

impl Default for ProcessCost {
    fn default() -> Self {
        ProcessCost::Static(0.0)
    }
}

impl From<f64> for ProcessCost {
    fn from(cost: f64) -> Self {
        ProcessCost::Static(cost)
    }
}

impl Debug for ProcessCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessCost::Static(cost) => write!(f, "Static({})", cost),
            ProcessCost::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

pub(crate) type TransformFn = dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync;

/// Maps the ordered dependency results to the node output.
#[derive(Clone, Default)]
pub enum Transform {
    /// Drop nulls, unwrap a single survivor (see [`value::flatten`]).
    #[default]
    Flatten,
    /// Return the single dependency result unchanged.
    Passthrough,
    Custom(Arc<TransformFn>),
}

impl Transform {
    /// A user-supplied transform.
    pub fn custom<F>(transform: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Transform::Custom(Arc::new(transform))
    }

    /// Apply the transform to the ordered dependency results.
    pub fn apply(&self, values: Vec<Value>) -> Result<Value> {
        match self {
            Transform::Flatten => Ok(value::flatten(values)),
            Transform::Passthrough => Ok(value::passthrough(values)),
            Transform::Custom(transform) => transform(values),
        }
    }

    /// Whether this is the default flatten transform.
    pub fn is_default(&self) -> bool {
        matches!(self, Transform::Flatten)
    }
}

impl Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Flatten => f.write_str("Flatten"),
            Transform::Passthrough => f.write_str("Passthrough"),
            Transform::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Leaf sequence of a streaming node.
#[derive(Clone)]
pub enum Source {
    /// Synchronous lazy sequence; usable from both iteration and broadcast.
    Iter(Arc<dyn Fn() -> Box<dyn Iterator<Item = Value> + Send> + Send + Sync>),
    /// Asynchronous sequence; usable from broadcast only.
    Stream(Arc<dyn Fn() -> BoxStream<'static, Value> + Send + Sync>),
}

impl Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Iter(_) => f.write_str("Iter(..)"),
            Source::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Which dependencies a node resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    All,
    /// Only the dependency with the lowest cost (lowest index on ties).
    MinCost,
}

/// How a node resolves its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    #[default]
    Direct,
    Concurrent,
    Streaming,
    Isolated,
}

impl Execution {
    /// Streaming and isolated nodes produce sequences rather than single values.
    pub fn is_streaming(self) -> bool {
        matches!(self, Execution::Streaming | Execution::Isolated)
    }
}

/// Immutable construction-time description of a node.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeDescriptor {
    pub(crate) name: Option<String>,
    pub(crate) dependencies: Vec<Dependency>,
    pub(crate) cost: ProcessCost,
    pub(crate) transform: Transform,
    pub(crate) selection: Selection,
    pub(crate) execution: Execution,
    pub(crate) memoize: bool,
    pub(crate) source: Option<Source>,
    pub(crate) input: bool,
}

struct NodeInner {
    id: NodeId,
    desc: NodeDescriptor,
    memo: MemoSlot,
    bound: RwLock<Vec<Value>>,
    broadcast: Broadcaster,
    worker: WorkerSlot,
}

impl Drop for NodeInner {
    // Unlink exclusively owned dependencies with a worklist so that dropping
    // a very deep chain does not recurse once per level.
    fn drop(&mut self) {
        let mut pending: Vec<Node> = std::mem::take(&mut self.desc.dependencies)
            .into_iter()
            .filter_map(|entry| match entry {
                Dependency::Node(node) => Some(node),
                _ => None,
            })
            .collect();
        while let Some(node) = pending.pop() {
            if let Ok(mut inner) = Arc::try_unwrap(node.inner) {
                pending.extend(
                    std::mem::take(&mut inner.desc.dependencies)
                        .into_iter()
                        .filter_map(|entry| match entry {
                            Dependency::Node(node) => Some(node),
                            _ => None,
                        }),
                );
            }
        }
    }
}

/// Handle to a node of the computation graph.
///
/// Cloning the handle shares the node (and its memo slot and subscribers).
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    pub(crate) fn from_descriptor(desc: NodeDescriptor) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                id: NodeId::new(),
                desc,
                memo: MemoSlot::new(),
                bound: RwLock::new(Vec::new()),
                broadcast: Broadcaster::new(),
                worker: WorkerSlot::new(),
            }),
        }
    }

    /// Start describing a new node.
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    /// A leaf holding a literal value.
    pub fn leaf(value: impl Into<Value>) -> Self {
        Self::builder().dependency(Dependency::Value(value.into())).build()
    }

    /// An input placeholder whose values are bound at graph invocation.
    pub fn input() -> Self {
        Self::builder().input().build()
    }

    /// A memoizing node wrapping exactly one dependency.
    pub fn cache(dependency: impl Into<Dependency>) -> Self {
        Self::builder().dependency(dependency).memoize().build()
    }

    /// A branch node evaluating only its cheapest dependency.
    pub fn min_cost<I, D>(dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Dependency>,
    {
        Self::builder()
            .dependencies(dependencies)
            .select(Selection::MinCost)
            .build()
    }

    /// Unique id of this node instance.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Display name, if one was given.
    pub fn name(&self) -> Option<&str> {
        self.inner.desc.name.as_deref()
    }

    /// Name, or a generated label for anonymous nodes.
    pub fn label(&self) -> String {
        match &self.inner.desc.name {
            Some(name) => name.clone(),
            None => format!("node-{}", self.inner.id.raw()),
        }
    }

    /// Which dependencies are resolved.
    pub fn selection(&self) -> Selection {
        self.inner.desc.selection
    }

    /// How the selected dependencies are resolved.
    pub fn execution(&self) -> Execution {
        self.inner.desc.execution
    }

    /// The function applied to the ordered dependency results.
    pub fn transform(&self) -> &Transform {
        &self.inner.desc.transform
    }

    /// Whether this node is an input placeholder.
    pub fn is_input(&self) -> bool {
        self.inner.desc.input
    }

    /// Whether this node caches its first result.
    pub fn is_memoized(&self) -> bool {
        self.inner.desc.memoize
    }

    /// Whether the memo slot has been filled.
    pub fn is_cached(&self) -> bool {
        self.inner.memo.is_filled()
    }

    /// Whether evaluation of this node yields a sequence.
    pub fn is_streaming(&self) -> bool {
        self.inner.desc.execution.is_streaming() || self.inner.desc.source.is_some()
    }

    /// The node's dependency entries in declared order.
    ///
    /// For an input placeholder these are the currently bound values.
    pub fn dependencies(&self) -> Vec<Dependency> {
        if self.inner.desc.input {
            return self
                .inner
                .bound
                .read()
                .iter()
                .cloned()
                .map(Dependency::Value)
                .collect();
        }
        self.inner.desc.dependencies.clone()
    }

    /// Bind values to an input placeholder, replacing any previous binding.
    pub fn bind(&self, values: Vec<Value>) -> Result<()> {
        if !self.inner.desc.input {
            return Err(GraphError::NotAnInput { node: self.label() });
        }
        tracing::trace!(node = %self.label(), count = values.len(), "bound input values");
        *self.inner.bound.write() = values;
        Ok(())
    }

    /// Whether both handles refer to the same node.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn descriptor(&self) -> &NodeDescriptor {
        &self.inner.desc
    }

    pub(crate) fn source(&self) -> Option<&Source> {
        self.inner.desc.source.as_ref()
    }

    pub(crate) fn memo(&self) -> &MemoSlot {
        &self.inner.memo
    }

    pub(crate) fn broadcaster(&self) -> &Broadcaster {
        &self.inner.broadcast
    }

    pub(crate) fn worker(&self) -> &WorkerSlot {
        &self.inner.worker
    }

    /// Apply the transform without touching the memo slot.
    pub(crate) fn apply_transform(&self, values: Vec<Value>) -> Result<Value> {
        tracing::trace!(node = %self.label(), inputs = values.len(), "post-process");
        self.inner.desc.transform.apply(values)
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("name", &self.inner.desc.name)
            .field("selection", &self.inner.desc.selection)
            .field("execution", &self.inner.desc.execution)
            .field("dependency_count", &self.inner.desc.dependencies.len())
            .field("cached", &self.is_cached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn label_falls_back_to_id() {
        let named = Node::builder().name("sum").build();
        let anonymous = Node::leaf(1);
        assert_eq!(named.label(), "sum");
        assert_eq!(anonymous.name(), None);
        assert_eq!(anonymous.label(), format!("node-{}", anonymous.id().raw()));
    }

    #[test]
    fn clones_share_the_node() {
        let node = Node::leaf(1);
        let copy = node.clone();
        assert!(node.ptr_eq(&copy));
        assert!(!node.ptr_eq(&Node::leaf(1)));
    }

    #[test]
    fn binding_requires_an_input() {
        let input = Node::input();
        input.bind(vec![json!(1), json!(2)]).unwrap();
        assert_eq!(input.dependencies().len(), 2);

        let leaf = Node::leaf(1);
        let err = leaf.bind(vec![json!(3)]).unwrap_err();
        assert!(matches!(err, GraphError::NotAnInput { .. }));
    }

    #[test]
    fn literal_dependencies_box_into_leaves() {
        let node = Dependency::from(json!(5)).into_node();
        assert_eq!(node.evaluate().unwrap(), json!(5));
    }

    #[test]
    fn dynamic_cost_is_queried_each_time() {
        use std::sync::atomic::AtomicUsize;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cost = ProcessCost::Dynamic(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst) as f64
        }));

        assert_eq!(cost.value(), 0.0);
        assert_eq!(cost.value(), 1.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
