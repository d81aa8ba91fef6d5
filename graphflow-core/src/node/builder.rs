//! Node construction.

use std::sync::Arc;

use futures_util::stream::{Stream, StreamExt};

use super::{
    Dependency, Execution, Node, NodeDescriptor, ProcessCost, Selection, Source, Transform,
};
use crate::error::Result;
use crate::value::Value;

/// Builder for an immutable [`Node`].
///
/// ```rust
/// use graphflow_core::{Node, Value};
/// use serde_json::json;
///
/// let sum = Node::builder()
///     .name("sum")
///     .cost(3.0)
///     .dependencies([json!(1), json!(2)])
///     .map(|values| json!(values.iter().filter_map(Value::as_i64).sum::<i64>()))
///     .build();
///
/// assert_eq!(sum.evaluate().unwrap(), json!(3));
/// assert_eq!(sum.cost(), 3.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct NodeBuilder {
    desc: NodeDescriptor,
}

impl NodeBuilder {
    /// An empty builder: no dependencies, zero cost, flatten transform.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_descriptor(desc: NodeDescriptor) -> Self {
        Self { desc }
    }

    /// Display name used in logs and summaries.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.desc.name = Some(name.into());
        self
    }

    /// Append one dependency entry.
    pub fn dependency(mut self, dependency: impl Into<Dependency>) -> Self {
        self.desc.dependencies.push(dependency.into());
        self
    }

    /// Append several dependency entries, keeping their order.
    pub fn dependencies<I, D>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Dependency>,
    {
        self.desc
            .dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Static processing cost.
    pub fn cost(mut self, cost: f64) -> Self {
        self.desc.cost = ProcessCost::Static(cost);
        self
    }

    /// Processing cost computed each time it is queried.
    pub fn dynamic_cost<F>(mut self, cost: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.desc.cost = ProcessCost::Dynamic(Arc::new(cost));
        self
    }

    /// Fallible transform over the ordered dependency results.
    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.desc.transform = Transform::custom(transform);
        self
    }

    /// Infallible transform over the ordered dependency results.
    pub fn map<F>(self, transform: F) -> Self
    where
        F: Fn(Vec<Value>) -> Value + Send + Sync + 'static,
    {
        self.transform(move |values| Ok(transform(values)))
    }

    /// Dependency selection policy.
    pub fn select(mut self, selection: Selection) -> Self {
        self.desc.selection = selection;
        self
    }

    /// Execution policy.
    pub fn execution(mut self, execution: Execution) -> Self {
        self.desc.execution = execution;
        self
    }

    /// Cache the first evaluated result. The wrapped result is stored unchanged.
    pub fn memoize(mut self) -> Self {
        self.desc.memoize = true;
        if self.desc.transform.is_default() {
            self.desc.transform = Transform::Passthrough;
        }
        self
    }

    /// Turn the node into an input placeholder.
    pub fn input(mut self) -> Self {
        self.desc.input = true;
        self
    }

    /// Synchronous leaf sequence. The factory runs once per traversal.
    pub fn source_iter<F, I>(mut self, source: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        self.desc.source = Some(Source::Iter(Arc::new(move || {
            Box::new(source().into_iter())
        })));
        self
    }

    /// Asynchronous leaf sequence. The factory runs once per traversal.
    pub fn source_stream<F, S>(mut self, source: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = Value> + Send + 'static,
    {
        self.desc.source = Some(Source::Stream(Arc::new(move || source().boxed())));
        self
    }

    /// Finish the node.
    pub fn build(mut self) -> Node {
        // A sequence source only makes sense on a streaming node.
        if self.desc.source.is_some() && !self.desc.execution.is_streaming() {
            self.desc.execution = Execution::Streaming;
        }
        Node::from_descriptor(self.desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_defaults() {
        let node = NodeBuilder::new().build();
        assert_eq!(node.name(), None);
        assert_eq!(node.process_cost(), 0.0);
        assert!(node.transform().is_default());
        assert_eq!(node.selection(), Selection::All);
        assert_eq!(node.execution(), Execution::Direct);
        assert!(node.dependencies().is_empty());
    }

    #[test]
    fn dependencies_keep_declared_order() {
        let node = Node::builder()
            .dependency(json!("a"))
            .dependencies([json!("b"), json!("c")])
            .build();
        assert_eq!(node.evaluate().unwrap(), json!(["a", "b", "c"]));
    }

    #[test]
    fn sources_force_streaming() {
        let node = Node::builder().source_iter(|| vec![json!(1)]).build();
        assert_eq!(node.execution(), Execution::Streaming);

        let isolated = Node::builder()
            .execution(Execution::Isolated)
            .source_iter(|| vec![json!(1)])
            .build();
        assert_eq!(isolated.execution(), Execution::Isolated);
    }

    #[test]
    fn memoize_keeps_custom_transform() {
        let node = Node::builder()
            .dependency(json!(2))
            .map(|values| json!(values[0].as_i64().unwrap_or(0) * 10))
            .memoize()
            .build();
        assert_eq!(node.evaluate().unwrap(), json!(20));
        assert!(node.is_cached());
    }
}
