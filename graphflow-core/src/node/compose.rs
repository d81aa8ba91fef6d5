//! Composition Operators
//!
//! Graphs are built by deriving new nodes from existing ones. None of these
//! operators mutate their operands; each returns a fresh node that references
//! the operands as dependencies. Literal values and producers passed as
//! operands are boxed into leaf nodes first.

use std::sync::Arc;

use super::{Dependency, Node, NodeBuilder, ProcessCost, Selection};
use crate::error::Result;
use crate::value::Value;

impl Node {
    /// Whether the node has been specialized beyond a plain dependency list.
    ///
    /// A specialized left operand of [`Node::combine`] is kept as a single
    /// dependency instead of having its dependency list merged.
    pub fn is_specialized(&self) -> bool {
        let desc = self.descriptor();
        !desc.transform.is_default()
            || self.process_cost() != 0.0
            || desc.selection != Selection::All
            || desc.memoize
            || desc.source.is_some()
            || desc.input
    }

    /// Combine this node with another operand into a new node.
    ///
    /// A plain node (default transform, zero cost) has its dependency list
    /// merged with the operand. A specialized node is boxed instead: the
    /// result depends on `[self, other]`. The result keeps this node's
    /// execution policy and no name.
    ///
    /// ```rust
    /// use graphflow_core::Node;
    /// use serde_json::json;
    ///
    /// let pair = Node::leaf(1).combine(Node::leaf(2));
    /// assert_eq!(pair.evaluate().unwrap(), json!([1, 2]));
    /// assert_eq!(pair.dependencies().len(), 2);
    /// ```
    pub fn combine(&self, other: impl Into<Dependency>) -> Node {
        let other = other.into().into_node();
        let builder = Node::builder().execution(self.execution());
        if self.is_specialized() {
            builder.dependency(self).dependency(other).build()
        } else {
            builder
                .dependencies(self.dependencies())
                .dependency(other)
                .build()
        }
    }

    /// Feed this node's result into a function.
    pub fn pipe<F>(&self, f: F) -> Node
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Node::builder()
            .execution(self.execution())
            .dependency(self)
            .transform(move |values| f(values.into_iter().next().unwrap_or(Value::Null)))
            .build()
    }

    /// Feed this node into a copy of `target`, appended to its dependency list.
    ///
    /// The copy keeps the target's name, cost, transform and policies but has
    /// fresh runtime state (empty memo slot, no subscribers). Piping into an
    /// input placeholder yields a regular node.
    pub fn pipe_into(&self, target: &Node) -> Node {
        let mut desc = target.descriptor().clone();
        desc.input = false;
        NodeBuilder::from_descriptor(desc).dependency(self).build()
    }

    /// A copy of this node under a new name.
    pub fn rename(&self, name: impl Into<String>) -> Node {
        NodeBuilder::from_descriptor(self.descriptor().clone())
            .name(name)
            .build()
    }

    /// A copy of this node with a static processing cost.
    pub fn with_cost(&self, cost: f64) -> Node {
        self.with_process_cost(ProcessCost::Static(cost))
    }

    /// A copy of this node whose processing cost is computed on demand.
    pub fn with_dynamic_cost<F>(&self, cost: F) -> Node
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.with_process_cost(ProcessCost::Dynamic(Arc::new(cost)))
    }

    fn with_process_cost(&self, cost: ProcessCost) -> Node {
        let mut desc = self.descriptor().clone();
        desc.cost = cost;
        Node::from_descriptor(desc)
    }
}
