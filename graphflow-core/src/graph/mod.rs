//! Graph Composition
//!
//! A [`Graph`] names a callable unit over an existing node graph: a list of
//! input placeholders and an output node. Invoking it binds the positional
//! arguments to the inputs and evaluates the output. The graph references
//! the nodes; nothing is copied.
//!
//! # Binding
//!
//! - One input: every argument is bound to it, so the input evaluates to the
//!   argument collection (or the single argument when only one is given).
//! - Several inputs: argument `i` is bound to input `i`; the counts must match.
//!
//! Inputs are shared slots, so invocations of the same graph must not overlap.

mod summary;

use futures_util::future::{self, BoxFuture, FutureExt};
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::node::Node;
use crate::value::Value;

pub use summary::render_tree;

/// A named, callable view of a node graph.
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    inputs: Vec<Node>,
    output: Node,
}

impl Graph {
    /// Compose a graph. Every node in `inputs` must be an input placeholder.
    ///
    /// ```rust
    /// use graphflow_core::{Graph, Node};
    /// use serde_json::json;
    ///
    /// let input = Node::input();
    /// let total = Node::builder()
    ///     .dependency(&input)
    ///     .map(|values| {
    ///         let items = values[0].as_array().cloned().unwrap_or_default();
    ///         json!(items.iter().filter_map(|v| v.as_i64()).sum::<i64>())
    ///     })
    ///     .build();
    ///
    /// let graph = Graph::new("sum", [input], total).unwrap();
    /// assert_eq!(graph.invoke([1, 2, 3]).unwrap(), json!(6));
    /// ```
    pub fn new<I>(name: impl Into<String>, inputs: I, output: Node) -> Result<Self>
    where
        I: IntoIterator<Item = Node>,
    {
        let inputs: Vec<Node> = inputs.into_iter().collect();
        if let Some(node) = inputs.iter().find(|node| !node.is_input()) {
            return Err(GraphError::NotAnInput { node: node.label() });
        }
        Ok(Self {
            name: name.into(),
            inputs,
            output,
        })
    }

    /// Graph name, used as the root label of the summary.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Input placeholders in binding order.
    pub fn inputs(&self) -> &[Node] {
        &self.inputs
    }

    /// The node evaluated by [`Graph::invoke`].
    pub fn output(&self) -> &Node {
        &self.output
    }

    /// Bind the arguments and evaluate the output synchronously.
    pub fn invoke<I, V>(&self, args: I) -> Result<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.bind(args.into_iter().map(Into::into).collect())?;
        self.output.evaluate()
    }

    /// Bind the arguments now and evaluate the output asynchronously.
    pub fn invoke_async<I, V>(&self, args: I) -> BoxFuture<'static, Result<Value>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        match self.bind(args.into_iter().map(Into::into).collect()) {
            Ok(()) => self.output.evaluate_async(),
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }

    /// Indented tree of the output node's dependencies.
    pub fn summary(&self, include_costs: bool) -> String {
        render_tree(&self.output, include_costs)
    }

    fn bind(&self, args: Vec<Value>) -> Result<()> {
        debug!(graph = %self.name, args = args.len(), inputs = self.inputs.len(), "invoking graph");
        match self.inputs.as_slice() {
            [single] => single.bind(args),
            inputs if inputs.len() == args.len() => {
                for (input, arg) in inputs.iter().zip(args) {
                    input.bind(vec![arg])?;
                }
                Ok(())
            }
            inputs => Err(GraphError::ArityMismatch {
                graph: self.name.clone(),
                expected: inputs.len(),
                got: args.len(),
            }),
        }
    }
}
