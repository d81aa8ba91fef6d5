//! Synchronous Streaming
//!
//! [`Node::iter`] turns a node into a lazy sequence. A streaming node pulls
//! one item from each dependency sequence per round, pads exhausted ones
//! with `Null` (zip-longest) and yields the transform of each round. The
//! sequence ends when every dependency is exhausted. Calling `iter` again
//! starts a fresh traversal; a finished sequence is never rewound.

use std::iter;

use crate::error::{GraphError, Result};
use crate::node::{Dependency, Node, Source};
use crate::value::Value;

/// Lazy sequence of node results.
pub type NodeIter = Box<dyn Iterator<Item = Result<Value>> + Send>;

impl Node {
    /// Start the node's synchronous sequence.
    ///
    /// Non-streaming nodes yield their single evaluated result.
    pub fn iter(&self) -> Result<NodeIter> {
        if let Some(cached) = self.cached() {
            return Ok(Box::new(iter::once(Ok(cached))));
        }
        if !self.is_streaming() {
            let node = self.clone();
            return Ok(Box::new(iter::once_with(move || node.evaluate())));
        }

        match self.source() {
            Some(Source::Iter(source)) => {
                let node = self.clone();
                Ok(Box::new(source().map(move |item| node.transform_item(item))))
            }
            Some(Source::Stream(_)) => Err(GraphError::SyncIterationUnsupported { node: self.label() }),
            None => {
                let inputs = self
                    .selected_dependencies()
                    .into_iter()
                    .map(dependency_iter)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(ZipLongest {
                    node: self.clone(),
                    inputs: inputs.into_iter().map(Some).collect(),
                    failed: false,
                }))
            }
        }
    }

    /// Apply a custom transform to a single source item.
    pub(crate) fn transform_item(&self, item: Value) -> Result<Value> {
        if self.transform().is_default() {
            Ok(item)
        } else {
            self.apply_transform(vec![item])
        }
    }
}

fn dependency_iter(dependency: Dependency) -> Result<NodeIter> {
    match dependency {
        Dependency::Node(node) => node.iter(),
        Dependency::Value(value) => Ok(Box::new(iter::once(Ok(value)))),
        Dependency::Producer(producer) => Ok(Box::new(iter::once_with(move || producer.call()))),
    }
}

struct ZipLongest {
    node: Node,
    inputs: Vec<Option<NodeIter>>,
    failed: bool,
}

impl Iterator for ZipLongest {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Result<Value>> {
        if self.failed {
            return None;
        }

        let mut row = Vec::with_capacity(self.inputs.len());
        let mut live = false;
        for slot in &mut self.inputs {
            match slot.as_mut().and_then(Iterator::next) {
                Some(Ok(value)) => {
                    live = true;
                    row.push(value);
                }
                Some(Err(err)) => {
                    self.failed = true;
                    return Some(Err(err));
                }
                None => {
                    *slot = None;
                    row.push(Value::Null);
                }
            }
        }

        if !live {
            return None;
        }
        let output = self.node.apply_transform(row);
        self.failed = output.is_err();
        Some(output)
    }
}
