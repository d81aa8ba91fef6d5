//! Graphflow Core
//!
//! This crate provides a lazy computation-graph engine. Programs are built as
//! directed acyclic graphs of [`Node`]s; each node declares dependencies, an
//! intrinsic cost and a transform. Evaluation is pull-based: asking a node
//! for its value resolves its dependencies first. It implements:
//!
//! - Cost-aware evaluation (aggregate costs, cheapest-branch selection)
//! - Memoization of expensive subtrees
//! - Concurrent fan-out of independent dependencies on tokio
//! - Streaming with single-traversal broadcast to many consumers
//! - Graph composition with positional inputs
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `node`: the node type, its policies, cost model and evaluation
//! - `stream`: lazy sequences, combine-latest broadcast, isolated workers
//! - `graph`: callable graphs and the diagnostic tree printout
//! - `config`: worker options
//!
//! # Example
//!
//! ```rust
//! use graphflow_core::{Node, Value};
//! use serde_json::json;
//!
//! fn sum(values: Vec<Value>) -> Value {
//!     json!(values.iter().filter_map(Value::as_i64).sum::<i64>())
//! }
//!
//! // Two alternative ways of obtaining the same number.
//! let slow = Node::builder().name("slow").cost(10.0).dependency(json!(2)).build();
//! let fast = Node::builder().name("fast").cost(1.0).dependency(json!(2)).build();
//! let branch = Node::min_cost([slow, fast]);
//!
//! let total = Node::builder()
//!     .dependency(&branch)
//!     .dependency(json!(3))
//!     .map(sum)
//!     .build();
//!
//! assert_eq!(total.cost(), 1.0);
//! assert_eq!(total.evaluate().unwrap(), json!(5));
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod node;
pub mod stream;
pub mod value;

pub use config::WorkerOptions;
pub use error::{BoxError, GraphError, Result};
pub use graph::{render_tree, Graph};
pub use node::{
    Dependency, Execution, Node, NodeBuilder, NodeId, ProcessCost, Producer, Selection, Source,
    Transform, Traverse,
};
pub use stream::{Attachment, NodeIter, NodeStream, Role, StreamState, SubscriberId};
pub use value::{flatten, Value};
