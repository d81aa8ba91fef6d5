//! Streaming
//!
//! Streaming nodes produce sequences instead of single values. There are two
//! ways to consume them:
//!
//! - [`Node::iter`] pulls synchronously, zipping dependency sequences in
//!   lock step (exhausted ones are padded with `Null`).
//! - [`Node::subscribe`] returns an asynchronous stream. The first consumer to pull
//!   drives a combine-latest merge of the dependencies; consumers pulling later are
//!   fed from the driver through per-subscriber queues.
//!
//! Isolated nodes are driven by a worker thread started with [`Node::start`].

pub(crate) mod broadcast;
mod merge;
mod sync;
pub(crate) mod worker;

use futures_util::stream::BoxStream;

use crate::error::Result;
use crate::value::Value;

pub use broadcast::{Attachment, Role, StreamState, SubscriberId};
pub use sync::NodeIter;

/// Asynchronous sequence of node results.
pub type NodeStream = BoxStream<'static, Result<Value>>;
