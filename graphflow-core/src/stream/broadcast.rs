//! Broadcast Fan-out
//!
//! A streaming node traverses its upstream once no matter how many consumers
//! attach. Consumers are lazy: nothing is decided when one is created. The
//! first consumer to *pull* becomes the *driver*: it builds the
//! combine-latest merge of the node's dependencies, applies the transform and
//! hands every non-null output to the subscriber queues before yielding it.
//! A consumer that first pulls while the node is being driven becomes a
//! *subscriber* and reads from its own queue, starting with the next value
//! the driver publishes.
//!
//! # State
//!
//! ```text
//! Unattached --first pull--> Driving { subscribers: n }
//!     ^                            |
//!     +---- driver ends/drops -----+
//! ```
//!
//! The role decision and the queue registration happen under one lock, so
//! two concurrent first pulls cannot both become the driver. When the driver
//! finishes, all queues are closed and the node may be driven again.
//!
//! # Isolated nodes
//!
//! The driver of an isolated node is its worker thread (see
//! [`Node::start`]). Every consumer of an isolated node is a subscriber, and
//! its queue is registered when the consumer is created so that nothing the
//! worker publishes afterwards is missed.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures_util::future;
use futures_util::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::merge::CombineLatest;
use super::NodeStream;
use crate::node::{Dependency, Execution, Node, Source};
use crate::value::Value;

/// Unique identifier for a subscriber queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Role a consumer takes on, see [`Attachment::role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The node does not stream; the consumer receives its single result.
    Direct,
    /// The consumer pulls upstream and feeds the subscribers.
    Driver,
    /// The consumer reads broadcast values from its own queue.
    Subscriber(SubscriberId),
}

/// Broadcast state of a streaming node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unattached,
    Driving { subscribers: usize },
}

struct Subscriber {
    id: SubscriberId,
    sender: UnboundedSender<Value>,
}

#[derive(Default)]
struct State {
    driving: bool,
    subscribers: Vec<Subscriber>,
}

pub(crate) enum Claim {
    Driver,
    Subscriber(SubscriberId, UnboundedReceiver<Value>),
}

/// Per-node fan-out of driven values to subscriber queues.
pub(crate) struct Broadcaster {
    state: Mutex<State>,
}

impl Broadcaster {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Claim the driver role, or register a subscriber queue if the node is
    /// already being driven.
    pub(crate) fn claim(&self) -> Claim {
        let mut state = self.state.lock();
        if state.driving {
            let (id, receiver) = Self::register_locked(&mut state);
            Claim::Subscriber(id, receiver)
        } else {
            state.driving = true;
            Claim::Driver
        }
    }

    /// Register a subscriber queue regardless of driver state.
    pub(crate) fn register(&self) -> (SubscriberId, UnboundedReceiver<Value>) {
        Self::register_locked(&mut self.state.lock())
    }

    fn register_locked(state: &mut State) -> (SubscriberId, UnboundedReceiver<Value>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = SubscriberId::new();
        state.subscribers.push(Subscriber { id, sender });
        tracing::debug!(subscriber = ?id, total = state.subscribers.len(), "subscriber registered");
        (id, receiver)
    }

    /// Mark the node as driven by a worker.
    pub(crate) fn mark_driving(&self) {
        self.state.lock().driving = true;
    }

    /// Push a value to every live queue. Queues whose receiver is gone are dropped.
    pub(crate) fn publish(&self, value: &Value) {
        let mut state = self.state.lock();
        tracing::trace!(subscribers = state.subscribers.len(), "publish");
        state.subscribers.retain(|subscriber| {
            let delivered = subscriber.sender.send(value.clone()).is_ok();
            if !delivered {
                tracing::trace!(subscriber = ?subscriber.id, "dropping closed subscriber");
            }
            delivered
        });
    }

    /// Close every queue and return to the unattached state.
    pub(crate) fn release(&self) {
        let mut state = self.state.lock();
        let closed = state.subscribers.len();
        state.driving = false;
        state.subscribers.clear();
        tracing::debug!(subscribers = closed, "driver released");
    }

    pub(crate) fn state(&self) -> StreamState {
        let state = self.state.lock();
        if state.driving {
            StreamState::Driving {
                subscribers: state.subscribers.len(),
            }
        } else {
            StreamState::Unattached
        }
    }
}

impl Node {
    /// Subscribe to the node's asynchronous sequence.
    ///
    /// Shorthand for [`Node::attach`] when the role does not matter.
    pub fn subscribe(&self) -> NodeStream {
        self.attach().boxed()
    }

    /// Create a consumer of the node's asynchronous sequence.
    ///
    /// The consumer's [`Role`] is decided on its first poll, see
    /// [`Attachment::role`]. Isolated and non-streaming nodes assign it
    /// immediately.
    pub fn attach(&self) -> Attachment {
        if let Some(cached) = self.cached() {
            let once = stream::once(future::ready(Ok(cached))).boxed();
            return Attachment::connected(self, Role::Direct, once);
        }
        if !self.is_streaming() {
            let once = stream::once(self.evaluate_async()).boxed();
            return Attachment::connected(self, Role::Direct, once);
        }
        if self.execution() == Execution::Isolated {
            let (id, receiver) = self.broadcaster().register();
            return Attachment::connected(self, Role::Subscriber(id), queue_stream(receiver));
        }
        Attachment {
            node: self.clone(),
            role: None,
            stream: None,
        }
    }

    /// Current broadcast state.
    pub fn stream_state(&self) -> StreamState {
        self.broadcaster().state()
    }

    /// The transformed upstream sequence, before null filtering.
    pub(crate) fn upstream(&self) -> NodeStream {
        let node = self.clone();
        match self.source() {
            Some(Source::Iter(source)) => stream::iter(source())
                .map(move |item| node.transform_item(item))
                .boxed(),
            Some(Source::Stream(source)) => source()
                .map(move |item| node.transform_item(item))
                .boxed(),
            None => {
                let inputs = self
                    .selected_dependencies()
                    .into_iter()
                    .map(dependency_stream)
                    .collect();
                CombineLatest::new(inputs)
                    .map(move |round| round.and_then(|values| node.apply_transform(values)))
                    .boxed()
            }
        }
    }
}

fn dependency_stream(dependency: Dependency) -> NodeStream {
    match dependency {
        Dependency::Node(node) => node.subscribe(),
        Dependency::Value(value) => stream::once(future::ready(Ok(value))).boxed(),
        Dependency::Producer(producer) => stream::once(async move { producer.call() }).boxed(),
    }
}

fn queue_stream(receiver: UnboundedReceiver<Value>) -> NodeStream {
    stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|value| (Ok(value), receiver))
    })
    .boxed()
}

/// A consumer of a node's asynchronous sequence, created by [`Node::attach`].
pub struct Attachment {
    node: Node,
    role: Option<Role>,
    stream: Option<NodeStream>,
}

impl Attachment {
    fn connected(node: &Node, role: Role, stream: NodeStream) -> Self {
        Self {
            node: node.clone(),
            role: Some(role),
            stream: Some(stream),
        }
    }

    /// The role this consumer holds, or `None` before its first poll.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// The node this consumer reads from.
    pub fn node(&self) -> &Node {
        &self.node
    }

    fn connect(&mut self) {
        let (role, stream) = match self.node.broadcaster().claim() {
            Claim::Driver => {
                tracing::debug!(node = %self.node.label(), "driver claimed");
                let driver = DriverStream {
                    node: self.node.clone(),
                    upstream: self.node.upstream(),
                    finished: false,
                };
                (Role::Driver, driver.boxed())
            }
            Claim::Subscriber(id, receiver) => (Role::Subscriber(id), queue_stream(receiver)),
        };
        self.role = Some(role);
        self.stream = Some(stream);
    }
}

impl Stream for Attachment {
    type Item = crate::error::Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.stream.is_none() {
            this.connect();
        }
        match this.stream.as_mut() {
            Some(stream) => stream.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("node", &self.node.label())
            .field("role", &self.role)
            .finish()
    }
}

struct DriverStream {
    node: Node,
    upstream: NodeStream,
    finished: bool,
}

impl DriverStream {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.node.broadcaster().release();
        }
    }
}

impl Stream for DriverStream {
    type Item = crate::error::Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        loop {
            match this.upstream.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    if value.is_null() {
                        continue;
                    }
                    this.node.broadcaster().publish(&value);
                    return Poll::Ready(Some(Ok(value)));
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finish();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.finish();
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for DriverStream {
    fn drop(&mut self) {
        self.finish();
    }
}
