//! Combine-latest merge.
//!
//! Emits a tuple every time any input advances, pairing the new item with the
//! most recent item of every other input. Inputs that have not produced yet
//! appear as `Null`. The merge ends once every input has ended, or right
//! after the first error.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{select_all, SelectAll, Stream, StreamExt};

use crate::error::Result;
use crate::stream::NodeStream;
use crate::value::Value;

type Tagged = futures_util::stream::BoxStream<'static, (usize, Result<Value>)>;

pub(crate) struct CombineLatest {
    inputs: SelectAll<Tagged>,
    latest: Vec<Value>,
    failed: bool,
}

impl CombineLatest {
    pub(crate) fn new(inputs: Vec<NodeStream>) -> Self {
        let latest = vec![Value::Null; inputs.len()];
        let tagged = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| input.map(move |item| (index, item)).boxed());
        Self {
            inputs: select_all(tagged),
            latest,
            failed: false,
        }
    }
}

impl Stream for CombineLatest {
    type Item = Result<Vec<Value>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.failed {
            return Poll::Ready(None);
        }
        match this.inputs.poll_next_unpin(cx) {
            Poll::Ready(Some((index, Ok(value)))) => {
                this.latest[index] = value;
                Poll::Ready(Some(Ok(this.latest.clone())))
            }
            Poll::Ready(Some((_, Err(err)))) => {
                this.failed = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
