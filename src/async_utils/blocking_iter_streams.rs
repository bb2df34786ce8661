//! Wrapper which converts CPU-intensive iterators to async streams.
//!
//! Decoding a rasterized page is slow enough that it shouldn't happen on an
//! executor thread, but pages still need to flow into the batch queue as a
//! stream.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{FutureExt as _, Stream};

use super::{BoxedFuture, spawn_blocking_checked};
use crate::prelude::*;

/// What a [`BlockingIterStream`] is doing right now.
enum BlockingIterStreamState<I, T>
where
    I: Iterator<Item = Result<T>> + Send + Unpin + 'static,
    T: Send + 'static,
{
    /// We have an iterator which we can ask for the next value.
    Iter(I),

    /// A background thread has the iterator and will hand it back.
    Waiting(BoxedFuture<Result<(Option<Result<T>>, I)>>),

    /// The background thread failed and took the iterator with it.
    Done,
}

/// A [`Stream`] wrapping a blocking iterator.
pub struct BlockingIterStream<I, T>
where
    I: Iterator<Item = Result<T>> + Send + Unpin + 'static,
    T: Send + 'static,
{
    state: BlockingIterStreamState<I, T>,
}

impl<I, T> BlockingIterStream<I, T>
where
    I: Iterator<Item = Result<T>> + Send + Unpin + 'static,
    T: Send + 'static,
{
    /// Create a new [`BlockingIterStream`] from an iterator.
    pub fn new(iter: I) -> Self {
        Self {
            state: BlockingIterStreamState::Iter(iter),
        }
    }
}

impl<I, T> Stream for BlockingIterStream<I, T>
where
    I: Iterator<Item = Result<T>> + Send + Unpin + 'static,
    T: Send + 'static,
{
    type Item = I::Item;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.as_mut().get_mut();
        let state = std::mem::replace(&mut this.state, BlockingIterStreamState::Done);

        let mut future = match state {
            // Move the iterator onto a blocking thread for one step. It comes
            // back to us along with the item.
            BlockingIterStreamState::Iter(mut iter) => spawn_blocking_checked(move || {
                let next = iter.next();
                (next, iter)
            })
            .boxed(),
            BlockingIterStreamState::Waiting(future) => future,
            BlockingIterStreamState::Done => return Poll::Ready(None),
        };

        match future.as_mut().poll(cx) {
            Poll::Ready(Ok((next, iter))) => {
                if next.is_some() {
                    this.state = BlockingIterStreamState::Iter(iter);
                }
                Poll::Ready(next)
            }
            Poll::Ready(Err(err)) => Poll::Ready(Some(Err(err))),
            Poll::Pending => {
                this.state = BlockingIterStreamState::Waiting(future);
                Poll::Pending
            }
        }
    }
}
