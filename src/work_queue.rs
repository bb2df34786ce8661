//! Async item processing with backpressure.
//!
//! The key concepts here are borrowed from ["Queues Don't Fix
//! Overload"](https://ferd.ca/queues-don-t-fix-overload.html). We limit the
//! number of work items that may be "in flight" at any one time, and once that
//! limit is reached, submitting more items waits until an in-flight item
//! completes.
//!
//! This is a strictly in-process queue for closely-related subtasks of a
//! larger task, like the pages of a batch. It does not handle priorities or
//! starvation.

use futures::{
    FutureExt as _, SinkExt as _, StreamExt as _,
    channel::{mpsc, oneshot},
};

use crate::{
    async_utils::{BoxedFuture, BoxedStream, JoinWorker},
    prelude::*,
};

/// An input waiting to be processed, and the channel on which to return the
/// result.
struct WorkItem<Input, Output> {
    input: Input,
    tx: oneshot::Sender<Result<Output>>,
}

/// An async work function.
pub type WorkFn<Input, Output> =
    Arc<dyn Fn(Input) -> BoxedFuture<Result<Output>> + Send + Sync + 'static>;

/// A handle to a [`WorkQueue`].
///
/// This is basically just a wrapper around a [`mpsc::Sender`]. It can be
/// cloned cheaply and passed around. The queue's worker exits once every
/// handle has been dropped and the queue is drained.
pub struct WorkQueueHandle<Input, Output> {
    tx: mpsc::Sender<WorkItem<Input, Output>>,
}

// Implemented by hand so that `Input` and `Output` need not be `Clone`.
impl<Input, Output> Clone for WorkQueueHandle<Input, Output> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<Input, Output> WorkQueueHandle<Input, Output>
where
    Input: Send + 'static,
    Output: Send + 'static,
{
    /// Submit an input and wait for its output.
    ///
    /// Submission waits if the queue is full.
    pub async fn process(&self, input: Input) -> Result<Output> {
        let (tx, rx) = oneshot::channel();
        // Sending needs a mutable sender.
        let mut sender = self.tx.clone();
        sender
            .send(WorkItem { input, tx })
            .await
            .context("failed to send work item")?;
        rx.await.context("failed to receive work item result")?
    }

    /// Turn a stream of inputs into a stream of futures that will yield
    /// outputs. Resolve them with [`futures::StreamExt::buffered`] to keep
    /// input order, or [`futures::StreamExt::buffer_unordered`] otherwise.
    ///
    /// The queue's own concurrency limit applies whatever buffer size the
    /// caller picks.
    pub fn process_stream(
        &self,
        input: BoxedStream<Input>,
    ) -> BoxedStream<BoxedFuture<Result<Output>>> {
        let handle = self.clone();
        input
            .map(move |input| {
                let handle = handle.clone();
                async move { handle.process(input).await }.boxed()
            })
            .boxed()
    }
}

/// A queue of work items processed in parallel by a background worker.
pub struct WorkQueue<Input, Output> {
    tx: mpsc::Sender<WorkItem<Input, Output>>,
}

impl<Input, Output> WorkQueue<Input, Output>
where
    Input: Send + 'static,
    Output: Send + 'static,
{
    /// Create a new work queue which runs up to `concurrency_limit` calls to
    /// `work_fn` at once.
    ///
    /// Up to `concurrency_limit` more items may wait in the queue, so the
    /// total number of items in the system may reach `2 * concurrency_limit`.
    pub fn new(
        concurrency_limit: usize,
        work_fn: WorkFn<Input, Output>,
    ) -> Result<(Self, JoinWorker)> {
        if concurrency_limit == 0 {
            bail!("work queue needs at least one worker");
        }
        let (tx, rx) = mpsc::channel(concurrency_limit);
        let worker = tokio::spawn(async move {
            rx.for_each_concurrent(
                concurrency_limit,
                |item: WorkItem<Input, Output>| async {
                    let result = work_fn(item.input).await;
                    if item.tx.send(result).is_err() {
                        debug!("dropping work item result because receiver was dropped");
                    }
                },
            )
            .await;
            Ok(())
        });
        Ok((Self { tx }, JoinWorker::from_handle(worker)))
    }

    /// Get a handle for submitting items to the work queue.
    pub fn handle(&self) -> WorkQueueHandle<Input, Output> {
        WorkQueueHandle {
            tx: self.tx.clone(),
        }
    }
}
