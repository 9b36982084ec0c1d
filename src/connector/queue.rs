use super::p2p::{Block, Popped, PointToPoint, Rejected};
use super::{StreamPublisher, StreamSubscriber, Subscription};
use crate::config::ConnectorConfig;
use crate::error::{DataflowError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A bounded FIFO shared by blocking threads and demand-driven subscribers.
///
/// Holds at most `capacity` items. Each item goes to exactly one consumer:
/// a thread in [`take`](Self::take)/[`poll`](Self::poll), or the
/// longest-waiting subscriber with outstanding demand.
///
/// ```ignore
/// let queue = BoundedQueue::new(3)?;
/// for i in 0..3 {
///     assert!(queue.offer(i).is_ok());
/// }
/// assert_eq!(queue.offer(3), Err(3));
/// assert_eq!(queue.take()?, 0);
/// assert!(queue.offer(3).is_ok());
/// ```
pub struct BoundedQueue<T> {
    inner: PointToPoint<T>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DataflowError::InvalidCapacity(capacity));
        }
        Ok(Self {
            inner: PointToPoint::new(capacity, false, None),
        })
    }

    /// A queue sized by `default_capacity`
    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        Self::new(config.default_capacity)
    }

    /// Add an item if there is room, handing it back otherwise (also after
    /// completion)
    pub fn offer(&self, item: T) -> std::result::Result<(), T> {
        self.inner.push(item, Block::No).map_err(rejected_item)
    }

    /// Like [`offer`](Self::offer), waiting up to `timeout` for room
    pub fn offer_timeout(&self, item: T, timeout: Duration) -> std::result::Result<(), T> {
        self.inner
            .push(item, deadline(timeout))
            .map_err(rejected_item)
    }

    /// Add an item, blocking while the queue is full.
    ///
    /// Fails with [`DataflowError::StreamClosed`] once the queue is completed;
    /// the item is dropped.
    pub fn put(&self, item: T) -> Result<()> {
        match self.inner.push(item, Block::Forever) {
            Ok(()) => Ok(()),
            Err(_) => Err(DataflowError::StreamClosed),
        }
    }

    /// Remove the oldest item if there is one
    pub fn poll(&self) -> Option<T> {
        match self.inner.pop(Block::No) {
            Popped::Item(item) => Some(item),
            _ => None,
        }
    }

    /// Like [`poll`](Self::poll), waiting up to `timeout` for an item
    pub fn poll_timeout(&self, timeout: Duration) -> Option<T> {
        match self.inner.pop(deadline(timeout)) {
            Popped::Item(item) => Some(item),
            _ => None,
        }
    }

    /// Remove the oldest item, blocking while the queue is empty.
    ///
    /// On a completed, drained queue this fails with the completion error, or
    /// [`DataflowError::StreamClosed`] after a normal completion.
    pub fn take(&self) -> Result<T> {
        match self.inner.pop(Block::Forever) {
            Popped::Item(item) => Ok(item),
            Popped::Closed(Ok(())) | Popped::TimedOut => Err(DataflowError::StreamClosed),
            Popped::Closed(Err(e)) => Err(e),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.inner.remaining_capacity()
    }

    /// Close the queue. Buffered items are still handed out.
    pub fn complete(&self) -> bool {
        self.inner.complete(Ok(()))
    }

    pub fn complete_exceptionally(&self, error: DataflowError) -> bool {
        self.inner.complete(Err(error))
    }

    pub fn is_completed(&self) -> bool {
        self.inner.is_completed()
    }

    pub fn completion_error(&self) -> Option<DataflowError> {
        self.inner.completion_error()
    }

    /// Subscribers still attached
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }
}

impl<T: Send + 'static> StreamPublisher<T> for BoundedQueue<T> {
    fn subscribe(&self, subscriber: Arc<dyn StreamSubscriber<T>>) -> Result<Subscription> {
        self.inner.subscribe(subscriber)
    }
}

impl<T: Send + 'static> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("completed", &self.is_completed())
            .finish()
    }
}

fn rejected_item<T>(rejected: Rejected<T>) -> T {
    match rejected {
        Rejected::Full(item) | Rejected::Closed(item) => item,
    }
}

pub(crate) fn deadline(timeout: Duration) -> Block {
    match Instant::now().checked_add(timeout) {
        Some(deadline) => Block::Until(deadline),
        None => Block::Forever,
    }
}
