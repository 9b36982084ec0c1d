use super::p2p::{Block, PointToPoint, Rejected};
use super::{StreamPublisher, StreamSubscriber, Subscription};
use crate::error::{DataflowError, Result};
use crate::node::core::{NodeCore, PortRef};
use std::sync::Arc;

/// How a [`UnicastStream`] shares its items between subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnicastMode {
    /// One subscriber at a time; subscribing while one is attached fails with
    /// [`DataflowError::AlreadySubscribed`]
    #[default]
    Exclusive,
    /// Any number of subscribers, each item to the next one with demand
    RoundRobin,
}

/// A single-producer stream output.
///
/// Items are buffered until a subscriber requests them. Created through a
/// node's `stream_output`, the stream also owns a port on the producing node
/// that is ready only while the buffer has room, so an actor posting one item
/// per round is throttled by its consumers' demand.
pub struct UnicastStream<T> {
    inner: PointToPoint<T>,
}

impl<T> Clone for UnicastStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> UnicastStream<T> {
    pub fn new(capacity: usize, mode: UnicastMode) -> Result<Self> {
        if capacity == 0 {
            return Err(DataflowError::InvalidCapacity(capacity));
        }
        Ok(Self::with_inner(capacity, mode, None))
    }

    pub fn exclusive(capacity: usize) -> Result<Self> {
        Self::new(capacity, UnicastMode::Exclusive)
    }

    pub fn round_robin(capacity: usize) -> Result<Self> {
        Self::new(capacity, UnicastMode::RoundRobin)
    }

    /// A stream whose buffer never fills
    pub fn unbounded(mode: UnicastMode) -> Self {
        Self::with_inner(usize::MAX, mode, None)
    }

    pub(crate) fn bound(core: &Arc<NodeCore>, capacity: usize, mode: UnicastMode) -> Result<Self> {
        if capacity == 0 {
            return Err(DataflowError::InvalidCapacity(capacity));
        }
        let room = PortRef::register(core, true);
        Ok(Self::with_inner(capacity, mode, Some(room)))
    }

    fn with_inner(capacity: usize, mode: UnicastMode, room: Option<PortRef>) -> Self {
        Self {
            inner: PointToPoint::new(capacity, mode == UnicastMode::Exclusive, room),
        }
    }

    /// Append an item
    pub fn post(&self, item: T) -> Result<()> {
        match self.inner.push(item, Block::No) {
            Ok(()) => Ok(()),
            Err(Rejected::Full(_)) => Err(DataflowError::BufferFull(self.inner.capacity())),
            Err(Rejected::Closed(_)) => Err(DataflowError::StreamClosed),
        }
    }

    /// End the stream once buffered items have been delivered
    pub fn complete(&self) -> bool {
        self.inner.complete(Ok(()))
    }

    pub fn complete_exceptionally(&self, error: DataflowError) -> bool {
        self.inner.complete(Err(error))
    }

    pub fn is_completed(&self) -> bool {
        self.inner.is_completed()
    }

    pub fn mode(&self) -> UnicastMode {
        if self.inner.is_exclusive() {
            UnicastMode::Exclusive
        } else {
            UnicastMode::RoundRobin
        }
    }

    /// Items buffered and not yet claimed
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining_capacity(&self) -> usize {
        self.inner.remaining_capacity()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }
}

impl<T: Send + 'static> StreamPublisher<T> for UnicastStream<T> {
    fn subscribe(&self, subscriber: Arc<dyn StreamSubscriber<T>>) -> Result<Subscription> {
        self.inner.subscribe(subscriber)
    }
}

impl<T: Send + 'static> std::fmt::Debug for UnicastStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnicastStream")
            .field("mode", &self.mode())
            .field("len", &self.len())
            .field("completed", &self.is_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::Dataflow;
    use crate::executor::InlineExecutor;
    use crate::node::{Actor, NodeState};
    use parking_lot::Mutex;

    #[test]
    fn test_post_errors() {
        let stream = UnicastStream::exclusive(1).unwrap();
        stream.post(1).unwrap();
        assert!(matches!(stream.post(2), Err(DataflowError::BufferFull(1))));
        stream.complete();
        assert!(matches!(stream.post(3), Err(DataflowError::StreamClosed)));
        assert!(UnicastStream::<u8>::round_robin(0).is_err());
    }

    #[test]
    fn test_unbounded_never_fills() {
        let stream = UnicastStream::unbounded(UnicastMode::RoundRobin);
        for i in 0..10_000 {
            stream.post(i).unwrap();
        }
        assert_eq!(stream.len(), 10_000);
        assert_eq!(stream.mode(), UnicastMode::RoundRobin);
    }

    struct Sink {
        seen: Mutex<Vec<u32>>,
        subscription: Mutex<Option<Subscription>>,
    }

    impl StreamSubscriber<u32> for Sink {
        fn on_subscribe(&self, subscription: Subscription) {
            *self.subscription.lock() = Some(subscription);
        }
        fn on_next(&self, item: u32) {
            self.seen.lock().push(item);
        }
    }

    #[test]
    fn test_room_port_throttles_producer() {
        let dataflow = Dataflow::builder().executor(Arc::new(InlineExecutor)).build();
        let producer = Actor::<()>::new(&dataflow);
        let output = producer
            .stream_output::<u32>(2, UnicastMode::Exclusive)
            .unwrap();
        let out = output.clone();
        let mut next = 0;
        producer.set_action(move |ctx| {
            out.post(next)?;
            next += 1;
            if next == 6 {
                out.complete();
                ctx.complete(());
            }
            Ok(())
        });
        producer.start().unwrap();

        // Two rounds fill the buffer, then the room port blocks the actor
        assert_eq!(output.len(), 2);
        assert_eq!(producer.state(), NodeState::Blocked);

        let sink = Arc::new(Sink {
            seen: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
        });
        output.subscribe(sink.clone()).unwrap();
        let subscription = sink.subscription.lock().clone().unwrap();

        subscription.request(1).unwrap();
        assert_eq!(*sink.seen.lock(), vec![0]);
        assert_eq!(output.len(), 2);

        subscription.request(10).unwrap();
        assert_eq!(*sink.seen.lock(), vec![0, 1, 2, 3, 4, 5]);
        assert!(producer.is_completed());
        assert!(dataflow.is_completed());
    }
}
