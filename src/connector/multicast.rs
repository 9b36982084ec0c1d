//! Multicast stream over an append-only value chain.
//!
//! Each emitted item becomes an immutable link. A subscriber is a cursor
//! into the chain plus its own demand, and advances independently of every
//! other subscriber. A new cursor starts at the current tail, so it sees only
//! items emitted after it subscribed. Links no cursor can reach are freed.

use super::{signal_done, StreamPublisher, StreamSubscriber, Subscription, SubscriptionCore, SubscriptionSource};
use crate::error::{DataflowError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

struct Link<T> {
    next: OnceLock<(T, Arc<Link<T>>)>,
}

impl<T> Link<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next: OnceLock::new(),
        })
    }
}

impl<T> Drop for Link<T> {
    // Unlink iteratively; a long chain would otherwise overflow the stack.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some((_, link)) = next {
            match Arc::try_unwrap(link) {
                Ok(mut link) => next = link.next.take(),
                Err(_) => break,
            }
        }
    }
}

struct Cursor<T> {
    /// The link whose successor is this subscriber's next item
    position: Arc<Link<T>>,
    demand: u64,
    core: Arc<SubscriptionCore>,
    subscriber: Arc<dyn StreamSubscriber<T>>,
    draining: bool,
}

struct State<T> {
    tail: Arc<Link<T>>,
    cursors: BTreeMap<u64, Cursor<T>>,
    outcome: Option<Result<()>>,
    emitted: u64,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    next_id: AtomicU64,
    this: Weak<Shared<T>>,
}

enum Step<T> {
    Next(T),
    Done(Result<()>),
    Idle,
}

/// A stream that replicates every item to every subscriber.
pub struct MulticastStream<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for MulticastStream<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for MulticastStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> MulticastStream<T> {
    pub fn new() -> Self {
        let shared = Arc::new_cyclic(|this| Shared {
            state: Mutex::new(State {
                tail: Link::new(),
                cursors: BTreeMap::new(),
                outcome: None,
                emitted: 0,
            }),
            next_id: AtomicU64::new(0),
            this: this.clone(),
        });
        Self { shared }
    }

    /// Append an item and deliver it to every subscriber with demand
    pub fn emit(&self, item: T) -> Result<()> {
        let ready: Vec<u64> = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            if state.outcome.is_some() {
                return Err(DataflowError::StreamClosed);
            }
            let tail = Link::new();
            if state.tail.next.set((item, tail.clone())).is_err() {
                return Err(DataflowError::StreamClosed);
            }
            state.tail = tail;
            state.emitted += 1;
            state
                .cursors
                .iter()
                .filter(|(_, c)| c.demand > 0 && !c.draining)
                .map(|(id, _)| *id)
                .collect()
        };
        for id in ready {
            self.shared.drain(id);
        }
        Ok(())
    }

    /// End the stream. Each subscriber is told once it has seen every item.
    pub fn complete(&self) -> bool {
        self.close(Ok(()))
    }

    pub fn complete_exceptionally(&self, error: DataflowError) -> bool {
        self.close(Err(error))
    }

    fn close(&self, outcome: Result<()>) -> bool {
        let ids: Vec<u64> = {
            let mut state = self.shared.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            state.cursors.keys().copied().collect()
        };
        for id in ids {
            self.shared.drain(id);
        }
        true
    }

    pub fn is_completed(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// Subscribers that have not cancelled or finished
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().cursors.len()
    }

    /// Items emitted so far
    pub fn emitted(&self) -> u64 {
        self.shared.state.lock().emitted
    }
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    /// Deliver to one subscriber until it runs out of demand or items.
    fn drain(&self, id: u64) {
        let mut guard = self.state.lock();
        match guard.cursors.get_mut(&id) {
            Some(cursor) if !cursor.draining => cursor.draining = true,
            _ => return,
        }

        loop {
            let state = &mut *guard;
            let outcome = state.outcome.clone();
            let Some(cursor) = state.cursors.get_mut(&id) else {
                return;
            };

            let step = match cursor.position.next.get() {
                Some((item, next)) if cursor.demand > 0 => {
                    let item = item.clone();
                    cursor.position = next.clone();
                    cursor.demand -= 1;
                    Step::Next(item)
                }
                Some(_) => Step::Idle,
                None => match outcome {
                    Some(outcome) => Step::Done(outcome),
                    None => Step::Idle,
                },
            };

            match step {
                Step::Idle => {
                    cursor.draining = false;
                    return;
                }
                Step::Done(outcome) => {
                    let Some(cursor) = state.cursors.remove(&id) else {
                        return;
                    };
                    drop(guard);
                    cursor
                        .core
                        .gate
                        .deliver_final(|| signal_done(cursor.subscriber.as_ref(), outcome));
                    return;
                }
                Step::Next(item) => {
                    let core = cursor.core.clone();
                    let subscriber = cursor.subscriber.clone();
                    drop(guard);
                    if !core.gate.deliver(|| subscriber.on_next(item)) {
                        tracing::trace!(subscription = id, "item dropped, subscription cancelled");
                    }
                    guard = self.state.lock();
                }
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SubscriptionSource for Shared<T> {
    fn request(&self, id: u64, n: u64) {
        {
            let mut state = self.state.lock();
            let Some(cursor) = state.cursors.get_mut(&id) else {
                return;
            };
            cursor.demand = cursor.demand.saturating_add(n);
        }
        self.drain(id);
    }

    fn cancel(&self, id: u64) {
        if self.state.lock().cursors.remove(&id).is_some() {
            tracing::trace!(subscription = id, "multicast subscriber cancelled");
        }
    }
}

impl<T: Clone + Send + Sync + 'static> StreamPublisher<T> for MulticastStream<T> {
    fn subscribe(&self, subscriber: Arc<dyn StreamSubscriber<T>>) -> Result<Subscription> {
        let shared = &self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let source: Weak<dyn SubscriptionSource> = shared.this.clone();
        let core = SubscriptionCore::new(id, source);
        let subscription = Subscription::new(core.clone());

        let mut late = None;
        core.gate.deliver(|| {
            {
                let mut state = shared.state.lock();
                match &state.outcome {
                    Some(outcome) => late = Some(outcome.clone()),
                    None => {
                        let position = state.tail.clone();
                        state.cursors.insert(
                            id,
                            Cursor {
                                position,
                                demand: 0,
                                core: core.clone(),
                                subscriber: subscriber.clone(),
                                draining: false,
                            },
                        );
                    }
                }
            }
            subscriber.on_subscribe(subscription.clone());
        });

        if let Some(outcome) = late {
            core.gate
                .deliver_final(|| signal_done(subscriber.as_ref(), outcome));
        }
        Ok(subscription)
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for MulticastStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("MulticastStream")
            .field("emitted", &state.emitted)
            .field("subscribers", &state.cursors.len())
            .field("completed", &state.outcome.is_some())
            .finish()
    }
}
