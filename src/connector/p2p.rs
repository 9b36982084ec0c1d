//! Point-to-point delivery shared by [`BoundedQueue`](super::BoundedQueue)
//! and [`UnicastStream`](super::UnicastStream).
//!
//! Items wait in a buffer of fixed capacity until a consumer claims them.
//! Threads claim them with the blocking `pop` calls; stream subscribers claim
//! them by holding demand. Subscribers with demand are served from a FIFO of
//! active ids: one item per turn, back of the line while demand remains,
//! parked when it runs out.
//!
//! # Delivery
//!
//! Items are assigned to subscribers under the state lock and queued in a
//! handoff list. Exactly one thread at a time drains that list, outside the
//! lock, so callbacks may call back into the connector and per-subscriber
//! order is preserved.

use super::{signal_done, StreamSubscriber, Subscription, SubscriptionCore, SubscriptionSource};
use crate::error::{DataflowError, Result};
use crate::node::core::{Firing, PortRef};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

/// How long a push or pop may wait
#[derive(Debug, Clone, Copy)]
pub(crate) enum Block {
    No,
    Until(Instant),
    Forever,
}

/// Why an item was handed back
pub(crate) enum Rejected<T> {
    Full(T),
    Closed(T),
}

/// Result of a waiting pop
pub(crate) enum Popped<T> {
    Item(T),
    /// Completed and empty
    Closed(Result<()>),
    TimedOut,
}

struct Entry<T> {
    demand: u64,
    core: Arc<SubscriptionCore>,
    subscriber: Arc<dyn StreamSubscriber<T>>,
}

enum Delivery<T> {
    Next {
        core: Arc<SubscriptionCore>,
        subscriber: Arc<dyn StreamSubscriber<T>>,
        item: T,
    },
    Done {
        core: Arc<SubscriptionCore>,
        subscriber: Arc<dyn StreamSubscriber<T>>,
        outcome: Result<()>,
    },
}

/// The producer node's room port, blocked while the buffer is full
struct Room {
    port: PortRef,
    blocked: bool,
}

struct State<T> {
    buffer: VecDeque<T>,
    subscribers: BTreeMap<u64, Entry<T>>,
    /// Ids with outstanding demand, in serving order
    active: VecDeque<u64>,
    handoff: VecDeque<Delivery<T>>,
    draining: bool,
    outcome: Option<Result<()>>,
    /// The terminal signal has been handed to every subscriber
    finished: bool,
    room: Option<Room>,
}

struct Shared<T> {
    capacity: usize,
    exclusive: bool,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    next_id: AtomicU64,
    this: Weak<Shared<T>>,
}

pub(crate) struct PointToPoint<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for PointToPoint<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> PointToPoint<T> {
    pub(crate) fn new(capacity: usize, exclusive: bool, room: Option<PortRef>) -> Self {
        let shared = Arc::new_cyclic(|this| Shared {
            capacity,
            exclusive,
            state: Mutex::new(State {
                buffer: VecDeque::with_capacity(capacity.min(1024)),
                subscribers: BTreeMap::new(),
                active: VecDeque::new(),
                handoff: VecDeque::new(),
                draining: false,
                outcome: None,
                finished: false,
                room: room.map(|port| Room {
                    port,
                    blocked: false,
                }),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            next_id: AtomicU64::new(0),
            this: this.clone(),
        });
        Self { shared }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub(crate) fn is_exclusive(&self) -> bool {
        self.shared.exclusive
    }

    pub(crate) fn push(&self, item: T, block: Block) -> std::result::Result<(), Rejected<T>> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        loop {
            if state.outcome.is_some() {
                return Err(Rejected::Closed(item));
            }
            if state.buffer.len() < shared.capacity {
                break;
            }
            match block {
                Block::No => return Err(Rejected::Full(item)),
                Block::Until(deadline) => {
                    let timed_out = shared.not_full.wait_until(&mut state, deadline).timed_out();
                    if timed_out
                        && state.outcome.is_none()
                        && state.buffer.len() >= shared.capacity
                    {
                        return Err(Rejected::Full(item));
                    }
                }
                Block::Forever => shared.not_full.wait(&mut state),
            }
        }

        state.buffer.push_back(item);
        shared.not_empty.notify_one();
        shared.pump(state);
        Ok(())
    }

    pub(crate) fn pop(&self, block: Block) -> Popped<T> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        loop {
            if let Some(item) = state.buffer.pop_front() {
                shared.not_full.notify_one();
                shared.pump(state);
                return Popped::Item(item);
            }
            if let Some(outcome) = &state.outcome {
                return Popped::Closed(outcome.clone());
            }
            match block {
                Block::No => return Popped::TimedOut,
                Block::Until(deadline) => {
                    let timed_out = shared.not_empty.wait_until(&mut state, deadline).timed_out();
                    if timed_out && state.buffer.is_empty() && state.outcome.is_none() {
                        return Popped::TimedOut;
                    }
                }
                Block::Forever => shared.not_empty.wait(&mut state),
            }
        }
    }

    /// Close the connector. Waiting producers fail. Pollers drain what is
    /// buffered and then see `outcome`; subscribers see a normal end after the
    /// buffer drains and an error at once.
    pub(crate) fn complete(&self, outcome: Result<()>) -> bool {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.outcome.is_some() {
            return false;
        }
        state.outcome = Some(outcome);
        shared.not_empty.notify_all();
        shared.not_full.notify_all();
        shared.pump(state);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    pub(crate) fn remaining_capacity(&self) -> usize {
        self.shared.capacity.saturating_sub(self.len())
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    pub(crate) fn completion_error(&self) -> Option<DataflowError> {
        match &self.shared.state.lock().outcome {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    pub(crate) fn subscribe(&self, subscriber: Arc<dyn StreamSubscriber<T>>) -> Result<Subscription> {
        let shared = &self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let source: Weak<dyn SubscriptionSource> = shared.this.clone();
        let core = SubscriptionCore::new(id, source);
        let subscription = Subscription::new(core.clone());

        // Holding the gate through registration keeps a concurrent completion
        // from reaching the subscriber before `on_subscribe`.
        let mut registered: Result<Option<Result<()>>> = Ok(None);
        core.gate.deliver(|| {
            {
                let mut state = shared.state.lock();
                if state.finished {
                    registered = Ok(state.outcome.clone());
                } else if shared.exclusive && !state.subscribers.is_empty() {
                    registered = Err(DataflowError::AlreadySubscribed);
                    return;
                } else {
                    state.subscribers.insert(
                        id,
                        Entry {
                            demand: 0,
                            core: core.clone(),
                            subscriber: subscriber.clone(),
                        },
                    );
                }
            }
            subscriber.on_subscribe(subscription.clone());
        });

        match registered {
            Err(e) => {
                core.gate.close();
                Err(e)
            }
            Ok(Some(outcome)) => {
                core.gate
                    .deliver_final(|| signal_done(subscriber.as_ref(), outcome));
                Ok(subscription)
            }
            Ok(None) => {
                tracing::trace!(subscription = id, "subscriber attached");
                Ok(subscription)
            }
        }
    }
}

impl<T: Send + 'static> Shared<T> {
    /// Hand buffered items to subscribers with demand. Returns the number of
    /// buffer slots freed.
    fn schedule(&self, state: &mut State<T>) -> usize {
        let mut freed = 0;
        while !state.buffer.is_empty() {
            let Some(id) = state.active.pop_front() else {
                break;
            };
            let Some(entry) = state.subscribers.get_mut(&id) else {
                continue;
            };
            if entry.demand == 0 {
                continue;
            }
            let Some(item) = state.buffer.pop_front() else {
                break;
            };
            entry.demand -= 1;
            state.handoff.push_back(Delivery::Next {
                core: entry.core.clone(),
                subscriber: entry.subscriber.clone(),
                item,
            });
            if entry.demand > 0 {
                state.active.push_back(id);
            }
            freed += 1;
        }

        // Errors reach subscribers at once; a normal end waits for the buffer to drain.
        let terminal = match &state.outcome {
            Some(Err(_)) => true,
            Some(Ok(())) => state.buffer.is_empty(),
            None => false,
        };
        if terminal && !state.finished {
            if let Some(outcome) = state.outcome.clone() {
                state.finished = true;
                state.active.clear();
                for (_, entry) in std::mem::take(&mut state.subscribers) {
                    state.handoff.push_back(Delivery::Done {
                        core: entry.core,
                        subscriber: entry.subscriber,
                        outcome: outcome.clone(),
                    });
                }
            }
        }
        freed
    }

    /// Keep the producer's room port in step with the buffer
    fn update_room(&self, state: &mut State<T>) -> Firing {
        let full = state.buffer.len() >= self.capacity && state.outcome.is_none();
        let Some(room) = state.room.as_mut() else {
            return Firing::none();
        };
        if full && !room.blocked {
            room.blocked = true;
            room.port.block();
            Firing::none()
        } else if !full && room.blocked {
            room.blocked = false;
            room.port.unblock()
        } else {
            Firing::none()
        }
    }

    fn pump<'a>(&'a self, mut state: MutexGuard<'a, State<T>>) {
        loop {
            let freed = self.schedule(&mut state);
            for _ in 0..freed {
                self.not_full.notify_one();
            }
            let firing = self.update_room(&mut state);

            if state.draining || state.handoff.is_empty() {
                drop(state);
                firing.submit();
                return;
            }
            state.draining = true;
            let batch = std::mem::take(&mut state.handoff);
            drop(state);
            firing.submit();

            for delivery in batch {
                deliver(delivery);
            }
            state = self.state.lock();
            state.draining = false;
        }
    }
}

fn deliver<T>(delivery: Delivery<T>) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match delivery {
        Delivery::Next {
            core,
            subscriber,
            item,
        } => {
            if !core.gate.deliver(|| subscriber.on_next(item)) {
                tracing::trace!(subscription = core.id, "item dropped, subscription cancelled");
            }
        }
        Delivery::Done {
            core,
            subscriber,
            outcome,
        } => {
            core.gate
                .deliver_final(|| signal_done(subscriber.as_ref(), outcome));
        }
    }));
    if let Err(payload) = outcome {
        tracing::error!(
            "Stream subscriber panicked: {}",
            DataflowError::from_panic(payload)
        );
    }
}

impl<T: Send + 'static> SubscriptionSource for Shared<T> {
    fn request(&self, id: u64, n: u64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(entry) = state.subscribers.get_mut(&id) else {
            return;
        };
        let parked = entry.demand == 0;
        entry.demand = entry.demand.saturating_add(n);
        if parked {
            state.active.push_back(id);
        }
        self.pump(guard);
    }

    fn cancel(&self, id: u64) {
        let mut state = self.state.lock();
        if state.subscribers.remove(&id).is_some() {
            state.active.retain(|&active| active != id);
            tracing::trace!(subscription = id, "subscriber cancelled");
        }
    }
}
