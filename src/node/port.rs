//! Input ports.
//!
//! Each port owns one bit of its node's transition and keeps that bit in step
//! with its own storage: the bit is clear exactly while the port holds
//! something the action can consume.
//!
//! | Port | Ready when | After a round |
//! |------|------------|---------------|
//! | [`ScalarInput`] | a value (or error) was posted | latches shut |
//! | [`PermitPort`] | at least one permit is available | consumes one permit |
//! | [`StreamInput`] | an item is buffered, or upstream completed | consumes the front item, re-blocks if drained |
//!
//! Output ports are node-bound [`UnicastStream`](crate::connector::UnicastStream)s,
//! created through `stream_output`.

use super::core::{NodeCore, PortRef};
use super::id::PortId;
use super::transition::PortPurge;
use crate::completion::{Completion, CompletionSubscription};
use crate::connector::{StreamPublisher, StreamSubscriber, Subscription};
use crate::error::{DataflowError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

// ==================== Scalar ====================

struct ScalarValue<T> {
    value: Option<Result<T>>,
    latched: bool,
}

struct ScalarSlot<T> {
    port: PortRef,
    value: Mutex<ScalarValue<T>>,
}

impl<T: Send + 'static> PortPurge for ScalarSlot<T> {
    fn purge(&self) {
        let mut slot = self.value.lock();
        slot.value = None;
        slot.latched = true;
        self.port.block();
    }
}

/// Single-shot input port holding at most one value.
pub struct ScalarInput<T> {
    slot: Arc<ScalarSlot<T>>,
}

impl<T> Clone for ScalarInput<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: Send + 'static> ScalarInput<T> {
    pub(crate) fn new(core: &Arc<NodeCore>) -> Self {
        let slot = Arc::new(ScalarSlot {
            port: PortRef::register(core, false),
            value: Mutex::new(ScalarValue {
                value: None,
                latched: false,
            }),
        });
        core.add_purger(slot.clone());
        Self { slot }
    }

    fn settle(&self, value: Result<T>) -> Result<()> {
        let firing = {
            let mut slot = self.slot.value.lock();
            if slot.latched {
                return Err(DataflowError::PortClosed);
            }
            if slot.value.is_some() {
                return Err(DataflowError::PortOccupied);
            }
            slot.value = Some(value);
            self.slot.port.unblock()
        };
        firing.submit();
        Ok(())
    }

    /// Deliver the value. A second post before the node consumed the first is
    /// a protocol violation.
    pub fn post(&self, value: T) -> Result<()> {
        self.settle(Ok(value))
    }

    /// Deliver an upstream failure. The port becomes ready and reading it
    /// yields `error`.
    pub fn fail(&self, error: DataflowError) -> Result<()> {
        self.settle(Err(error))
    }

    /// Remove the value
    pub fn take(&self) -> Result<T> {
        self.slot
            .value
            .lock()
            .value
            .take()
            .unwrap_or(Err(DataflowError::PortEmpty))
    }

    pub fn is_ready(&self) -> bool {
        self.slot.port.is_ready()
    }

    pub fn id(&self) -> PortId {
        self.slot.port.id()
    }
}

impl<T: Clone + Send + 'static> ScalarInput<T> {
    /// Read the value without removing it
    pub fn current(&self) -> Result<T> {
        match &self.slot.value.lock().value {
            Some(value) => value.clone(),
            None => Err(DataflowError::PortEmpty),
        }
    }

    /// Feed this port from a completion: its value is posted, its error is
    /// delivered through [`fail`](Self::fail).
    pub fn connect(&self, source: &Completion<T>) -> CompletionSubscription {
        let port = self.clone();
        source.subscribe(move |outcome| {
            let id = port.id();
            let delivered = match outcome {
                Ok(value) => port.post(value),
                Err(e) => port.fail(e),
            };
            if let Err(e) = delivered {
                tracing::warn!("Completion not delivered to {:?}: {}", id, e);
            }
        })
    }
}

// ==================== Permits ====================

struct PermitSlot {
    port: PortRef,
    permits: Mutex<u64>,
}

impl PortPurge for PermitSlot {
    fn purge(&self) {
        let mut permits = self.permits.lock();
        *permits = permits.saturating_sub(1);
        if *permits == 0 {
            self.port.block();
        }
    }
}

/// Counting-semaphore port: ready while it holds permits, and each firing of
/// an actor consumes one.
#[derive(Clone)]
pub struct PermitPort {
    slot: Arc<PermitSlot>,
}

impl PermitPort {
    pub(crate) fn new(core: &Arc<NodeCore>, initial: u64) -> Self {
        let slot = Arc::new(PermitSlot {
            port: PortRef::register(core, initial > 0),
            permits: Mutex::new(initial),
        });
        core.add_purger(slot.clone());
        Self { slot }
    }

    /// Add `n` permits
    pub fn release(&self, n: u64) {
        if n == 0 {
            return;
        }
        let firing = {
            let mut permits = self.slot.permits.lock();
            let was_empty = *permits == 0;
            *permits = permits.saturating_add(n);
            if was_empty {
                self.slot.port.unblock()
            } else {
                super::core::Firing::none()
            }
        };
        firing.submit();
    }

    pub fn available(&self) -> u64 {
        *self.slot.permits.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.slot.port.is_ready()
    }

    pub fn id(&self) -> PortId {
        self.slot.port.id()
    }
}

// ==================== Stream ====================

struct StreamState<T> {
    tokens: VecDeque<T>,
    /// Demand requested upstream and not yet delivered
    requested: usize,
    subscription: Option<Subscription>,
    outcome: Option<Result<()>>,
    /// The action already removed this round's item with `take`
    consumed: bool,
    /// Keep the front item for the next round
    pushback: bool,
}

struct StreamSlot<T> {
    port: PortRef,
    capacity: usize,
    state: Mutex<StreamState<T>>,
}

impl<T> StreamSlot<T> {
    /// Top demand back up to the free capacity
    fn refill(&self, state: &mut StreamState<T>) -> Option<(Subscription, u64)> {
        if state.outcome.is_some() {
            return None;
        }
        let subscription = state.subscription.as_ref()?;
        let free = self
            .capacity
            .saturating_sub(state.tokens.len() + state.requested);
        if free == 0 {
            return None;
        }
        state.requested += free;
        Some((subscription.clone(), free as u64))
    }

    fn close(&self, outcome: Result<()>) -> bool {
        let firing = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            state.subscription = None;
            self.port.unblock()
        };
        firing.submit();
        true
    }
}

impl<T: Send + 'static> PortPurge for StreamSlot<T> {
    fn purge(&self) {
        let demand = {
            let mut state = self.state.lock();
            let consume = !state.consumed && !state.pushback;
            state.consumed = false;
            state.pushback = false;
            let demand = if consume && state.tokens.pop_front().is_some() {
                self.refill(&mut state)
            } else {
                None
            };
            if state.tokens.is_empty() && state.outcome.is_none() {
                self.port.block();
            }
            demand
        };
        request_upstream(demand);
    }
}

fn request_upstream(demand: Option<(Subscription, u64)>) {
    if let Some((subscription, n)) = demand {
        if let Err(e) = subscription.request(n) {
            tracing::warn!("Upstream request failed: {}", e);
        }
    }
}

/// Buffered input port fed by a stream publisher or by direct posts.
///
/// When subscribed, it keeps exactly its free capacity requested upstream,
/// so a fast producer can never overrun it.
pub struct StreamInput<T> {
    slot: Arc<StreamSlot<T>>,
}

impl<T> Clone for StreamInput<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: Send + 'static> StreamInput<T> {
    pub(crate) fn new(core: &Arc<NodeCore>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DataflowError::InvalidCapacity(0));
        }
        let slot = Arc::new(StreamSlot {
            port: PortRef::register(core, false),
            capacity,
            state: Mutex::new(StreamState {
                tokens: VecDeque::with_capacity(capacity.min(1024)),
                requested: 0,
                subscription: None,
                outcome: None,
                consumed: false,
                pushback: false,
            }),
        });
        core.add_purger(slot.clone());
        Ok(Self { slot })
    }

    /// Append an item directly, bypassing any subscription
    pub fn post(&self, item: T) -> Result<()> {
        let firing = {
            let mut state = self.slot.state.lock();
            if state.outcome.is_some() {
                return Err(DataflowError::StreamClosed);
            }
            if state.tokens.len() + state.requested >= self.slot.capacity {
                return Err(DataflowError::BufferFull(self.slot.capacity));
            }
            state.tokens.push_back(item);
            self.slot.port.unblock()
        };
        firing.submit();
        Ok(())
    }

    /// Remove the oldest item now, requesting a replacement upstream.
    ///
    /// Inside an actor round this consumes the round's item: the end of the
    /// round then removes nothing more from this port.
    pub fn take(&self) -> Option<T> {
        let (item, demand) = {
            let mut state = self.slot.state.lock();
            let item = state.tokens.pop_front();
            let demand = if item.is_some() {
                state.consumed = true;
                self.slot.refill(&mut state)
            } else {
                None
            };
            (item, demand)
        };
        request_upstream(demand);
        item
    }

    /// Keep the current item: the end of this round leaves it in place, so
    /// the next round sees it again.
    pub fn pushback(&self) {
        self.slot.state.lock().pushback = true;
    }

    /// Mark end of input for directly fed ports
    pub fn complete(&self) -> bool {
        self.slot.close(Ok(()))
    }

    pub fn complete_exceptionally(&self, error: DataflowError) -> bool {
        self.slot.close(Err(error))
    }

    /// Subscribe this port to `publisher`
    pub fn subscribe_to<P>(&self, publisher: &P) -> Result<Subscription>
    where
        P: StreamPublisher<T> + ?Sized,
    {
        publisher.subscribe(Arc::new(InputSubscriber {
            slot: self.slot.clone(),
        }))
    }

    pub fn len(&self) -> usize {
        self.slot.state.lock().tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slot.capacity
    }

    /// Upstream finished and every buffered item has been taken
    pub fn is_completed(&self) -> bool {
        let state = self.slot.state.lock();
        state.outcome.is_some() && state.tokens.is_empty()
    }

    pub fn completion_error(&self) -> Option<DataflowError> {
        match &self.slot.state.lock().outcome {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.slot.port.is_ready()
    }

    pub fn id(&self) -> PortId {
        self.slot.port.id()
    }
}

impl<T: Clone + Send + 'static> StreamInput<T> {
    /// The oldest item without removing it. In an actor round this is the
    /// item the round consumes when it ends.
    pub fn current(&self) -> Option<T> {
        self.slot.state.lock().tokens.front().cloned()
    }
}

struct InputSubscriber<T> {
    slot: Arc<StreamSlot<T>>,
}

impl<T: Send + 'static> StreamSubscriber<T> for InputSubscriber<T> {
    fn on_subscribe(&self, subscription: Subscription) {
        let demand = {
            let mut state = self.slot.state.lock();
            if state.subscription.is_some() || state.outcome.is_some() {
                drop(state);
                subscription.cancel();
                return;
            }
            state.subscription = Some(subscription);
            self.slot.refill(&mut state)
        };
        request_upstream(demand);
    }

    fn on_next(&self, item: T) {
        let firing = {
            let mut state = self.slot.state.lock();
            state.requested = state.requested.saturating_sub(1);
            state.tokens.push_back(item);
            self.slot.port.unblock()
        };
        firing.submit();
    }

    fn on_complete(&self) {
        self.slot.close(Ok(()));
    }

    fn on_error(&self, error: DataflowError) {
        self.slot.close(Err(error));
    }
}
