//! Subscription handles and the delivery gate behind them.

use crate::error::{DataflowError, Result};
use parking_lot::ReentrantMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Serializes deliveries to one subscriber against its cancellation.
///
/// A delivery holds the gate for the duration of the subscriber callback;
/// closing the gate waits for that callback to return, and any delivery that
/// acquires the gate afterwards is dropped. The lock is re-entrant so a
/// subscriber may cancel itself from inside its own callback.
pub(crate) struct DeliveryGate {
    closed: AtomicBool,
    lock: ReentrantMutex<()>,
}

impl DeliveryGate {
    pub(crate) fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            lock: ReentrantMutex::new(()),
        }
    }

    /// Run `f` unless the gate is closed. Returns whether `f` ran.
    pub(crate) fn deliver(&self, f: impl FnOnce()) -> bool {
        let _held = self.lock.lock();
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        f();
        true
    }

    /// Deliver a terminal signal: close the gate, then run `f` if this call
    /// was the one that closed it.
    pub(crate) fn deliver_final(&self, f: impl FnOnce()) -> bool {
        let _held = self.lock.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        f();
        true
    }

    /// Close the gate. Returns `true` if this call closed it.
    pub(crate) fn close(&self) -> bool {
        let _held = self.lock.lock();
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// The connector side of a subscription.
pub(crate) trait SubscriptionSource: Send + Sync {
    fn request(&self, id: u64, n: u64);
    fn cancel(&self, id: u64);
}

pub(crate) struct SubscriptionCore {
    pub(crate) id: u64,
    pub(crate) gate: DeliveryGate,
    source: Weak<dyn SubscriptionSource>,
}

impl SubscriptionCore {
    pub(crate) fn new(id: u64, source: Weak<dyn SubscriptionSource>) -> Arc<Self> {
        Arc::new(Self {
            id,
            gate: DeliveryGate::new(),
            source,
        })
    }
}

/// A subscriber's handle on its connector: outstanding demand and
/// cancellation.
#[derive(Clone)]
pub struct Subscription {
    core: Arc<SubscriptionCore>,
}

impl Subscription {
    pub(crate) fn new(core: Arc<SubscriptionCore>) -> Self {
        Self { core }
    }

    /// Ask for `n` more items.
    ///
    /// `n` must be positive. Requests on a cancelled or completed
    /// subscription are ignored.
    pub fn request(&self, n: u64) -> Result<()> {
        if n == 0 {
            return Err(DataflowError::InvalidDemand(n));
        }
        if self.core.gate.is_closed() {
            return Ok(());
        }
        if let Some(source) = self.core.source.upgrade() {
            source.request(self.core.id, n);
        }
        Ok(())
    }

    /// Detach from the connector.
    ///
    /// Idempotent. Once this returns, no further item or completion signal is
    /// delivered to the subscriber; a delivery already in flight on another
    /// thread finishes first.
    pub fn cancel(&self) {
        if self.core.gate.close() {
            if let Some(source) = self.core.source.upgrade() {
                source.cancel(self.core.id);
            }
        }
    }

    /// Whether the subscription was cancelled or has received its
    /// completion signal
    pub fn is_cancelled(&self) -> bool {
        self.core.gate.is_closed()
    }

    pub fn id(&self) -> u64 {
        self.core.id
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.core.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<(u64, u64)>>,
        cancels: Mutex<Vec<u64>>,
    }

    impl SubscriptionSource for Recorder {
        fn request(&self, id: u64, n: u64) {
            self.requests.lock().push((id, n));
        }
        fn cancel(&self, id: u64) {
            self.cancels.lock().push(id);
        }
    }

    fn subscription(source: &Arc<Recorder>, id: u64) -> Subscription {
        let weak: Weak<dyn SubscriptionSource> = Arc::downgrade(source) as Weak<dyn SubscriptionSource>;
        Subscription::new(SubscriptionCore::new(id, weak))
    }

    #[test]
    fn test_request_zero_is_rejected() {
        let source = Arc::new(Recorder::default());
        let sub = subscription(&source, 1);
        assert!(matches!(sub.request(0), Err(DataflowError::InvalidDemand(0))));
        sub.request(3).unwrap();
        assert_eq!(*source.requests.lock(), vec![(1, 3)]);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let source = Arc::new(Recorder::default());
        let sub = subscription(&source, 7);
        sub.cancel();
        sub.cancel();
        assert!(sub.is_cancelled());
        assert_eq!(*source.cancels.lock(), vec![7]);
        // Requests after cancel never reach the source
        sub.request(1).unwrap();
        assert!(source.requests.lock().is_empty());
    }

    #[test]
    fn test_gate_drops_delivery_after_close() {
        let gate = DeliveryGate::new();
        assert!(gate.deliver(|| {}));
        assert!(gate.close());
        assert!(!gate.close());
        assert!(!gate.deliver(|| panic!("delivered after close")));
        assert!(!gate.deliver_final(|| panic!("delivered after close")));
    }

    #[test]
    fn test_gate_reentrant_close() {
        let gate = DeliveryGate::new();
        let ran = gate.deliver(|| {
            assert!(gate.close());
        });
        assert!(ran);
        assert!(gate.is_closed());
    }
}
