//! Stream subscribers that record what they receive

use dataflow_rs::{DataflowError, StreamSubscriber, Subscription};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Completed,
    Failed(String),
}

struct Recorded<T> {
    items: Vec<T>,
    signal: Option<Signal>,
    subscription: Option<Subscription>,
}

/// Records items and the terminal signal; requests `initial` items on
/// subscribe.
pub struct RecordingSubscriber<T> {
    initial: u64,
    state: Mutex<Recorded<T>>,
    changed: Condvar,
}

impl<T: Clone + Send + 'static> RecordingSubscriber<T> {
    pub fn new(initial: u64) -> Arc<Self> {
        Arc::new(Self {
            initial,
            state: Mutex::new(Recorded {
                items: Vec::new(),
                signal: None,
                subscription: None,
            }),
            changed: Condvar::new(),
        })
    }

    pub fn items(&self) -> Vec<T> {
        self.state.lock().items.clone()
    }

    pub fn signal(&self) -> Option<Signal> {
        self.state.lock().signal.clone()
    }

    pub fn request(&self, n: u64) {
        let subscription = self.state.lock().subscription.clone();
        subscription
            .expect("not subscribed")
            .request(n)
            .expect("positive demand");
    }

    pub fn cancel(&self) {
        if let Some(subscription) = self.state.lock().subscription.clone() {
            subscription.cancel();
        }
    }

    /// Wait until the terminal signal arrives
    pub fn await_signal(&self, timeout: Duration) -> Option<Signal> {
        let mut state = self.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        while state.signal.is_none() {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.signal.clone()
    }

    /// Wait until at least `count` items arrived
    pub fn await_items(&self, count: usize, timeout: Duration) -> Vec<T> {
        let mut state = self.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        while state.items.len() < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.items.clone()
    }
}

impl<T: Clone + Send + 'static> StreamSubscriber<T> for RecordingSubscriber<T> {
    fn on_subscribe(&self, subscription: Subscription) {
        self.state.lock().subscription = Some(subscription.clone());
        if self.initial > 0 {
            subscription.request(self.initial).expect("positive demand");
        }
    }

    fn on_next(&self, item: T) {
        self.state.lock().items.push(item);
        self.changed.notify_all();
    }

    fn on_complete(&self) {
        self.state.lock().signal = Some(Signal::Completed);
        self.changed.notify_all();
    }

    fn on_error(&self, error: DataflowError) {
        self.state.lock().signal = Some(Signal::Failed(error.to_string()));
        self.changed.notify_all();
    }
}
