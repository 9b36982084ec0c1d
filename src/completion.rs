//! One-shot completion signal.
//!
//! [`Completion<T>`] is the single settle-once primitive of the crate. A node's
//! result, a dataflow's termination and the scalar connector are all
//! completions, differing only in payload type (`()` when there is none).
//!
//! # Semantics
//!
//! - The first `complete` / `complete_exceptionally` wins; later calls return
//!   `false` and change nothing.
//! - Observers registered before settlement are notified once, in
//!   subscription order, outside the internal lock.
//! - Observers registered after settlement are notified synchronously during
//!   `subscribe`.
//! - `blocking_await` waits against a fixed deadline, so spurious wakeups
//!   never extend the timeout.

use crate::connector::DeliveryGate;
use crate::error::{DataflowError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Observer<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

struct PendingObserver<T> {
    gate: Arc<DeliveryGate>,
    observer: Observer<T>,
}

struct State<T> {
    outcome: Option<Result<T>>,
    observers: Vec<PendingObserver<T>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
}

/// A completion signal carrying an optional result value or an error.
pub struct Completion<T> {
    inner: Arc<Inner<T>>,
}

/// Handle returned by [`Completion::subscribe`].
#[derive(Clone)]
pub struct CompletionSubscription {
    gate: Option<Arc<DeliveryGate>>,
}

impl CompletionSubscription {
    /// Stop the observer from being notified.
    ///
    /// Idempotent. A notification already in progress on another thread
    /// finishes before this returns.
    pub fn cancel(&self) {
        if let Some(gate) = &self.gate {
            gate.close();
        }
    }

    /// Whether the observer can no longer be notified (cancelled or already
    /// notified)
    pub fn is_cancelled(&self) -> bool {
        self.gate.as_ref().map(|g| g.is_closed()).unwrap_or(true)
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Completion<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    outcome: None,
                    observers: Vec::new(),
                }),
                settled: Condvar::new(),
            }),
        }
    }

    /// A completion that already holds `value`
    pub fn completed(value: T) -> Self {
        let completion = Self::new();
        completion.complete(value);
        completion
    }

    /// A completion that already holds `error`
    pub fn failed(error: DataflowError) -> Self {
        let completion = Self::new();
        completion.complete_exceptionally(error);
        completion
    }

    /// Settle with a value. Returns `true` if this call settled it.
    pub fn complete(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with an error. Returns `true` if this call settled it.
    pub fn complete_exceptionally(&self, error: DataflowError) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: Result<T>) -> bool {
        let observers = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.observers)
        };
        self.inner.settled.notify_all();

        for PendingObserver { gate, observer } in observers {
            let outcome = outcome.clone();
            gate.deliver_final(move || observer(outcome));
        }
        true
    }

    /// Register an observer of the outcome.
    ///
    /// If already settled, the observer runs before this returns.
    pub fn subscribe<F>(&self, observer: F) -> CompletionSubscription
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if let Some(outcome) = state.outcome.clone() {
            drop(state);
            observer(outcome);
            return CompletionSubscription { gate: None };
        }

        state.observers.retain(|pending| !pending.gate.is_closed());
        let gate = Arc::new(DeliveryGate::new());
        state.observers.push(PendingObserver {
            gate: gate.clone(),
            observer: Box::new(observer),
        });
        CompletionSubscription { gate: Some(gate) }
    }

    pub fn is_completed(&self) -> bool {
        self.inner.state.lock().outcome.is_some()
    }

    pub fn is_completed_exceptionally(&self) -> bool {
        matches!(self.inner.state.lock().outcome, Some(Err(_)))
    }

    /// The stored error, if settled exceptionally
    pub fn completion_error(&self) -> Option<DataflowError> {
        match &self.inner.state.lock().outcome {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// The stored outcome without waiting
    pub fn try_get(&self) -> Option<Result<T>> {
        self.inner.state.lock().outcome.clone()
    }

    /// Wait up to `timeout` for settlement.
    ///
    /// Returns `true` once settled (with a value or an error), `false` on
    /// timeout.
    pub fn blocking_await(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.state.lock();
        while state.outcome.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.inner.settled.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.settled.wait(&mut state),
            }
        }
        state.outcome.is_some()
    }

    /// Wait for settlement and return the value, or the stored error
    pub fn get(&self) -> Result<T> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.inner.settled.wait(&mut state);
        }
    }

    /// Like [`get`](Self::get), failing with [`DataflowError::Timeout`] if
    /// `timeout` elapses first
    pub fn get_timeout(&self, timeout: Duration) -> Result<T> {
        if !self.blocking_await(timeout) {
            return Err(DataflowError::Timeout(timeout));
        }
        match self.try_get() {
            Some(outcome) => outcome,
            None => Err(DataflowError::Timeout(timeout)),
        }
    }

    /// Number of observers still waiting for settlement
    pub fn observer_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .observers
            .iter()
            .filter(|p| !p.gate.is_closed())
            .count()
    }
}

impl Completion<()> {
    /// Wait for a payload-free signal, returning its error if it failed
    pub fn join(&self) -> Result<()> {
        self.get()
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        let status = match &state.outcome {
            None => "pending",
            Some(Ok(_)) => "completed",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Completion")
            .field("status", &status)
            .field("observers", &state.observers.len())
            .finish()
    }
}
