//! Delay timer.
//!
//! A [`Timer`] owns one dedicated thread that sleeps until the earliest
//! deadline in a heap and then runs the callback scheduled for it. Callbacks
//! run on the timer thread, so they should do little more than hand work to
//! an executor (resuming a suspended actor does exactly that).
//!
//! There is no process-wide timer. The root [`Dataflow`](crate::Dataflow) owns
//! one and nested dataflows share it by reference.

use crate::config::{TimerConfig, DEFAULT_TIMER_THREAD};
use crate::error::{DataflowError, Result};
use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct TimerState {
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    callbacks: HashMap<u64, Callback>,
    next_id: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// A single-threaded deadline scheduler.
pub struct Timer {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

/// Handle to one scheduled callback.
#[derive(Clone)]
pub struct TimerHandle {
    shared: Weak<Shared>,
    id: u64,
}

impl Timer {
    /// Start a timer thread with the default name
    pub fn new() -> Result<Self> {
        Self::with_name(DEFAULT_TIMER_THREAD)
    }

    pub fn from_config(config: &TimerConfig) -> Result<Self> {
        Self::with_name(&config.thread_name)
    }

    pub fn with_name(name: &str) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState {
                deadlines: BinaryHeap::new(),
                callbacks: HashMap::new(),
                next_id: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || timer_loop(worker))
            .map_err(|e| DataflowError::Timer(format!("Failed to spawn timer thread: {}", e)))?;

        tracing::info!("Timer '{}' started", name);

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
            name: name.to_string(),
        })
    }

    /// Run `callback` on the timer thread once `delay` has elapsed.
    ///
    /// A delay past the clock's range never fires; the callback stays pending
    /// until it is cancelled or the timer shuts down.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> Result<TimerHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now().checked_add(delay);
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(DataflowError::Timer(format!(
                "Timer '{}' is shut down",
                self.name
            )));
        }
        let id = state.next_id;
        state.next_id += 1;
        if let Some(deadline) = deadline {
            state.deadlines.push(Reverse((deadline, id)));
        }
        state.callbacks.insert(id, Box::new(callback));
        drop(state);

        self.shared.wake.notify_one();
        Ok(TimerHandle {
            shared: Arc::downgrade(&self.shared),
            id,
        })
    }

    /// Number of callbacks that have not yet run or been cancelled
    pub fn pending(&self) -> usize {
        self.shared.state.lock().callbacks.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Stop the timer thread. Pending callbacks are dropped without running.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.callbacks.clear();
            state.deadlines.clear();
        }
        self.shared.wake.notify_all();

        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!("Timer '{}' thread exited abnormally", self.name);
            }
        }
        tracing::info!("Timer '{}' stopped", self.name);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}

impl TimerHandle {
    /// Prevent the callback from running.
    ///
    /// Returns `true` if the callback was still pending. Idempotent.
    pub fn cancel(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.state.lock().callbacks.remove(&self.id).is_some(),
            None => false,
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimerHandle({})", self.id)
    }
}

fn timer_loop(shared: Arc<Shared>) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }

        let Some(&Reverse((deadline, id))) = state.deadlines.peek() else {
            shared.wake.wait(&mut state);
            continue;
        };

        if deadline > Instant::now() {
            // Woken early by a new, possibly earlier, deadline or by shutdown
            let _ = shared.wake.wait_until(&mut state, deadline);
            continue;
        }

        state.deadlines.pop();
        if let Some(callback) = state.callbacks.remove(&id) {
            drop(state);
            if let Err(payload) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback))
            {
                tracing::error!("Timer callback panicked: {}", DataflowError::from_panic(payload));
            }
            state = shared.state.lock();
        }
    }
}
