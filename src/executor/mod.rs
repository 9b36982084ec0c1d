//! Task executors.
//!
//! Nodes never run their actions on the thread that made them ready; they hand
//! a task to an [`Executor`]. The crate ships three:
//!
//! - [`ThreadPool`]: fixed worker threads fed by a crossbeam channel. The shared
//!   default pool returned by [`default_executor`] is one of these.
//! - [`InlineExecutor`]: runs the task on the submitting thread, queueing
//!   re-entrant submissions on a thread-local trampoline so an actor that keeps
//!   re-arming itself does not grow the stack.
//! - `TokioExecutor` (feature `tokio`): forwards to a tokio runtime handle.

mod pool;
#[cfg(feature = "tokio")]
mod tokio_runtime;

pub use pool::ThreadPool;
#[cfg(feature = "tokio")]
pub use tokio_runtime::TokioExecutor;

use crate::config::ExecutorConfig;
use crate::error::Result;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run tasks asynchronously with respect to the submitter.
#[cfg_attr(test, mockall::automock)]
pub trait Executor: Send + Sync {
    /// Submit a task. An error means the task was dropped without running.
    fn execute(&self, task: Task) -> Result<()>;
}

static DEFAULT_POOL: OnceLock<Arc<ThreadPool>> = OnceLock::new();

/// The shared default pool, sized from [`ExecutorConfig::default`] and created
/// on first use.
///
/// Falls back to [`InlineExecutor`] if no worker thread could be spawned.
pub fn default_executor() -> Arc<dyn Executor> {
    if let Some(pool) = DEFAULT_POOL.get() {
        return pool.clone();
    }

    match ThreadPool::from_config(&ExecutorConfig::default()) {
        Ok(pool) => {
            // A racing initializer may have won; its pool is the one kept.
            let _ = DEFAULT_POOL.set(Arc::new(pool));
            match DEFAULT_POOL.get() {
                Some(pool) => pool.clone(),
                None => Arc::new(InlineExecutor),
            }
        }
        Err(e) => {
            tracing::error!("Failed to start default thread pool, running inline: {}", e);
            Arc::new(InlineExecutor)
        }
    }
}

thread_local! {
    static TRAMPOLINE: RefCell<Option<VecDeque<Task>>> = const { RefCell::new(None) };
}

/// Runs tasks on the calling thread.
///
/// The first submission on a thread runs immediately; submissions made while
/// it runs are queued and drained in order before `execute` returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

struct TrampolineGuard;

impl Drop for TrampolineGuard {
    fn drop(&mut self) {
        TRAMPOLINE.with(|slot| *slot.borrow_mut() = None);
    }
}

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        let first = TRAMPOLINE.with(|slot| match slot.borrow_mut().as_mut() {
            Some(queue) => {
                queue.push_back(task);
                None
            }
            None => Some(task),
        });
        let Some(first) = first else {
            return Ok(());
        };

        TRAMPOLINE.with(|slot| *slot.borrow_mut() = Some(VecDeque::new()));
        let _guard = TrampolineGuard;

        let mut next = Some(first);
        while let Some(task) = next {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                tracing::warn!(
                    "Inline task panicked: {}",
                    crate::error::DataflowError::from_panic(payload)
                );
            }
            next = TRAMPOLINE.with(|slot| slot.borrow_mut().as_mut().and_then(|q| q.pop_front()));
        }
        Ok(())
    }
}
