//! Executor backed by a tokio runtime.

use super::{Executor, Task};
use crate::error::{DataflowError, Result};
use tokio::runtime::Handle;

/// Runs node actions on a tokio runtime's blocking pool, so an action may
/// block on a queue without stalling the runtime's async workers.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running inside
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| DataflowError::Executor(format!("No tokio runtime: {}", e)))
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        self.handle.spawn_blocking(task);
        Ok(())
    }
}
