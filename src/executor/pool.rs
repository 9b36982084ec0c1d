//! Fixed-size worker pool.
//!
//! Each worker blocks on a shared crossbeam receiver and runs tasks until the
//! sending side is dropped. Shutdown drops the sender, so queued tasks still
//! drain before the workers exit.

use super::{Executor, Task};
use crate::config::{ExecutorConfig, DEFAULT_WORKER_PREFIX};
use crate::error::{DataflowError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

/// A pool of worker threads.
pub struct ThreadPool {
    sender: RwLock<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    prefix: String,
    threads: usize,
}

impl ThreadPool {
    /// Start `threads` workers named `dataflow-worker-{index}`
    pub fn new(threads: usize) -> Result<Self> {
        Self::with_prefix(threads, DEFAULT_WORKER_PREFIX)
    }

    /// Start a pool sized and named from configuration
    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        Self::with_prefix(config.resolved_threads(), &config.thread_name_prefix)
    }

    pub fn with_prefix(threads: usize, prefix: &str) -> Result<Self> {
        if threads == 0 {
            return Err(DataflowError::Config(
                "Thread pool needs at least one worker".to_string(),
            ));
        }

        let (tx, rx) = unbounded::<Task>();
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", prefix, index))
                .spawn(move || worker_loop(rx))
                .map_err(|e| {
                    DataflowError::Executor(format!("Failed to spawn worker {}: {}", index, e))
                })?;
            workers.push(handle);
        }

        tracing::info!("Thread pool '{}' started with {} workers", prefix, threads);

        Ok(Self {
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(workers),
            prefix: prefix.to_string(),
            threads,
        })
    }

    /// Number of worker threads
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Stop accepting tasks, let queued ones drain, and join the workers.
    ///
    /// Safe to call from a worker thread; that worker is not joined.
    pub fn shutdown(&self) {
        let Some(tx) = self.sender.write().take() else {
            return;
        };
        drop(tx);

        let me = thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!("Worker of pool '{}' exited abnormally", self.prefix);
            }
        }
        tracing::info!("Thread pool '{}' stopped", self.prefix);
    }
}

impl Executor for ThreadPool {
    fn execute(&self, task: Task) -> Result<()> {
        let guard = self.sender.read();
        match guard.as_ref() {
            Some(tx) => tx
                .send(task)
                .map_err(|_| DataflowError::Executor(format!("Pool '{}' disconnected", self.prefix))),
            None => Err(DataflowError::Executor(format!(
                "Pool '{}' is shut down",
                self.prefix
            ))),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("prefix", &self.prefix)
            .field("threads", &self.threads)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn worker_loop(rx: Receiver<Task>) {
    while let Ok(task) = rx.recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            tracing::error!("Worker task panicked: {}", DataflowError::from_panic(payload));
        }
    }
}
