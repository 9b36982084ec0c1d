//! Dataflow: the completion tree.
//!
//! A [`Dataflow`] groups nodes and nested dataflows. Every non-daemon node
//! enters its dataflow when created and leaves it when it completes; the
//! dataflow completes when its last child leaves, and then leaves its own
//! parent. A failing child completes every dataflow up the parent chain
//! exceptionally, first error wins at each level.
//!
//! # Collaborators
//!
//! The root owns the executor and the delay timer. Nested dataflows inherit
//! both by reference. A timer the root created lazily (on the first actor
//! delay) is shut down when the root completes; an injected timer is left to
//! its owner.

use crate::completion::{Completion, CompletionSubscription};
use crate::config::{RuntimeConfig, TimerConfig, DEFAULT_CONNECTOR_CAPACITY};
use crate::error::{DataflowError, Result};
use crate::executor::{default_executor, Executor, ThreadPool};
use crate::node::{ChildRef, DataflowId};
use crate::timer::Timer;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Children {
    live: BTreeMap<u64, ChildRef>,
    next_seq: u64,
}

struct DataflowInner {
    id: DataflowId,
    name: Option<String>,
    /// Parent and this dataflow's sequence number in it
    parent: Option<(Dataflow, u64)>,
    children: Mutex<Children>,
    completion: Completion<()>,
    left_parent: AtomicBool,
    executor: Arc<dyn Executor>,
    timer: Mutex<Option<Arc<Timer>>>,
    /// Whether `timer` was created here and must be shut down on completion
    timer_owned: AtomicBool,
    /// Set at the root once it has emptied; no timer is created after that
    timer_released: AtomicBool,
    timer_config: TimerConfig,
    default_capacity: usize,
}

/// A nestable group of nodes tracked for cascading completion.
#[derive(Clone)]
pub struct Dataflow {
    inner: Arc<DataflowInner>,
}

impl Dataflow {
    /// A root dataflow on the shared default executor
    pub fn root() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> DataflowBuilder {
        DataflowBuilder::default()
    }

    /// A child of `parent`, sharing its executor and timer
    pub fn nested(parent: &Dataflow) -> Self {
        Self::builder().parent(parent).build()
    }

    pub fn id(&self) -> DataflowId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn parent(&self) -> Option<&Dataflow> {
        self.inner.parent.as_ref().map(|(parent, _)| parent)
    }

    // ==================== Children ====================

    /// Register a child and return its sequence number
    pub(crate) fn enter(&self, child: ChildRef) -> u64 {
        let mut children = self.inner.children.lock();
        let seq = children.next_seq;
        children.next_seq += 1;
        children.live.insert(seq, child);
        tracing::trace!(dataflow = %self.inner.id, seq, ?child, "child entered");
        seq
    }

    /// Deregister a child. The last one out completes the dataflow.
    pub(crate) fn leave(&self, seq: u64) {
        {
            let mut children = self.inner.children.lock();
            if children.live.remove(&seq).is_none() || !children.live.is_empty() {
                return;
            }
        }
        self.on_empty();
    }

    fn on_empty(&self) {
        if self.inner.completion.complete(()) {
            tracing::debug!(dataflow = %self.inner.id, "dataflow completed");
        }

        let owned = {
            let mut slot = self.inner.timer.lock();
            if self.inner.parent.is_none() {
                self.inner.timer_released.store(true, Ordering::Release);
            }
            if self.inner.timer_owned.swap(false, Ordering::AcqRel) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(timer) = owned {
            timer.shutdown();
        }

        if let Some((parent, seq)) = &self.inner.parent {
            if !self.inner.left_parent.swap(true, Ordering::AcqRel) {
                parent.leave(*seq);
            }
        }
    }

    /// Number of children that have not left yet
    pub fn active_children(&self) -> usize {
        self.inner.children.lock().live.len()
    }

    /// Live children in the order they entered
    pub fn children(&self) -> Vec<ChildRef> {
        self.inner.children.lock().live.values().copied().collect()
    }

    // ==================== Completion ====================

    /// Complete exceptionally and forward `error` to the parent chain.
    ///
    /// Returns `false` if this dataflow had already completed; the error is
    /// then dropped and not forwarded.
    pub fn fail(&self, error: DataflowError) -> bool {
        if !self.inner.completion.complete_exceptionally(error.clone()) {
            tracing::trace!(dataflow = %self.inner.id, "dropping later failure: {}", error);
            return false;
        }
        tracing::debug!(dataflow = %self.inner.id, "dataflow failed: {}", error);
        if let Some((parent, _)) = &self.inner.parent {
            parent.fail(error);
        }
        true
    }

    pub fn completion(&self) -> &Completion<()> {
        &self.inner.completion
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completion.is_completed()
    }

    /// Wait up to `timeout` for completion, successful or not
    pub fn blocking_await(&self, timeout: Duration) -> bool {
        self.inner.completion.blocking_await(timeout)
    }

    /// Wait for completion, returning the first error of the tree below
    pub fn join(&self) -> Result<()> {
        self.inner.completion.get()
    }

    pub fn join_timeout(&self, timeout: Duration) -> Result<()> {
        self.inner.completion.get_timeout(timeout)
    }

    pub fn subscribe<F>(&self, observer: F) -> CompletionSubscription
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.inner.completion.subscribe(observer)
    }

    // ==================== Collaborators ====================

    pub fn executor(&self) -> Arc<dyn Executor> {
        self.inner.executor.clone()
    }

    /// The delay timer: this dataflow's own, else the parent's, else one
    /// created at the root on first use. Fails once the root has completed
    /// and released its timer.
    pub fn timer(&self) -> Result<Arc<Timer>> {
        let mut slot = self.inner.timer.lock();
        if let Some(timer) = slot.as_ref() {
            return Ok(timer.clone());
        }
        if let Some((parent, _)) = &self.inner.parent {
            drop(slot);
            return parent.timer();
        }
        if self.inner.timer_released.load(Ordering::Acquire) {
            return Err(DataflowError::Timer(format!(
                "dataflow {} already completed",
                self.inner.id
            )));
        }

        let timer = Arc::new(Timer::from_config(&self.inner.timer_config)?);
        *slot = Some(timer.clone());
        self.inner.timer_owned.store(true, Ordering::Release);
        Ok(timer)
    }

    /// Capacity for connectors created without an explicit one
    pub fn default_capacity(&self) -> usize {
        self.inner.default_capacity
    }
}

impl std::fmt::Debug for Dataflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataflow")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("children", &self.active_children())
            .field("completion", &self.inner.completion)
            .finish()
    }
}

/// Builder for [`Dataflow`].
#[derive(Default)]
pub struct DataflowBuilder {
    name: Option<String>,
    parent: Option<Dataflow>,
    executor: Option<Arc<dyn Executor>>,
    timer: Option<Arc<Timer>>,
    timer_config: Option<TimerConfig>,
    default_capacity: Option<usize>,
}

impl DataflowBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Nest the new dataflow under `parent`
    pub fn parent(mut self, parent: &Dataflow) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Use `timer` for delays instead of creating one. The caller keeps
    /// ownership: it is not shut down when the dataflow completes.
    pub fn timer(mut self, timer: Arc<Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Apply a runtime configuration: a dedicated thread pool, the timer
    /// thread name and the default connector capacity.
    pub fn config(mut self, config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPool::from_config(&config.executor)?;
        self.executor = Some(Arc::new(pool));
        self.timer_config = Some(config.timer.clone());
        self.default_capacity = Some(config.connectors.default_capacity);
        Ok(self)
    }

    pub fn build(self) -> Dataflow {
        let id = DataflowId::next();
        let executor = self
            .executor
            .or_else(|| self.parent.as_ref().map(|p| p.executor()))
            .unwrap_or_else(default_executor);
        let default_capacity = self
            .default_capacity
            .or_else(|| self.parent.as_ref().map(|p| p.default_capacity()))
            .unwrap_or(DEFAULT_CONNECTOR_CAPACITY);
        let parent = self
            .parent
            .map(|p| {
                let seq = p.enter(ChildRef::Dataflow(id));
                (p, seq)
            });

        tracing::debug!(
            dataflow = %id,
            name = ?self.name,
            parent = ?parent.as_ref().map(|(p, _)| p.id()),
            "dataflow created"
        );

        Dataflow {
            inner: Arc::new(DataflowInner {
                id,
                name: self.name,
                parent,
                children: Mutex::new(Children {
                    live: BTreeMap::new(),
                    next_seq: 0,
                }),
                completion: Completion::new(),
                left_parent: AtomicBool::new(false),
                executor,
                timer: Mutex::new(self.timer),
                timer_owned: AtomicBool::new(false),
                timer_released: AtomicBool::new(false),
                timer_config: self.timer_config.unwrap_or_default(),
                default_capacity,
            }),
        }
    }
}
