//! Node scheduling core.
//!
//! [`NodeCore`] is the type-erased part of every node: its lifecycle state,
//! its transition and its action. The typed handles ([`Node`](super::Node),
//! [`Actor`](super::Actor)) wrap a core together with their result
//! completion.
//!
//! # Lifecycle
//!
//! ```text
//! Created --start--> Blocked --all ports ready--> Running --action returns-->
//!     one-shot: Completed
//!     actor:    Blocked (re-armed) | Suspended | Completed
//! Suspended --resume--> Blocked
//! ```
//!
//! # Locking
//!
//! Port storage locks are always taken before the scheduling lock, and the
//! scheduling lock before the action slot. Firing is decided under the
//! scheduling lock but the task is submitted only after every lock is
//! released, through the [`Firing`] returned by `unblock`.

use super::id::{NodeId, PortId};
use super::transition::{PortPurge, Transition, CONTROL_BIT};
use crate::dataflow::Dataflow;
use crate::error::{DataflowError, Result};
use crate::executor::Executor;
use crate::timer::TimerHandle;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Constructed, ports may be added, not yet started
    Created,
    /// Started and waiting for its ports to become ready
    Blocked,
    /// Action submitted or executing
    Running,
    /// Excluded from firing until resumed
    Suspended,
    /// Terminal
    Completed,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        self == NodeState::Completed
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeState::Created => "created",
            NodeState::Blocked => "blocked",
            NodeState::Running => "running",
            NodeState::Suspended => "suspended",
            NodeState::Completed => "completed",
        };
        f.write_str(name)
    }
}

pub(crate) type OnceAction = Box<dyn FnOnce(&Arc<NodeCore>) -> Result<()> + Send + 'static>;
pub(crate) type RepeatAction = Box<dyn FnMut(&Arc<NodeCore>) -> Result<()> + Send + 'static>;

/// What runs when the node fires.
pub(crate) enum Body {
    /// One-shot nodes: runs once, then the node completes
    Once(OnceAction),
    /// Actors: runs once per round until the actor completes
    Repeat(RepeatAction),
}

/// A firing decided under the scheduling lock, to be submitted after it is
/// released.
#[must_use = "a firing does nothing unless submitted"]
pub(crate) struct Firing(Option<Arc<NodeCore>>);

impl Firing {
    pub(crate) fn none() -> Self {
        Firing(None)
    }

    pub(crate) fn submit(self) {
        if let Some(core) = self.0 {
            core.submit();
        }
    }
}

struct Sched {
    state: NodeState,
    transition: Transition,
    suspend_requested: bool,
    resume_requested: bool,
    delay: Option<TimerHandle>,
}

pub(crate) type FailureHook = Box<dyn Fn(&DataflowError) + Send + Sync + 'static>;

pub(crate) struct NodeCore {
    id: NodeId,
    name: Option<String>,
    dataflow: Dataflow,
    /// Sequence number in the dataflow's child set; `None` for daemons
    seq: Option<u64>,
    executor: Arc<dyn Executor>,
    sched: Mutex<Sched>,
    body: Mutex<Option<Body>>,
    on_failure: FailureHook,
    this: Weak<NodeCore>,
}

impl NodeCore {
    pub(crate) fn new(
        dataflow: Dataflow,
        name: Option<String>,
        executor: Arc<dyn Executor>,
        daemon: bool,
        on_failure: FailureHook,
    ) -> Arc<Self> {
        let id = NodeId::next();
        let seq = if daemon {
            None
        } else {
            Some(dataflow.enter(crate::node::ChildRef::Node(id)))
        };
        tracing::trace!(node = %id, name = ?name, daemon, "node created in {}", dataflow.id());

        Arc::new_cyclic(|this| Self {
            id,
            name,
            dataflow,
            seq,
            executor,
            sched: Mutex::new(Sched {
                state: NodeState::Created,
                transition: Transition::new(),
                suspend_requested: false,
                resume_requested: false,
                delay: None,
            }),
            body: Mutex::new(None),
            on_failure,
            this: this.clone(),
        })
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn dataflow(&self) -> &Dataflow {
        &self.dataflow
    }

    pub(crate) fn is_daemon(&self) -> bool {
        self.seq.is_none()
    }

    pub(crate) fn state(&self) -> NodeState {
        self.sched.lock().state
    }

    pub(crate) fn port_count(&self) -> usize {
        self.sched.lock().transition.port_count()
    }

    // ==================== Ports ====================

    pub(crate) fn register_port(&self, ready: bool) -> PortId {
        let index = self.sched.lock().transition.register(ready);
        tracing::trace!(node = %self.id, port = index, ready, "port registered");
        PortId {
            node: self.id,
            index,
        }
    }

    pub(crate) fn add_purger(&self, purger: Arc<dyn PortPurge>) {
        let mut sched = self.sched.lock();
        if sched.state != NodeState::Completed {
            sched.transition.add_purger(purger);
        }
    }

    pub(crate) fn is_port_ready(&self, bit: usize) -> bool {
        self.sched.lock().transition.is_ready(bit)
    }

    pub(crate) fn block(&self, bit: usize) {
        let mut sched = self.sched.lock();
        if sched.state != NodeState::Completed && sched.transition.block(bit) {
            tracing::trace!(node = %self.id, port = bit, "port blocked");
        }
    }

    pub(crate) fn unblock(&self, bit: usize) -> Firing {
        let mut sched = self.sched.lock();
        self.unblock_locked(&mut sched, bit)
    }

    fn unblock_locked(&self, sched: &mut Sched, bit: usize) -> Firing {
        if sched.state == NodeState::Completed {
            return Firing::none();
        }
        if !sched.transition.unblock(bit) {
            return Firing::none();
        }
        sched.state = NodeState::Running;
        tracing::trace!(node = %self.id, port = bit, "last port ready, firing");
        Firing(self.this.upgrade())
    }

    // ==================== Lifecycle ====================

    pub(crate) fn set_body(&self, body: Body) {
        let sched = self.sched.lock();
        if sched.state == NodeState::Completed {
            return;
        }
        *self.body.lock() = Some(body);
    }

    /// Created -> Blocked (or Suspended). Later calls are no-ops.
    pub(crate) fn start(&self) -> Result<()> {
        let firing = {
            let mut sched = self.sched.lock();
            if sched.state != NodeState::Created {
                return Ok(());
            }
            if self.body.lock().is_none() {
                return Err(DataflowError::MissingAction(self.id));
            }
            tracing::debug!(node = %self.id, "started");
            if sched.suspend_requested {
                sched.suspend_requested = false;
                sched.state = NodeState::Suspended;
                Firing::none()
            } else {
                sched.state = NodeState::Blocked;
                self.unblock_locked(&mut sched, CONTROL_BIT)
            }
        };
        firing.submit();
        Ok(())
    }

    fn submit(self: Arc<Self>) {
        let task = self.clone();
        if let Err(e) = self.executor.execute(Box::new(move || task.run())) {
            tracing::warn!(node = %self.id, "executor rejected firing: {}", e);
            self.fail(e);
        }
    }

    fn run(self: Arc<Self>) {
        let Some(body) = self.body.lock().take() else {
            return;
        };
        tracing::debug!(node = %self.id, "running action");

        match body {
            Body::Once(action) => match panic::catch_unwind(AssertUnwindSafe(|| action(&self))) {
                Ok(Ok(())) => {
                    self.finish_with(Ok(()), || {});
                }
                Ok(Err(e)) => {
                    self.fail(e);
                }
                Err(payload) => {
                    self.fail(DataflowError::from_panic(payload));
                }
            },
            Body::Repeat(mut action) => {
                match panic::catch_unwind(AssertUnwindSafe(|| action(&self))) {
                    Ok(Ok(())) => self.end_round(action),
                    Ok(Err(e)) => {
                        drop(action);
                        self.fail(e);
                    }
                    Err(payload) => {
                        drop(action);
                        self.fail(DataflowError::from_panic(payload));
                    }
                }
            }
        }
    }

    /// Purge ports and re-arm the control port after an actor round.
    fn end_round(&self, action: RepeatAction) {
        let purgers = {
            let sched = self.sched.lock();
            if sched.state == NodeState::Completed {
                return;
            }
            sched.transition.purgers()
        };
        for purger in &purgers {
            purger.purge();
        }
        drop(purgers);

        let mut action = Some(action);
        let firing = {
            let mut sched = self.sched.lock();
            if sched.state == NodeState::Completed {
                Firing::none()
            } else {
                *self.body.lock() = action.take().map(Body::Repeat);
                let suspend = sched.suspend_requested && !sched.resume_requested;
                sched.suspend_requested = false;
                sched.resume_requested = false;
                if suspend {
                    tracing::trace!(node = %self.id, "suspended after round");
                    sched.state = NodeState::Suspended;
                    Firing::none()
                } else {
                    sched.state = NodeState::Blocked;
                    self.unblock_locked(&mut sched, CONTROL_BIT)
                }
            }
        };
        drop(action);
        firing.submit();
    }

    pub(crate) fn suspend(&self) {
        let mut sched = self.sched.lock();
        match sched.state {
            NodeState::Created | NodeState::Running => {
                sched.suspend_requested = true;
                sched.resume_requested = false;
            }
            NodeState::Blocked => {
                sched.transition.block(CONTROL_BIT);
                sched.state = NodeState::Suspended;
                tracing::trace!(node = %self.id, "suspended");
            }
            NodeState::Suspended | NodeState::Completed => {}
        }
    }

    pub(crate) fn resume(&self) {
        let firing = {
            let mut sched = self.sched.lock();
            match sched.state {
                NodeState::Suspended => {
                    sched.state = NodeState::Blocked;
                    tracing::trace!(node = %self.id, "resumed");
                    self.unblock_locked(&mut sched, CONTROL_BIT)
                }
                NodeState::Running => {
                    if sched.suspend_requested {
                        sched.resume_requested = true;
                    }
                    Firing::none()
                }
                NodeState::Created => {
                    sched.suspend_requested = false;
                    Firing::none()
                }
                NodeState::Blocked | NodeState::Completed => Firing::none(),
            }
        };
        firing.submit();
    }

    /// Suspend now and resume after `delay` on the dataflow's timer.
    pub(crate) fn delay(&self, delay: Duration) -> Result<()> {
        let timer = self.dataflow.timer()?;
        self.suspend();

        let weak = self.this.clone();
        let handle = match timer.schedule(delay, move || {
            if let Some(core) = weak.upgrade() {
                core.resume();
            }
        }) {
            Ok(handle) => handle,
            Err(e) => {
                self.resume();
                return Err(e);
            }
        };

        let mut sched = self.sched.lock();
        if sched.state == NodeState::Completed {
            handle.cancel();
        } else if let Some(previous) = sched.delay.replace(handle) {
            previous.cancel();
        }
        Ok(())
    }

    // ==================== Completion ====================

    /// Move to Completed, run `publish`, then notify the dataflow.
    ///
    /// Returns `false` without running `publish` if already completed.
    pub(crate) fn finish_with(&self, outcome: Result<()>, publish: impl FnOnce()) -> bool {
        let (body, purgers, delay) = {
            let mut sched = self.sched.lock();
            if sched.state == NodeState::Completed {
                return false;
            }
            sched.state = NodeState::Completed;
            (
                self.body.lock().take(),
                sched.transition.take_purgers(),
                sched.delay.take(),
            )
        };
        if let Some(handle) = delay {
            handle.cancel();
        }

        publish();
        drop(body);
        drop(purgers);

        match &outcome {
            Ok(()) => tracing::debug!(node = %self.id, "completed"),
            Err(e) => {
                tracing::debug!(node = %self.id, "completed exceptionally: {}", e);
                self.dataflow.fail(e.clone());
            }
        }
        if let Some(seq) = self.seq {
            self.dataflow.leave(seq);
        }
        true
    }

    pub(crate) fn fail(&self, error: DataflowError) -> bool {
        self.finish_with(Err(error.clone()), || (self.on_failure)(&error))
    }
}

impl std::fmt::Debug for NodeCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sched = self.sched.lock();
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &sched.state)
            .field("ports", &sched.transition.port_count())
            .field("blocked", &sched.transition.blocked_count())
            .finish()
    }
}

/// A port's handle on its node's transition.
#[derive(Clone)]
pub(crate) struct PortRef {
    core: Arc<NodeCore>,
    bit: usize,
}

impl PortRef {
    pub(crate) fn register(core: &Arc<NodeCore>, ready: bool) -> Self {
        let id = core.register_port(ready);
        Self {
            core: core.clone(),
            bit: id.index,
        }
    }

    pub(crate) fn id(&self) -> PortId {
        PortId {
            node: self.core.id(),
            index: self.bit,
        }
    }

    pub(crate) fn core(&self) -> &Arc<NodeCore> {
        &self.core
    }

    pub(crate) fn block(&self) {
        self.core.block(self.bit);
    }

    pub(crate) fn unblock(&self) -> Firing {
        self.core.unblock(self.bit)
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.core.is_port_ready(self.bit)
    }
}
