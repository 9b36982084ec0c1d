use super::core::{Body, NodeCore, NodeState};
use super::{port_factories, NodeBuilder, NodeId};
use crate::completion::Completion;
use crate::dataflow::Dataflow;
use crate::error::{DataflowError, Result};
use std::sync::Arc;
use std::time::Duration;

/// A repeating node.
///
/// Each time every port is ready the action runs one round. Afterwards the
/// ports are purged (consuming what enabled the round) and the actor waits for
/// its ports again. It stops when the action calls
/// [`ActorContext::complete`] or fails.
pub struct Actor<R = ()> {
    core: Arc<NodeCore>,
    result: Completion<R>,
}

/// What an actor's action can do to its own actor.
pub struct ActorContext<R> {
    core: Arc<NodeCore>,
    result: Completion<R>,
}

impl<R> Clone for Actor<R> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            result: self.result.clone(),
        }
    }
}

impl<R: Clone + Send + 'static> Actor<R> {
    pub fn new(dataflow: &Dataflow) -> Self {
        NodeBuilder::new(dataflow).actor()
    }

    pub(crate) fn from_builder(builder: NodeBuilder) -> Self {
        let result = Completion::new();
        let on_failure = result.clone();
        let core = builder.build_core(Box::new(move |e: &DataflowError| {
            on_failure.complete_exceptionally(e.clone());
        }));
        Self { core, result }
    }

    /// Set the per-round action. Call before [`start`](Self::start).
    pub fn set_action<F>(&self, mut action: F)
    where
        F: FnMut(&ActorContext<R>) -> anyhow::Result<()> + Send + 'static,
    {
        let result = self.result.clone();
        self.core.set_body(Body::Repeat(Box::new(move |core| {
            let ctx = ActorContext {
                core: core.clone(),
                result: result.clone(),
            };
            action(&ctx).map_err(DataflowError::from_action)
        })));
    }

    pub fn start(&self) -> Result<()> {
        self.core.start()
    }

    /// Exclude the actor from firing. A round in progress finishes first.
    pub fn suspend(&self) {
        self.core.suspend();
    }

    /// Undo [`suspend`](Self::suspend) or end a pending delay early
    pub fn resume(&self) {
        self.core.resume();
    }

    /// Suspend, then resume after `delay` on the dataflow's timer
    pub fn delay(&self, delay: Duration) -> Result<()> {
        self.core.delay(delay)
    }

    pub fn complete(&self, value: R) -> bool {
        let result = self.result.clone();
        self.core.finish_with(Ok(()), move || {
            result.complete(value);
        })
    }

    pub fn complete_exceptionally(&self, error: DataflowError) -> bool {
        self.core.fail(error)
    }

    pub fn result(&self) -> &Completion<R> {
        &self.result
    }

    pub fn is_completed(&self) -> bool {
        self.result.is_completed()
    }

    pub fn state(&self) -> NodeState {
        self.core.state()
    }

    pub fn id(&self) -> NodeId {
        self.core.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.core.name()
    }

    pub fn is_daemon(&self) -> bool {
        self.core.is_daemon()
    }

    pub fn port_count(&self) -> usize {
        self.core.port_count()
    }

    port_factories!();
}

impl<R> std::fmt::Debug for Actor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.core.fmt(f)
    }
}

impl<R: Clone + Send + 'static> ActorContext<R> {
    /// Finish the actor with `value`. No further rounds run.
    pub fn complete(&self, value: R) -> bool {
        let result = self.result.clone();
        self.core.finish_with(Ok(()), move || {
            result.complete(value);
        })
    }

    /// Finish the actor with `error`
    pub fn fail(&self, error: DataflowError) -> bool {
        self.core.fail(error)
    }

    /// Do not re-arm after this round; wait for [`Actor::resume`]
    pub fn suspend(&self) {
        self.core.suspend();
    }

    /// Do not re-arm after this round until `delay` has elapsed
    pub fn delay(&self, delay: Duration) -> Result<()> {
        self.core.delay(delay)
    }

    pub fn id(&self) -> NodeId {
        self.core.id()
    }

    pub fn state(&self) -> NodeState {
        self.core.state()
    }

    pub fn is_completed(&self) -> bool {
        self.result.is_completed()
    }
}
