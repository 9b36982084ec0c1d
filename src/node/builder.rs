use super::core::{FailureHook, NodeCore};
use super::{Actor, Node};
use crate::dataflow::Dataflow;
use crate::executor::Executor;
use std::sync::Arc;

/// Options shared by every node kind.
pub struct NodeBuilder {
    dataflow: Dataflow,
    name: Option<String>,
    executor: Option<Arc<dyn Executor>>,
    daemon: bool,
}

impl NodeBuilder {
    pub fn new(dataflow: &Dataflow) -> Self {
        Self {
            dataflow: dataflow.clone(),
            name: None,
            executor: None,
            daemon: false,
        }
    }

    /// Name used in logs and `Debug` output
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Run this node on `executor` instead of the dataflow's
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// A daemon node does not hold its dataflow open: it never enters the
    /// dataflow's child set.
    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn node<R: Clone + Send + 'static>(self) -> Node<R> {
        Node::from_builder(self)
    }

    pub fn actor<R: Clone + Send + 'static>(self) -> Actor<R> {
        Actor::from_builder(self)
    }

    pub(crate) fn build_core(self, on_failure: FailureHook) -> Arc<NodeCore> {
        let executor = self
            .executor
            .unwrap_or_else(|| self.dataflow.executor());
        NodeCore::new(self.dataflow, self.name, executor, self.daemon, on_failure)
    }
}
