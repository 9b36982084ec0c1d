use super::core::{Body, NodeCore, NodeState};
use super::{port_factories, NodeBuilder, NodeId};
use crate::completion::Completion;
use crate::dataflow::Dataflow;
use crate::error::{DataflowError, Result};
use std::sync::Arc;

/// A one-shot asynchronous procedure.
///
/// The action runs once, when every port is ready. Its return value completes
/// [`result`](Self::result); an error or panic completes it exceptionally and
/// is forwarded to the dataflow.
pub struct Node<R> {
    core: Arc<NodeCore>,
    result: Completion<R>,
}

impl<R> Clone for Node<R> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            result: self.result.clone(),
        }
    }
}

impl<R: Clone + Send + 'static> Node<R> {
    /// A node in `dataflow` with default options
    pub fn new(dataflow: &Dataflow) -> Self {
        NodeBuilder::new(dataflow).node()
    }

    pub(crate) fn from_builder(builder: NodeBuilder) -> Self {
        let result = Completion::new();
        let on_failure = result.clone();
        let core = builder.build_core(Box::new(move |e: &DataflowError| {
            on_failure.complete_exceptionally(e.clone());
        }));
        Self { core, result }
    }

    /// Set the action. Takes effect only before the node fires.
    pub fn set_action<F>(&self, action: F)
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    {
        let result = self.result.clone();
        self.core.set_body(Body::Once(Box::new(move |core| {
            let value = action().map_err(DataflowError::from_action)?;
            core.finish_with(Ok(()), move || {
                result.complete(value);
            });
            Ok(())
        })));
    }

    /// Allow the node to fire. Only the first call has an effect.
    pub fn start(&self) -> Result<()> {
        self.core.start()
    }

    /// Complete without running the action
    pub fn complete(&self, value: R) -> bool {
        let result = self.result.clone();
        self.core.finish_with(Ok(()), move || {
            result.complete(value);
        })
    }

    /// Fail the node; the error is forwarded to the dataflow
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

    /// Registered ports, control port included
    pub fn port_count(&self) -> usize {
        self.core.port_count()
    }

    port_factories!();
}

impl<R> std::fmt::Debug for Node<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.core.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InlineExecutor;

    fn dataflow() -> Dataflow {
        Dataflow::builder().executor(Arc::new(InlineExecutor)).build()
    }

    #[test]
    fn test_sum_of_squares() {
        let dataflow = dataflow();
        let node = Node::<i64>::new(&dataflow);
        let x = node.scalar_input::<i64>();
        let y = node.scalar_input::<i64>();
        let (a, b) = (x.clone(), y.clone());
        node.set_action(move || {
            let (a, b) = (a.current()?, b.current()?);
            Ok(a * a + b * b)
        });
        node.start().unwrap();

        x.post(3).unwrap();
        assert!(!node.is_completed());
        y.post(4).unwrap();

        assert_eq!(node.result().get().unwrap(), 25);
        assert_eq!(node.state(), NodeState::Completed);
        assert!(dataflow.is_completed());
    }

    #[test]
    fn test_second_post_rejected() {
        let dataflow = dataflow();
        let node = Node::<()>::new(&dataflow);
        let x = node.scalar_input::<u8>();
        let _y = node.scalar_input::<u8>();
        node.set_action(|| Ok(()));
        node.start().unwrap();
        x.post(1).unwrap();
        assert!(matches!(x.post(2), Err(DataflowError::PortOccupied)));
        assert_eq!(x.current().unwrap(), 1);
    }

    #[test]
    fn test_action_error_completes_exceptionally() {
        let dataflow = dataflow();
        let node = Node::<u32>::new(&dataflow);
        node.set_action(|| Err(anyhow::anyhow!("division by zero")));
        node.start().unwrap();

        let err = node.result().get().unwrap_err();
        assert!(err.to_string().contains("division by zero"));
        assert!(dataflow.completion().is_completed_exceptionally());
    }

    #[test]
    fn test_panic_is_captured() {
        let dataflow = dataflow();
        let node = Node::<u32>::new(&dataflow);
        node.set_action(|| panic!("action exploded"));
        node.start().unwrap();

        let err = node.result().get().unwrap_err();
        assert!(matches!(err, DataflowError::Panicked(ref msg) if msg.contains("exploded")));
    }

    #[test]
    fn test_failed_input_propagates_unchanged() {
        let dataflow = dataflow();
        let node = Node::<u32>::new(&dataflow);
        let x = node.scalar_input::<u32>();
        let input = x.clone();
        node.set_action(move || Ok(input.current()?));
        node.start().unwrap();
        x.fail(DataflowError::StreamClosed).unwrap();

        assert!(matches!(
            node.result().get(),
            Err(DataflowError::StreamClosed)
        ));
    }

    #[test]
    fn test_external_complete_skips_action() {
        let dataflow = dataflow();
        let node = Node::<&'static str>::new(&dataflow);
        let _x = node.scalar_input::<u32>();
        node.set_action(|| panic!("must not run"));
        node.start().unwrap();
        assert!(node.complete("early"));
        assert!(!node.complete("late"));
        assert_eq!(node.result().get().unwrap(), "early");
        assert!(dataflow.is_completed());
    }

    #[test]
    fn test_connect_chains_nodes() {
        let dataflow = dataflow();
        let square = Node::<u64>::new(&dataflow);
        let input = square.scalar_input::<u64>();
        let i = input.clone();
        square.set_action(move || Ok(i.current()? * i.current()?));

        let double = Node::<u64>::new(&dataflow);
        let from_square = double.scalar_input::<u64>();
        from_square.connect(square.result());
        let f = from_square.clone();
        double.set_action(move || Ok(f.current()? * 2));

        double.start().unwrap();
        square.start().unwrap();
        input.post(5).unwrap();

        assert_eq!(double.result().get().unwrap(), 50);
        assert!(dataflow.join().is_ok());
    }

    #[test]
    fn test_ports_beyond_thirty_one() {
        let dataflow = dataflow();
        let node = Node::<usize>::new(&dataflow);
        let inputs: Vec<_> = (0..40).map(|_| node.scalar_input::<usize>()).collect();
        let reads = inputs.clone();
        node.set_action(move || {
            let mut total = 0;
            for input in &reads {
                total += input.current()?;
            }
            Ok(total)
        });
        node.start().unwrap();
        assert_eq!(node.port_count(), 41);
        for (i, input) in inputs.iter().enumerate() {
            input.post(i).unwrap();
        }
        assert_eq!(node.result().get().unwrap(), (0..40).sum::<usize>());
    }
}
