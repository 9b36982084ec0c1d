//! Nodes: asynchronous procedures activated by their ports.
//!
//! A node is a set of ports plus an action. The action runs on the node's
//! executor once every port is ready, and never concurrently with itself.
//!
//! # Node kinds
//!
//! - [`Node<R>`]: one-shot. Fires once; the action's return value completes
//!   [`Node::result`].
//! - [`Actor<R>`]: repeating. After each round its ports are purged and the
//!   control port re-armed, until the action completes, fails, suspends or
//!   delays the actor.
//!
//! # Example
//!
//! ```ignore
//! let dataflow = Dataflow::root();
//! let node = Node::<i64>::new(&dataflow);
//! let x = node.scalar_input::<i64>();
//! let y = node.scalar_input::<i64>();
//! let (a, b) = (x.clone(), y.clone());
//! node.set_action(move || Ok(a.current()? * a.current()? + b.current()? * b.current()?));
//! node.start()?;
//! x.post(3)?;
//! y.post(4)?;
//! assert_eq!(node.result().get()?, 25);
//! ```

mod actor;
mod builder;
pub(crate) mod core;
pub(crate) mod id;
mod oneshot;
mod port;
pub(crate) mod transition;

pub use actor::{Actor, ActorContext};
pub use builder::NodeBuilder;
pub use self::core::NodeState;
pub use id::{ChildRef, DataflowId, NodeId, PortId};
pub use oneshot::Node;
pub use port::{PermitPort, ScalarInput, StreamInput};

/// Port factory methods shared by [`Node`] and [`Actor`].
macro_rules! port_factories {
    () => {
        /// Register a single-shot input port
        pub fn scalar_input<T: Send + 'static>(&self) -> $crate::node::ScalarInput<T> {
            $crate::node::ScalarInput::new(&self.core)
        }

        /// Register a counting port holding `initial` permits
        pub fn permits(&self, initial: u64) -> $crate::node::PermitPort {
            $crate::node::PermitPort::new(&self.core, initial)
        }

        /// Register a buffered stream input of `capacity` items
        pub fn stream_input<T: Send + 'static>(
            &self,
            capacity: usize,
        ) -> $crate::error::Result<$crate::node::StreamInput<T>> {
            $crate::node::StreamInput::new(&self.core, capacity)
        }

        /// Register a stream input sized by the dataflow's default capacity
        pub fn default_stream_input<T: Send + 'static>(
            &self,
        ) -> $crate::error::Result<$crate::node::StreamInput<T>> {
            let capacity = self.core.dataflow().default_capacity();
            $crate::node::StreamInput::new(&self.core, capacity)
        }

        /// Register an output stream whose room port blocks this node while the
        /// buffer is full
        pub fn stream_output<T: Send + 'static>(
            &self,
            capacity: usize,
            mode: $crate::connector::UnicastMode,
        ) -> $crate::error::Result<$crate::connector::UnicastStream<T>> {
            $crate::connector::UnicastStream::bound(&self.core, capacity, mode)
        }
    };
}

pub(crate) use port_factories;
