//! # dataflow-rs: cooperative dataflow scheduling
//!
//! A scheduling core for dataflow and actor style computation. A node owns a
//! set of ports and an action; when every port is ready the node is handed,
//! exactly once, to an executor. Nodes are grouped into nestable dataflows
//! that aggregate completion and failure.
//!
//! ## Architecture
//!
//! - **Ports and transitions** ([`node`]): per-node readiness bitset; the
//!   thread that readies the last port submits the firing
//! - **Nodes and actors** ([`Node`], [`Actor`]): one-shot and repeating
//!   units with delay, suspend and resume
//! - **Dataflow** ([`Dataflow`]): completion tree, first error wins
//! - **Completion** ([`Completion`]): the one settle-once signal everything
//!   else builds on
//! - **Connectors** ([`connector`]): scalar results, bounded queues, unicast
//!   and multicast streams with demand-based backpressure
//! - **Collaborators** ([`executor`], [`timer`]): where actions run and how
//!   delays are timed
//!
//! ## Configuration
//!
//! A [`RuntimeConfig`](config::RuntimeConfig) loaded from TOML or JSON sizes
//! the thread pool, names the timer thread and sets the default connector
//! capacity:
//!
//! ```toml
//! [executor]
//! worker_threads = 4
//! thread_name_prefix = "dataflow-worker"
//!
//! [connectors]
//! default_capacity = 16
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use dataflow_rs::{Dataflow, Node};
//!
//! fn main() -> dataflow_rs::Result<()> {
//!     dataflow_rs::logging::init_logging(dataflow_rs::logging::DEFAULT_FILTER)?;
//!
//!     let dataflow = Dataflow::root();
//!     let node = Node::<i64>::new(&dataflow);
//!     let x = node.scalar_input::<i64>();
//!     let y = node.scalar_input::<i64>();
//!     let (a, b) = (x.clone(), y.clone());
//!     node.set_action(move || {
//!         let (a, b) = (a.current()?, b.current()?);
//!         Ok(a * a + b * b)
//!     });
//!     node.start()?;
//!
//!     x.post(3)?;
//!     y.post(4)?;
//!     assert_eq!(node.result().get()?, 25);
//!     dataflow.join()
//! }
//! ```

pub mod completion;
pub mod config;
pub mod connector;
pub mod dataflow;
pub mod error;
pub mod executor;
pub mod logging;
pub mod node;
pub mod timer;

// Re-export commonly used types
pub use completion::{Completion, CompletionSubscription};
pub use config::RuntimeConfig;
pub use connector::{
    BoundedQueue, MulticastStream, ScalarResult, StreamPublisher, StreamSubscriber, Subscription,
    UnicastMode, UnicastStream,
};
pub use dataflow::{Dataflow, DataflowBuilder};
pub use error::{DataflowError, Result, ResultExt};
pub use executor::{Executor, InlineExecutor, ThreadPool};
pub use node::{Actor, ActorContext, Node, NodeBuilder, NodeState};
pub use timer::Timer;
