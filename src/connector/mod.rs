//! Backpressure-aware connectors.
//!
//! Three protocols, not interchangeable:
//!
//! - **Scalar**: [`ScalarResult<T>`], a one-shot [`Completion`]. Every
//!   subscriber sees the single outcome exactly once.
//! - **Point-to-point**: [`BoundedQueue`] and [`UnicastStream`]. Each item
//!   goes to exactly one consumer, either a thread blocked in `take` or a
//!   [`StreamSubscriber`] with outstanding demand.
//! - **Multicast**: [`MulticastStream`]. Every subscriber sees every item
//!   emitted after it subscribed, at its own pace.
//!
//! # Demand
//!
//! A stream subscriber receives nothing until it calls
//! [`Subscription::request`]. Each `on_next` consumes one unit of demand. A
//! subscriber whose demand reaches zero is parked until it requests again.
//!
//! Completion is signalled once, after every buffered item has been handed
//! out, through `on_complete` or `on_error`. Subscribing to a completed
//! connector signals the outcome immediately.

mod multicast;
mod p2p;
mod queue;
mod subscription;
mod unicast;

pub use multicast::MulticastStream;
pub use queue::BoundedQueue;
pub use subscription::Subscription;
pub use unicast::{UnicastMode, UnicastStream};

pub(crate) use subscription::{DeliveryGate, SubscriptionCore, SubscriptionSource};

use crate::completion::Completion;
use crate::error::{DataflowError, Result};
use std::sync::Arc;

/// The scalar connector: a one-shot result
pub type ScalarResult<T> = Completion<T>;

/// Receiving side of the stream protocols.
///
/// Calls for one subscription never overlap. After `on_complete` or
/// `on_error`, or once [`Subscription::cancel`] has returned, nothing more is
/// delivered.
pub trait StreamSubscriber<T>: Send + Sync {
    /// Called first, with the handle used to request items
    fn on_subscribe(&self, subscription: Subscription);

    fn on_next(&self, item: T);

    fn on_complete(&self) {}

    fn on_error(&self, error: DataflowError) {
        tracing::debug!("Stream failed with no error handler: {}", error);
    }
}

/// Sending side of the stream protocols.
pub trait StreamPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn StreamSubscriber<T>>) -> Result<Subscription>;
}

/// Deliver a terminal signal to one subscriber.
pub(crate) fn signal_done<T>(subscriber: &dyn StreamSubscriber<T>, outcome: Result<()>) {
    match outcome {
        Ok(()) => subscriber.on_complete(),
        Err(e) => subscriber.on_error(e),
    }
}
