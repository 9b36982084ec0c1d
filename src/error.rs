//! Error handling for dataflow-rs
//!
//! This module defines the crate-wide error type and a Result alias used by
//! every port, node, connector and collaborator.
//!
//! Errors are `Clone`: a single failure is broadcast to every subscriber of a
//! completion and forwarded up the Dataflow parent chain, so the same value is
//! observed in many places.

use crate::node::NodeId;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Main error type for dataflow-rs operations
#[derive(Error, Debug, Clone)]
pub enum DataflowError {
    /// A connector or port was created with a capacity it cannot honour
    #[error("Invalid capacity: {0} (must be at least 1)")]
    InvalidCapacity(usize),

    /// `request(0)` on a subscription
    #[error("Invalid demand: request({0}) must be positive")]
    InvalidDemand(u64),

    /// A second value was posted into a scalar port that already holds one
    #[error("Port already holds a value")]
    PortOccupied,

    /// A post arrived at a port that has latched shut
    #[error("Port is closed")]
    PortClosed,

    /// A value was read from a port that holds none
    #[error("Port holds no value")]
    PortEmpty,

    /// A post arrived at a full buffer
    #[error("Buffer full (capacity {0})")]
    BufferFull(usize),

    /// A post or put arrived at a stream that has already completed
    #[error("Stream is closed")]
    StreamClosed,

    /// A second subscriber tried to attach to an exclusive stream
    #[error("Stream already has a subscriber")]
    AlreadySubscribed,

    /// A node was started before its action was set
    #[error("Node {0} has no action")]
    MissingAction(NodeId),

    /// A node action returned an error
    #[error("Action failed: {0}")]
    Action(Arc<anyhow::Error>),

    /// A node action panicked
    #[error("Action panicked: {0}")]
    Panicked(String),

    /// The executor refused a task
    #[error("Executor error: {0}")]
    Executor(String),

    /// The timer refused or lost a scheduled callback
    #[error("Timer error: {0}")]
    Timer(String),

    /// Timeout errors
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DataflowError>,
    },
}

impl DataflowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DataflowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Convert an action's error into a `DataflowError`.
    ///
    /// An error that is already a `DataflowError` (typically a failed input
    /// propagated with `?`) is passed through unchanged instead of being
    /// wrapped a second time.
    pub fn from_action(err: anyhow::Error) -> Self {
        match err.downcast::<DataflowError>() {
            Ok(inner) => inner,
            Err(other) => DataflowError::Action(Arc::new(other)),
        }
    }

    /// Build an error from a caught panic payload
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        DataflowError::Panicked(message)
    }

    /// The innermost error, with any context layers stripped
    pub fn root_cause(&self) -> &DataflowError {
        match self {
            DataflowError::WithContext { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<std::io::Error> for DataflowError {
    fn from(err: std::io::Error) -> Self {
        DataflowError::Io(Arc::new(err))
    }
}

/// Result type alias for dataflow-rs operations
pub type Result<T> = std::result::Result<T, DataflowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| DataflowError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DataflowError::from(e).with_context(f()))
    }
}
