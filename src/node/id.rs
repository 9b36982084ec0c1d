//! Identity types for nodes, ports and dataflows.
//!
//! Node and dataflow ids are process-unique sequence numbers used in logs
//! and diagnostics. A port is addressed by its node and its bit index in that
//! node's transition.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NODE: AtomicU64 = AtomicU64::new(0);
static NEXT_DATAFLOW: AtomicU64 = AtomicU64::new(0);

/// Process-unique node identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    pub(crate) fn next() -> Self {
        NodeId(NEXT_NODE.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Process-unique dataflow identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataflowId(pub u64);

impl DataflowId {
    pub(crate) fn next() -> Self {
        DataflowId(NEXT_DATAFLOW.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for DataflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataflowId({})", self.0)
    }
}

impl fmt::Display for DataflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dataflow#{}", self.0)
    }
}

/// A port: its owning node plus its bit in the node's transition.
/// Bit 0 is the node's control port.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId {
    pub node: NodeId,
    pub index: usize,
}

impl PortId {
    #[inline]
    pub fn is_control(self) -> bool {
        self.index == 0
    }
}

impl fmt::Debug for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortId(node={}, port={})", self.node.0, self.index)
    }
}

/// A live child of a dataflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildRef {
    Node(NodeId),
    Dataflow(DataflowId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_are_unique() {
        let a = NodeId::next();
        let b = NodeId::next();
        assert_ne!(a, b);
        assert!(b.index() > a.index());
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeId(4).to_string(), "node#4");
        assert_eq!(format!("{:?}", DataflowId(2)), "DataflowId(2)");
        let port = PortId {
            node: NodeId(100),
            index: 7,
        };
        assert_eq!(format!("{:?}", port), "PortId(node=100, port=7)");
        assert!(!port.is_control());
    }
}
