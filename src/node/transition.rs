//! Readiness tracking for one node.
//!
//! Every port of a node owns one bit in the node's [`Transition`]; a set bit
//! means the port is not ready. Bit 0 is the control port: it is set while the
//! node has not been started, while it is suspended, and while its action is
//! executing. The node fires exactly when the last set bit clears, and firing
//! sets the control bit again, so a second firing cannot start until the
//! action's round is over.
//!
//! There is no limit on the number of ports: the pending set grows one word at
//! a time.

use std::sync::Arc;

/// Bit index of the control port.
pub(crate) const CONTROL_BIT: usize = 0;

const WORD_BITS: usize = 64;

/// Growable bitset that keeps a running count of set bits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PendingSet {
    words: Vec<u64>,
    count: usize,
}

impl PendingSet {
    /// Set `bit`. Returns `true` if it was clear.
    pub(crate) fn insert(&mut self, bit: usize) -> bool {
        let (word, mask) = (bit / WORD_BITS, 1u64 << (bit % WORD_BITS));
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        if self.words[word] & mask != 0 {
            return false;
        }
        self.words[word] |= mask;
        self.count += 1;
        true
    }

    /// Clear `bit`. Returns `true` if it was set.
    pub(crate) fn remove(&mut self, bit: usize) -> bool {
        let (word, mask) = (bit / WORD_BITS, 1u64 << (bit % WORD_BITS));
        match self.words.get_mut(word) {
            Some(w) if *w & mask != 0 => {
                *w &= !mask;
                self.count -= 1;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn contains(&self, bit: usize) -> bool {
        let (word, mask) = (bit / WORD_BITS, 1u64 << (bit % WORD_BITS));
        self.words.get(word).map(|w| w & mask != 0).unwrap_or(false)
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count
    }
}

/// Post-firing hook of a port: consume the token that enabled the firing and
/// recompute readiness.
pub(crate) trait PortPurge: Send + Sync {
    fn purge(&self);
}

/// The pending set of one node plus the ports that need purging after each
/// round.
pub(crate) struct Transition {
    pending: PendingSet,
    ports: usize,
    purgers: Vec<Arc<dyn PortPurge>>,
}

impl Transition {
    /// A transition with only the control port, which starts blocked.
    pub(crate) fn new() -> Self {
        let mut pending = PendingSet::default();
        pending.insert(CONTROL_BIT);
        Self {
            pending,
            ports: 1,
            purgers: Vec::new(),
        }
    }

    /// Allocate the next bit. A port that is not `ready` starts blocked.
    pub(crate) fn register(&mut self, ready: bool) -> usize {
        let bit = self.ports;
        self.ports += 1;
        if !ready {
            self.pending.insert(bit);
        }
        bit
    }

    pub(crate) fn add_purger(&mut self, purger: Arc<dyn PortPurge>) {
        self.purgers.push(purger);
    }

    pub(crate) fn purgers(&self) -> Vec<Arc<dyn PortPurge>> {
        self.purgers.clone()
    }

    pub(crate) fn take_purgers(&mut self) -> Vec<Arc<dyn PortPurge>> {
        std::mem::take(&mut self.purgers)
    }

    /// Mark `bit` not ready. Returns `true` if it was ready.
    pub(crate) fn block(&mut self, bit: usize) -> bool {
        self.pending.insert(bit)
    }

    /// Mark `bit` ready.
    ///
    /// Returns `true` when this cleared the last pending bit. The control bit
    /// is set again before returning, so the caller owns the one firing.
    pub(crate) fn unblock(&mut self, bit: usize) -> bool {
        if !self.pending.remove(bit) {
            return false;
        }
        if self.pending.is_empty() {
            self.pending.insert(CONTROL_BIT);
            return true;
        }
        false
    }

    pub(crate) fn is_ready(&self, bit: usize) -> bool {
        !self.pending.contains(bit)
    }

    /// Ports registered so far, control port included
    pub(crate) fn port_count(&self) -> usize {
        self.ports
    }

    pub(crate) fn blocked_count(&self) -> usize {
        self.pending.len()
    }
}
