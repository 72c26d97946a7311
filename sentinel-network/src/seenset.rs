//! The inventory deduplication layer (C3, §4.3): two disjoint sets (tx,
//! block) of recently-seen hashes with a time-based eviction sweep. No
//! direct teacher counterpart; modeled on `candidate_set.rs`'s own
//! discipline — a `std::sync::Mutex` held only for constant-time operations,
//! never across an `.await`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::constants::{SEEN_SET_EXPIRY, SEEN_SET_SWEEP_INTERVAL};

/// Which of the two disjoint sets a hash belongs to (§3: "Two disjoint
/// sets: transactions and blocks").
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SeenKind {
    Transaction,
    Block,
}

struct Inner {
    entries: HashMap<[u8; 32], Instant>,
}

impl Inner {
    fn new() -> Inner {
        Inner {
            entries: HashMap::new(),
        }
    }
}

/// One of the two seen-sets. Safe for concurrent readers and writers (§4.3);
/// `mark` is linearizable per hash (§5 ordering guarantee).
pub struct SeenSet {
    inner: Mutex<Inner>,
    expiry: Duration,
}

impl SeenSet {
    pub fn new() -> SeenSet {
        SeenSet::with_expiry(SEEN_SET_EXPIRY)
    }

    pub fn with_expiry(expiry: Duration) -> SeenSet {
        SeenSet {
            inner: Mutex::new(Inner::new()),
            expiry,
        }
    }

    /// Returns `true` iff `hash` was not already present, inserting it with
    /// the current time either way is unnecessary — only a miss inserts.
    /// Ordering across concurrent callers is not observable beyond
    /// first-wins (§3 invariant).
    pub fn mark(&self, hash: [u8; 32]) -> bool {
        let mut inner = self.inner.lock().expect("seen-set mutex poisoned");
        if inner.entries.contains_key(&hash) {
            false
        } else {
            inner.entries.insert(hash, Instant::now());
            true
        }
    }

    /// Removes every entry older than the configured expiry window. Called
    /// by the periodic sweep task (§4.3 reference: every minute).
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("seen-set mutex poisoned");
        inner.entries.retain(|_, inserted_at| now.duration_since(*inserted_at) < self.expiry);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("seen-set mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::new()
    }
}

/// The transaction and block seen-sets together, plus the shared sweep
/// interval. One instance is shared (as an `Arc`) across every session task
/// and the cleanup task (§3 ownership).
pub struct SeenSets {
    pub transactions: SeenSet,
    pub blocks: SeenSet,
}

impl SeenSets {
    pub fn new() -> SeenSets {
        SeenSets {
            transactions: SeenSet::new(),
            blocks: SeenSet::new(),
        }
    }

    pub fn mark(&self, kind: SeenKind, hash: [u8; 32]) -> bool {
        match kind {
            SeenKind::Transaction => self.transactions.mark(hash),
            SeenKind::Block => self.blocks.mark(hash),
        }
    }

    pub fn sweep(&self) {
        self.transactions.sweep();
        self.blocks.sweep();
    }

    /// Runs the sweep on [`crate::constants::SEEN_SET_SWEEP_INTERVAL`] until
    /// `cancelled` fires.
    pub async fn run_sweeper(&self, cancelled: tokio_util::sync::CancellationToken) {
        let mut ticker = tokio::time::interval(SEEN_SET_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(),
                _ = cancelled.cancelled() => return,
            }
        }
    }
}

impl Default for SeenSets {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_is_first_wins() {
        let set = SeenSet::new();
        assert!(set.mark([1u8; 32]));
        assert!(!set.mark([1u8; 32]));
        assert!(set.mark([2u8; 32]));
    }

    #[test]
    fn sweep_evicts_expired_entries() {
        let set = SeenSet::with_expiry(Duration::from_millis(1));
        set.mark([1u8; 32]);
        std::thread::sleep(Duration::from_millis(5));
        set.sweep();
        assert!(set.is_empty());
        // After expiry, marking the same hash again returns true (§8
        // invariant 7).
        assert!(set.mark([1u8; 32]));
    }

    #[test]
    fn transactions_and_blocks_are_disjoint() {
        let sets = SeenSets::new();
        assert!(sets.mark(SeenKind::Transaction, [3u8; 32]));
        assert!(sets.mark(SeenKind::Block, [3u8; 32]));
    }
}
