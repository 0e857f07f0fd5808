//! Runtime counters for the memory engine.
//!
//! Lock-free `AtomicU64` counters incremented on the hot paths and read on
//! demand via [`EngineCounters::snapshot`]. These complement the `tracing`
//! spans; they are cheap enough to leave always-on.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for engine events.
#[derive(Debug, Default)]
pub struct EngineCounters {
    /// Inserts that were admitted and persisted.
    pub inserts_accepted: AtomicU64,
    /// Inserts refused by validation.
    pub inserts_rejected: AtomicU64,
    /// Embed calls that failed or timed out.
    pub embeddings_failed: AtomicU64,
    /// Entries removed by the size governor.
    pub entries_evicted: AtomicU64,
    /// Eviction passes run.
    pub eviction_passes: AtomicU64,
    /// Orphan index entries removed during reconciliation.
    pub orphans_removed: AtomicU64,
    /// Records whose vector was restored to the index by reconciliation.
    pub records_reindexed: AtomicU64,
    /// Searches served.
    pub searches: AtomicU64,
    /// Explicit deletions applied.
    pub deletes: AtomicU64,
}

impl EngineCounters {
    /// Create a zeroed counter set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inserts_accepted: AtomicU64::new(0),
            inserts_rejected: AtomicU64::new(0),
            embeddings_failed: AtomicU64::new(0),
            entries_evicted: AtomicU64::new(0),
            eviction_passes: AtomicU64::new(0),
            orphans_removed: AtomicU64::new(0),
            records_reindexed: AtomicU64::new(0),
            searches: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            inserts_accepted: self.inserts_accepted.load(Ordering::Relaxed),
            inserts_rejected: self.inserts_rejected.load(Ordering::Relaxed),
            embeddings_failed: self.embeddings_failed.load(Ordering::Relaxed),
            entries_evicted: self.entries_evicted.load(Ordering::Relaxed),
            eviction_passes: self.eviction_passes.load(Ordering::Relaxed),
            orphans_removed: self.orphans_removed.load(Ordering::Relaxed),
            records_reindexed: self.records_reindexed.load(Ordering::Relaxed),
            searches: self.searches.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSnapshot {
    /// Inserts admitted and persisted.
    pub inserts_accepted: u64,
    /// Inserts refused by validation.
    pub inserts_rejected: u64,
    /// Failed or timed-out embed calls.
    pub embeddings_failed: u64,
    /// Entries removed by eviction.
    pub entries_evicted: u64,
    /// Eviction passes run.
    pub eviction_passes: u64,
    /// Orphan index entries removed.
    pub orphans_removed: u64,
    /// Vectors restored to the index.
    pub records_reindexed: u64,
    /// Searches served.
    pub searches: u64,
    /// Explicit deletions.
    pub deletes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let counters = EngineCounters::new();
        counters.inserts_accepted.fetch_add(3, Ordering::Relaxed);
        counters.entries_evicted.fetch_add(2, Ordering::Relaxed);

        let snap = counters.snapshot();
        assert_eq!(snap.inserts_accepted, 3);
        assert_eq!(snap.entries_evicted, 2);
        assert_eq!(snap.searches, 0);
    }
}
