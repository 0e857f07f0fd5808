//! Consistency recoverer — classification of store/index disagreements.
//!
//! After a restart (or on demand) the engine walks the durable table and
//! the index, decides what each record needs, and repairs both structures
//! before any caller-facing operation is served. The decision logic lives
//! here as a pure function; the engine applies the actions.
//!
//! A pass is idempotent: running it twice with no intervening writes
//! leaves both structures unchanged after the first run.

use crate::types::EmbeddingStatus;

/// What a reconciliation pass should do with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Record and index agree; nothing to do.
    Keep,
    /// `Present` with a persisted vector but no index entry: re-index the
    /// stored vector, no provider call needed.
    Reindex,
    /// `Present` but the persisted vector is missing or undecodable (a
    /// consistency violation): re-embed via the provider and persist the
    /// fresh vector.
    Reembed,
    /// `Pending` or `Failed`: attempt the embedding once this pass.
    Retry,
}

/// Classify one record given whether it has a decodable stored vector and
/// whether the index currently holds an entry for it.
#[must_use]
pub fn classify(
    status: EmbeddingStatus,
    has_stored_vector: bool,
    in_index: bool,
) -> RecoveryAction {
    match status {
        EmbeddingStatus::Present => {
            if in_index {
                RecoveryAction::Keep
            } else if has_stored_vector {
                RecoveryAction::Reindex
            } else {
                RecoveryAction::Reembed
            }
        }
        EmbeddingStatus::Pending | EmbeddingStatus::Failed => RecoveryAction::Retry,
    }
}

/// Outcome counts of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// `Present` records whose stored vector was re-indexed.
    pub reindexed: usize,
    /// `Present` records re-embedded because their vector was lost.
    pub reembedded: usize,
    /// `Pending`/`Failed` records that gained a vector this pass.
    pub recovered: usize,
    /// Embed attempts that failed this pass (retried next pass).
    pub failed: usize,
    /// Index entries removed because no live `Present` record backs them.
    pub orphans_removed: usize,
}

impl ReconcileReport {
    /// Whether the pass changed anything at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_and_indexed_is_kept() {
        assert_eq!(
            classify(EmbeddingStatus::Present, true, true),
            RecoveryAction::Keep
        );
    }

    #[test]
    fn present_with_vector_but_unindexed_is_reindexed() {
        assert_eq!(
            classify(EmbeddingStatus::Present, true, false),
            RecoveryAction::Reindex
        );
    }

    #[test]
    fn present_without_vector_is_reembedded() {
        assert_eq!(
            classify(EmbeddingStatus::Present, false, false),
            RecoveryAction::Reembed
        );
        // Even if something is in the index, a lost vector means the index
        // entry cannot be trusted to equal the (missing) stored one.
        assert_eq!(
            classify(EmbeddingStatus::Present, false, true),
            RecoveryAction::Reembed
        );
    }

    #[test]
    fn pending_and_failed_are_retried() {
        assert_eq!(
            classify(EmbeddingStatus::Pending, false, false),
            RecoveryAction::Retry
        );
        assert_eq!(
            classify(EmbeddingStatus::Failed, false, false),
            RecoveryAction::Retry
        );
    }

    #[test]
    fn default_report_is_noop() {
        assert!(ReconcileReport::default().is_noop());
        let busy = ReconcileReport {
            reindexed: 1,
            ..ReconcileReport::default()
        };
        assert!(!busy.is_noop());
    }
}
