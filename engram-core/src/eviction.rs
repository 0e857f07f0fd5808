//! Size governor — eviction planning for bounded growth.
//!
//! When the live set exceeds the configured count or byte ceilings, the
//! governor removes a batch of the lowest-value entries: ranked by
//! ascending `importance`, then ascending `created_at` (oldest first).
//! Recent, high-importance memories survive; stale, low-value ones go
//! first. Batches are 10% of the live count, repeated until the limits
//! hold or nothing is left.
//!
//! Planning is pure: these functions only rank and select. Applying the
//! plan (store delete + index remove, atomic per entry) is the engine's
//! job, and can never fail the insert that triggered it.

use ordered_float::OrderedFloat;

use crate::config::LimitsConfig;
use crate::store::EvictionCandidate;
use crate::types::AggregateStats;

/// Fraction of the live set removed per eviction batch.
pub const EVICTION_BATCH_FRACTION: f64 = 0.10;

/// The victims selected for one eviction batch.
#[derive(Debug, Default)]
pub struct EvictionPlan {
    /// Entries to remove, lowest-value first.
    pub victims: Vec<EvictionCandidate>,
    /// Total content bytes the batch accounts for.
    pub reclaimed_bytes: u64,
}

/// Whether the aggregates exceed either configured ceiling.
#[must_use]
pub fn over_limits(stats: &AggregateStats, limits: &LimitsConfig) -> bool {
    stats.count > limits.max_entries || stats.total_bytes > limits.max_total_bytes
}

/// `ceil(0.10 × live_count)`, never zero for a non-empty set.
#[must_use]
pub fn batch_size(live_count: u64) -> usize {
    if live_count == 0 {
        return 0;
    }
    let batch = (live_count as f64 * EVICTION_BATCH_FRACTION).ceil() as u64;
    batch.max(1) as usize
}

/// Select the next eviction batch from the live set.
///
/// Candidates are ranked ascending by `(importance, created_at, id)`; the
/// id is a final determinism key for entries created in the same instant.
#[must_use]
pub fn select_victims(mut candidates: Vec<EvictionCandidate>, batch: usize) -> EvictionPlan {
    candidates.sort_by_key(|c| (OrderedFloat(c.importance), c.created_at, c.id));
    candidates.truncate(batch);
    let reclaimed_bytes = candidates.iter().map(|c| c.byte_size).sum();
    EvictionPlan {
        victims: candidates,
        reclaimed_bytes,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryId;
    use chrono::{Duration, Utc};

    fn candidate(importance: f32, age_secs: i64, byte_size: u64) -> EvictionCandidate {
        EvictionCandidate {
            id: MemoryId::new(),
            importance,
            created_at: Utc::now() - Duration::seconds(age_secs),
            byte_size,
        }
    }

    #[test]
    fn batch_size_is_ten_percent_rounded_up() {
        assert_eq!(batch_size(0), 0);
        assert_eq!(batch_size(1), 1);
        assert_eq!(batch_size(10), 1);
        assert_eq!(batch_size(11), 2);
        assert_eq!(batch_size(100), 10);
        assert_eq!(batch_size(101), 11);
    }

    #[test]
    fn over_limits_checks_both_ceilings() {
        let limits = LimitsConfig {
            max_entries: 10,
            max_total_bytes: 1000,
            max_entry_bytes: 100,
        };
        let ok = AggregateStats {
            count: 10,
            total_bytes: 1000,
        };
        assert!(!over_limits(&ok, &limits), "at the limit is not over it");
        assert!(over_limits(
            &AggregateStats {
                count: 11,
                total_bytes: 10
            },
            &limits
        ));
        assert!(over_limits(
            &AggregateStats {
                count: 2,
                total_bytes: 1001
            },
            &limits
        ));
    }

    #[test]
    fn lowest_importance_goes_first() {
        let low = candidate(0.1, 10, 50);
        let high = candidate(0.9, 10, 50);
        let low_id = low.id;

        let plan = select_victims(vec![high, low], 1);
        assert_eq!(plan.victims.len(), 1);
        assert_eq!(plan.victims[0].id, low_id);
        assert_eq!(plan.reclaimed_bytes, 50);
    }

    #[test]
    fn equal_importance_evicts_oldest_first() {
        let old = candidate(0.5, 1000, 10);
        let new = candidate(0.5, 1, 10);
        let old_id = old.id;

        let plan = select_victims(vec![new, old], 1);
        assert_eq!(plan.victims[0].id, old_id);
    }

    #[test]
    fn survivors_always_outrank_victims() {
        let mut candidates = Vec::new();
        for i in 0..20u32 {
            candidates.push(candidate(i as f32 / 20.0, i64::from(100 - i), 8));
        }

        let plan = select_victims(candidates.clone(), 5);
        let victim_max = plan
            .victims
            .iter()
            .map(|v| OrderedFloat(v.importance))
            .max()
            .expect("victims");
        let survivor_min = candidates
            .iter()
            .filter(|c| !plan.victims.iter().any(|v| v.id == c.id))
            .map(|c| OrderedFloat(c.importance))
            .min()
            .expect("survivors");
        assert!(victim_max <= survivor_min);
    }
}
