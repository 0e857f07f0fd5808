//! Property-based tests — structural invariants under random inputs.
//!
//! The central property: after any sequence of inserts, deletes, evictions
//! and reconciliation passes, every `Present` record has exactly one index
//! vector and every index vector has exactly one live `Present` record.

use std::sync::Arc;

use proptest::prelude::*;

use engram_core::config::{EngramConfig, SanitizerConfig};
use engram_core::embedding::HashEmbeddingProvider;
use engram_core::engine::MemoryEngine;
use engram_core::eviction::{batch_size, select_victims};
use engram_core::sanitizer::ContentSanitizer;
use engram_core::store::EvictionCandidate;
use engram_core::types::{MemoryCategory, MemoryContent, MemoryId};

const DIMS: usize = 8;

fn small_config(max_entries: u64) -> EngramConfig {
    let mut config = EngramConfig::default();
    config.embedding.dimensions = DIMS;
    config.limits.max_entries = max_entries;
    config
}

/// One step of a random engine workload.
#[derive(Debug, Clone)]
enum Op {
    /// Insert an entry with the given importance (scaled from 0..=100).
    Insert(u8),
    /// Delete the n-th still-live inserted id (modulo live count).
    Delete(usize),
    /// Run an on-demand reconciliation pass.
    Reconcile,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..=100u8).prop_map(Op::Insert),
        2 => any::<usize>().prop_map(Op::Delete),
        1 => Just(Op::Reconcile),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn store_and_index_agree_after_any_workload(ops in prop::collection::vec(arb_op(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        rt.block_on(async {
            let engine = MemoryEngine::open_in_memory(
                small_config(8),
                Arc::new(HashEmbeddingProvider::new(DIMS)),
            )
            .expect("open");
            engine.reconcile().await.expect("reconcile");

            let mut live: Vec<MemoryId> = Vec::new();
            for (step, op) in ops.iter().enumerate() {
                match op {
                    Op::Insert(importance) => {
                        let id = engine
                            .insert(
                                &MemoryContent::new(format!("workload step {step}")),
                                MemoryCategory::Observation,
                                f32::from(*importance) / 100.0,
                            )
                            .await
                            .expect("insert");
                        live.push(id);
                    }
                    Op::Delete(slot) => {
                        if !live.is_empty() {
                            let id = live.remove(slot % live.len());
                            engine.delete(id).expect("delete");
                        }
                    }
                    Op::Reconcile => {
                        engine.reconcile().await.expect("reconcile");
                    }
                }

                // The invariant holds after every completed operation,
                // not just at the end.
                let audit = engine.consistency_audit().expect("audit");
                prop_assert!(
                    audit.is_consistent(),
                    "step {step}: {audit:?}"
                );
            }

            let stats = engine.aggregate_stats();
            prop_assert!(stats.count <= 8, "governor ceiling violated: {}", stats.count);
            prop_assert_eq!(
                stats.count as usize,
                engine.list_all().expect("list").len(),
                "incremental count drifted from the table"
            );
            Ok(())
        })?;
    }
}

// ---------------------------------------------------------------------------
// Sanitizer properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn sanitized_size_matches_serialized_form(body in "[a-zA-Z0-9 <>&/]{1,2000}") {
        let sanitizer = ContentSanitizer::new(SanitizerConfig::default());
        if let Ok(out) = sanitizer.sanitize(&MemoryContent::new(body)) {
            let serialized = serde_json::to_vec(&out.content).expect("json");
            prop_assert_eq!(out.byte_size, serialized.len() as u64);
        }
    }

    #[test]
    fn truncation_caps_are_respected(
        title in ".{0,400}",
        body in ".{1,9000}",
        snippet in ".{0,900}",
    ) {
        let config = SanitizerConfig::default();
        let sanitizer = ContentSanitizer::new(config.clone());
        let input = MemoryContent::new(body).with_title(title).with_snippet(snippet);
        if let Ok(out) = sanitizer.sanitize(&input) {
            prop_assert!(out.content.body.len() <= config.max_body_bytes);
            if let Some(t) = &out.content.title {
                prop_assert!(t.chars().count() <= config.max_title_chars);
            }
            if let Some(s) = &out.content.snippet {
                prop_assert!(s.chars().count() <= config.max_snippet_chars);
            }
        }
    }

    #[test]
    fn sanitized_text_carries_no_raw_markup(body in ".{1,500}") {
        let sanitizer = ContentSanitizer::new(SanitizerConfig::default());
        if let Ok(out) = sanitizer.sanitize(&MemoryContent::new(body)) {
            prop_assert!(!out.content.body.contains('<'));
            prop_assert!(!out.content.body.contains('>'));
        }
    }
}

// ---------------------------------------------------------------------------
// Eviction ranking properties
// ---------------------------------------------------------------------------

fn arb_candidate() -> impl Strategy<Value = EvictionCandidate> {
    (0.0..1.0f32, 0..1_000_000i64, 1..512u64).prop_map(|(importance, age, bytes)| {
        EvictionCandidate {
            id: MemoryId::new(),
            importance,
            created_at: chrono::Utc::now() - chrono::Duration::seconds(age),
            byte_size: bytes,
        }
    })
}

proptest! {
    #[test]
    fn victims_never_outrank_survivors(
        candidates in prop::collection::vec(arb_candidate(), 1..60),
    ) {
        let batch = batch_size(candidates.len() as u64);
        let plan = select_victims(candidates.clone(), batch);
        prop_assert_eq!(plan.victims.len(), batch.min(candidates.len()));

        let victim_ids: Vec<MemoryId> = plan.victims.iter().map(|v| v.id).collect();
        for victim in &plan.victims {
            for survivor in candidates.iter().filter(|c| !victim_ids.contains(&c.id)) {
                let victim_rank = (ordered_float::OrderedFloat(victim.importance), victim.created_at, victim.id);
                let survivor_rank = (ordered_float::OrderedFloat(survivor.importance), survivor.created_at, survivor.id);
                prop_assert!(
                    victim_rank <= survivor_rank,
                    "victim {victim:?} outranks survivor {survivor:?}"
                );
            }
        }
    }

    #[test]
    fn batch_is_ten_percent_rounded_up(count in 1..10_000u64) {
        let batch = batch_size(count) as u64;
        prop_assert!(batch >= 1);
        prop_assert!(batch * 10 >= count, "batch too small for {count}");
        prop_assert!((batch - 1) * 10 < count, "batch too large for {count}");
    }
}
