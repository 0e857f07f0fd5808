//! The memory engine — durable store, vector index, sanitizer, size
//! governor and consistency recoverer composed behind one concurrency
//! discipline.
//!
//! Construction is explicit: callers inject the embedding provider and the
//! configuration, then drive the lifecycle: `open`, `reconcile` (exactly
//! once before traffic), serve `insert`/`search`/`delete`, `close`.
//!
//! Lock discipline: the store (plus its incremental aggregates) sits
//! behind a mutex, the index behind a read-write lock, always acquired in
//! that order. Searches take only the index read lock, so they run
//! concurrently with unrelated writes and observe a consistent snapshot.
//! A deletion removes the index entry *before* the store row (restoring it
//! if the row delete fails), so a search can never return an id whose
//! record is already gone. The embedding call is the only external
//! suspension point; it runs outside every lock with a bounded timeout.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::EngramConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngramError, Result};
use crate::eviction;
use crate::index::{SearchHit, VectorIndex};
use crate::metrics::EngineCounters;
use crate::recovery::{RecoveryAction, ReconcileReport, classify};
use crate::sanitizer::ContentSanitizer;
use crate::store::{MemoryStore, SCAN_PAGE_SIZE};
use crate::types::{
    AggregateStats, DEFAULT_IMPORTANCE, Embedding, EmbeddingStatus, MemoryCategory, MemoryContent,
    MemoryId, MemoryRecord,
};

/// Structural agreement between the durable table and the vector index.
/// Produced by [`MemoryEngine::consistency_audit`]; both mismatch counts
/// are zero in every reachable post-reconciliation state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistencyAudit {
    /// Live records with `Present` status.
    pub present_records: usize,
    /// Live records still awaiting an embed attempt.
    pub pending_records: usize,
    /// Live records whose last embed attempt failed.
    pub failed_records: usize,
    /// Vectors currently held by the index.
    pub index_entries: usize,
    /// `Present` records with no index entry (invariant violation).
    pub present_missing_from_index: usize,
    /// Index entries with no live `Present` record (orphans).
    pub orphan_index_entries: usize,
}

impl ConsistencyAudit {
    /// Whether store and index fully agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.present_missing_from_index == 0 && self.orphan_index_entries == 0
    }
}

/// The memory persistence and consistency engine.
pub struct MemoryEngine {
    store: Mutex<MemoryStore>,
    index: RwLock<VectorIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    sanitizer: ContentSanitizer,
    config: EngramConfig,
    counters: EngineCounters,
    entry_count: AtomicU64,
    total_bytes: AtomicU64,
    ready: AtomicBool,
    reconcile_gate: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("entries", &self.entry_count.load(Ordering::Relaxed))
            .field("total_bytes", &self.total_bytes.load(Ordering::Relaxed))
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .field("model", &self.provider.model_name())
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// Open (or create) an engine over the database at `path`.
    ///
    /// The engine refuses caller-facing traffic until [`reconcile`]
    /// completes.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Config`] if the provider's dimensionality
    /// disagrees with the configuration, or [`EngramError::Database`] on
    /// SQLite failures.
    ///
    /// [`reconcile`]: MemoryEngine::reconcile
    pub fn open<P: AsRef<Path>>(
        path: P,
        config: EngramConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let store = MemoryStore::open(path, &config.persistence)?;
        Self::from_store(store, config, provider)
    }

    /// Open an engine over an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Same failure modes as [`MemoryEngine::open`].
    pub fn open_in_memory(
        config: EngramConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let store = MemoryStore::open_in_memory(&config.persistence)?;
        Self::from_store(store, config, provider)
    }

    fn from_store(
        store: MemoryStore,
        config: EngramConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        if provider.dimensions() != config.embedding.dimensions {
            return Err(EngramError::Config(format!(
                "provider '{}' produces {}-dimensional vectors, config expects {}",
                provider.model_name(),
                provider.dimensions(),
                config.embedding.dimensions
            )));
        }

        let seed = store.aggregate_scan()?;
        info!(
            path = %store.db_path().display(),
            entries = seed.count,
            total_bytes = seed.total_bytes,
            model = provider.model_name(),
            "Memory engine opened"
        );

        Ok(Self {
            store: Mutex::new(store),
            index: RwLock::new(VectorIndex::new(config.index.clone())),
            sanitizer: ContentSanitizer::new(config.sanitizer.clone()),
            provider,
            config,
            counters: EngineCounters::new(),
            entry_count: AtomicU64::new(seed.count),
            total_bytes: AtomicU64::new(seed.total_bytes),
            ready: AtomicBool::new(false),
            reconcile_gate: tokio::sync::Mutex::new(()),
        })
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Restore store/index agreement and open the engine for traffic.
    ///
    /// Must run once after `open` before any caller-facing operation;
    /// later on-demand passes retry `Failed` entries and clean up
    /// whatever drift a crash left behind. A pass with no intervening
    /// writes after a clean pass changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] if the table walk itself fails.
    /// Individual embed failures are absorbed into the report.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let _gate = self.reconcile_gate.lock().await;
        let start = Instant::now();
        let mut report = ReconcileReport::default();
        let mut present_ids: HashSet<MemoryId> = HashSet::new();
        let mut embed_queue: Vec<(MemoryId, String, DateTime<Utc>, EmbeddingStatus)> = Vec::new();

        // Walk the table: repair what needs no provider call, queue the
        // rest. The scan is paged and restartable; the embed queue keeps
        // only id, text and timestamp, not whole records.
        let mut cursor = None;
        loop {
            let page = {
                let store = self.store.lock();
                store.scan_page(cursor, SCAN_PAGE_SIZE)?
            };
            let Some(last) = page.last() else { break };
            cursor = Some(last.id);

            for record in page {
                let in_index = self.index.read().contains(record.id);
                match classify(record.status, record.embedding.is_some(), in_index) {
                    RecoveryAction::Keep => {
                        present_ids.insert(record.id);
                    }
                    RecoveryAction::Reindex => {
                        if let Some(vector) = &record.embedding {
                            self.index.write().upsert(record.id, vector, record.created_at);
                            report.reindexed += 1;
                            self.counters.records_reindexed.fetch_add(1, Ordering::Relaxed);
                        }
                        present_ids.insert(record.id);
                    }
                    RecoveryAction::Reembed => {
                        warn!(id = %record.id, "Present record lost its vector; re-embedding");
                        embed_queue.push((
                            record.id,
                            record.content.embedding_text(),
                            record.created_at,
                            record.status,
                        ));
                    }
                    RecoveryAction::Retry => {
                        embed_queue.push((
                            record.id,
                            record.content.embedding_text(),
                            record.created_at,
                            record.status,
                        ));
                    }
                }
            }
        }

        // One embed attempt per queued record per pass; failures stay
        // retryable and never abort the pass.
        for (id, text, created_at, prior_status) in embed_queue {
            match self.embed_bounded(text).await {
                Ok(vector) => {
                    let store = self.store.lock();
                    match store.attach_embedding(id, &vector) {
                        Ok(()) => {
                            self.index.write().upsert(id, &vector, created_at);
                            present_ids.insert(id);
                            if prior_status == EmbeddingStatus::Present {
                                report.reembedded += 1;
                            } else {
                                report.recovered += 1;
                            }
                        }
                        Err(EngramError::NotFound(_)) => {
                            // Deleted while we were embedding; nothing to do.
                        }
                        Err(e) => {
                            warn!(id = %id, error = %e, "Could not persist recovered embedding");
                            report.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    self.counters.embeddings_failed.fetch_add(1, Ordering::Relaxed);
                    debug!(id = %id, error = %e, "Embed attempt failed during reconciliation");
                    if prior_status == EmbeddingStatus::Present {
                        // The record claimed a vector it no longer has.
                        let store = self.store.lock();
                        if let Err(db) = store.mark_embedding_failed(id) {
                            warn!(id = %id, error = %db, "Could not demote vectorless record");
                        }
                        self.index.write().remove(id);
                    }
                }
            }
        }

        // Orphan cleanup. Each candidate is re-verified against the store
        // at removal time so an entry inserted mid-pass is never torn out.
        let index_ids = self.index.read().all_ids();
        for id in index_ids {
            if present_ids.contains(&id) {
                continue;
            }
            let live_present = {
                let store = self.store.lock();
                matches!(
                    store.get(id),
                    Ok(Some(record)) if record.status == EmbeddingStatus::Present
                )
            };
            if live_present {
                continue;
            }
            if self.index.write().remove(id) {
                report.orphans_removed += 1;
                self.counters.orphans_removed.fetch_add(1, Ordering::Relaxed);
                warn!(id = %id, "Removed orphan index entry");
            }
        }

        self.ready.store(true, Ordering::Release);
        info!(
            reindexed = report.reindexed,
            reembedded = report.reembedded,
            recovered = report.recovered,
            failed = report.failed,
            orphans_removed = report.orphans_removed,
            elapsed_ms = start.elapsed().as_millis(),
            "Reconciliation pass completed"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Caller-facing operations
    // ------------------------------------------------------------------

    /// Admit, persist and index a new memory entry.
    ///
    /// On success the record is durable with at least `Pending` status;
    /// a failed or timed-out embedding marks it `Failed` for the next
    /// reconciliation pass but never fails the insert. The size governor
    /// runs afterwards as a side effect.
    ///
    /// `importance` is clamped to `[0, 1]`; non-finite values fall back
    /// to [`DEFAULT_IMPORTANCE`].
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Validation`] if the sanitized content
    /// exceeds `max_entry_bytes` (or is empty), or
    /// [`EngramError::Database`] if the durable write fails. Either way
    /// no partial state remains.
    pub async fn insert(
        &self,
        content: &MemoryContent,
        category: MemoryCategory,
        importance: f32,
    ) -> Result<MemoryId> {
        self.ensure_ready()?;

        let sanitized = match self.sanitizer.sanitize(content) {
            Ok(s) => s,
            Err(e) => {
                self.counters.inserts_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        if sanitized.byte_size > self.config.limits.max_entry_bytes {
            self.counters.inserts_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(EngramError::Validation {
                reason: format!(
                    "entry is {} bytes after sanitization, limit is {}",
                    sanitized.byte_size, self.config.limits.max_entry_bytes
                ),
            });
        }

        let importance = if importance.is_finite() {
            importance.clamp(0.0, 1.0)
        } else {
            DEFAULT_IMPORTANCE
        };
        let record = MemoryRecord {
            id: MemoryId::new(),
            content: sanitized.content,
            category,
            importance,
            created_at: Utc::now(),
            byte_size: sanitized.byte_size,
            status: EmbeddingStatus::Pending,
            embedding: None,
        };
        let id = record.id;
        let created_at = record.created_at;
        let text = record.content.embedding_text();

        {
            let store = self.store.lock();
            store.insert_record(&record)?;
        }
        self.entry_count.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(record.byte_size, Ordering::Relaxed);
        self.counters.inserts_accepted.fetch_add(1, Ordering::Relaxed);
        debug!(id = %id, category = %category, bytes = record.byte_size, "Inserted memory entry");

        // Completion path: the only external suspension point. If this
        // future is cancelled here, the record stays Pending and the next
        // reconciliation pass picks it up.
        match self.embed_bounded(text).await {
            Ok(vector) => self.attach(id, &vector, created_at),
            Err(e) => {
                warn!(id = %id, error = %e, "Embedding failed; entry kept for retry");
                self.counters.embeddings_failed.fetch_add(1, Ordering::Relaxed);
                let store = self.store.lock();
                if let Err(db) = store.mark_embedding_failed(id) {
                    warn!(id = %id, error = %db, "Could not record embedding failure");
                }
            }
        }

        self.enforce_limits();
        Ok(id)
    }

    /// Delete an entry. Removes the store record and the index vector
    /// together; a no-op (returning `false`) if the id is already absent,
    /// so deletion is safe to retry.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] if the durable delete fails; in
    /// that case the entry is left fully intact in both structures.
    pub fn delete(&self, id: MemoryId) -> Result<bool> {
        self.ensure_ready()?;
        let removed = self.remove_entry(id)?;
        if removed {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
            debug!(id = %id, "Deleted memory entry");
        }
        Ok(removed)
    }

    /// Search the index for the `k` nearest entries to `query`, ascending
    /// by cosine distance, ties broken by more-recent creation time.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::InvalidArgument`] if `k` is zero.
    pub fn search(&self, query: &Embedding, k: usize) -> Result<Vec<SearchHit>> {
        self.ensure_ready()?;
        self.counters.searches.fetch_add(1, Ordering::Relaxed);
        {
            let index = self.index.read();
            if !index.needs_build() {
                return index.search(query, k);
            }
        }
        let mut index = self.index.write();
        index.build();
        index.search(query, k)
    }

    /// Embed `text` with the injected provider, then search.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Embedding`] if the provider fails (no
    /// durable state is involved, so here the failure is the caller's to
    /// see), or [`EngramError::InvalidArgument`] for a zero `k`.
    pub async fn search_text(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.ensure_ready()?;
        let vector = self.embed_bounded(text.to_string()).await?;
        self.search(&vector, k)
    }

    /// Live-entry count and total content bytes, O(1) from incrementally
    /// maintained counters.
    #[must_use]
    pub fn aggregate_stats(&self) -> AggregateStats {
        AggregateStats {
            count: self.entry_count.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Load one record. Diagnostic; available before reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn get(&self, id: MemoryId) -> Result<Option<MemoryRecord>> {
        self.store.lock().get(id)
    }

    /// The `n` most recently created records, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn recent(&self, n: usize) -> Result<Vec<MemoryRecord>> {
        self.store.lock().recent(n)
    }

    /// Every record, via the paged scan. Diagnostic only, not for
    /// hot-path queries.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn list_all(&self) -> Result<Vec<MemoryRecord>> {
        let mut records = Vec::new();
        let mut cursor = None;
        loop {
            let page = {
                let store = self.store.lock();
                store.scan_page(cursor, SCAN_PAGE_SIZE)?
            };
            let Some(last) = page.last() else { break };
            cursor = Some(last.id);
            records.extend(page);
        }
        Ok(records)
    }

    /// Count store/index agreement without repairing anything.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn consistency_audit(&self) -> Result<ConsistencyAudit> {
        let mut audit = ConsistencyAudit::default();
        let mut present_ids = HashSet::new();

        for record in self.list_all()? {
            match record.status {
                EmbeddingStatus::Present => {
                    audit.present_records += 1;
                    present_ids.insert(record.id);
                    if !self.index.read().contains(record.id) {
                        audit.present_missing_from_index += 1;
                    }
                }
                EmbeddingStatus::Pending => audit.pending_records += 1,
                EmbeddingStatus::Failed => audit.failed_records += 1,
            }
        }

        let index = self.index.read();
        audit.index_entries = index.len();
        audit.orphan_index_entries = index
            .all_ids()
            .into_iter()
            .filter(|id| !present_ids.contains(id))
            .count();
        Ok(audit)
    }

    /// Copy the database to `dest_path` via SQLite's online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        self.store.lock().backup(dest_path)
    }

    /// Run SQLite's integrity check on the durable table.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] if the check query itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        self.store.lock().integrity_check()
    }

    /// Reclaim unused database space.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn vacuum(&self) -> Result<()> {
        self.store.lock().vacuum()
    }

    /// Runtime event counters.
    #[must_use]
    pub fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    /// The configuration this engine was constructed with.
    #[must_use]
    pub fn config(&self) -> &EngramConfig {
        &self.config
    }

    /// Close the engine, flushing the WAL into the main database file.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] if the checkpoint fails.
    pub fn close(self) -> Result<()> {
        let store = self.store.into_inner();
        store.checkpoint()?;
        info!(
            entries = self.entry_count.load(Ordering::Relaxed),
            "Memory engine closed"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngramError::NotReady)
        }
    }

    /// Run the provider on a blocking worker with the configured timeout.
    async fn embed_bounded(&self, text: String) -> Result<Embedding> {
        let provider = Arc::clone(&self.provider);
        let expected = self.config.embedding.dimensions;
        let timeout = Duration::from_millis(self.config.embedding.timeout_ms);

        let task = tokio::task::spawn_blocking(move || provider.embed(&text));
        let vector = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => {
                return Err(EngramError::Embedding(format!(
                    "embedding task failed: {join}"
                )));
            }
            Err(_) => {
                return Err(EngramError::Embedding(format!(
                    "embedding timed out after {}ms",
                    self.config.embedding.timeout_ms
                )));
            }
        };

        if vector.dimensions() != expected {
            return Err(EngramError::Embedding(format!(
                "provider returned {} dimensions, expected {expected}",
                vector.dimensions()
            )));
        }
        Ok(vector)
    }

    /// Persist a fresh vector and mirror it into the index. An entry that
    /// vanished mid-embed (deleted or evicted) is silently skipped.
    fn attach(&self, id: MemoryId, vector: &Embedding, created_at: DateTime<Utc>) {
        let store = self.store.lock();
        match store.attach_embedding(id, vector) {
            Ok(()) => {
                self.index.write().upsert(id, vector, created_at);
            }
            Err(EngramError::NotFound(_)) => {
                debug!(id = %id, "Entry vanished before embedding attach");
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Could not persist embedding; left for reconciliation");
            }
        }
    }

    /// Remove one entry from both structures, atomically per entry: either
    /// both the row and the vector go, or neither does.
    fn remove_entry(&self, id: MemoryId) -> Result<bool> {
        let store = self.store.lock();
        let Some(record) = store.get(id)? else {
            // Row already gone; drop any lingering vector defensively.
            self.index.write().remove(id);
            return Ok(false);
        };

        // Index first: a concurrent search must never surface an id whose
        // row is mid-deletion.
        self.index.write().remove(id);
        match store.delete(id) {
            Ok(_) => {
                self.entry_count.fetch_sub(1, Ordering::Relaxed);
                self.total_bytes.fetch_sub(record.byte_size, Ordering::Relaxed);
                Ok(true)
            }
            Err(e) => {
                if record.status == EmbeddingStatus::Present {
                    if let Some(vector) = &record.embedding {
                        self.index.write().upsert(id, vector, record.created_at);
                    }
                }
                Err(e)
            }
        }
    }

    /// Evict 10% batches of the lowest-value entries until the configured
    /// limits hold. A side effect of insertion: observable through the
    /// counters and the log, never through the insert's result.
    fn enforce_limits(&self) {
        loop {
            let stats = self.aggregate_stats();
            if !eviction::over_limits(&stats, &self.config.limits) {
                return;
            }

            let candidates = {
                let store = self.store.lock();
                match store.eviction_candidates() {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "Eviction skipped: could not rank entries");
                        return;
                    }
                }
            };
            if candidates.is_empty() {
                return;
            }

            let plan = eviction::select_victims(candidates, eviction::batch_size(stats.count));
            let mut removed = 0u64;
            let mut reclaimed = 0u64;
            for victim in &plan.victims {
                match self.remove_entry(victim.id) {
                    Ok(true) => {
                        removed += 1;
                        reclaimed += victim.byte_size;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(id = %victim.id, error = %e, "Could not evict entry"),
                }
            }

            self.counters.entries_evicted.fetch_add(removed, Ordering::Relaxed);
            self.counters.eviction_passes.fetch_add(1, Ordering::Relaxed);
            info!(
                evicted = removed,
                reclaimed_bytes = reclaimed,
                live = self.entry_count.load(Ordering::Relaxed),
                "Eviction pass completed"
            );

            if removed == 0 {
                warn!("Eviction made no progress; leaving limits unsatisfied");
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingProvider;

    const DIMS: usize = 16;

    fn config() -> EngramConfig {
        let mut config = EngramConfig::default();
        config.embedding.dimensions = DIMS;
        config
    }

    async fn engine() -> MemoryEngine {
        let engine = MemoryEngine::open_in_memory(
            config(),
            Arc::new(HashEmbeddingProvider::new(DIMS)),
        )
        .expect("open");
        engine.reconcile().await.expect("reconcile");
        engine
    }

    /// A provider whose every call fails, for exercising the Failed path.
    struct BrokenProvider(usize);

    impl EmbeddingProvider for BrokenProvider {
        fn embed(&self, _text: &str) -> Result<Embedding> {
            Err(EngramError::Embedding("model unavailable".to_string()))
        }
        fn dimensions(&self) -> usize {
            self.0
        }
        fn model_name(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn refuses_traffic_before_reconcile() {
        let engine = MemoryEngine::open_in_memory(
            config(),
            Arc::new(HashEmbeddingProvider::new(DIMS)),
        )
        .expect("open");

        let err = engine
            .insert(&MemoryContent::new("too early"), MemoryCategory::Observation, 0.5)
            .await
            .expect_err("must refuse");
        assert!(matches!(err, EngramError::NotReady));

        engine.reconcile().await.expect("reconcile");
        engine
            .insert(&MemoryContent::new("now fine"), MemoryCategory::Observation, 0.5)
            .await
            .expect("insert");
    }

    #[tokio::test]
    async fn provider_dimension_mismatch_is_a_config_error() {
        let err = MemoryEngine::open_in_memory(
            config(),
            Arc::new(HashEmbeddingProvider::new(DIMS + 1)),
        )
        .expect_err("must fail");
        assert!(matches!(err, EngramError::Config(_)));
    }

    #[tokio::test]
    async fn insert_then_search_finds_the_entry() {
        let engine = engine().await;
        let id = engine
            .insert(
                &MemoryContent::new("the cat sat on the mat"),
                MemoryCategory::Observation,
                0.5,
            )
            .await
            .expect("insert");

        let record = engine.get(id).expect("get").expect("Some");
        assert_eq!(record.status, EmbeddingStatus::Present);

        let hits = engine
            .search_text("the cat sat on the mat", 1)
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
        assert!(hits[0].distance < 0.001, "identical text should match itself");
    }

    #[tokio::test]
    async fn failed_embedding_never_fails_the_insert() {
        let engine = MemoryEngine::open_in_memory(config(), Arc::new(BrokenProvider(DIMS)))
            .expect("open");
        engine.reconcile().await.expect("reconcile");

        let id = engine
            .insert(&MemoryContent::new("unembeddable"), MemoryCategory::ToolResult, 0.5)
            .await
            .expect("insert must still succeed");

        let record = engine.get(id).expect("get").expect("Some");
        assert_eq!(record.status, EmbeddingStatus::Failed);
        assert!(engine.consistency_audit().expect("audit").is_consistent());
        assert_eq!(engine.counters().snapshot().embeddings_failed, 1);
    }

    #[tokio::test]
    async fn delete_removes_record_and_vector_together() {
        let engine = engine().await;
        let id = engine
            .insert(&MemoryContent::new("ephemeral"), MemoryCategory::Reflection, 0.5)
            .await
            .expect("insert");

        assert!(engine.delete(id).expect("delete"));
        assert!(!engine.delete(id).expect("retry is a no-op"));
        assert!(engine.get(id).expect("get").is_none());

        let hits = engine.search_text("ephemeral", 1).await.expect("search");
        assert!(hits.is_empty(), "deleted entries must not be searchable");
        assert!(engine.consistency_audit().expect("audit").is_consistent());
    }

    #[tokio::test]
    async fn aggregate_stats_track_inserts_and_deletes() {
        let engine = engine().await;
        assert_eq!(engine.aggregate_stats(), AggregateStats::default());

        let id = engine
            .insert(&MemoryContent::new("counted"), MemoryCategory::Observation, 0.5)
            .await
            .expect("insert");
        let stats = engine.aggregate_stats();
        assert_eq!(stats.count, 1);
        assert!(stats.total_bytes > 0);

        engine.delete(id).expect("delete");
        assert_eq!(engine.aggregate_stats(), AggregateStats::default());
    }

    #[tokio::test]
    async fn oversized_entry_is_rejected_with_no_partial_state() {
        let mut config = config();
        config.limits.max_entry_bytes = 64;
        let engine = MemoryEngine::open_in_memory(
            config,
            Arc::new(HashEmbeddingProvider::new(DIMS)),
        )
        .expect("open");
        engine.reconcile().await.expect("reconcile");

        let err = engine
            .insert(
                &MemoryContent::new("x".repeat(500)),
                MemoryCategory::Observation,
                0.5,
            )
            .await
            .expect_err("must reject");
        assert!(matches!(err, EngramError::Validation { .. }));
        assert_eq!(engine.aggregate_stats().count, 0);
        assert_eq!(engine.counters().snapshot().inserts_rejected, 1);
    }

    #[tokio::test]
    async fn non_finite_importance_falls_back_to_default() {
        let engine = engine().await;
        let id = engine
            .insert(&MemoryContent::new("nan importance"), MemoryCategory::Observation, f32::NAN)
            .await
            .expect("insert");
        let record = engine.get(id).expect("get").expect("Some");
        assert!((record.importance - DEFAULT_IMPORTANCE).abs() < f32::EPSILON);
    }
}
