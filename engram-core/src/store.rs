//! SQLite persistence layer — the durable record table.
//!
//! One row per memory entry:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS memories (
//!     id         TEXT PRIMARY KEY,
//!     category   TEXT NOT NULL,
//!     content    BLOB NOT NULL,
//!     checksum   TEXT,
//!     importance REAL NOT NULL,
//!     created_at TEXT NOT NULL,
//!     byte_size  INTEGER NOT NULL,
//!     status     TEXT NOT NULL,
//!     embedding  BLOB
//! );
//! ```
//!
//! Content is JSON inside a BLOB column (schema stays stable across
//! document changes); the embedding is a bincode-encoded `Vec<f32>`; the
//! optional CRC-32 checksum detects content corruption. WAL mode with
//! `synchronous = FULL` so a mutating call that has returned `Ok` survives
//! a crash. The vector index is NOT persisted here; it is a pure runtime
//! derivation from the `Present` rows of this table.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{EngramError, Result};
use crate::types::{AggregateStats, Embedding, EmbeddingStatus, MemoryCategory, MemoryContent, MemoryId, MemoryRecord};

/// Page size used by [`MemoryStore::scan_page`] callers.
pub const SCAN_PAGE_SIZE: usize = 256;

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

/// CRC-32 (ISO 3309) of `data` as a lowercase hex string.
fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32_compute(data))
}

fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

// ---------------------------------------------------------------------------
// Ranking row for the size governor
// ---------------------------------------------------------------------------

/// The fields the size governor needs to rank an entry for eviction.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    /// Entry identifier.
    pub id: MemoryId,
    /// Eviction tie-break signal.
    pub importance: f32,
    /// Insertion timestamp.
    pub created_at: DateTime<Utc>,
    /// Serialized content bytes this entry accounts for.
    pub byte_size: u64,
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Handle to the open SQLite database holding all memory records.
///
/// Not internally synchronized; the engine serializes access behind a lock.
pub struct MemoryStore {
    conn: Connection,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        // FULL, not NORMAL: an acknowledged insert must survive power loss.
        conn.execute_batch("PRAGMA synchronous = FULL;")?;
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};",
            config.busy_timeout_ms
        ))?;

        Self::init_schema(&conn)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "Memory store opened"
        );

        Ok(Self {
            conn,
            config: config.clone(),
            db_path,
        })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn,
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id         TEXT PRIMARY KEY,
                category   TEXT NOT NULL,
                content    BLOB NOT NULL,
                checksum   TEXT,
                importance REAL NOT NULL,
                created_at TEXT NOT NULL,
                byte_size  INTEGER NOT NULL,
                status     TEXT NOT NULL,
                embedding  BLOB
            );
            CREATE INDEX IF NOT EXISTS idx_memories_rank
                ON memories(importance, created_at);
            CREATE INDEX IF NOT EXISTS idx_memories_created
                ON memories(created_at);",
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Core CRUD
    // ------------------------------------------------------------------

    /// Persist a freshly admitted record. The row is durable when this
    /// returns; the caller may assume a crash afterwards cannot lose it.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Serialization`] if the content cannot be
    /// encoded, or [`EngramError::Database`] on SQLite failures.
    pub fn insert_record(&self, record: &MemoryRecord) -> Result<()> {
        let start = Instant::now();
        let json = serde_json::to_vec(&record.content)
            .map_err(|e| EngramError::Serialization(e.to_string()))?;
        let checksum = self.config.checksum_enabled.then(|| crc32_hex(&json));
        let embedding = record
            .embedding
            .as_ref()
            .map(|e| bincode::serialize(&e.0).map_err(|err| EngramError::Serialization(err.to_string())))
            .transpose()?;

        self.conn.execute(
            "INSERT INTO memories
                (id, category, content, checksum, importance, created_at, byte_size, status, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.to_string(),
                record.category.as_str(),
                json,
                checksum,
                f64::from(record.importance),
                encode_timestamp(&record.created_at),
                record.byte_size,
                record.status.as_str(),
                embedding,
            ],
        )?;

        debug!(
            id = %record.id,
            bytes = record.byte_size,
            elapsed_us = start.elapsed().as_micros(),
            "Persisted memory record"
        );
        Ok(())
    }

    /// Persist a vector for `id` and transition it to `Present`.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::NotFound`] if no row exists for `id`, or
    /// [`EngramError::Database`] / [`EngramError::Serialization`] on
    /// encoding or SQLite failures.
    pub fn attach_embedding(&self, id: MemoryId, vector: &Embedding) -> Result<()> {
        let blob = bincode::serialize(&vector.0)
            .map_err(|e| EngramError::Serialization(e.to_string()))?;
        let updated = self.conn.execute(
            "UPDATE memories SET status = ?1, embedding = ?2 WHERE id = ?3",
            params![EmbeddingStatus::Present.as_str(), blob, id.to_string()],
        )?;
        if updated == 0 {
            return Err(EngramError::NotFound(id));
        }
        Ok(())
    }

    /// Transition `id` to `Failed`. Idempotent; a no-op for absent rows.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn mark_embedding_failed(&self, id: MemoryId) -> Result<()> {
        self.conn.execute(
            "UPDATE memories SET status = ?1, embedding = NULL WHERE id = ?2",
            params![EmbeddingStatus::Failed.as_str(), id.to_string()],
        )?;
        Ok(())
    }

    /// Delete the row for `id`. Returns `true` if a row was removed;
    /// deleting an absent row is a safe no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn delete(&self, id: MemoryId) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM memories WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }

    /// Load a single record.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures or
    /// [`EngramError::Serialization`] if the stored content is undecodable.
    pub fn get(&self, id: MemoryId) -> Result<Option<MemoryRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, category, content, checksum, importance, created_at, byte_size, status, embedding
             FROM memories WHERE id = ?1",
        )?;
        let row: Option<RawRow> = stmt
            .query_row(params![id.to_string()], RawRow::from_row)
            .optional()?;
        match row {
            Some(raw) => Ok(Some(self.decode_row(raw)?)),
            None => Ok(None),
        }
    }

    /// One page of the restartable full scan, ordered by `id`. Pass the
    /// last id of the previous page to resume; `None` starts over. Used by
    /// the recoverer and diagnostics, never on the query hot path.
    ///
    /// Rows whose content cannot be decoded are skipped with a warning;
    /// a single corrupt row must not abort recovery of the rest.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn scan_page(&self, after: Option<MemoryId>, limit: usize) -> Result<Vec<MemoryRecord>> {
        let cursor = after.map(|id| id.to_string()).unwrap_or_default();
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, category, content, checksum, importance, created_at, byte_size, status, embedding
             FROM memories WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        let raws = stmt
            .query_map(params![cursor, limit as i64], RawRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(raws.len());
        for raw in raws {
            let id = raw.id.clone();
            match self.decode_row(raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!(id = %id, error = %e, "Skipping undecodable row during scan"),
            }
        }
        Ok(records)
    }

    /// The `n` most recently created records, newest first. Diagnostic.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn recent(&self, n: usize) -> Result<Vec<MemoryRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, category, content, checksum, importance, created_at, byte_size, status, embedding
             FROM memories ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let raws = stmt
            .query_map(params![n as i64], RawRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(raws.len());
        for raw in raws {
            let id = raw.id.clone();
            match self.decode_row(raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!(id = %id, error = %e, "Skipping undecodable row"),
            }
        }
        Ok(records)
    }

    /// All live entries' ranking fields, for the size governor.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn eviction_candidates(&self) -> Result<Vec<EvictionCandidate>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, importance, created_at, byte_size FROM memories")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut candidates = Vec::new();
        for row in rows {
            let (id_str, importance, created_at, byte_size) = row?;
            let Ok(id) = MemoryId::parse(&id_str) else {
                warn!(id = %id_str, "Skipping row with invalid UUID");
                continue;
            };
            let created_at = decode_timestamp(&created_at)?;
            candidates.push(EvictionCandidate {
                id,
                importance: importance as f32,
                created_at,
                byte_size: byte_size.max(0) as u64,
            });
        }
        Ok(candidates)
    }

    /// Full-scan aggregate totals. Used exactly once, at engine open, to
    /// seed the incrementally maintained counters; every later read of the
    /// aggregates is O(1) against those counters.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn aggregate_scan(&self) -> Result<AggregateStats> {
        let (count, total_bytes): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(byte_size), 0) FROM memories",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(AggregateStats {
            count: count.max(0) as u64,
            total_bytes: total_bytes.max(0) as u64,
        })
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Run SQLite's integrity check. `Ok(true)` means the database passes.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] if the check query itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Reclaim unused space.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM;")?;
        Ok(())
    }

    /// Copy the database to `dest_path` using SQLite's online-backup API.
    /// Safe to call while the database is being read.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;
        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Database backup completed"
        );
        Ok(())
    }

    /// Flush the WAL into the main database file. Called on clean close.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn checkpoint(&self) -> Result<()> {
        if self.config.wal_mode {
            self.conn
                .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        Ok(())
    }

    /// Path to the database file (`:memory:` for in-memory stores).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ------------------------------------------------------------------
    // Row decoding
    // ------------------------------------------------------------------

    fn decode_row(&self, raw: RawRow) -> Result<MemoryRecord> {
        if self.config.checksum_enabled {
            if let Some(expected) = &raw.checksum {
                let actual = crc32_hex(&raw.content);
                if *expected != actual {
                    warn!(
                        id = %raw.id,
                        expected = %expected,
                        actual = %actual,
                        "Checksum mismatch, possible content corruption"
                    );
                }
            }
        }

        let id = MemoryId::parse(&raw.id)
            .map_err(|e| EngramError::Serialization(format!("invalid id {}: {e}", raw.id)))?;
        let category = MemoryCategory::from_str_opt(&raw.category).ok_or_else(|| {
            EngramError::Serialization(format!("unknown category {}", raw.category))
        })?;
        let status = EmbeddingStatus::from_str_opt(&raw.status).ok_or_else(|| {
            EngramError::Serialization(format!("unknown embedding status {}", raw.status))
        })?;
        let content: MemoryContent = serde_json::from_slice(&raw.content)
            .map_err(|e| EngramError::Serialization(e.to_string()))?;
        let created_at = decode_timestamp(&raw.created_at)?;

        // An undecodable vector is a consistency violation, not a fatal
        // error: surface the record with no embedding so reconciliation
        // can re-embed it.
        let embedding = raw.embedding.as_deref().and_then(|blob| {
            match bincode::deserialize::<Vec<f32>>(blob) {
                Ok(values) => Some(Embedding(values)),
                Err(e) => {
                    warn!(id = %raw.id, error = %e, "Discarding undecodable embedding blob");
                    None
                }
            }
        });

        Ok(MemoryRecord {
            id,
            content,
            category,
            importance: raw.importance as f32,
            created_at,
            byte_size: raw.byte_size.max(0) as u64,
            status,
            embedding,
        })
    }
}

/// Raw column values before decoding, so serde errors can be handled
/// outside the rusqlite row closure.
struct RawRow {
    id: String,
    category: String,
    content: Vec<u8>,
    checksum: Option<String>,
    importance: f64,
    created_at: String,
    byte_size: i64,
    status: String,
    embedding: Option<Vec<u8>>,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            category: row.get(1)?,
            content: row.get(2)?,
            checksum: row.get(3)?,
            importance: row.get(4)?,
            created_at: row.get(5)?,
            byte_size: row.get(6)?,
            status: row.get(7)?,
            embedding: row.get(8)?,
        })
    }
}

/// RFC 3339 with fixed microsecond precision so lexicographic order in the
/// TEXT column matches chronological order.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngramError::Serialization(format!("invalid timestamp {s}: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
