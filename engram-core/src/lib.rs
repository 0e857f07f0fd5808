//! # Engram Core Library
//!
//! Durable, bounded, similarity-searchable memory for autonomous agents.
//!
//! The engine keeps two structures mutually consistent under concurrent
//! writers and partial failure:
//!
//! - a **durable record table** (SQLite) holding each memory's content,
//!   metadata and embedding-presence status, and
//! - an **in-memory vector index** over the embeddings of live entries,
//!   derived entirely from the table and rebuilt at startup.
//!
//! Around them sit a **content sanitizer** (normalizes and bounds payloads
//! before admission), a **size governor** (evicts low-value entries when
//! count or byte ceilings are exceeded) and a **consistency recoverer**
//! (reconciles table and index after a restart or crash, and retries
//! failed embeddings).
//!
//! ## Lifecycle
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use engram_core::{EngramConfig, MemoryEngine, MemoryCategory, MemoryContent};
//! # use engram_core::embedding::HashEmbeddingProvider;
//! # #[tokio::main]
//! # async fn main() -> engram_core::Result<()> {
//! let provider = Arc::new(HashEmbeddingProvider::new(384));
//! let engine = MemoryEngine::open("memories.db", EngramConfig::default(), provider)?;
//! engine.reconcile().await?;   // required before any traffic
//!
//! let id = engine
//!     .insert(
//!         &MemoryContent::new("observed the build turn green"),
//!         MemoryCategory::Observation,
//!         0.7,
//!     )
//!     .await?;
//! let hits = engine.search_text("build status", 5).await?;
//! # let _ = (id, hits);
//! engine.close()?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod eviction;
pub mod index;
pub mod metrics;
pub mod recovery;
pub mod sanitizer;
pub mod store;
pub mod types;

pub use config::EngramConfig;
pub use engine::{ConsistencyAudit, MemoryEngine};
pub use error::{EngramError, Result};
pub use index::SearchHit;
pub use recovery::ReconcileReport;
pub use types::*;
