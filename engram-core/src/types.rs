//! Core type definitions for the engram memory engine.
//!
//! All types are serializable; identifiers are time-ordered UUIDs so that
//! newly assigned IDs sort after every previously assigned one and deleted
//! IDs are never reused.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Importance assigned to entries whose caller did not express a preference.
/// Deliberately low so unranked memories are the first eviction victims.
pub const DEFAULT_IMPORTANCE: f32 = 0.1;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Unique identifier for a memory entry.
///
/// Backed by a UUID v7: creation-time ordered, unique across restarts, and
/// never reused after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Create a fresh, time-ordered memory ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse an ID from its canonical string form.
    ///
    /// # Errors
    ///
    /// Returns [`uuid::Error`] if `s` is not a valid UUID.
    pub fn parse(s: &str) -> std::result::Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Closed tag set classifying what kind of experience an entry records.
///
/// Pure metadata: the engine stores and returns it but never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// Something the agent perceived.
    Observation,
    /// A thought the agent produced about its own state or history.
    Reflection,
    /// A step in pursuing a goal.
    GoalTrace,
    /// Output captured from a tool invocation.
    ToolResult,
    /// Text supplied directly by a user.
    UserInput,
    /// A distilled, higher-level conclusion.
    Insight,
}

impl MemoryCategory {
    /// Stable string form used in the durable table.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Reflection => "reflection",
            Self::GoalTrace => "goal_trace",
            Self::ToolResult => "tool_result",
            Self::UserInput => "user_input",
            Self::Insight => "insight",
        }
    }

    /// Parse the stable string form back into a category.
    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "observation" => Some(Self::Observation),
            "reflection" => Some(Self::Reflection),
            "goal_trace" => Some(Self::GoalTrace),
            "tool_result" => Some(Self::ToolResult),
            "user_input" => Some(Self::UserInput),
            "insight" => Some(Self::Insight),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Embedding status
// ---------------------------------------------------------------------------

/// Whether a usable vector backs an entry.
///
/// Transitions: `Pending → Present` on a successful embed,
/// `Pending → Failed` on an embed error. `Failed` entries are retried only
/// by a reconciliation pass, never by ad hoc polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    /// No embed attempt has completed yet.
    Pending,
    /// A vector is persisted and indexed.
    Present,
    /// The last embed attempt failed; eligible for retry on reconcile.
    Failed,
}

impl EmbeddingStatus {
    /// Stable string form used in the durable table.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Present => "present",
            Self::Failed => "failed",
        }
    }

    /// Parse the stable string form back into a status.
    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "present" => Some(Self::Present),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for EmbeddingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Embedding vector
// ---------------------------------------------------------------------------

/// A dense vector embedding for semantic similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Cosine similarity between two embeddings.
    /// Returns 0.0 for mismatched dimensions or zero-magnitude vectors.
    #[must_use]
    pub fn cosine_similarity(&self, other: &Self) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom < f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }

    /// Dimensionality of the embedding.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }
}

// ---------------------------------------------------------------------------
// Content document
// ---------------------------------------------------------------------------

/// The opaque payload of a memory entry: a small structured document with
/// optional title and snippet, a body, and free-form key/value attributes.
///
/// `byte_size` is always derived from the serialized (JSON) form of this
/// document, never from field lengths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContent {
    /// Short human-readable title (e.g. a fetched page title).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Main text of the memory.
    pub body: String,
    /// Short excerpt or summary (e.g. a search-result snippet).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Additional structured attributes (source URL, tool name, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl MemoryContent {
    /// Create a content document from a body text.
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Set the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the snippet.
    #[must_use]
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    /// Add one attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// The text handed to the embedding provider: title, body and snippet
    /// joined in a fixed order so embeddings are reproducible.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if let Some(title) = &self.title {
            parts.push(title);
        }
        parts.push(&self.body);
        if let Some(snippet) = &self.snippet {
            parts.push(snippet);
        }
        parts.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A full memory record as persisted in the durable table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique, immutable identifier.
    pub id: MemoryId,
    /// The sanitized content document.
    pub content: MemoryContent,
    /// Metadata tag; not interpreted by the engine.
    pub category: MemoryCategory,
    /// Eviction tie-break signal in `[0, 1]`.
    pub importance: f32,
    /// Set once at insertion, never mutated.
    pub created_at: DateTime<Utc>,
    /// Size of the serialized content in bytes, fixed at admission.
    pub byte_size: u64,
    /// Whether a usable vector backs this entry.
    pub status: EmbeddingStatus,
    /// The persisted vector, present only when `status == Present`.
    pub embedding: Option<Embedding>,
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Incrementally maintained live-entry totals, readable in O(1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStats {
    /// Number of live entries.
    pub count: u64,
    /// Sum of `byte_size` over all live entries.
    pub total_bytes: u64,
}
