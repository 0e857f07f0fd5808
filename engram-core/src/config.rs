//! Configuration for the engram memory engine.
//!
//! Loadable from TOML; every section and field has a serde default so a
//! partial file (or none at all) yields a working configuration.

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngramConfig {
    /// Hard resource ceilings enforced by the size governor.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Content sanitizer truncation caps.
    #[serde(default)]
    pub sanitizer: SanitizerConfig,
    /// Embedding provider expectations.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Vector index tuning.
    #[serde(default)]
    pub index: IndexConfig,
    /// Durable store settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl EngramConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns [`crate::EngramError::Config`] if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::EngramError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Resource ceilings. All three are enforced strictly at admission and by
/// the eviction pass; none is ever relaxed after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of live entries.
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    /// Maximum total serialized content bytes across live entries.
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,
    /// Maximum serialized content bytes for a single entry.
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_total_bytes: 64 * 1024 * 1024,
            max_entry_bytes: 32 * 1024,
        }
    }
}

/// Truncation caps applied to text sub-fields before the hard admission
/// check. Truncation happens here; rejection happens at `max_entry_bytes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizerConfig {
    /// Byte cap for the body field.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Character cap for the title field.
    #[serde(default = "default_max_title_chars")]
    pub max_title_chars: usize,
    /// Character cap for the snippet field.
    #[serde(default = "default_max_snippet_chars")]
    pub max_snippet_chars: usize,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 5 * 1024,
            max_title_chars: 200,
            max_snippet_chars: 500,
        }
    }
}

/// Embedding provider expectations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Expected vector dimensionality; vectors of any other length are
    /// treated as provider failures.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Hard timeout for a single embed call in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            timeout_ms: 5000,
        }
    }
}

/// Vector index tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Below this many entries, searches use an exact linear scan instead
    /// of the HNSW graph.
    #[serde(default = "default_brute_force_threshold")]
    pub brute_force_threshold: usize,
    /// `ef_construction` parameter (higher = more accurate build, slower).
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    /// `ef_search` parameter (higher = more accurate search, slower).
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            brute_force_threshold: 100,
            ef_construction: 100,
            ef_search: 50,
        }
    }
}

/// Durable store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Detect content corruption via CRC-32 checksums.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            checksum_enabled: true,
            busy_timeout_ms: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}
fn default_max_entries() -> u64 {
    10_000
}
fn default_max_total_bytes() -> u64 {
    64 * 1024 * 1024
}
fn default_max_entry_bytes() -> u64 {
    32 * 1024
}
fn default_max_body_bytes() -> usize {
    5 * 1024
}
fn default_max_title_chars() -> usize {
    200
}
fn default_max_snippet_chars() -> usize {
    500
}
fn default_dimensions() -> usize {
    384
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_brute_force_threshold() -> usize {
    100
}
fn default_ef_construction() -> usize {
    100
}
fn default_ef_search() -> usize {
    50
}
fn default_busy_timeout_ms() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = EngramConfig::default();
        assert_eq!(config.limits.max_entries, 10_000);
        assert_eq!(config.sanitizer.max_body_bytes, 5120);
        assert_eq!(config.embedding.dimensions, 384);
        assert!(config.persistence.wal_mode);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config = EngramConfig::from_toml(
            r#"
            [limits]
            max_entries = 32

            [embedding]
            dimensions = 8
            "#,
        )
        .expect("parse");
        assert_eq!(config.limits.max_entries, 32);
        assert_eq!(config.limits.max_entry_bytes, 32 * 1024);
        assert_eq!(config.embedding.dimensions, 8);
        assert_eq!(config.embedding.timeout_ms, 5000);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = EngramConfig::from_toml("limits = 3").expect_err("must fail");
        assert!(matches!(err, crate::EngramError::Config(_)));
    }
}
