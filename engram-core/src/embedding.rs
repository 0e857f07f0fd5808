//! Vector embedding abstraction layer.
//!
//! The engine treats embedding computation as an injected capability: it
//! calls [`EmbeddingProvider::embed`] and expects either a fixed-dimension
//! vector or a failure. Failures are routine (remote models rate-limit and
//! time out) and are absorbed by the entry state machine, never propagated
//! to the inserting caller.

use crate::error::Result;
use crate::types::Embedding;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Generate vector embeddings from text.
///
/// Implementations must be `Send + Sync`; the engine invokes them from a
/// blocking worker with a bounded timeout, possibly concurrently.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngramError::Embedding`] if the model fails to
    /// produce a vector.
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// The dimensionality of vectors produced by this provider.
    fn dimensions(&self) -> usize;

    /// A human-readable name for the model.
    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Stub provider
// ---------------------------------------------------------------------------

/// A stub provider that returns zero-vectors.
///
/// Useful for unit tests of paths that don't inspect vector values, and
/// for embedding-less deployments where search is not needed.
pub struct StubEmbeddingProvider {
    dims: usize,
}

impl StubEmbeddingProvider {
    /// Create a new stub provider with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }
}

impl Default for StubEmbeddingProvider {
    fn default() -> Self {
        Self::new(384)
    }
}

impl EmbeddingProvider for StubEmbeddingProvider {
    fn embed(&self, _text: &str) -> Result<Embedding> {
        Ok(Embedding(vec![0.0; self.dims]))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "stub-zero-vector"
    }
}

// ---------------------------------------------------------------------------
// Deterministic hashing provider
// ---------------------------------------------------------------------------

/// A provider that derives a unit vector deterministically from the text.
///
/// Identical texts always map to identical vectors and distinct texts map
/// to (almost certainly) distinct directions, which makes search results
/// reproducible without loading a real model. Used throughout the test
/// suite and suitable as a degraded-mode fallback.
pub struct HashEmbeddingProvider {
    dims: usize,
}

impl HashEmbeddingProvider {
    /// Create a new hashing provider.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Embedding> {
        // FNV-1a over the text seeds a small xorshift generator; one draw
        // per dimension, then L2-normalize.
        let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.bytes() {
            seed ^= u64::from(byte);
            seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
        }
        if seed == 0 {
            seed = 0x9e37_79b9_7f4a_7c15;
        }

        let mut state = seed;
        let mut raw = Vec::with_capacity(self.dims);
        for _ in 0..self.dims {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            // Top 53 bits → [0, 1) → [-1, 1).
            let unit = (state >> 11) as f64 / 9_007_199_254_740_992.0;
            raw.push((unit * 2.0 - 1.0) as f32);
        }

        let mag: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag < f32::EPSILON {
            return Ok(Embedding(vec![0.0; self.dims]));
        }
        Ok(Embedding(raw.iter().map(|x| x / mag).collect()))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "deterministic-hash"
    }
}

// ---------------------------------------------------------------------------
// Random provider
// ---------------------------------------------------------------------------

/// A provider that returns random unit-length vectors.
///
/// Useful for integration tests that need diverse, non-zero embeddings
/// without caring about reproducibility.
pub struct RandomEmbeddingProvider {
    dims: usize,
}

impl RandomEmbeddingProvider {
    /// Create a new random provider.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }
}

impl EmbeddingProvider for RandomEmbeddingProvider {
    fn embed(&self, _text: &str) -> Result<Embedding> {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let raw: Vec<f32> = (0..self.dims).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let mag: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag < f32::EPSILON {
            return Ok(Embedding(vec![0.0; self.dims]));
        }
        Ok(Embedding(raw.iter().map(|x| x / mag).collect()))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "random-unit-vector"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
