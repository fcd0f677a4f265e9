//! Deterministic hash-seeded embeddings for tests and offline smoke runs.

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use sha2::{Digest, Sha256};

use crate::embedding::{EmbeddingProvider, l2_normalize};
use crate::error::Result;

/// An [`EmbeddingProvider`] that needs no model.
///
/// The SHA-256 digest of the text seeds a PRNG which draws `dimensions`
/// standard-normal components. The same text always maps to the same
/// vector, across calls and process restarts. Vectors are unrelated to
/// meaning, so rankings are only useful for exercising the pipeline.
#[derive(Debug, Clone)]
pub struct DeterministicEmbeddingProvider {
    dimensions: usize,
    normalize: bool,
}

impl DeterministicEmbeddingProvider {
    /// Create a provider producing L2-normalized vectors of `dimensions` length.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, normalize: true }
    }

    /// Toggle L2 normalization.
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Embed synchronously. Used by both trait methods.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let seed: [u8; 32] = Sha256::digest(text.as_bytes()).into();
        let mut rng = StdRng::from_seed(seed);
        let mut v: Vec<f32> =
            (0..self.dimensions).map(|_| StandardNormal.sample(&mut rng)).collect();
        if self.normalize {
            l2_normalize(&mut v);
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for DeterministicEmbeddingProvider {
    fn name(&self) -> &str {
        "dummy"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
