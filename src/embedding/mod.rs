//! Text-to-vector embedding providers.
//!
//! Provides the [`EmbeddingProvider`] trait, an offline feature-hashing
//! provider, and an HTTP provider for OpenAI-compatible `/embeddings`
//! endpoints. Providers are created via [`create_provider`] from config.

pub mod hashing;
pub mod openai;

use anyhow::Result;

/// Trait for embedding text into vectors.
///
/// All methods are synchronous. Callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched requests.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Identifier stored alongside indexed vectors. A change forces a rebuild.
    fn model_id(&self) -> &str;
}

/// Create an embedding provider from config.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashing" => Ok(Box::new(hashing::HashingEmbedder::new(config.dimensions))),
        "openai" => Ok(Box::new(openai::OpenAiEmbedder::new(config)?)),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: hashing, openai"),
    }
}

/// L2-normalize a vector in place. Zero vectors are left as they are.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
