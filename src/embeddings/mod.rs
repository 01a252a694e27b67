// Embedding backends and the process-wide admission gate in front of them

pub mod gate;
pub mod hashing;
pub mod ollama;

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, EmbeddingProvider};

pub use gate::{EmbeddingGate, GateMetrics};
pub use hashing::HashingEmbedder;
pub use ollama::OllamaClient;

/// A blocking text-to-vector backend.
///
/// Implementations may assume they are never called concurrently: the
/// [`EmbeddingGate`] admits one call at a time across the whole process.
pub trait Embedder: Send + Sync {
    /// Length of every vector this backend returns
    fn dimension(&self) -> usize;

    /// Embed `texts` in order; the result has exactly one vector per input
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    /// Short description for logs and status output
    fn describe(&self) -> String;
}

/// Scale `vector` to unit length in place; the zero vector is left untouched
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Build the backend selected by the configuration
///
/// # Arguments
/// * `config` - Effective configuration
///
/// # Returns
/// The embedder; for Ollama the model is checked (and pulled unless offline)
/// when `preflight` is set, with failures logged rather than returned.
#[inline]
pub fn build_embedder(config: &Config, preflight: bool) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.embedding.provider {
        EmbeddingProvider::Hashing => {
            let embedder = HashingEmbedder::new(config.ollama.embedding_dimension as usize);
            info!("Using {}", embedder.describe());
            Ok(Arc::new(embedder))
        }
        EmbeddingProvider::Ollama => {
            let client = OllamaClient::new(&config.ollama)?;
            if preflight {
                if let Err(e) = client.ensure_model(config.embedding.offline) {
                    warn!("Embedding backend not ready yet: {:#}", e);
                }
            }
            info!("Using {}", client.describe());
            Ok(Arc::new(client))
        }
    }
}
