/// Embedder trait and shared types for text embedding.
pub mod download;
pub mod mock;
pub mod onnx;
pub mod tokenizer;

use std::sync::Arc;

use anyhow::Context;
use thiserror::Error;
use tracing::info;

use crate::config::Settings;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Fetch the configured embeddings model if needed and load it.
///
/// Blocking: downloads over HTTP and builds an ONNX session. Call it from
/// `spawn_blocking` when on the runtime.
pub fn load(settings: &Settings) -> anyhow::Result<Arc<dyn Embedder>> {
    let model_dir = download::model_dir(&settings.models_directory, &settings.embeddings_model_name);
    download::download_model_files(&settings.embeddings_model_name, &model_dir)
        .with_context(|| format!("failed to fetch {}", settings.embeddings_model_name))?;

    let embedder = onnx::OnnxEmbedder::new(&model_dir)
        .with_context(|| format!("failed to load {}", settings.embeddings_model_name))?;
    info!(
        "Embeddings model {} ready ({} dimensions)",
        settings.embeddings_model_name,
        embedder.dimensions()
    );
    Ok(Arc::new(embedder))
}
