/// Mock embedder for testing purposes.
///
/// Generates deterministic embeddings based on text hash.
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError};

/// A mock embedder that produces deterministic vectors from text hashes.
///
/// Useful for testing without loading a real ONNX model.
pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let bytes = hasher.finish().to_le_bytes();

        // Centre around zero so unrelated texts are not all near-parallel
        let mut embedding: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                let b = bytes[i % 8].rotate_left((i / 8) as u32 % 8);
                f32::from(b) / 255.0 - 0.5
            })
            .collect();

        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_embed_dimensions() {
        let embedder = MockEmbedder::new(384);
        assert_eq!(embedder.embed("hello world").unwrap().len(), 384);
    }

    #[test]
    fn test_mock_embed_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("hello").unwrap();
        let b = embedder.embed("hello").unwrap();
        assert_eq!(a, b, "same input should produce same output");
        assert_ne!(a, embedder.embed("world").unwrap());
    }

    #[test]
    fn test_mock_embed_normalized() {
        let embedder = MockEmbedder::new(32);
        let vec = embedder.embed("test normalization").unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01, "got norm {norm}");
    }

    #[test]
    fn test_mock_embed_batch() {
        let embedder = MockEmbedder::new(16);
        let results = embedder.embed_batch(&["a", "b", "c"]).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|v| v.len() == 16));
    }
}
