/// Wrapper around the HuggingFace `tokenizers` crate for the ONNX embedder.
use std::path::Path;

use anyhow::Result;
use tokenizers::Tokenizer;

pub struct ModelTokenizer {
    inner: Tokenizer,
}

/// Model inputs for one text.
#[derive(Debug, Clone)]
pub struct TokenizerOutput {
    pub input_ids: Vec<i64>,
    /// 1 for real tokens, 0 for padding.
    pub attention_mask: Vec<i64>,
}

impl ModelTokenizer {
    /// Load `tokenizer.json` from `model_dir`, truncating inputs to `max_length` tokens.
    pub fn from_model_dir(model_dir: &Path, max_length: usize) -> Result<Self> {
        let tokenizer_path = model_dir.join("tokenizer.json");
        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {}",
            model_dir.display()
        );

        let mut inner = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        inner
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("invalid truncation settings: {e}"))?;
        // Single-text encoding; padding is not needed
        inner.with_padding(None);

        Ok(Self { inner })
    }

    pub fn tokenize(&self, text: &str) -> Result<TokenizerOutput> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("failed to encode text: {e}"))?;

        Ok(TokenizerOutput {
            input_ids: encoding.get_ids().iter().map(|&id| i64::from(id)).collect(),
            attention_mask: encoding
                .get_attention_mask()
                .iter()
                .map(|&m| i64::from(m))
                .collect(),
        })
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenizer_missing_file() {
        assert!(ModelTokenizer::from_model_dir(Path::new("/nonexistent/path"), 512).is_err());
    }
}
