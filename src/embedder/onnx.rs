/// ONNX Runtime embedder using the `ort` crate.
///
/// Runs a BERT-style sentence-embedding model, mean-pools the last hidden
/// state with the attention mask and L2-normalizes the result.
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use serde::Deserialize;
use tracing::info;

use super::tokenizer::ModelTokenizer;
use super::{Embedder, EmbedderError};

/// The subset of a HuggingFace `config.json` the embedder needs.
#[derive(Debug, Deserialize)]
struct ModelConfigFile {
    hidden_size: usize,
    #[serde(default = "default_max_positions")]
    max_position_embeddings: usize,
}

fn default_max_positions() -> usize {
    512
}

/// ONNX-backed embedder implementing the `Embedder` trait.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: ModelTokenizer,
    dimensions: usize,
}

impl OnnxEmbedder {
    /// Load `model.onnx`, `tokenizer.json` and `config.json` from `model_dir`.
    pub fn new(model_dir: &Path) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join("model.onnx");
        if !model_path.exists() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model.onnx not found in {}",
                model_dir.display()
            )));
        }

        let config = read_model_config(model_dir)?;

        info!("Initializing ONNX Runtime...");
        let session = Session::builder()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder error: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load error: {e}")))?;

        let tokenizer = ModelTokenizer::from_model_dir(model_dir, config.max_position_embeddings)
            .map_err(|e| EmbedderError::TokenizerError(format!("{e:#}")))?;

        info!(
            "ONNX model loaded (hidden size {}, vocab size {})",
            config.hidden_size,
            tokenizer.vocab_size()
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimensions: config.hidden_size,
        })
    }
}

fn read_model_config(model_dir: &Path) -> Result<ModelConfigFile, EmbedderError> {
    let path = model_dir.join("config.json");
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        EmbedderError::ModelLoadFailed(format!("cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        EmbedderError::ModelLoadFailed(format!("cannot parse {}: {e}", path.display()))
    })
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let tokens = self
            .tokenizer
            .tokenize(text)
            .map_err(|e| EmbedderError::TokenizerError(format!("{e:#}")))?;
        let seq_len = tokens.input_ids.len();

        let input_ids = Tensor::from_array(([1usize, seq_len], tokens.input_ids))
            .map_err(|e| EmbedderError::InferenceFailed(format!("input_ids error: {e}")))?;
        let attention_mask =
            Tensor::from_array(([1usize, seq_len], tokens.attention_mask.clone())).map_err(
                |e| EmbedderError::InferenceFailed(format!("attention_mask error: {e}")),
            )?;
        let token_type_ids = Tensor::from_array(([1usize, seq_len], vec![0i64; seq_len]))
            .map_err(|e| EmbedderError::InferenceFailed(format!("token_type_ids error: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            ])
            .map_err(|e| EmbedderError::InferenceFailed(format!("inference failed: {e}")))?;

        // [1, seq_len, hidden_size]
        let (_shape, hidden) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;

        let pooled = mean_pooling(hidden, &tokens.attention_mask, self.dimensions);
        Ok(l2_normalize(pooled))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Average the token vectors of `hidden` whose attention mask is set.
fn mean_pooling(hidden: &[f32], attention_mask: &[i64], hidden_size: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden_size];
    let mut count = 0.0f32;

    for (token, &mask) in hidden.chunks_exact(hidden_size).zip(attention_mask) {
        if mask == 0 {
            continue;
        }
        count += 1.0;
        for (acc, v) in sum.iter_mut().zip(token) {
            *acc += v;
        }
    }

    if count > 0.0 {
        sum.iter_mut().for_each(|v| *v /= count);
    }
    sum
}

fn l2_normalize(mut vec: Vec<f32>) -> Vec<f32> {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vec.iter_mut().for_each(|v| *v /= norm);
    }
    vec
}
