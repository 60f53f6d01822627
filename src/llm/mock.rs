/// Canned language model for tests.
use std::sync::Mutex;

use async_trait::async_trait;

use super::{LanguageModel, LlmError};

pub struct MockLanguageModel {
    reply: Result<String, String>,
    n_ctx: usize,
    prompts: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    /// A model that always answers `answer`.
    pub fn answering(answer: impl Into<String>) -> Self {
        Self {
            reply: Ok(answer.into()),
            n_ctx: 2048,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A model whose every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Err(message.into()),
            n_ctx: 2048,
            prompts: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_context_window(mut self, n_ctx: usize) -> Self {
        self.n_ctx = n_ctx;
        self
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    fn name(&self) -> &str {
        "mock"
    }

    fn context_window(&self) -> usize {
        self.n_ctx
    }

    fn max_tokens(&self) -> usize {
        64
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.reply.clone().map_err(LlmError::Other)
    }
}
