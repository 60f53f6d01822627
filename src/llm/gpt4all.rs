/// GPT4All local API server backend (OpenAI-style `POST /v1/completions`).
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BackendConfig, LanguageModel, LlmError, check_status};

pub struct Gpt4All {
    client: reqwest::Client,
    config: BackendConfig,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    text: String,
}

impl Gpt4All {
    pub fn new(config: BackendConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: config.client()?,
            config,
        })
    }
}

#[async_trait]
impl LanguageModel for Gpt4All {
    fn name(&self) -> &str {
        &self.config.model_id
    }

    fn context_window(&self) -> usize {
        self.config.n_ctx
    }

    fn max_tokens(&self) -> usize {
        self.config.max_tokens
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/v1/completions", self.config.endpoint);
        debug!("POST {url} ({} prompt chars)", prompt.len());

        let resp = self
            .client
            .post(&url)
            .json(&CompletionRequest {
                model: &self.config.model_id,
                prompt,
                max_tokens: self.config.max_tokens,
                temperature: 0.0,
            })
            .send()
            .await?;
        let body: CompletionResponse = check_status(resp).await?.json().await?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or(LlmError::EmptyResponse)
    }
}
