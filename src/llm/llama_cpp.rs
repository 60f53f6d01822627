/// llama.cpp server backend (`POST /completion`).
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BackendConfig, LanguageModel, LlmError, check_status};

pub struct LlamaCpp {
    client: reqwest::Client,
    config: BackendConfig,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: usize,
    temperature: f32,
    stop: Vec<String>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: String,
}

impl LlamaCpp {
    pub fn new(config: BackendConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: config.client()?,
            config,
        })
    }
}

#[async_trait]
impl LanguageModel for LlamaCpp {
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
        let url = format!("{}/completion", self.config.endpoint);
        debug!("POST {url} ({} prompt chars)", prompt.len());

        let resp = self
            .client
            .post(&url)
            .json(&CompletionRequest {
                prompt,
                n_predict: self.config.max_tokens,
                temperature: 0.0,
                stop: Vec::new(),
            })
            .send()
            .await?;
        let body: CompletionResponse = check_status(resp).await?.json().await?;
        Ok(body.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;

    fn config(endpoint: String) -> BackendConfig {
        BackendConfig {
            endpoint,
            model_id: "llama.gguf".into(),
            n_ctx: 2048,
            max_tokens: 64,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_generate() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/completion")
            .match_body(Matcher::PartialJson(json!({
                "prompt": "Question: why?",
                "n_predict": 64,
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content": " Because.", "stop": true}"#)
            .create_async()
            .await;

        let model = LlamaCpp::new(config(server.url())).unwrap();
        let answer = model.generate("Question: why?").await.unwrap();
        assert_eq!(answer, " Because.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/completion")
            .with_status(503)
            .with_body("loading model")
            .create_async()
            .await;

        let model = LlamaCpp::new(config(server.url())).unwrap();
        let err = model.generate("hi").await.unwrap_err();
        match err {
            LlmError::Status { status, body } => {
                assert_eq!(status.as_u16(), 503);
                assert_eq!(body, "loading model");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
