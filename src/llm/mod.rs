/// Language model backends.
///
/// Generation is delegated to a locally served model over HTTP. The backend
/// is chosen from `MODEL_TYPE` once at startup; a bad model configuration is
/// kept as an error and reported by every query instead of stopping the
/// server.
pub mod gpt4all;
pub mod llama_cpp;
pub mod mock;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{MODEL_N_CTX, MODEL_PATH, MODEL_TYPE, ModelSettings};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Model {0} not supported!")]
    Unsupported(String),

    #[error("Error reading configuration: missing {0}")]
    MissingSetting(&'static str),

    #[error("Error reading configuration: invalid {var} {value:?}")]
    InvalidSetting { var: &'static str, value: String },

    #[error("model backend returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("model backend request failed")]
    Http(#[from] reqwest::Error),

    #[error("model backend returned no text")]
    EmptyResponse,

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    LlamaCpp,
    Gpt4All,
}

impl ModelType {
    #[must_use]
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Self::LlamaCpp => "http://127.0.0.1:8080",
            Self::Gpt4All => "http://127.0.0.1:4891",
        }
    }
}

impl FromStr for ModelType {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LlamaCpp" => Ok(Self::LlamaCpp),
            "GPT4All" => Ok(Self::Gpt4All),
            other => Err(LlmError::Unsupported(other.to_string())),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LlamaCpp => f.write_str("LlamaCpp"),
            Self::Gpt4All => f.write_str("GPT4All"),
        }
    }
}

/// Connection and sizing parameters shared by the HTTP backends.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub endpoint: String,
    /// File name of `MODEL_PATH`, sent as the model id.
    pub model_id: String,
    pub n_ctx: usize,
    pub max_tokens: usize,
    pub timeout: Duration,
}

impl BackendConfig {
    /// Check the query-time model settings and resolve the backend type.
    pub fn from_settings(settings: &ModelSettings) -> Result<(ModelType, Self), LlmError> {
        let model_type: ModelType = settings
            .model_type
            .as_deref()
            .ok_or(LlmError::MissingSetting(MODEL_TYPE))?
            .parse()?;

        let model_path = settings
            .model_path
            .as_deref()
            .ok_or(LlmError::MissingSetting(MODEL_PATH))?;
        let raw_ctx = settings
            .n_ctx
            .as_deref()
            .ok_or(LlmError::MissingSetting(MODEL_N_CTX))?;
        let n_ctx = raw_ctx
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| LlmError::InvalidSetting {
                var: MODEL_N_CTX,
                value: raw_ctx.to_string(),
            })?;

        let endpoint = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| model_type.default_endpoint().to_string());

        Ok((
            model_type,
            Self {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                model_id: model_id(model_path),
                n_ctx,
                max_tokens: settings.max_tokens,
                timeout: Duration::from_secs(settings.timeout_secs),
            },
        ))
    }

    fn client(&self) -> Result<reqwest::Client, LlmError> {
        Ok(reqwest::Client::builder().timeout(self.timeout).build()?)
    }
}

/// The model id the backends know a model file by.
#[must_use]
pub fn model_id(model_path: &str) -> String {
    Path::new(model_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| model_path.to_string())
}

/// A text-completion model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model id reported to chat clients.
    fn name(&self) -> &str;

    /// Context window in tokens.
    fn context_window(&self) -> usize;

    /// Tokens reserved for the answer.
    fn max_tokens(&self) -> usize;

    /// Complete `prompt` and return the generated text.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Build the backend named by `MODEL_TYPE`.
pub fn select(settings: &ModelSettings) -> Result<Arc<dyn LanguageModel>, LlmError> {
    let (model_type, config) = BackendConfig::from_settings(settings)?;
    tracing::info!(
        "Using {model_type} backend at {} (model {}, n_ctx {})",
        config.endpoint,
        config.model_id,
        config.n_ctx
    );
    Ok(match model_type {
        ModelType::LlamaCpp => Arc::new(llama_cpp::LlamaCpp::new(config)?),
        ModelType::Gpt4All => Arc::new(gpt4all::Gpt4All::new(config)?),
    })
}

/// Turn a non-2xx response into [`LlmError::Status`].
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(LlmError::Status { status, body })
}
