/// Configuration module for ragserve.
///
/// Settings are read once at startup from the process environment (after an
/// optional `.env` file) into a validated [`Settings`] value. Variables the
/// query path needs are kept optional here and checked when a query runs, so
/// a missing model setting produces an error result instead of a dead server.
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info};

// ── Variable names ───────────────────────────────────────────────────

pub const PERSIST_DIRECTORY: &str = "PERSIST_DIRECTORY";
pub const EMBEDDINGS_MODEL_NAME: &str = "EMBEDDINGS_MODEL_NAME";
pub const MODEL_TYPE: &str = "MODEL_TYPE";
pub const MODEL_PATH: &str = "MODEL_PATH";
pub const MODEL_N_CTX: &str = "MODEL_N_CTX";
pub const MODEL_ENDPOINT: &str = "MODEL_ENDPOINT";
pub const MODEL_MAX_TOKENS: &str = "MODEL_MAX_TOKENS";
pub const MODEL_TIMEOUT_SECS: &str = "MODEL_TIMEOUT_SECS";
pub const SOURCE_DIRECTORY: &str = "SOURCE_DIRECTORY";
pub const TARGET_SOURCE_CHUNKS: &str = "TARGET_SOURCE_CHUNKS";
pub const CHUNK_SIZE: &str = "CHUNK_SIZE";
pub const CHUNK_OVERLAP: &str = "CHUNK_OVERLAP";
pub const MODELS_DIRECTORY: &str = "MODELS_DIRECTORY";
pub const TASKLIST_PATH: &str = "TASKLIST_PATH";
pub const INGEST_QUEUE_CAPACITY: &str = "INGEST_QUEUE_CAPACITY";
pub const SERVER_HOST: &str = "SERVER_HOST";
pub const SERVER_PORT: &str = "SERVER_PORT";

// ── Default value functions ──────────────────────────────────────────

fn default_source_directory() -> PathBuf {
    PathBuf::from("source_documents")
}

fn default_models_directory() -> PathBuf {
    PathBuf::from("models")
}

fn default_tasklist_path() -> PathBuf {
    PathBuf::from("tasklist.json")
}

fn default_target_source_chunks() -> usize {
    4
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_queue_capacity() -> usize {
    16
}

fn default_max_tokens() -> usize {
    256
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

// ── Settings structs ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Settings {
    pub persist_directory: PathBuf,
    pub embeddings_model_name: String,
    pub models_directory: PathBuf,
    pub source_directory: PathBuf,
    pub tasklist_path: PathBuf,
    pub target_source_chunks: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub ingest_queue_capacity: usize,
    pub model: ModelSettings,
    pub server: ServerSettings,
}

/// Raw model backend settings. Checked by [`crate::llm::select`] at query time.
#[derive(Debug, Clone, Default)]
pub struct ModelSettings {
    pub model_type: Option<String>,
    pub model_path: Option<String>,
    pub n_ctx: Option<String>,
    pub endpoint: Option<String>,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

// ── Settings implementation ──────────────────────────────────────────

impl Settings {
    /// Load settings from the process environment, reading `.env` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenv::dotenv() {
            Ok(path) => info!("Loaded environment from {}", path.display()),
            Err(e) => debug!("No .env file loaded: {e}"),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let persist_directory = get(PERSIST_DIRECTORY).ok_or(ConfigError::Missing(PERSIST_DIRECTORY))?;
        let embeddings_model_name =
            get(EMBEDDINGS_MODEL_NAME).ok_or(ConfigError::Missing(EMBEDDINGS_MODEL_NAME))?;

        let settings = Self {
            persist_directory: absolutize(Path::new(&persist_directory)),
            embeddings_model_name,
            models_directory: get(MODELS_DIRECTORY)
                .map(PathBuf::from)
                .unwrap_or_else(default_models_directory),
            source_directory: get(SOURCE_DIRECTORY)
                .map(PathBuf::from)
                .unwrap_or_else(default_source_directory),
            tasklist_path: get(TASKLIST_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(default_tasklist_path),
            target_source_chunks: parse_or(&get, TARGET_SOURCE_CHUNKS, default_target_source_chunks)?,
            chunk_size: parse_or(&get, CHUNK_SIZE, default_chunk_size)?,
            chunk_overlap: parse_or(&get, CHUNK_OVERLAP, default_chunk_overlap)?,
            ingest_queue_capacity: parse_or(&get, INGEST_QUEUE_CAPACITY, default_queue_capacity)?,
            model: ModelSettings {
                model_type: get(MODEL_TYPE),
                model_path: get(MODEL_PATH),
                n_ctx: get(MODEL_N_CTX),
                endpoint: get(MODEL_ENDPOINT),
                max_tokens: parse_or(&get, MODEL_MAX_TOKENS, default_max_tokens)?,
                timeout_secs: parse_or(&get, MODEL_TIMEOUT_SECS, default_timeout_secs)?,
            },
            server: ServerSettings {
                host: get(SERVER_HOST).unwrap_or_else(default_host),
                port: parse_or(&get, SERVER_PORT, default_port)?,
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate numeric settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Validation("CHUNK_SIZE must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Validation(format!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.target_source_chunks == 0 {
            return Err(ConfigError::Validation(
                "TARGET_SOURCE_CHUNKS must be positive".into(),
            ));
        }
        if self.ingest_queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "INGEST_QUEUE_CAPACITY must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Path of the SQLite vector store inside the persist directory.
    #[must_use]
    pub fn vector_db_path(&self) -> PathBuf {
        self.persist_directory.join("vectors.db")
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn parse_or<T, G, D>(get: &G, var: &'static str, default: D) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
    D: FnOnce() -> T,
{
    match get(var) {
        None => Ok(default()),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

// ── Tests ────────────────────────────────────────────────────────────
