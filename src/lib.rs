//! # ragserve — private document Q&A service
//!
//! Ingests a folder of documents into a local vector store and answers
//! questions about them with a locally served language model. Exposed as a
//! one-shot CLI and as an HTTP API with an OpenAI-style chat endpoint.
//!
//! ## Architecture
//!
//! - **[`config`]** — Environment settings, loaded once and validated
//! - **[`dispatch`]** — Action router (`ingest`, `query`, `status`) and shared context
//! - **[`worker`]** — Single-consumer background ingestion queue
//! - **[`ledger`]** — JSON task-status file with atomic rewrites
//! - **[`ingest`]** — Document loaders, text splitter and ingestion pipeline
//! - **[`embedder`]** — Text embedding via ONNX Runtime
//! - **[`store`]** — SQLite + sqlite-vec vector store
//! - **[`llm`]** — llama.cpp and GPT4All HTTP backends
//! - **[`query`]** — Retrieval, prompt stuffing and citations
//! - **[`server`]** — axum HTTP façade
//! - **[`response`]** — Uniform `{status, message, data}` result

pub mod config;
pub mod dispatch;
pub mod embedder;
pub mod ingest;
pub mod ledger;
pub mod llm;
pub mod query;
pub mod response;
pub mod server;
pub mod store;
pub mod worker;
